//! Runtime error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Normalized non-2xx provider response.
///
/// `raw_body` is always redacted before it is stored here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderError {
    pub provider: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    pub message: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_body: String,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} api error (status {})", self.provider, self.status_code)?;
        if !self.code.is_empty() {
            write!(f, " [{}]", self.code)?;
        }
        write!(f, ": {}", self.message)?;
        if !self.request_id.is_empty() {
            write!(f, " (request_id={})", self.request_id)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("{0}")]
    Usage(String),

    #[error("missing {what}: set one of {}", tried.join(", "))]
    MissingCredential { what: String, tried: Vec<String> },

    #[error("{0}")]
    Provider(Box<ProviderError>),

    #[error("network error: {0}")]
    Network(String),

    #[error("request cancelled: {0}")]
    Cancelled(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("{provider} circuit open for {subject:?}; retry in {retry_in_secs}s")]
    CircuitOpen {
        provider: String,
        subject: String,
        retry_in_secs: u64,
    },

    #[error("signing error: {0}")]
    Signing(String),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("settings error: {0}")]
    Config(#[from] si_config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    pub fn is_provider(&self) -> bool {
        matches!(self, Self::Provider(_))
    }

    pub fn is_missing_credential(&self) -> bool {
        matches!(self, Self::MissingCredential { .. })
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider(err) => Some(err),
            _ => None,
        }
    }

    /// JSON payload used by `--json` error output.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Provider(err) => serde_json::json!({ "error": err }),
            Self::MissingCredential { what, tried } => serde_json::json!({
                "error": {
                    "kind": "missing_credential",
                    "message": self.to_string(),
                    "what": what,
                    "tried": tried,
                }
            }),
            other => serde_json::json!({
                "error": {
                    "kind": other.kind(),
                    "message": crate::redact::redact(&other.to_string()),
                }
            }),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Usage(_) => "usage",
            Self::MissingCredential { .. } => "missing_credential",
            Self::Provider(_) => "provider",
            Self::Network(_) => "network",
            Self::Cancelled(_) => "cancelled",
            Self::Decode(_) => "decode",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Signing(_) => "signing",
            Self::Url(_) => "usage",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}

impl From<ProviderError> for RuntimeError {
    fn from(err: ProviderError) -> Self {
        Self::Provider(Box::new(err))
    }
}

impl From<reqwest::Error> for RuntimeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(crate::redact::redact(&err.to_string()))
        }
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

//! Resolved per-command execution context

use crate::error::{Result, RuntimeError};
use crate::spec::{AuthStyle, ProviderId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Deployment environment selecting which credential references apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Prod,
    Staging,
    Dev,
}

impl Environment {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "prod" | "production" => Ok(Self::Prod),
            "staging" | "stage" | "stg" => Ok(Self::Staging),
            "dev" | "development" => Ok(Self::Dev),
            other => Err(RuntimeError::usage(format!(
                "invalid environment {other:?} (expected prod|staging|dev)"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prod => "prod",
            Self::Staging => "staging",
            Self::Dev => "dev",
        }
    }

    /// Uppercase form used in env var keys (`PROD_ZONE_ID`).
    pub fn env_key(&self) -> &'static str {
        match self {
            Self::Prod => "PROD",
            Self::Staging => "STAGING",
            Self::Dev => "DEV",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Default)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub region: String,
    pub service: String,
}

#[derive(Clone)]
pub struct GitHubAppCredentials {
    pub app_id: String,
    pub private_key_pem: String,
    /// Empty when the installation must be discovered from the owner.
    pub installation_id: String,
    /// Account login used to discover the installation.
    pub owner: String,
}

#[derive(Clone)]
pub struct AppStoreCredentials {
    pub issuer_id: String,
    pub key_id: String,
    pub private_key_pem: String,
}

/// Credential material, one variant per auth style.
#[derive(Clone, Default)]
pub enum Credentials {
    #[default]
    None,
    Bearer(String),
    /// Token sent as `?<param>=<token>`.
    Query { param: String, token: String },
    /// Key sent as `?<param>=<key>`.
    ApiKey { param: String, key: String },
    Aws(AwsCredentials),
    GitHubApp(GitHubAppCredentials),
    AppStore(AppStoreCredentials),
}

impl Credentials {
    pub fn style(&self) -> AuthStyle {
        match self {
            Self::None => AuthStyle::None,
            Self::Bearer(_) => AuthStyle::Bearer,
            Self::Query { .. } => AuthStyle::Query,
            Self::ApiKey { .. } => AuthStyle::ApiKey,
            Self::Aws(_) => AuthStyle::Sigv4,
            Self::GitHubApp(_) => AuthStyle::AppInstallation,
            Self::AppStore(_) => AuthStyle::Jwt,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use crate::redact::preview_secret as p;
        match self {
            Self::None => f.write_str("None"),
            Self::Bearer(token) => write!(f, "Bearer({})", p(token)),
            Self::Query { param, token } => write!(f, "Query({param}={})", p(token)),
            Self::ApiKey { param, key } => write!(f, "ApiKey({param}={})", p(key)),
            Self::Aws(aws) => write!(
                f,
                "Aws(access_key_id={}, region={}, service={})",
                p(&aws.access_key_id),
                aws.region,
                aws.service
            ),
            Self::GitHubApp(app) => write!(
                f,
                "GitHubApp(app_id={}, installation_id={})",
                app.app_id, app.installation_id
            ),
            Self::AppStore(asc) => write!(f, "AppStore(issuer_id={}, key_id={})", asc.issuer_id, asc.key_id),
        }
    }
}

/// Everything one provider command needs: who, where, with what.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub provider: ProviderId,
    pub account_alias: String,
    pub environment: Environment,
    pub base_url: String,
    pub log_path: Option<PathBuf>,
    /// Comma-joined source tags of the values that were resolved.
    pub source: String,
    pub credentials: Credentials,
    /// Identifiers such as `project_id`, `account_id`, `zone_id`, `owner`.
    pub ids: BTreeMap<String, String>,
}

impl RuntimeContext {
    pub fn new(provider: ProviderId, base_url: impl Into<String>) -> Self {
        Self {
            provider,
            account_alias: String::new(),
            environment: Environment::Prod,
            base_url: base_url.into(),
            log_path: None,
            source: String::new(),
            credentials: Credentials::None,
            ids: BTreeMap::new(),
        }
    }

    pub fn id(&self, key: &str) -> Option<&str> {
        self.ids
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn set_id(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if !value.trim().is_empty() {
            self.ids.insert(key.to_string(), value.trim().to_string());
        }
    }

    /// Append a source tag, skipping empties and duplicates.
    pub fn add_source(&mut self, tag: &str) {
        let tag = tag.trim();
        if tag.is_empty() || self.source.split(',').any(|t| t == tag) {
            return;
        }
        if !self.source.is_empty() {
            self.source.push(',');
        }
        self.source.push_str(tag);
    }

    /// Context summary safe to print (no credential material).
    pub fn summary(&self) -> serde_json::Value {
        let mut out = serde_json::json!({
            "provider": self.provider,
            "account_alias": self.account_alias,
            "environment": self.environment,
            "base_url": self.base_url,
            "auth_style": self.credentials.style().as_str(),
            "source": self.source,
        });
        if let Some(map) = out.as_object_mut() {
            for (key, value) in &self.ids {
                map.insert(key.clone(), serde_json::Value::String(value.clone()));
            }
        }
        out
    }
}

//! Vault error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("vault identity missing: run `si vault keygen` or `si vault set` to bootstrap one")]
    IdentityMissing,

    #[error("invalid vault identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid vault scope {0:?}")]
    InvalidScope(String),

    #[error("dotenv line {line}: {message}")]
    Dotenv { line: usize, message: String },

    #[error("invalid key name {0:?} (expected [A-Za-z_][A-Za-z0-9_]*)")]
    InvalidKey(String),

    #[error("encrypt failed: {0}")]
    Encrypt(String),

    #[error("decrypt failed: {0}")]
    Decrypt(String),

    #[error(
        "vault scope {scope} comes from {origin} in repo {target_repo} while current repo is {cwd_repo}; pass --scope explicitly or set SI_VAULT_ALLOW_CROSS_REPO=1"
    )]
    CrossRepo {
        scope: String,
        origin: String,
        target_repo: String,
        cwd_repo: String,
    },

    #[error("vault key {key} changed concurrently (revision {expected} is stale); retry")]
    Conflict { key: String, expected: i64 },

    #[error("invalid {origin} {value:?} (expected sun)")]
    InvalidBackend { origin: String, value: String },

    #[error("sun vault {context} failed: {source}")]
    Sun {
        context: String,
        #[source]
        source: si_sun::SunError,
    },

    #[error("settings error: {0}")]
    Settings(#[from] si_config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    pub(crate) fn sun(context: impl Into<String>) -> impl FnOnce(si_sun::SunError) -> Self {
        let context = context.into();
        move |source| Self::Sun { context, source }
    }
}

impl From<si_sun::SunError> for VaultError {
    fn from(source: si_sun::SunError) -> Self {
        Self::Sun {
            context: "request".to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("home directory not found (set SI_SETTINGS_HOME)")]
    HomeNotFound,

    #[error("settings file {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{provider}.default_account {alias:?} does not name a configured account")]
    InvalidDefaultAccount { provider: String, alias: String },

    #[error("unknown provider section: {0}")]
    UnknownProvider(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

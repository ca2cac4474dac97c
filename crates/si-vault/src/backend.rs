//! Vault sync backend selection
//!
//! Sun is the only backend. Older mode names still parse so existing settings
//! keep working, but all of them resolve to sun.

use crate::error::{Result, VaultError};
use si_config::Settings;

pub const BACKEND_ENV: &str = "SI_VAULT_SYNC_BACKEND";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncBackend {
    Sun,
}

impl SyncBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sun => "sun",
        }
    }

    /// Accepts `sun` and the legacy `cloud`, `dual`, `both`, `git`, `local`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sun" | "cloud" | "dual" | "both" | "git" | "local" => Some(Self::Sun),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effective backend and the slot it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResolution {
    pub mode: SyncBackend,
    /// `env`, `settings` or `default`.
    pub source: &'static str,
}

impl BackendResolution {
    pub fn sun_backup_enabled(&self) -> bool {
        self.mode == SyncBackend::Sun
    }

    pub fn sun_backup_strict(&self) -> bool {
        self.mode == SyncBackend::Sun
    }
}

pub fn resolve_backend(settings: &Settings) -> Result<BackendResolution> {
    if let Ok(raw) = std::env::var(BACKEND_ENV)
        && !raw.trim().is_empty()
    {
        let mode = SyncBackend::parse(&raw).ok_or_else(|| VaultError::InvalidBackend {
            origin: BACKEND_ENV.to_string(),
            value: raw.trim().to_string(),
        })?;
        return Ok(BackendResolution { mode, source: "env" });
    }
    let configured = settings.vault.sync_backend.trim();
    if !configured.is_empty() {
        let mode = SyncBackend::parse(configured).ok_or_else(|| VaultError::InvalidBackend {
            origin: "vault.sync_backend".to_string(),
            value: configured.to_string(),
        })?;
        return Ok(BackendResolution {
            mode,
            source: "settings",
        });
    }
    Ok(BackendResolution {
        mode: SyncBackend::Sun,
        source: "default",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_resolution_order() {
        let mut settings = Settings::default();
        temp_env::with_var(BACKEND_ENV, None::<&str>, || {
            let r = resolve_backend(&settings).unwrap();
            assert_eq!((r.mode, r.source), (SyncBackend::Sun, "default"));

            settings.vault.sync_backend = "git".to_string();
            let r = resolve_backend(&settings).unwrap();
            assert_eq!((r.mode, r.source), (SyncBackend::Sun, "settings"));
            assert!(r.sun_backup_enabled() && r.sun_backup_strict());
        });
        temp_env::with_var(BACKEND_ENV, Some(" Dual "), || {
            let r = resolve_backend(&settings).unwrap();
            assert_eq!(r.source, "env");
        });
    }

    #[test]
    #[serial]
    fn test_invalid_values() {
        let mut settings = Settings::default();
        temp_env::with_var(BACKEND_ENV, Some("s3"), || {
            let err = resolve_backend(&settings).unwrap_err();
            assert_eq!(err.to_string(), "invalid SI_VAULT_SYNC_BACKEND \"s3\" (expected sun)");
        });
        settings.vault.sync_backend = "ftp".to_string();
        temp_env::with_var(BACKEND_ENV, None::<&str>, || {
            let err = resolve_backend(&settings).unwrap_err();
            assert_eq!(err.to_string(), "invalid vault.sync_backend \"ftp\" (expected sun)");
        });
    }
}

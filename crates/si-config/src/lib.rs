//! si settings
//!
//! Loads and persists the per-user settings document that holds the
//! provider account registry, the sun endpoint, and vault defaults.
//!
//! # Location
//!
//! `<SI_SETTINGS_HOME or $HOME>/.si/settings.json`. Provider audit logs live
//! beside it under `.si/logs/`.
//!
//! # Persistence
//!
//! Writes go to a temp file in the same directory which is then renamed over
//! the target. Callers are assumed to be a single user; concurrent writers
//! are last-writer-wins.

pub mod error;
pub mod settings;

pub use error::{ConfigError, Result};
pub use settings::{
    AccountEntry, PROVIDER_SECTIONS, ProviderSettings, ResolverSettings, Settings, SunSettings,
    VaultSettings,
};

use std::io::Write;
use std::path::{Path, PathBuf};

/// Base directory holding `.si/`.
pub fn settings_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("SI_SETTINGS_HOME") {
        let home = home.trim();
        if !home.is_empty() {
            return Ok(PathBuf::from(home));
        }
    }
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

/// `~/.si`
pub fn si_dir() -> Result<PathBuf> {
    Ok(settings_home()?.join(".si"))
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(si_dir()?.join("settings.json"))
}

/// Directory for provider JSONL logs.
pub fn logs_dir() -> Result<PathBuf> {
    Ok(si_dir()?.join("logs"))
}

impl Settings {
    /// Load settings from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&settings_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("settings file {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Persist settings to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&settings_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let mut body = serde_json::to_vec_pretty(self)?;
        body.push(b'\n');
        write_atomic(path, &body)?;
        tracing::debug!("settings saved to {}", path.display());
        Ok(())
    }
}

/// Write `data` to `path` via temp file + rename. Files are 0600, new parent
/// directories 0700.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    create_private_dir(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "settings".to_string());
    let tmp = dir.join(format!(".{}.tmp-{}", file_name, std::process::id()));

    let result = (|| -> Result<()> {
        let mut file = open_private(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

/// Create a directory tree, restricting new directories to the owner.
pub fn create_private_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Open (create/truncate) a file readable only by the owner.
pub fn open_private(path: &Path) -> Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    Ok(options.open(path)?)
}

/// Open a file for appending, creating it readable only by the owner.
pub fn open_private_append(path: &Path) -> Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.append(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    Ok(options.open(path)?)
}

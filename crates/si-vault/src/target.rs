//! Vault target resolution and the cross-repo guard

use crate::error::{Result, VaultError};
use crate::scope::normalize_scope;
use si_config::Settings;
use std::path::{Path, PathBuf};

/// Where a vault command reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultTarget {
    pub scope: String,
    /// `--scope` was passed.
    pub file_is_explicit: bool,
    pub cwd: PathBuf,
    /// Git root of `cwd`, if any.
    pub repo_root: String,
    /// Slot the scope came from: `flag`, `env:SI_VAULT_SCOPE`, `settings.vault.file`, `default`.
    pub origin: String,
    /// Raw setting when it named a filesystem path (legacy dotenv file).
    pub source_path: Option<PathBuf>,
}

/// `git rev-parse --show-toplevel` in `dir`.
pub fn git_root(dir: &Path) -> Option<PathBuf> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(dir)
        .stderr(std::process::Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!root.is_empty()).then(|| PathBuf::from(root))
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn expand_home(raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("~/") {
        return si_config::settings_home().ok().map(|home| home.join(rest));
    }
    let path = Path::new(raw);
    path.is_absolute().then(|| path.to_path_buf())
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Scope chain: `--scope` flag, `SI_VAULT_SCOPE`, `SI_VAULT_FILE`,
/// `settings.vault.file`, `default`.
pub fn resolve_target(settings: &Settings, scope_flag: &str) -> Result<VaultTarget> {
    let cwd = std::env::current_dir()?;
    let repo_root = git_root(&cwd)
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    let (raw, origin) = if !scope_flag.trim().is_empty() {
        (scope_flag.trim().to_string(), "flag".to_string())
    } else if let Some(value) = env_value("SI_VAULT_SCOPE") {
        (value, "env:SI_VAULT_SCOPE".to_string())
    } else if let Some(value) = env_value("SI_VAULT_FILE") {
        (value, "env:SI_VAULT_FILE".to_string())
    } else if !settings.vault.file.trim().is_empty() {
        (settings.vault.file.trim().to_string(), "settings.vault.file".to_string())
    } else {
        (String::new(), "default".to_string())
    };

    let target = VaultTarget {
        scope: normalize_scope(&raw),
        file_is_explicit: origin == "flag",
        cwd,
        repo_root,
        source_path: expand_home(&raw),
        origin,
    };
    tracing::debug!(scope = target.scope.as_str(), origin = target.origin.as_str(), "resolved vault target");
    Ok(target)
}

impl VaultTarget {
    /// Explicit target for `scope` in `cwd`, without consulting settings.
    pub fn explicit(scope: &str, cwd: PathBuf) -> Self {
        let repo_root = git_root(&cwd)
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        Self {
            scope: normalize_scope(scope),
            file_is_explicit: true,
            cwd,
            repo_root,
            origin: "flag".to_string(),
            source_path: None,
        }
    }

    /// Refuse an implicit target whose configured path lives in another git
    /// repo than the working directory.
    pub fn guard_repo_scope(&self) -> Result<()> {
        if self.file_is_explicit {
            return Ok(());
        }
        if std::env::var("SI_VAULT_ALLOW_CROSS_REPO").is_ok_and(|v| is_truthy(&v)) {
            return Ok(());
        }
        if self.repo_root.is_empty() {
            return Ok(());
        }
        let Some(path) = &self.source_path else {
            return Ok(());
        };
        let probe = if path.is_dir() {
            path.clone()
        } else {
            match path.parent() {
                Some(parent) if parent.is_dir() => parent.to_path_buf(),
                _ => return Ok(()),
            }
        };
        let Some(target_repo) = git_root(&probe) else {
            return Ok(());
        };
        let cwd_repo = canonical(Path::new(&self.repo_root));
        let target_repo = canonical(&target_repo);
        if cwd_repo == target_repo {
            return Ok(());
        }
        Err(VaultError::CrossRepo {
            scope: self.scope.clone(),
            origin: self.origin.clone(),
            target_repo: target_repo.display().to_string(),
            cwd_repo: cwd_repo.display().to_string(),
        })
    }
}

//! JSON-lines audit log of provider calls

use crate::redact::{redact, sanitize_url};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CacheHit,
    Response,
    Error,
}

/// One line of a provider log file.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub ts: String,
    pub event: EventKind,
    pub provider: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub account: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub environment: String,
    pub method: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    pub duration_ms: u64,
    pub attempt: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl Event {
    pub fn new(event: EventKind, provider: &str, method: &str, url: &str) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event,
            provider: provider.to_string(),
            account: String::new(),
            environment: String::new(),
            method: method.to_string(),
            url: url.to_string(),
            status_code: None,
            request_id: String::new(),
            duration_ms: 0,
            attempt: 0,
            error: String::new(),
        }
    }

    /// Redact every string field; the URL also loses its query string.
    pub fn redacted(mut self) -> Self {
        self.provider = redact(&self.provider);
        self.account = redact(&self.account);
        self.environment = redact(&self.environment);
        self.method = redact(&self.method);
        self.url = sanitize_url(&self.url);
        self.request_id = redact(&self.request_id);
        self.error = redact(&self.error);
        self
    }
}

/// Append `event` (redacted) to `path`, creating the file 0600 and its
/// parent directory 0700.
pub fn append(path: &Path, event: Event) -> std::io::Result<()> {
    let line = serde_json::to_string(&event.redacted()).map_err(std::io::Error::other)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        si_config::create_private_dir(parent).map_err(std::io::Error::other)?;
    }
    let mut file = si_config::open_private_append(path).map_err(std::io::Error::other)?;
    writeln!(file, "{line}")
}

/// Like [`append`], but failures only produce a warning.
pub fn record(path: Option<&Path>, event: Event) {
    let Some(path) = path else {
        return;
    };
    if let Err(e) = append(path, event) {
        tracing::warn!(path = %path.display(), "failed to write provider log: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_writes_redacted_jsonl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("github.log");

        let mut event = Event::new(
            EventKind::Error,
            "github",
            "GET",
            "https://api.github.com/user?access_token=abc123",
        );
        event.error = "401: Bearer ghp_secret".to_string();
        event.attempt = 1;
        append(&path, event).unwrap();
        append(&path, Event::new(EventKind::Response, "github", "GET", "https://api.github.com/meta")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "error");
        assert_eq!(first["url"], "https://api.github.com/user");
        assert!(!lines[0].contains("ghp_secret"));
        assert!(!lines[0].contains("abc123"));
    }

    #[cfg(unix)]
    #[test]
    fn test_log_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let logs = dir.path().join("logs");
        let path = logs.join("cloudflare.log");
        append(&path, Event::new(EventKind::Response, "cloudflare", "GET", "https://x/y")).unwrap();
        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        let dir_mode = std::fs::metadata(&logs).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        assert_eq!(dir_mode, 0o700);
    }
}

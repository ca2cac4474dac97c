//! Short-lived response cache for safe provider reads

use crate::netpolicy::is_safe_method;
use crate::spec::ProviderId;
use reqwest::StatusCode;
use reqwest::header::{CACHE_CONTROL, HeaderMap};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    provider: ProviderId,
    subject: String,
    method: String,
    url: String,
}

impl CacheKey {
    fn new(provider: ProviderId, subject: &str, method: &str, url: &str) -> Self {
        Self {
            provider,
            subject: subject.trim().to_string(),
            method: method.trim().to_ascii_uppercase(),
            url: url.trim().to_string(),
        }
    }
}

/// A cached response, replayed through the normalizer on hit.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<CacheKey, CachedResponse>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(
        &self,
        provider: ProviderId,
        subject: &str,
        method: &str,
        url: &str,
    ) -> Option<CachedResponse> {
        if !is_safe_method(method) {
            return None;
        }
        let key = CacheKey::new(provider, subject, method, url);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(&key)?;
        if Instant::now() >= entry.expires_at {
            entries.remove(&key);
            return None;
        }
        Some(entry.clone())
    }

    /// Store a successful response. Unsafe methods, zero TTLs and
    /// `Cache-Control: no-store` responses are skipped.
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &self,
        provider: ProviderId,
        subject: &str,
        method: &str,
        url: &str,
        status: StatusCode,
        headers: &HeaderMap,
        body: &str,
        ttl: Duration,
    ) -> bool {
        if ttl.is_zero() || !is_safe_method(method) || no_store(headers) {
            return false;
        }
        let key = CacheKey::new(provider, subject, method, url);
        let entry = CachedResponse {
            status,
            headers: headers.clone(),
            body: body.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, entry);
        true
    }

    /// Drop every entry for `(provider, subject)`.
    pub fn invalidate(&self, provider: ProviderId, subject: &str) {
        let subject = subject.trim();
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|key, _| !(key.provider == provider && key.subject == subject));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn no_store(headers: &HeaderMap) -> bool {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("no-store"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    const TTL: Duration = Duration::from_secs(15);
    const URL: &str = "https://api.github.com/repos/acme/repo";

    #[test]
    fn test_store_lookup_invalidate() {
        let cache = ResponseCache::new();
        assert!(cache.store(
            ProviderId::Github,
            "core",
            "GET",
            URL,
            StatusCode::OK,
            &HeaderMap::new(),
            r#"{"ok":true}"#,
            TTL
        ));
        let hit = cache.lookup(ProviderId::Github, "core", "get", URL).unwrap();
        assert_eq!(hit.status, StatusCode::OK);
        assert_eq!(hit.body, r#"{"ok":true}"#);

        cache.invalidate(ProviderId::Github, "core");
        assert!(cache.lookup(ProviderId::Github, "core", "GET", URL).is_none());
    }

    #[test]
    fn test_invalidate_is_subject_scoped() {
        let cache = ResponseCache::new();
        let headers = HeaderMap::new();
        cache.store(ProviderId::Github, "core", "GET", URL, StatusCode::OK, &headers, "a", TTL);
        cache.store(ProviderId::Github, "billing", "GET", URL, StatusCode::OK, &headers, "b", TTL);
        cache.invalidate(ProviderId::Github, "core");
        assert!(cache.lookup(ProviderId::Github, "core", "GET", URL).is_none());
        assert!(cache.lookup(ProviderId::Github, "billing", "GET", URL).is_some());
    }

    #[test]
    fn test_skips_no_store_and_unsafe() {
        let cache = ResponseCache::new();
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("private, no-store"));
        assert!(!cache.store(ProviderId::Github, "core", "GET", URL, StatusCode::OK, &headers, "x", TTL));
        assert!(!cache.store(
            ProviderId::Github,
            "core",
            "POST",
            URL,
            StatusCode::OK,
            &HeaderMap::new(),
            "x",
            TTL
        ));
        assert!(!cache.store(
            ProviderId::Workos,
            "core",
            "GET",
            URL,
            StatusCode::OK,
            &HeaderMap::new(),
            "x",
            Duration::ZERO
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entries_expire() {
        let cache = ResponseCache::new();
        cache.store(
            ProviderId::Github,
            "core",
            "GET",
            URL,
            StatusCode::OK,
            &HeaderMap::new(),
            "x",
            Duration::from_millis(10),
        );
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.lookup(ProviderId::Github, "core", "GET", URL).is_none());
        assert!(cache.is_empty());
    }
}

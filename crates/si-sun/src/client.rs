//! Sun object-store client
//!
//! Thin typed wrapper over the `/v1` HTTP API. Every call carries the bearer
//! token; transient failures are retried a few times with a short backoff.

use crate::error::{Result, SunError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Method;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use si_config::Settings;
use si_runtime::netpolicy::parse_retry_after;
use si_runtime::redact::redact;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const MAX_TOKEN_LEN: usize = 256;

const MAX_ATTEMPTS: u32 = 4;
const BASE_DELAY: Duration = Duration::from_millis(200);
const MAX_DELAY: Duration = Duration::from_secs(2);

const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Whoami {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub account_slug: String,
    #[serde(default)]
    pub token_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub latest_revision: i64,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub size_bytes: i64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Revision {
    #[serde(default)]
    pub revision: i64,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub size_bytes: i64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PutResult {
    #[serde(default)]
    pub result: PutResultBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PutResultBody {
    #[serde(default)]
    pub object: ObjectMeta,
    #[serde(default)]
    pub revision: Revision,
}

impl PutResult {
    /// Revision created by the write.
    pub fn revision(&self) -> i64 {
        if self.result.object.latest_revision > 0 {
            self.result.object.latest_revision
        } else {
            self.result.revision.revision
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(default)]
    pub token_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expires_at: String,
    #[serde(default)]
    pub revoked_at: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub last_used_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenAccount {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub slug: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssuedToken {
    #[serde(default)]
    pub account: TokenAccount,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub token_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expires_at: String,
    #[serde(default)]
    pub issued_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub token_id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub revision: i64,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
struct Items<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Serialize)]
struct PutBody<'a> {
    content_type: &'a str,
    payload_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected_revision: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

/// Typed client over the sun `/v1` API.
#[derive(Debug, Clone)]
pub struct SunClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn is_local_host(host: &str) -> bool {
    matches!(
        host.trim_start_matches('[').trim_end_matches(']'),
        "localhost" | "127.0.0.1" | "::1"
    )
}

fn validate_base_url(raw: &str) -> Result<String> {
    let base = raw.trim().trim_end_matches('/').to_string();
    if base.is_empty() {
        return Err(SunError::Config(
            "sun base url is required (set settings.sun.base_url or SI_SUN_BASE_URL)".to_string(),
        ));
    }
    let parsed = url::Url::parse(&base)
        .map_err(|e| SunError::Config(format!("invalid sun base url {base:?}: {e}")))?;
    match parsed.scheme() {
        "https" => Ok(base),
        "http" => {
            let allow = env_value("SI_SUN_ALLOW_INSECURE_HTTP").is_some_and(|v| is_truthy(&v));
            if allow || parsed.host_str().is_some_and(is_local_host) {
                Ok(base)
            } else {
                Err(SunError::Config(
                    "sun base url must use https for non-local hosts (set SI_SUN_ALLOW_INSECURE_HTTP=1 to override)"
                        .to_string(),
                ))
            }
        }
        other => Err(SunError::Config(format!(
            "sun base url scheme {other:?} is not supported"
        ))),
    }
}

fn validate_token(raw: &str) -> Result<String> {
    let token = raw.trim();
    if token.is_empty() {
        return Err(SunError::Config(
            "sun token is required (run `si sun auth login` or set SI_SUN_TOKEN)".to_string(),
        ));
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(SunError::Config("sun token is too long".to_string()));
    }
    if token.chars().any(|c| c <= ' ' || c == '\u{7f}') {
        return Err(SunError::Config(
            "sun token must not contain whitespace or control characters".to_string(),
        ));
    }
    Ok(token.to_string())
}

fn retry_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(wait) = retry_after.filter(|d| !d.is_zero()) {
        return wait.min(MAX_DELAY);
    }
    let factor = 1u32 << attempt.saturating_sub(1).min(8);
    (BASE_DELAY * factor).min(MAX_DELAY)
}

fn is_retryable(status: u16) -> bool {
    matches!(status, 408 | 425 | 429) || (500..=599).contains(&status)
}

fn status_error(status: reqwest::StatusCode, body: &[u8]) -> SunError {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if status.as_u16() == 403 && text.contains("error code: 1010") {
        return SunError::Status {
            status: 403,
            message: "access denied by cloudflare (error 1010); check firewall/bot rules for this client IP and user-agent"
                .to_string(),
        };
    }
    let message = serde_json::from_str::<ErrorBody>(text)
        .ok()
        .map(|b| b.error.trim().to_string())
        .filter(|m| !m.is_empty())
        .or_else(|| (!text.is_empty()).then(|| text.chars().take(512).collect()))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_ascii_lowercase()
        });
    SunError::Status {
        status: status.as_u16(),
        message: redact(&message),
    }
}

impl SunClient {
    /// Validated client. Plain http is accepted only for local hosts or with
    /// `SI_SUN_ALLOW_INSECURE_HTTP`.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let base_url = validate_base_url(base_url)?;
        let token = validate_token(token)?;
        let timeout = if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout };
        let http = si_runtime::client::shared_client(timeout)
            .map_err(|e| SunError::Network(e.to_string()))?;
        Ok(Self {
            base_url,
            token,
            http,
        })
    }

    /// `SI_SUN_BASE_URL` / `SI_SUN_TOKEN` override the settings values.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = env_value("SI_SUN_BASE_URL").unwrap_or_else(|| settings.sun.base_url.trim().to_string());
        let token = env_value("SI_SUN_TOKEN").unwrap_or_else(|| settings.sun.token.trim().to_string());
        let timeout = settings
            .sun
            .timeout_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        Self::new(&base_url, &token, timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<url::Url> {
        let mut url = url::Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| SunError::Config(format!("invalid sun url: {e}")))?;
        let pairs: Vec<_> = query.iter().filter(|(_, v)| !v.is_empty()).collect();
        if !pairs.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (key, value) in pairs {
                qp.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: url::Url,
        body: Option<&Value>,
        authenticated: bool,
    ) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .header(ACCEPT, "application/json");
            if authenticated {
                request = request.bearer_auth(&self.token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }
            tracing::debug!(method = %method, path = url.path(), attempt, "sun request");
            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(retry_delay(attempt, None)).await;
                        continue;
                    }
                    return Err(SunError::Network(redact(&err.to_string())));
                }
            };
            let status = response.status();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(err) => {
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(retry_delay(attempt, None)).await;
                        continue;
                    }
                    return Err(SunError::Network(redact(&err.to_string())));
                }
            };
            if status.is_success() {
                return Ok(bytes.to_vec());
            }
            if is_retryable(status.as_u16()) && attempt < MAX_ATTEMPTS {
                tracing::debug!(status = status.as_u16(), attempt, "retrying sun request");
                tokio::time::sleep(retry_delay(attempt, retry_after)).await;
                continue;
            }
            return Err(status_error(status, &bytes));
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.url(path, query)?;
        let bytes = self.send(Method::GET, url, None, true).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn object_path(kind: &str, name: &str) -> String {
        format!(
            "/v1/objects/{}/{}",
            utf8_percent_encode(kind.trim(), SEGMENT),
            utf8_percent_encode(name.trim(), SEGMENT)
        )
    }

    pub async fn ready(&self) -> Result<()> {
        let url = self.url("/v1/readyz", &[])?;
        self.send(Method::GET, url, None, false).await.map(|_| ())
    }

    pub async fn whoami(&self) -> Result<Whoami> {
        self.get_json("/v1/auth/whoami", &[]).await
    }

    pub async fn list_objects(&self, kind: &str, name: &str, limit: usize) -> Result<Vec<ObjectMeta>> {
        let query = [
            ("kind", kind.trim().to_string()),
            ("name", name.trim().to_string()),
            ("limit", if limit > 0 { limit.to_string() } else { String::new() }),
        ];
        let items: Items<ObjectMeta> = self.get_json("/v1/objects", &query).await?;
        Ok(items.items)
    }

    /// Write a new revision. With `expected_revision` the server rejects the
    /// write with 409 unless it is still the latest.
    pub async fn put_object(
        &self,
        kind: &str,
        name: &str,
        payload: &[u8],
        content_type: &str,
        metadata: Option<&Map<String, Value>>,
        expected_revision: Option<i64>,
    ) -> Result<PutResult> {
        let body = PutBody {
            content_type: content_type.trim(),
            payload_base64: STANDARD.encode(payload),
            metadata: metadata.filter(|m| !m.is_empty()),
            expected_revision,
        };
        let url = self.url(&Self::object_path(kind, name), &[])?;
        let body = serde_json::to_value(&body)?;
        let bytes = self.send(Method::PUT, url, Some(&body), true).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn get_payload(&self, kind: &str, name: &str) -> Result<Vec<u8>> {
        let url = self.url(&format!("{}/payload", Self::object_path(kind, name)), &[])?;
        self.send(Method::GET, url, None, true).await
    }

    pub async fn list_revisions(&self, kind: &str, name: &str, limit: usize) -> Result<Vec<Revision>> {
        let query = [("limit", if limit > 0 { limit.to_string() } else { String::new() })];
        let items: Items<Revision> = self
            .get_json(&format!("{}/revisions", Self::object_path(kind, name)), &query)
            .await?;
        Ok(items.items)
    }

    /// Metadata of the object whose name matches `name` exactly
    /// (case-insensitive), if any.
    pub async fn lookup_object(&self, kind: &str, name: &str) -> Result<Option<ObjectMeta>> {
        let items = self.list_objects(kind, name, 5).await?;
        Ok(items
            .into_iter()
            .find(|item| item.name.trim().eq_ignore_ascii_case(name.trim())))
    }

    pub async fn list_tokens(&self, include_revoked: bool, limit: usize) -> Result<Vec<TokenRecord>> {
        let query = [
            ("include_revoked", if include_revoked { "true".to_string() } else { String::new() }),
            ("limit", if limit > 0 { limit.to_string() } else { String::new() }),
        ];
        let items: Items<TokenRecord> = self.get_json("/v1/tokens", &query).await?;
        Ok(items.items)
    }

    pub async fn create_token(
        &self,
        label: &str,
        scopes: &[String],
        expires_in_hours: u32,
    ) -> Result<IssuedToken> {
        let mut body = serde_json::json!({
            "label": label.trim(),
            "scopes": scopes,
        });
        if expires_in_hours > 0 {
            body["expires_in_hours"] = expires_in_hours.into();
        }
        let url = self.url("/v1/tokens", &[])?;
        let bytes = self.send(Method::POST, url, Some(&body), true).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn revoke_token(&self, token_id: &str) -> Result<()> {
        let token_id = token_id.trim();
        if token_id.is_empty() {
            return Err(SunError::Config("token id is required".to_string()));
        }
        let path = format!("/v1/tokens/{}/revoke", utf8_percent_encode(token_id, SEGMENT));
        let url = self.url(&path, &[])?;
        self.send(Method::POST, url, Some(&serde_json::json!({})), true)
            .await
            .map(|_| ())
    }

    pub async fn list_audit_events(
        &self,
        action: &str,
        kind: &str,
        name: &str,
        limit: usize,
    ) -> Result<Vec<AuditEvent>> {
        let query = [
            ("action", action.trim().to_string()),
            ("kind", kind.trim().to_string()),
            ("name", name.trim().to_string()),
            ("limit", if limit > 0 { limit.to_string() } else { String::new() }),
        ];
        let items: Items<AuditEvent> = self.get_json("/v1/audit", &query).await?;
        Ok(items.items)
    }
}

/// Split a comma-separated list, trimming and dropping empties and repeats.
pub fn split_csv(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if !out.iter().any(|existing| existing == part) {
            out.push(part.to_string());
        }
    }
    out
}

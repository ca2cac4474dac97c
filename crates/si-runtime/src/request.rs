//! Provider request/response model and response normalization

use crate::error::{ProviderError, Result, RuntimeError};
use crate::redact::redact;
use crate::spec::ProviderId;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use url::Url;

pub type JsonMap = Map<String, Value>;

/// Envelope keys that carry a page of objects, in lookup order.
pub const LIST_ENVELOPE_KEYS: &[&str] = &[
    "result",
    "data",
    "items",
    "elements",
    "value",
    "services",
    "releases",
    "records",
    "repositories",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    None,
    Raw(String),
    Json(Value),
}

impl Body {
    pub fn is_none(&self) -> bool {
        match self {
            Self::None => true,
            Self::Raw(raw) => raw.trim().is_empty(),
            Self::Json(_) => false,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(match self {
            Self::None => Vec::new(),
            Self::Raw(raw) => raw.as_bytes().to_vec(),
            Self::Json(value) => serde_json::to_vec(value)?,
        })
    }
}

/// A provider call, before URL resolution and auth.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    /// Root-relative path or absolute `http(s)://` URL.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    pub content_type: String,
    /// File streamed as the body for media uploads.
    pub media_path: Option<PathBuf>,
}

impl Request {
    pub fn new(method: &str, path: impl Into<String>) -> Self {
        let method = method.trim().to_ascii_uppercase();
        Self {
            method: if method.is_empty() { "GET".to_string() } else { method },
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    /// Append a query pair; empty values are dropped.
    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !key.trim().is_empty() && !value.trim().is_empty() {
            self.query.push((key.trim().to_string(), value.trim().to_string()));
        }
        self
    }

    /// Set a query pair, replacing any existing value for `key`.
    pub fn set_query(&mut self, key: &str, value: impl Into<String>) {
        self.query.retain(|(k, _)| k != key);
        self.query.push((key.to_string(), value.into()));
    }

    pub fn has_query(&self, key: &str) -> bool {
        self.query.iter().any(|(k, _)| k == key)
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn json(mut self, value: Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    pub fn raw(mut self, body: impl Into<String>) -> Self {
        self.body = Body::Raw(body.into());
        self
    }

    /// Parse `key=value` strings from repeated `--param` flags.
    pub fn with_params(mut self, params: &[String]) -> Result<Self> {
        for param in params {
            let (key, value) = split_pair(param, '=')?;
            self.query.push((key, value));
        }
        Ok(self)
    }

    /// Parse `Name: value` (or `Name=value`) strings from `--header` flags.
    pub fn with_headers(mut self, headers: &[String]) -> Result<Self> {
        for header in headers {
            let sep = if header.contains(':') { ':' } else { '=' };
            let (key, value) = split_pair(header, sep)?;
            self.headers.push((key, value));
        }
        Ok(self)
    }

    pub fn content_type(&self) -> &str {
        if !self.content_type.trim().is_empty() {
            return self.content_type.trim();
        }
        match self.body {
            Body::Raw(_) | Body::Json(_) => "application/json",
            Body::None => "",
        }
    }
}

fn split_pair(raw: &str, sep: char) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once(sep)
        .ok_or_else(|| RuntimeError::usage(format!("expected key{sep}value, got {raw:?}")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(RuntimeError::usage(format!("empty key in {raw:?}")));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Normalized provider response.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Response {
    pub status_code: u16,
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonMap>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub list: Vec<JsonMap>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// String field from `data`.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.as_ref()?.get(key)?.as_str()
    }
}

/// Join `path` onto `base`.
///
/// Absolute `http(s)` paths pass through. Otherwise the base path is prefixed
/// unless the request path already starts with it. Query pairs embedded in
/// `path` are kept, then `query` is appended.
pub fn resolve_url(base: &str, path: &str, query: &[(String, String)]) -> Result<Url> {
    let path = path.trim();
    if path.is_empty() {
        return Err(RuntimeError::usage("request path is required"));
    }
    let mut url = if path.starts_with("http://") || path.starts_with("https://") {
        Url::parse(path)?
    } else {
        let mut url = Url::parse(base.trim())?;
        let (rel_path, rel_query) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path, None),
        };
        let joined = join_base_path(url.path(), rel_path);
        url.set_path(&joined);
        url.set_query(None);
        if let Some(q) = rel_query {
            let pairs: Vec<(String, String)> = url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect();
            url.query_pairs_mut().extend_pairs(pairs);
        }
        url
    };
    if !query.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url)
}

fn join_base_path(base: &str, request: &str) -> String {
    let request = format!("/{}", request.trim().trim_start_matches('/'));
    let base = format!("/{}", base.trim().trim_matches('/'));
    if base == "/" || request == base || request.starts_with(&format!("{base}/")) {
        return request;
    }
    format!("{base}{request}")
}

/// First non-empty header among `names`.
pub fn request_id_from(headers: &HeaderMap, names: &[&str]) -> String {
    names
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// `"200 OK"`-style status line.
pub fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

fn object_list(values: &[Value]) -> Vec<JsonMap> {
    values
        .iter()
        .filter_map(|v| v.as_object().cloned())
        .collect()
}

/// Turns raw HTTP responses into [`Response`] and [`ProviderError`].
///
/// The default methods fit every provider; adapters override where a
/// provider signals failure inside a 2xx body.
pub trait ResponseNormalizer: Send + Sync {
    fn provider(&self) -> ProviderId;

    fn request_id_headers(&self) -> &'static [&'static str] {
        self.provider().spec().request_id_headers
    }

    fn normalize(&self, status: StatusCode, headers: &HeaderMap, body: &str) -> Response {
        let mut out = Response {
            status_code: status.as_u16(),
            status: status_line(status),
            request_id: request_id_from(headers, self.request_id_headers()),
            body: redact(body),
            ..Default::default()
        };
        for (name, value) in headers {
            let value = String::from_utf8_lossy(value.as_bytes());
            out.headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push(',');
                    existing.push_str(&redact(&value));
                })
                .or_insert_with(|| redact(&value));
        }
        if body.trim().is_empty() {
            return out;
        }
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => {
                out.list = LIST_ENVELOPE_KEYS
                    .iter()
                    .find_map(|key| map.get(*key).and_then(Value::as_array))
                    .map(|items| object_list(items))
                    .unwrap_or_default();
                out.data = Some(map);
            }
            Ok(Value::Array(items)) => out.list = object_list(&items),
            _ => {}
        }
        out
    }

    fn is_success(&self, response: &Response) -> bool {
        response.is_success()
    }

    fn normalize_error(&self, status: StatusCode, headers: &HeaderMap, body: &str) -> ProviderError {
        normalize_error(
            self.provider(),
            status,
            request_id_from(headers, self.request_id_headers()),
            body,
        )
    }
}

/// Normalizer used by every provider without special handling.
#[derive(Debug, Clone, Copy)]
pub struct DefaultNormalizer(pub ProviderId);

impl ResponseNormalizer for DefaultNormalizer {
    fn provider(&self) -> ProviderId {
        self.0
    }
}

static XML_CODE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"<Code>([^<]*)</Code>").expect("static regex"));
static XML_MESSAGE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"<Message>([^<]*)</Message>").expect("static regex"));

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Build a [`ProviderError`] from a non-2xx response.
///
/// Understands the error shapes in use across providers:
/// `errors[0].{code,message}` (Cloudflare), `error.{code,status,message}`
/// (Google, Meta), top-level `{code,message,type}` (GitHub, WorkOS),
/// `{error, error_description}` (OAuth) and `<Code>/<Message>` XML (AWS).
pub fn normalize_error(
    provider: ProviderId,
    status: StatusCode,
    request_id: String,
    body: &str,
) -> ProviderError {
    let mut err = ProviderError {
        provider: provider.as_str().to_string(),
        status_code: status.as_u16(),
        request_id,
        raw_body: redact(body.trim()),
        ..Default::default()
    };
    let trimmed = body.trim();
    if trimmed.is_empty() {
        err.message = status
            .canonical_reason()
            .unwrap_or("empty response body")
            .to_string();
        return err;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => {
            if let Some(first) = map
                .get("errors")
                .and_then(Value::as_array)
                .and_then(|errs| errs.iter().find_map(Value::as_object))
            {
                err.code = first.get("code").map(value_text).unwrap_or_default();
                err.message = first.get("message").map(value_text).unwrap_or_default();
                if err.message.is_empty() {
                    err.message = first.get("detail").map(value_text).unwrap_or_default();
                }
            }
            match map.get("error") {
                Some(Value::Object(inner)) => {
                    if err.code.is_empty() {
                        err.code = inner
                            .get("status")
                            .or_else(|| inner.get("code"))
                            .map(value_text)
                            .unwrap_or_default();
                    }
                    if err.message.is_empty() {
                        err.message = inner.get("message").map(value_text).unwrap_or_default();
                    }
                    if err.error_type.is_empty() {
                        err.error_type = inner.get("type").map(value_text).unwrap_or_default();
                    }
                }
                Some(Value::String(code)) => {
                    if err.code.is_empty() {
                        err.code = code.trim().to_string();
                    }
                    if err.message.is_empty() {
                        err.message = map
                            .get("error_description")
                            .map(value_text)
                            .unwrap_or_else(|| code.trim().to_string());
                    }
                }
                _ => {}
            }
            if err.code.is_empty() {
                err.code = map
                    .get("code")
                    .or_else(|| map.get("__type"))
                    .map(value_text)
                    .unwrap_or_default();
            }
            if err.message.is_empty() {
                err.message = map
                    .get("message")
                    .or_else(|| map.get("Message"))
                    .or_else(|| map.get("detail"))
                    .or_else(|| map.get("title"))
                    .map(value_text)
                    .unwrap_or_default();
            }
            if err.error_type.is_empty() {
                err.error_type = map.get("type").map(value_text).unwrap_or_default();
            }
        }
        _ => {
            if let Some(code) = XML_CODE.captures(trimmed) {
                err.code = code[1].trim().to_string();
            }
            if let Some(message) = XML_MESSAGE.captures(trimmed) {
                err.message = message[1].trim().to_string();
            }
            if err.message.is_empty() {
                err.message = trimmed.chars().take(512).collect();
            }
        }
    }
    if err.message.is_empty() {
        err.message = format!("{provider} api request failed");
    }
    err.message = redact(&err.message);
    err.code = redact(&err.code);
    err.error_type = redact(&err.error_type);
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_resolve_url_prefixes_base_path() {
        let url = resolve_url("http://127.0.0.1:9/client/v4", "/zones", &[]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9/client/v4/zones");

        let url = resolve_url("http://127.0.0.1:9/client/v4", "/client/v4/zones", &[]).unwrap();
        assert_eq!(url.path(), "/client/v4/zones");

        let url = resolve_url("http://127.0.0.1:9", "zones", &[]).unwrap();
        assert_eq!(url.path(), "/zones");
    }

    #[test]
    fn test_resolve_url_query_order() {
        let query = vec![
            ("pageSize".to_string(), "5".to_string()),
            ("filter".to_string(), "state:ENABLED".to_string()),
        ];
        let url = resolve_url("http://h/", "/v1/projects/p/services?view=full", &query).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("view".to_string(), "full".to_string()));
        assert_eq!(pairs[1].0, "pageSize");
        assert_eq!(pairs[2], ("filter".to_string(), "state:ENABLED".to_string()));
    }

    #[test]
    fn test_resolve_url_absolute_passthrough() {
        let url = resolve_url("https://api.example", "https://other.example/x?a=1", &[]).unwrap();
        assert_eq!(url.as_str(), "https://other.example/x?a=1");
        assert!(resolve_url("https://api.example", "  ", &[]).unwrap_err().is_usage());
    }

    #[test]
    fn test_normalize_keeps_full_map_and_extracts_list() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-ray", HeaderValue::from_static("ray-1"));
        let body = r#"{"success":true,"result":[{"id":"zone-1"},{"id":"zone-2"}]}"#;
        let resp = DefaultNormalizer(ProviderId::Cloudflare).normalize(StatusCode::OK, &headers, body);
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.status, "200 OK");
        assert_eq!(resp.request_id, "ray-1");
        assert_eq!(resp.list.len(), 2);
        let data = resp.data.unwrap();
        assert_eq!(data["result"][0]["id"], "zone-1");
    }

    #[test]
    fn test_normalize_top_level_array() {
        let resp = DefaultNormalizer(ProviderId::Github).normalize(
            StatusCode::OK,
            &HeaderMap::new(),
            r#"[{"name":"a"},1,{"name":"b"}]"#,
        );
        assert!(resp.data.is_none());
        assert_eq!(resp.list.len(), 2);
    }

    #[test]
    fn test_normalize_error_shapes() {
        let cf = normalize_error(
            ProviderId::Cloudflare,
            StatusCode::FORBIDDEN,
            "ray".to_string(),
            r#"{"success":false,"errors":[{"code":10000,"message":"Authentication error"}]}"#,
        );
        assert_eq!(cf.code, "10000");
        assert_eq!(cf.message, "Authentication error");

        let google = normalize_error(
            ProviderId::Gcp,
            StatusCode::FORBIDDEN,
            String::new(),
            r#"{"error":{"code":403,"message":"denied","status":"PERMISSION_DENIED"}}"#,
        );
        assert_eq!(google.code, "PERMISSION_DENIED");
        assert_eq!(google.message, "denied");

        let aws = normalize_error(
            ProviderId::Aws,
            StatusCode::FORBIDDEN,
            String::new(),
            "<ErrorResponse><Error><Code>AccessDenied</Code><Message>nope</Message></Error></ErrorResponse>",
        );
        assert_eq!(aws.code, "AccessDenied");
        assert_eq!(aws.message, "nope");
    }

    #[test]
    fn test_empty_error_body_uses_status_text() {
        let err = normalize_error(
            ProviderId::Workos,
            StatusCode::SERVICE_UNAVAILABLE,
            String::new(),
            "",
        );
        assert_eq!(err.message, "Service Unavailable");
    }

    #[test]
    fn test_error_raw_body_is_redacted() {
        let err = normalize_error(
            ProviderId::SocialFacebook,
            StatusCode::BAD_REQUEST,
            String::new(),
            r#"{"error":{"message":"bad token Bearer abc.def","type":"OAuthException"},"next":"https://g/x?access_token=EAAB"}"#,
        );
        assert!(!err.raw_body.contains("EAAB"));
        assert!(!err.raw_body.contains("abc.def"));
        assert!(!err.message.contains("abc.def"));
        assert_eq!(err.error_type, "OAuthException");
    }

    #[test]
    fn test_params_and_headers_parse() {
        let req = Request::get("/x")
            .with_params(&["a=1".to_string(), "b = two".to_string()])
            .unwrap()
            .with_headers(&["X-Trace: abc".to_string()])
            .unwrap();
        assert_eq!(req.query, vec![("a".into(), "1".into()), ("b".into(), "two".into())]);
        assert_eq!(req.headers, vec![("X-Trace".into(), "abc".into())]);
        assert!(Request::get("/x").with_params(&["novalue".to_string()]).is_err());
    }
}

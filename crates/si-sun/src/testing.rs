//! In-process stub of the sun object store
//!
//! Runs an axum server on `127.0.0.1:0` in its own thread so both sync CLI
//! tests and async unit tests can use it. Implements the `/v1` subset the
//! client speaks, with revision checks on `expected_revision`.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

#[derive(Debug, Clone)]
struct StoredRevision {
    payload: Vec<u8>,
    content_type: String,
    metadata: Map<String, Value>,
    created_at: String,
}

#[derive(Debug, Default)]
struct StoreState {
    objects: BTreeMap<(String, String), Vec<StoredRevision>>,
    failures: Vec<u16>,
    tokens: Vec<Value>,
    audit: Vec<Value>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<StoreState>,
    base_url: OnceLock<String>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to a running stub server. The server lives until the process exits.
#[derive(Debug, Clone)]
pub struct StubSun {
    shared: Arc<Shared>,
}

type Q = Query<HashMap<String, String>>;

fn error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(json!({ "error": message }))).into_response()
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn checksum(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Auth check plus injected failures. `None` means the request may proceed.
fn gate(shared: &Shared, headers: &HeaderMap) -> Option<Response> {
    {
        let mut state = shared.lock();
        if !state.failures.is_empty() {
            let status = state.failures.remove(0);
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
            return Some(error(status, "injected failure"));
        }
    }
    let expected = format!("Bearer {}", StubSun::TOKEN);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    (!authorized).then(|| error(StatusCode::UNAUTHORIZED, "unauthorized"))
}

fn meta(kind: &str, name: &str, revisions: &[StoredRevision]) -> Value {
    let latest = revisions.last();
    json!({
        "kind": kind,
        "name": name,
        "latest_revision": revisions.len() as i64,
        "checksum": latest.map(|r| checksum(&r.payload)).unwrap_or_default(),
        "content_type": latest.map(|r| r.content_type.clone()).unwrap_or_default(),
        "size_bytes": latest.map(|r| r.payload.len()).unwrap_or_default(),
        "metadata": latest.map(|r| r.metadata.clone()).unwrap_or_default(),
        "created_at": revisions.first().map(|r| r.created_at.clone()).unwrap_or_default(),
        "updated_at": latest.map(|r| r.created_at.clone()).unwrap_or_default(),
    })
}

fn limit_of(query: &HashMap<String, String>, default: usize) -> usize {
    query
        .get("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

async fn readyz() -> Response {
    axum::Json(json!({ "ok": true })).into_response()
}

async fn whoami(State(shared): State<Arc<Shared>>, headers: HeaderMap) -> Response {
    if let Some(denied) = gate(&shared, &headers) {
        return denied;
    }
    axum::Json(json!({
        "account_id": "acct-1",
        "account_slug": StubSun::ACCOUNT,
        "token_id": "tok-1",
        "scopes": ["objects:read", "objects:write"],
    }))
    .into_response()
}

async fn list_objects(State(shared): State<Arc<Shared>>, headers: HeaderMap, Query(query): Q) -> Response {
    if let Some(denied) = gate(&shared, &headers) {
        return denied;
    }
    let kind = query.get("kind").cloned().unwrap_or_default();
    let name = query.get("name").cloned().unwrap_or_default();
    let limit = limit_of(&query, 100);
    let state = shared.lock();
    let items: Vec<Value> = state
        .objects
        .iter()
        .filter(|((k, n), _)| {
            // the server matches names case-insensitively
            (kind.is_empty() || *k == kind) && (name.is_empty() || n.eq_ignore_ascii_case(&name))
        })
        .take(limit)
        .map(|((k, n), revs)| meta(k, n, revs))
        .collect();
    axum::Json(json!({ "items": items })).into_response()
}

async fn put_object(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    Path((kind, name)): Path<(String, String)>,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    if let Some(denied) = gate(&shared, &headers) {
        return denied;
    }
    let payload = match STANDARD.decode(body["payload_base64"].as_str().unwrap_or_default()) {
        Ok(payload) => payload,
        Err(_) => return error(StatusCode::BAD_REQUEST, "payload_base64 is invalid"),
    };
    let mut state = shared.lock();
    let key = (kind.clone(), name.clone());
    let current = state.objects.get(&key).map(Vec::len).unwrap_or(0) as i64;
    if let Some(expected) = body.get("expected_revision").and_then(Value::as_i64)
        && expected != current
    {
        return error(StatusCode::CONFLICT, "revision conflict");
    }
    let revision = StoredRevision {
        payload,
        content_type: body["content_type"].as_str().unwrap_or_default().to_string(),
        metadata: body["metadata"].as_object().cloned().unwrap_or_default(),
        created_at: now(),
    };
    let revisions = state.objects.entry(key).or_default();
    revisions.push(revision);
    let object = meta(&kind, &name, revisions);
    let number = revisions.len() as i64;
    let audit_id = state.audit.len() as i64 + 1;
    state.audit.push(json!({
        "id": audit_id,
        "token_id": "tok-1",
        "action": "object.put",
        "kind": kind,
        "name": name,
        "revision": number,
        "created_at": now(),
    }));
    axum::Json(json!({
        "result": {
            "object": object,
            "revision": { "revision": number },
        }
    }))
    .into_response()
}

async fn get_payload(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    Path((kind, name)): Path<(String, String)>,
) -> Response {
    if let Some(denied) = gate(&shared, &headers) {
        return denied;
    }
    let state = shared.lock();
    match state.objects.get(&(kind, name)).and_then(|revs| revs.last()) {
        Some(rev) => (
            [(header::CONTENT_TYPE, rev.content_type.clone())],
            Bytes::from(rev.payload.clone()),
        )
            .into_response(),
        None => error(StatusCode::NOT_FOUND, "object not found"),
    }
}

async fn list_revisions(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Q,
) -> Response {
    if let Some(denied) = gate(&shared, &headers) {
        return denied;
    }
    let limit = limit_of(&query, 50);
    let state = shared.lock();
    let Some(revs) = state.objects.get(&(kind, name)) else {
        return error(StatusCode::NOT_FOUND, "object not found");
    };
    let items: Vec<Value> = revs
        .iter()
        .enumerate()
        .rev()
        .take(limit)
        .map(|(i, rev)| {
            json!({
                "revision": i as i64 + 1,
                "checksum": checksum(&rev.payload),
                "content_type": rev.content_type,
                "size_bytes": rev.payload.len(),
                "metadata": rev.metadata,
                "created_at": rev.created_at,
            })
        })
        .collect();
    axum::Json(json!({ "items": items })).into_response()
}

async fn list_tokens(State(shared): State<Arc<Shared>>, headers: HeaderMap, Query(query): Q) -> Response {
    if let Some(denied) = gate(&shared, &headers) {
        return denied;
    }
    let include_revoked = query.get("include_revoked").is_some_and(|v| v == "true");
    let state = shared.lock();
    let items: Vec<Value> = state
        .tokens
        .iter()
        .filter(|t| include_revoked || t["revoked_at"].as_str().unwrap_or_default().is_empty())
        .cloned()
        .collect();
    axum::Json(json!({ "items": items })).into_response()
}

async fn create_token(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    if let Some(denied) = gate(&shared, &headers) {
        return denied;
    }
    let mut state = shared.lock();
    let token_id = format!("tok-{}", state.tokens.len() + 2);
    let record = json!({
        "token_id": token_id,
        "label": body["label"],
        "scopes": body["scopes"],
        "revoked_at": "",
        "created_at": now(),
    });
    state.tokens.push(record);
    axum::Json(json!({
        "account": { "id": "acct-1", "slug": StubSun::ACCOUNT },
        "token": format!("sun_{token_id}_secret"),
        "token_id": token_id,
        "label": body["label"],
        "scopes": body["scopes"],
        "issued_at": now(),
    }))
    .into_response()
}

async fn revoke_token(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    Path(token_id): Path<String>,
) -> Response {
    if let Some(denied) = gate(&shared, &headers) {
        return denied;
    }
    let mut state = shared.lock();
    match state.tokens.iter_mut().find(|t| t["token_id"] == token_id.as_str()) {
        Some(token) => {
            token["revoked_at"] = Value::String(now());
            axum::Json(json!({ "ok": true })).into_response()
        }
        None => error(StatusCode::NOT_FOUND, "token not found"),
    }
}

async fn audit(State(shared): State<Arc<Shared>>, headers: HeaderMap, Query(query): Q) -> Response {
    if let Some(denied) = gate(&shared, &headers) {
        return denied;
    }
    let state = shared.lock();
    let matches = |event: &Value, field: &str| {
        query
            .get(field)
            .is_none_or(|want| want.is_empty() || event[field] == want.as_str())
    };
    let items: Vec<Value> = state
        .audit
        .iter()
        .filter(|e| matches(e, "action") && matches(e, "kind") && matches(e, "name"))
        .take(limit_of(&query, 200))
        .cloned()
        .collect();
    axum::Json(json!({ "items": items })).into_response()
}

/// Browser login start page: calls the CLI callback straight away, as a
/// completed sign-in would.
async fn login_start(State(shared): State<Arc<Shared>>, Query(query): Q) -> Response {
    let (Some(cb), Some(state)) = (query.get("cb"), query.get("state")) else {
        return error(StatusCode::BAD_REQUEST, "cb and state are required");
    };
    let base = shared.base_url.get().cloned().unwrap_or_default();
    let Ok(mut callback) = url::Url::parse(cb) else {
        return error(StatusCode::BAD_REQUEST, "invalid cb");
    };
    callback
        .query_pairs_mut()
        .append_pair("state", state)
        .append_pair("token", StubSun::TOKEN)
        .append_pair("url", &base)
        .append_pair("account", StubSun::ACCOUNT);
    match reqwest::get(callback).await {
        Ok(resp) if resp.status().is_success() => "signed in".into_response(),
        Ok(resp) => error(StatusCode::BAD_GATEWAY, &format!("callback returned {}", resp.status())),
        Err(err) => error(StatusCode::BAD_GATEWAY, &err.to_string()),
    }
}

impl StubSun {
    pub const TOKEN: &'static str = "sun-test-token";
    pub const ACCOUNT: &'static str = "acme";

    pub fn start() -> Self {
        let shared = Arc::new(Shared::default());
        let app = Router::new()
            .route("/v1/readyz", get(readyz))
            .route("/v1/auth/whoami", get(whoami))
            .route("/v1/objects", get(list_objects))
            .route("/v1/objects/{kind}/{name}", put(put_object))
            .route("/v1/objects/{kind}/{name}/payload", get(get_payload))
            .route("/v1/objects/{kind}/{name}/revisions", get(list_revisions))
            .route("/v1/tokens", get(list_tokens).post(create_token))
            .route("/v1/tokens/{id}/revoke", post(revoke_token))
            .route("/v1/audit", get(audit))
            .route("/auth/cli/start", get(login_start))
            .with_state(shared.clone());

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("stub runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind stub listener");
                let addr = listener.local_addr().expect("stub address");
                let _ = tx.send(addr);
                let _ = axum::serve(listener, app).await;
            });
        });
        let addr = rx.recv().expect("stub server started");
        let _ = shared.base_url.set(format!("http://{addr}"));
        Self { shared }
    }

    pub fn base_url(&self) -> &str {
        self.shared.base_url.get().map(String::as_str).unwrap_or_default()
    }

    pub fn login_url(&self) -> String {
        format!("{}/auth/cli/start", self.base_url())
    }

    /// Answer the next `times` gated requests with `status`.
    pub fn fail_next(&self, status: u16, times: usize) {
        self.shared.lock().failures.extend(std::iter::repeat_n(status, times));
    }

    /// Store a revision directly, bypassing the HTTP surface.
    pub fn seed(&self, kind: &str, name: &str, payload: &[u8], content_type: &str, metadata: Map<String, Value>) -> i64 {
        let mut state = self.shared.lock();
        let revisions = state.objects.entry((kind.to_string(), name.to_string())).or_default();
        revisions.push(StoredRevision {
            payload: payload.to_vec(),
            content_type: content_type.to_string(),
            metadata,
            created_at: now(),
        });
        revisions.len() as i64
    }

    pub fn payload(&self, kind: &str, name: &str) -> Option<Vec<u8>> {
        let state = self.shared.lock();
        state
            .objects
            .get(&(kind.to_string(), name.to_string()))
            .and_then(|revs| revs.last())
            .map(|rev| rev.payload.clone())
    }

    pub fn json(&self, kind: &str, name: &str) -> Option<Value> {
        self.payload(kind, name)
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    }

    pub fn metadata(&self, kind: &str, name: &str) -> Option<Map<String, Value>> {
        let state = self.shared.lock();
        state
            .objects
            .get(&(kind.to_string(), name.to_string()))
            .and_then(|revs| revs.last())
            .map(|rev| rev.metadata.clone())
    }

    pub fn latest_revision(&self, kind: &str, name: &str) -> Option<i64> {
        let state = self.shared.lock();
        state
            .objects
            .get(&(kind.to_string(), name.to_string()))
            .map(|revs| revs.len() as i64)
    }

    /// Object names stored under `kind`, sorted.
    pub fn names(&self, kind: &str) -> Vec<String> {
        let state = self.shared.lock();
        state
            .objects
            .keys()
            .filter(|(k, _)| k == kind)
            .map(|(_, n)| n.clone())
            .collect()
    }
}

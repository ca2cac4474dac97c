//! In-process HTTP stub for adapter tests

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use si_runtime::{ProviderId, RuntimeContext};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

#[derive(Default)]
struct Inner {
    routes: Vec<(String, u16, String)>,
    requests: Vec<Recorded>,
}

/// Answers `"<METHOD> <path>"` or `"<path>"` routes with fixed bodies and
/// records every request. Unknown routes get 404.
#[derive(Clone)]
pub struct StubApi {
    pub base_url: String,
    inner: Arc<Mutex<Inner>>,
}

impl StubApi {
    pub async fn start(routes: &[(&str, u16, Value)]) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            routes: routes
                .iter()
                .map(|(route, status, body)| (route.to_string(), *status, body.to_string()))
                .collect(),
            requests: Vec::new(),
        }));
        let app = Router::new().fallback(handle).with_state(inner.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base_url: format!("http://{addr}"),
            inner,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn last(&self) -> Recorded {
        self.requests().pop().expect("no request recorded")
    }

    /// Context pointing at this stub with logging into `dir`.
    pub fn context(&self, provider: ProviderId, dir: &std::path::Path) -> RuntimeContext {
        let mut ctx = RuntimeContext::new(provider, self.base_url.clone());
        ctx.log_path = Some(dir.join(format!("{}.log", provider.log_name())));
        ctx
    }
}

async fn handle(
    State(inner): State<Arc<Mutex<Inner>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let path = uri.path().to_string();
    let mut inner = inner.lock().unwrap();
    inner.requests.push(Recorded {
        method: method.to_string(),
        path: path.clone(),
        query: uri.query().unwrap_or_default().to_string(),
        headers: headers
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect(),
        body,
    });
    let with_method = format!("{method} {path}");
    let found = inner
        .routes
        .iter()
        .find(|(route, _, _)| *route == with_method || *route == path)
        .cloned();
    match found {
        Some((_, status, body)) => (
            StatusCode::from_u16(status).unwrap(),
            [("content-type", "application/json")],
            body,
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            [("content-type", "application/json")],
            r#"{"error":"not found"}"#.to_string(),
        )
            .into_response(),
    }
}

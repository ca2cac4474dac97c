use assert_cmd::Command;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Variables that would leak the developer's own credentials or settings
/// into a test run.
const SCRUBBED_ENV: &[&str] = &[
    "SI_SUN_BASE_URL",
    "SI_SUN_TOKEN",
    "SI_SUN_MACHINE_ID",
    "SI_SUN_OPERATOR_ID",
    "SI_SUN_LOGIN_OPEN_CMD",
    "SI_VAULT_SCOPE",
    "SI_VAULT_FILE",
    "SI_VAULT_IDENTITY",
    "SI_VAULT_SYNC_BACKEND",
    "SI_VAULT_AUTO_ENV",
    "SI_ID_PRECEDENCE",
    "CLOUDFLARE_API_TOKEN",
    "CLOUDFLARE_ACCOUNT_ID",
    "GOOGLE_OAUTH_ACCESS_TOKEN",
    "GCP_ACCESS_TOKEN",
    "GCP_PROJECT_ID",
    "GOOGLE_CLOUD_PROJECT",
    "GEMINI_API_KEY",
    "GOOGLE_API_KEY",
    "OPENAI_API_KEY",
];

/// Isolated home for one CLI invocation chain.
pub struct TestHome {
    pub root: TempDir,
}

impl TestHome {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// `si` with settings under this home, no color and vault hydration off.
    pub fn si(&self) -> Command {
        let mut cmd = Command::cargo_bin("si").unwrap();
        for key in SCRUBBED_ENV {
            cmd.env_remove(key);
        }
        cmd.current_dir(self.path())
            .env("SI_SETTINGS_HOME", self.path())
            .env("NO_COLOR", "1")
            .env("SI_VAULT_AUTO", "0");
        cmd
    }

    #[allow(dead_code)]
    pub fn settings(&self) -> Value {
        let raw = std::fs::read_to_string(self.path().join(".si/settings.json")).unwrap();
        serde_json::from_str(&raw).unwrap()
    }
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: BTreeMap<String, String>,
}

impl Recorded {
    /// Decoded query pairs in request order.
    #[allow(dead_code)]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .into_owned()
            .collect()
    }
}

type Routes = Vec<(String, u16, String)>;

#[derive(Default)]
struct Inner {
    routes: Routes,
    requests: Vec<Recorded>,
}

/// Provider API stub on its own runtime thread, so synchronous CLI tests can
/// talk to it. Routes are `"<path>"` or `"<METHOD> <path>"`; anything else
/// answers `fallback_status`.
pub struct StubApi {
    pub base_url: String,
    inner: Arc<Mutex<Inner>>,
}

impl StubApi {
    pub fn start(routes: &[(&str, u16, Value)], fallback_status: u16) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            routes: routes
                .iter()
                .map(|(route, status, body)| (route.to_string(), *status, body.to_string()))
                .collect(),
            requests: Vec::new(),
        }));
        let app = Router::new()
            .fallback(handle)
            .with_state((inner.clone(), fallback_status));
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                tx.send(listener.local_addr().unwrap()).unwrap();
                axum::serve(listener, app).await.unwrap();
            });
        });
        let addr = rx.recv().unwrap();
        Self {
            base_url: format!("http://{addr}"),
            inner,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.inner.lock().unwrap().requests.clone()
    }

    #[allow(dead_code)]
    pub fn find(&self, path: &str) -> Option<Recorded> {
        self.requests().into_iter().find(|r| r.path == path)
    }
}

async fn handle(
    State((inner, fallback_status)): State<(Arc<Mutex<Inner>>, u16)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
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
    });
    let with_method = format!("{method} {path}");
    let (status, body) = inner
        .routes
        .iter()
        .find(|(route, _, _)| *route == with_method || *route == path)
        .map(|(_, status, body)| (*status, body.clone()))
        .unwrap_or_else(|| {
            (
                fallback_status,
                r#"{"success":false,"errors":[{"code":10000,"message":"Authentication error"}]}"#.to_string(),
            )
        });
    (
        StatusCode::from_u16(status).unwrap(),
        [("content-type", "application/json")],
        body,
    )
        .into_response()
}

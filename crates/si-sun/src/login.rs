//! Browser sign-in for sun
//!
//! A one-shot callback listener on `127.0.0.1:0` receives the token issued by
//! the web login page. The login URL carries the callback (`cb`) and a random
//! `state` that the callback must echo back.

use crate::error::{Result, SunError};
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

pub const DEFAULT_LOGIN_URL: &str = "https://aureuma.ai/sun/auth/cli/start";
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(120);

/// Credentials delivered to the callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginResult {
    pub token: String,
    pub base_url: String,
    pub account: String,
    pub auto_sync: bool,
}

type Outcome = std::result::Result<LoginResult, String>;

struct CallbackState {
    state: String,
    sender: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl CallbackState {
    fn deliver(&self, outcome: Outcome) {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
    }
}

/// A pending browser login with its callback listener already bound.
pub struct BrowserLogin {
    auth_url: url::Url,
    receiver: oneshot::Receiver<Outcome>,
    shutdown: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
}

fn random_state() -> String {
    let mut buf = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

async fn callback(
    State(shared): State<Arc<CallbackState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let get = |key: &str| query.get(key).map(|v| v.trim().to_string()).unwrap_or_default();
    if get("state") != shared.state {
        shared.deliver(Err("browser auth state mismatch".to_string()));
        return (StatusCode::BAD_REQUEST, "state mismatch").into_response();
    }
    let flow_error = get("error");
    if !flow_error.is_empty() {
        shared.deliver(Err(format!("browser auth failed: {flow_error}")));
        return Html(format!(
            "<!doctype html><html><body><h1>Sign-in failed</h1><p>{}</p></body></html>",
            html_escape(&flow_error)
        ))
        .into_response();
    }
    let token = get("token");
    if token.is_empty() {
        shared.deliver(Err("browser auth callback missing token".to_string()));
        return (StatusCode::BAD_REQUEST, "missing token").into_response();
    }
    shared.deliver(Ok(LoginResult {
        token,
        base_url: get("url"),
        account: get("account"),
        auto_sync: is_truthy(&get("auto_sync")),
    }));
    Html("<!doctype html><html><body><h1>Sign-in complete</h1><p>You can return to the terminal.</p></body></html>")
        .into_response()
}

fn shell_single_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

fn env_truthy(key: &str) -> bool {
    std::env::var(key).is_ok_and(|v| is_truthy(&v))
}

/// No browser can be launched: explicit headless mode, CI, or a Linux
/// session without a display.
pub fn is_headless() -> bool {
    if env_truthy("SI_HEADLESS") || env_truthy("CI") {
        return true;
    }
    cfg!(target_os = "linux")
        && std::env::var("DISPLAY").map_or(true, |v| v.trim().is_empty())
        && std::env::var("WAYLAND_DISPLAY").map_or(true, |v| v.trim().is_empty())
}

/// Launcher command line for `url`: `SI_SUN_LOGIN_OPEN_CMD` with `{url}`
/// substituted, or with the quoted URL appended.
pub fn open_command(template: &str, url: &str) -> String {
    let quoted = shell_single_quote(url);
    if template.contains("{url}") {
        template.replace("{url}", &quoted)
    } else {
        format!("{} {}", template.trim(), quoted)
    }
}

impl BrowserLogin {
    /// Bind the callback listener and build the login URL.
    pub async fn start(login_url: &str) -> Result<Self> {
        let login_url = match login_url.trim() {
            "" => DEFAULT_LOGIN_URL,
            other => other,
        };
        let mut auth_url = url::Url::parse(login_url)
            .map_err(|e| SunError::Config(format!("invalid login url: {e}")))?;
        if auth_url.scheme() != "https" && auth_url.scheme() != "http" {
            return Err(SunError::Config("login url must be http(s)".to_string()));
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let callback_url = format!("http://{addr}/callback");
        let state = random_state();

        let kept: Vec<(String, String)> = auth_url
            .query_pairs()
            .into_owned()
            .filter(|(k, _)| k != "cb" && k != "state")
            .collect();
        auth_url.set_query(None);
        auth_url
            .query_pairs_mut()
            .extend_pairs(kept)
            .append_pair("cb", &callback_url)
            .append_pair("state", &state);

        let (sender, receiver) = oneshot::channel();
        let shared = Arc::new(CallbackState {
            state,
            sender: Mutex::new(Some(sender)),
        });
        let app = Router::new()
            .route("/callback", get(callback))
            .with_state(shared);
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = serve.await {
                tracing::warn!(error = %err, "login callback server failed");
            }
        });
        tracing::debug!(callback = callback_url.as_str(), "login callback listening");

        Ok(Self {
            auth_url,
            receiver,
            shutdown: Some(shutdown),
            server,
        })
    }

    pub fn auth_url(&self) -> &url::Url {
        &self.auth_url
    }

    /// Launch the login page. `SI_SUN_LOGIN_OPEN_CMD` wins over the platform
    /// opener; headless sessions only get the printed URL.
    pub fn open(&self) {
        let url = self.auth_url.to_string();
        if let Ok(template) = std::env::var("SI_SUN_LOGIN_OPEN_CMD")
            && !template.trim().is_empty()
        {
            let command_line = open_command(&template, &url);
            tokio::spawn(async move {
                let status = tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(&command_line)
                    .stdin(std::process::Stdio::null())
                    .stdout(std::process::Stdio::null())
                    .status()
                    .await;
                match status {
                    Ok(status) if status.success() => {}
                    Ok(status) => tracing::warn!(%status, "open login url failed"),
                    Err(err) => tracing::warn!(error = %err, "open login url failed"),
                }
            });
            return;
        }
        if is_headless() {
            return;
        }
        let opener = if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        };
        if let Err(err) = std::process::Command::new(opener)
            .arg(&url)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
        {
            tracing::warn!(error = %err, opener, "open login url failed");
        }
    }

    /// Wait for the callback, then stop the listener.
    pub async fn wait(mut self, timeout: Duration) -> Result<LoginResult> {
        let timeout = if timeout.is_zero() {
            DEFAULT_LOGIN_TIMEOUT
        } else {
            timeout
        };
        let outcome = tokio::time::timeout(timeout, &mut self.receiver).await;
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(3), &mut self.server).await;
        match outcome {
            Err(_) => Err(SunError::Config(
                "timed out waiting for browser callback".to_string(),
            )),
            Ok(Err(_)) => Err(SunError::Config("browser callback listener closed".to_string())),
            Ok(Ok(Err(message))) => Err(SunError::Config(message)),
            Ok(Ok(Ok(result))) => Ok(result),
        }
    }
}

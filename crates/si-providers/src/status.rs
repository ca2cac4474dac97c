//! `auth status` and `doctor` routines shared by every adapter

use crate::provider::{ContextFlags, Provider, summarize};
use serde::Serialize;
use serde_json::Value;
use si_config::Settings;
use si_runtime::{
    AuthStyle, Credentials, Environment, ExecOptions, HttpExecutor, JsonMap, ProviderId, Request,
    RuntimeContext, RuntimeError, preview_secret,
};
use std::collections::BTreeMap;
use std::time::Duration;

const STATUS_TIMEOUT: Duration = Duration::from_secs(20);

/// Result of `auth status`. `status` is `ready` only when the verify call
/// succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    pub provider: ProviderId,
    pub status: &'static str,
    pub account_alias: String,
    pub environment: Environment,
    pub base_url: String,
    pub source: String,
    pub auth_style: AuthStyle,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token_preview: String,
    #[serde(flatten)]
    pub ids: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<JsonMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_error: Option<Value>,
}

impl AuthStatus {
    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }

    pub fn render_text(&self, label: &str) -> String {
        let mut lines = vec![
            format!("{label} auth: {}", self.status),
            format!(
                "Context: account={} env={} base_url={}",
                dash(&self.account_alias),
                self.environment,
                self.base_url
            ),
        ];
        for (key, value) in &self.ids {
            lines.push(format!("{key}: {value}"));
        }
        lines.push(format!("Source: {}", dash(&self.source)));
        lines.push(format!("Auth style: {}", self.auth_style.as_str()));
        if !self.token_preview.is_empty() {
            lines.push(format!("Token preview: {}", self.token_preview));
        }
        if let Some(err) = &self.verify_error {
            let message = err
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            lines.push(format!("Error: {message}"));
        }
        lines.join("\n")
    }
}

fn dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

/// Preview of the credential in use; never the full secret.
pub fn credential_preview(credentials: &Credentials) -> String {
    match credentials {
        Credentials::None => String::new(),
        Credentials::Bearer(token) => preview_secret(token),
        Credentials::Query { token, .. } => preview_secret(token),
        Credentials::ApiKey { key, .. } => preview_secret(key),
        Credentials::Aws(aws) => preview_secret(&aws.access_key_id),
        Credentials::GitHubApp(app) => format!("app:{}", app.app_id),
        Credentials::AppStore(asc) => format!("key:{}", asc.key_id),
    }
}

/// Run the adapter's verify call against `ctx`.
pub async fn auth_status(provider: &dyn Provider, ctx: &RuntimeContext) -> AuthStatus {
    let mut status = AuthStatus {
        provider: ctx.provider,
        status: "error",
        account_alias: ctx.account_alias.clone(),
        environment: ctx.environment,
        base_url: ctx.base_url.clone(),
        source: ctx.source.clone(),
        auth_style: ctx.credentials.style(),
        token_preview: credential_preview(&ctx.credentials),
        ids: ctx.ids.clone(),
        status_code: None,
        request_id: String::new(),
        verify: None,
        verify_error: None,
    };
    match provider.verify(ctx).await {
        Ok(resp) => {
            status.status = "ready";
            status.status_code = Some(resp.status_code);
            status.request_id = resp.request_id;
            status.verify = resp.data;
        }
        Err(err) => {
            if let Some(provider_err) = err.provider_error() {
                status.status_code = Some(provider_err.status_code);
                status.request_id = provider_err.request_id.clone();
            }
            tracing::debug!(provider = ctx.provider.as_str(), error = %err, "verify failed");
            status.verify_error = Some(err.to_json());
        }
    }
    status
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl DoctorCheck {
    fn new(name: &str, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub ok: bool,
    pub provider: ProviderId,
    pub base_url: String,
    pub checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    pub fn render_text(&self, label: &str) -> String {
        let mut lines = vec![format!(
            "{label} doctor: {}",
            if self.ok { "ok" } else { "issues found" }
        )];
        lines.push(format!("Base URL: {}", self.base_url));
        for check in &self.checks {
            lines.push(format!(
                "  {:<4} {:<16} {}",
                if check.ok { "OK" } else { "ERR" },
                check.name,
                check.detail
            ));
        }
        lines.join("\n")
    }
}

/// Context resolution, base URL sanity, the authenticated verify call and,
/// where the provider has one, the unauthenticated public probe.
pub async fn doctor(provider: &dyn Provider, settings: &Settings, flags: &ContextFlags) -> DoctorReport {
    let id = provider.id();
    let mut checks = Vec::new();
    let ctx = match provider.context(settings, flags) {
        Ok(ctx) => {
            checks.push(DoctorCheck::new(
                "context",
                true,
                format!(
                    "account={} env={} auth={} source={}",
                    dash(&ctx.account_alias),
                    ctx.environment,
                    ctx.credentials.style().as_str(),
                    dash(&ctx.source)
                ),
            ));
            Some(ctx)
        }
        Err(err) => {
            checks.push(DoctorCheck::new("context", false, err.to_string()));
            None
        }
    };

    let base_url = ctx
        .as_ref()
        .map(|c| c.base_url.clone())
        .or_else(|| flags.base_url.clone())
        .unwrap_or_else(|| id.spec().base_url.to_string());
    checks.push(base_url_check(&base_url));

    if let Some(ctx) = &ctx {
        let check = match provider.verify(ctx).await {
            Ok(resp) => DoctorCheck::new("auth.verify", true, summarize(&resp)),
            Err(err) => DoctorCheck::new("auth.verify", false, err.to_string()),
        };
        checks.push(check);
    }

    if let Some(probe) = &id.spec().public_probe {
        checks.push(public_probe(provider, &base_url, probe.method, probe.path).await);
    }

    DoctorReport {
        ok: checks.iter().all(|c| c.ok),
        provider: id,
        base_url,
        checks,
    }
}

fn base_url_check(base_url: &str) -> DoctorCheck {
    match url::Url::parse(base_url) {
        Ok(url) if url.scheme() == "https" => DoctorCheck::new("base_url", true, base_url),
        Ok(url) if matches!(url.host_str(), Some("127.0.0.1" | "localhost" | "::1")) => {
            DoctorCheck::new("base_url", true, format!("{base_url} (local)"))
        }
        Ok(_) => DoctorCheck::new("base_url", false, format!("{base_url} is not https")),
        Err(err) => DoctorCheck::new("base_url", false, format!("invalid base url: {err}")),
    }
}

/// Unauthenticated probe; anything below 500 counts as reachable.
async fn public_probe(provider: &dyn Provider, base_url: &str, method: &str, path: &str) -> DoctorCheck {
    let mut opts = ExecOptions::new(provider.id()).with_timeout(STATUS_TIMEOUT);
    opts.base_url = base_url.to_string();
    opts.subject = "public-probe".to_string();
    opts.disable_cache = true;
    let request = Request::new(method, path);
    match HttpExecutor::shared()
        .send(&opts, &request, provider.normalizer())
        .await
    {
        Ok(resp) => DoctorCheck::new("public.probe", true, format!("status={}", resp.status_code)),
        Err(RuntimeError::Provider(err)) if err.status_code < 500 => {
            DoctorCheck::new("public.probe", true, format!("status={}", err.status_code))
        }
        Err(err) => DoctorCheck::new("public.probe", false, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::GitHub;
    use crate::stub::StubApi;
    use crate::workos::WorkOs;
    use serde_json::json;
    use serial_test::serial;

    #[tokio::test]
    async fn test_status_ready_on_success() {
        let stub = StubApi::start(&[("/organizations", 200, json!({"data": [{"id": "org_1"}]}))]).await;
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = stub.context(ProviderId::Workos, dir.path());
        ctx.credentials = Credentials::Bearer("sk_test_abcdefghijkl".to_string());
        ctx.account_alias = "core".to_string();

        let status = auth_status(&WorkOs, &ctx).await;
        assert!(status.is_ready());
        assert_eq!(status.status_code, Some(200));
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["auth_style"], "bearer");
        assert!(!json.to_string().contains("sk_test_abcdefghijkl"));
    }

    #[tokio::test]
    async fn test_status_error_carries_provider_status() {
        let stub = StubApi::start(&[(
            "/organizations",
            401,
            json!({"message": "Unauthorized", "code": "unauthorized"}),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = stub.context(ProviderId::Workos, dir.path());
        ctx.credentials = Credentials::Bearer("sk_test_bad".to_string());

        let status = auth_status(&WorkOs, &ctx).await;
        assert!(!status.is_ready());
        assert_eq!(status.status, "error");
        assert_eq!(status.status_code, Some(401));
        assert!(status.render_text("WorkOS").contains("Error: Unauthorized"));
    }

    #[tokio::test]
    #[serial]
    async fn test_doctor_runs_public_probe() {
        let stub = StubApi::start(&[
            ("/meta", 200, json!({"verifiable_password_authentication": false})),
            ("/user", 200, json!({"login": "octo"})),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let flags = ContextFlags::new()
            .account(Some("doctor-test"))
            .base_url(Some(&stub.base_url))
            .with("--token", Some("ghp_doctor_token_1234"))
            .with("--auth-mode", Some("oauth"));
        unsafe { std::env::set_var("SI_GITHUB_LOG_FILE", dir.path().join("github.log")) };
        let report = doctor(&GitHub, &Settings::default(), &flags).await;
        unsafe { std::env::remove_var("SI_GITHUB_LOG_FILE") };

        assert!(report.ok, "{report:?}");
        let names: Vec<_> = report.checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["context", "base_url", "auth.verify", "public.probe"]);
        assert_eq!(report.checks[2].detail, "login=octo");
        assert!(stub.requests().iter().any(|r| r.path == "/meta" && !r.headers.contains_key("authorization")));
    }

    #[test]
    fn test_base_url_check() {
        assert!(base_url_check("https://api.example.com").ok);
        assert!(base_url_check("http://127.0.0.1:8080").ok);
        assert!(!base_url_check("http://api.example.com").ok);
        assert!(!base_url_check("not a url").ok);
    }
}

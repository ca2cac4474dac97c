//! Cloudflare adapter
//!
//! Bearer-token API at `/client/v4`. Cloudflare reports some failures inside
//! a 2xx envelope (`"success": false`), so the adapter carries its own
//! normalizer.

use crate::provider::{ContextBuilder, ContextFlags, Provider, segment, summarize};
use serde::Serialize;
use serde_json::Value;
use si_config::Settings;
use si_runtime::{
    Credentials, EntryField, FieldSpec, ProviderId, Request, Response, ResponseNormalizer, Result,
    RuntimeContext, RuntimeError,
};

pub const API_TOKEN: FieldSpec = FieldSpec::secret(
    "cloudflare api token",
    "--api-token",
    "API_TOKEN",
    Some(EntryField::ApiTokenEnv),
    &["CLOUDFLARE_API_TOKEN"],
);

pub const ACCOUNT_ID: FieldSpec = FieldSpec::id(
    "cloudflare account id",
    "--account-id",
    "ACCOUNT_ID",
    Some(EntryField::AccountId),
    Some(EntryField::AccountIdEnv),
    &["CLOUDFLARE_ACCOUNT_ID"],
);

pub const ZONE_ID: FieldSpec = FieldSpec::id(
    "cloudflare zone id",
    "--zone-id",
    "{ENV}_ZONE_ID",
    Some(EntryField::ZoneId),
    None,
    &["CLOUDFLARE_ZONE_ID"],
);

#[derive(Debug, Clone, Copy)]
pub struct CloudflareNormalizer;

impl ResponseNormalizer for CloudflareNormalizer {
    fn provider(&self) -> ProviderId {
        ProviderId::Cloudflare
    }

    fn is_success(&self, response: &Response) -> bool {
        let envelope_ok = response
            .data
            .as_ref()
            .and_then(|d| d.get("success"))
            .and_then(Value::as_bool)
            .unwrap_or(true);
        response.is_success() && envelope_ok
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Cloudflare;

impl Provider for Cloudflare {
    fn id(&self) -> ProviderId {
        ProviderId::Cloudflare
    }

    fn display_name(&self) -> &'static str {
        "Cloudflare"
    }

    fn context(&self, settings: &Settings, flags: &ContextFlags) -> Result<RuntimeContext> {
        let mut builder = ContextBuilder::new(settings, ProviderId::Cloudflare, flags)?;
        let token = builder.require(&API_TOKEN)?;
        builder.id("account_id", &ACCOUNT_ID);
        builder.id("zone_id", &ZONE_ID);
        if let Some(zone) = flags.get("--zone") {
            let mut ctx = builder.finish(Credentials::Bearer(token));
            ctx.set_id("zone_name", zone);
            return Ok(ctx);
        }
        Ok(builder.finish(Credentials::Bearer(token)))
    }

    fn normalizer(&self) -> &dyn ResponseNormalizer {
        &CloudflareNormalizer
    }

    fn verify_request(&self, _ctx: &RuntimeContext) -> Result<Request> {
        Ok(Request::get("/user/tokens/verify"))
    }
}

impl Cloudflare {
    pub async fn list_zones(
        &self,
        ctx: &RuntimeContext,
        name: Option<&str>,
        per_page: Option<u32>,
    ) -> Result<Response> {
        let mut request = Request::get("/zones").query("name", name.unwrap_or_default());
        if let Some(account_id) = ctx.id("account_id") {
            request = request.query("account.id", account_id);
        }
        if let Some(per_page) = per_page {
            request = request.query("per_page", per_page.to_string());
        }
        self.send(ctx, &request).await
    }

    pub async fn get_zone(&self, ctx: &RuntimeContext, zone_id: Option<&str>) -> Result<Response> {
        let zone_id = zone_or_context(ctx, zone_id)?;
        self.send(ctx, &Request::get(format!("/zones/{}", segment(&zone_id))))
            .await
    }

    pub async fn list_dns(
        &self,
        ctx: &RuntimeContext,
        zone_id: Option<&str>,
        record_type: Option<&str>,
        name: Option<&str>,
    ) -> Result<Response> {
        let zone_id = zone_or_context(ctx, zone_id)?;
        let request = Request::get(format!("/zones/{}/dns_records", segment(&zone_id)))
            .query("type", record_type.unwrap_or_default().to_ascii_uppercase())
            .query("name", name.unwrap_or_default());
        self.send(ctx, &request).await
    }

    /// Read-only sweep across the API families a token is expected to reach.
    pub async fn smoke(&self, ctx: &RuntimeContext) -> SmokeReport {
        let account_id = ctx.id("account_id").unwrap_or_default().to_string();
        let mut checks = Vec::new();
        for spec in smoke_specs(&account_id) {
            checks.push(self.run_smoke_check(ctx, &account_id, &spec).await);
        }
        let summary = SmokeSummary {
            pass: checks.iter().filter(|c| c.ok).count(),
            fail: checks.iter().filter(|c| !c.ok && !c.skipped).count(),
            skip: checks.iter().filter(|c| c.skipped).count(),
        };
        SmokeReport {
            ok: summary.fail == 0,
            context: ctx.summary(),
            summary,
            checks,
        }
    }

    async fn run_smoke_check(&self, ctx: &RuntimeContext, account_id: &str, spec: &SmokeSpec) -> SmokeCheck {
        let mut check = SmokeCheck {
            name: spec.name.to_string(),
            path: spec.path.to_string(),
            ..Default::default()
        };
        if spec.path.contains("{account_id}") {
            if account_id.is_empty() {
                check.skipped = true;
                check.detail = "missing account id".to_string();
                return check;
            }
            check.path = spec.path.replace("{account_id}", &segment(account_id));
        }
        let mut request = Request::get(check.path.clone());
        for (key, value) in &spec.params {
            request = request.query(key, value.clone());
        }
        match self.send(ctx, &request).await {
            Ok(resp) => {
                check.ok = true;
                check.status_code = Some(resp.status_code);
                check.request_id = resp.request_id.clone();
                check.detail = summarize(&resp);
            }
            Err(err) => {
                check.detail = err.to_string();
                if let Some(provider_err) = err.provider_error() {
                    check.status_code = Some(provider_err.status_code);
                    check.error_code = provider_err.code.clone();
                    check.request_id = provider_err.request_id.clone();
                    if !provider_err.message.is_empty() {
                        check.detail = provider_err.message.clone();
                    }
                }
            }
        }
        check
    }
}

fn zone_or_context(ctx: &RuntimeContext, zone_id: Option<&str>) -> Result<String> {
    zone_id
        .map(str::trim)
        .filter(|z| !z.is_empty())
        .or_else(|| ctx.id("zone_id"))
        .map(str::to_string)
        .ok_or_else(|| {
            RuntimeError::usage("cloudflare zone id is required (set --zone-id or <PREFIX><ENV>_ZONE_ID)")
        })
}

struct SmokeSpec {
    name: &'static str,
    path: &'static str,
    params: Vec<(&'static str, String)>,
}

impl SmokeSpec {
    fn new(name: &'static str, path: &'static str) -> Self {
        Self {
            name,
            path,
            params: Vec::new(),
        }
    }
}

fn smoke_specs(account_id: &str) -> Vec<SmokeSpec> {
    let mut zones = SmokeSpec::new("zones_by_account", "/zones");
    zones.params.push(("per_page", "1".to_string()));
    if !account_id.is_empty() {
        zones.params.push(("account.id", account_id.to_string()));
    }
    vec![
        SmokeSpec::new("token_verify", "/user/tokens/verify"),
        SmokeSpec::new("accounts", "/accounts"),
        zones,
        SmokeSpec::new("account_details", "/accounts/{account_id}"),
        SmokeSpec::new("workers_scripts", "/accounts/{account_id}/workers/scripts"),
        SmokeSpec::new("pages_projects", "/accounts/{account_id}/pages/projects"),
        SmokeSpec::new("r2_buckets", "/accounts/{account_id}/r2/buckets"),
        SmokeSpec::new("d1_databases", "/accounts/{account_id}/d1/database"),
        SmokeSpec::new("kv_namespaces", "/accounts/{account_id}/storage/kv/namespaces"),
        SmokeSpec::new("queues", "/accounts/{account_id}/queues"),
        SmokeSpec::new("access_apps", "/accounts/{account_id}/access/apps"),
        SmokeSpec::new("tunnels", "/accounts/{account_id}/cfd_tunnel"),
        SmokeSpec::new("lb_pools", "/accounts/{account_id}/load_balancers/pools"),
        SmokeSpec::new("email_addresses", "/accounts/{account_id}/email/routing/addresses"),
    ]
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SmokeCheck {
    pub name: String,
    pub path: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_code: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SmokeSummary {
    pub pass: usize,
    pub fail: usize,
    pub skip: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmokeReport {
    pub ok: bool,
    pub context: Value,
    pub summary: SmokeSummary,
    pub checks: Vec<SmokeCheck>,
}

impl SmokeReport {
    pub fn render_text(&self) -> String {
        let mut lines = vec![
            format!(
                "Cloudflare smoke: {}",
                if self.ok { "ok" } else { "issues found" }
            ),
            format!(
                "Summary: pass={} fail={} skip={}",
                self.summary.pass, self.summary.fail, self.summary.skip
            ),
        ];
        for check in &self.checks {
            let state = if check.skipped {
                "SKIP"
            } else if check.ok {
                "PASS"
            } else {
                "FAIL"
            };
            let code = check
                .status_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            let detail = if check.detail.is_empty() { "-" } else { &check.detail };
            lines.push(format!("  {state:<4}  {:<18}  {code:<3}  {detail}", check.name));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubApi;
    use serde_json::json;

    fn ctx(stub: &StubApi, dir: &std::path::Path) -> RuntimeContext {
        let mut ctx = stub.context(ProviderId::Cloudflare, dir);
        ctx.credentials = Credentials::Bearer("token-123".to_string());
        ctx
    }

    #[test]
    fn test_context_from_flags() {
        let flags = ContextFlags::new()
            .base_url(Some("http://127.0.0.1:1/client/v4"))
            .with("--api-token", Some("token-123"))
            .with("--account-id", Some("acct_123"))
            .with("--zone-id", Some("zone-9"));
        let ctx = Cloudflare.context(&Settings::default(), &flags).unwrap();
        assert_eq!(ctx.id("account_id"), Some("acct_123"));
        assert_eq!(ctx.id("zone_id"), Some("zone-9"));
        assert_eq!(ctx.source, "flag:--api-token,flag:--account-id,flag:--zone-id");
        assert!(matches!(ctx.credentials, Credentials::Bearer(ref t) if t == "token-123"));
    }

    fn envelope(status_code: u16, body: Value) -> Response {
        Response {
            status_code,
            data: body.as_object().cloned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_envelope_failure_is_not_success() {
        let ok = envelope(200, json!({"success": true, "result": []}));
        assert!(CloudflareNormalizer.is_success(&ok));
        let failed = envelope(200, json!({"success": false, "errors": [{"code": 1000}]}));
        assert!(!CloudflareNormalizer.is_success(&failed));
        let plain = envelope(200, json!({"result": {"id": "z"}}));
        assert!(CloudflareNormalizer.is_success(&plain));
        assert!(!CloudflareNormalizer.is_success(&envelope(403, json!({"success": true}))));
    }

    #[tokio::test]
    async fn test_list_dns_uses_context_zone() {
        let stub = StubApi::start(&[(
            "/zones/zone-1/dns_records",
            200,
            json!({"success": true, "result": [{"id": "rec-1", "type": "A"}]}),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx(&stub, dir.path());
        ctx.set_id("zone_id", "zone-1");

        let resp = Cloudflare.list_dns(&ctx, None, Some("a"), None).await.unwrap();
        assert_eq!(resp.list.len(), 1);
        let req = stub.last();
        assert_eq!(req.query, "type=A");
        assert_eq!(req.headers["authorization"], "Bearer token-123");

        let err = Cloudflare.list_dns(&RuntimeContext::new(ProviderId::Cloudflare, &stub.base_url), None, None, None)
            .await
            .unwrap_err();
        assert!(err.is_usage());
    }

    #[tokio::test]
    async fn test_smoke_counts_pass_fail_skip() {
        let ok = json!({"success": true, "result": [{"id": "x"}]});
        let stub = StubApi::start(&[
            ("/client/v4/user/tokens/verify", 200, json!({"success": true, "result": {"status": "active"}})),
            ("/client/v4/accounts", 200, ok.clone()),
            ("/client/v4/zones", 200, ok.clone()),
            ("/client/v4/accounts/acct_123/pages/projects", 200, ok.clone()),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx(&stub, dir.path());
        ctx.base_url = format!("{}/client/v4", stub.base_url);
        ctx.set_id("account_id", "acct_123");

        let report = Cloudflare.smoke(&ctx).await;
        assert!(!report.ok);
        assert_eq!(report.summary.pass, 4);
        assert_eq!(report.summary.fail, 10);
        assert_eq!(report.summary.skip, 0);
        let verify = &report.checks[0];
        assert_eq!(verify.detail, "status=200");
        let failed = report.checks.iter().find(|c| c.name == "r2_buckets").unwrap();
        assert_eq!(failed.status_code, Some(404));

        let zones = stub
            .requests()
            .into_iter()
            .find(|r| r.path == "/client/v4/zones")
            .unwrap();
        assert_eq!(zones.query, "per_page=1&account.id=acct_123");
    }

    #[tokio::test]
    async fn test_smoke_skips_account_checks_without_account() {
        let stub = StubApi::start(&[("/user/tokens/verify", 200, json!({"success": true}))]).await;
        let dir = tempfile::tempdir().unwrap();
        let report = Cloudflare.smoke(&ctx(&stub, dir.path())).await;
        assert_eq!(report.summary.skip, 11);
        assert_eq!(report.summary.pass, 1);
        assert!(report.render_text().contains("SKIP"));
    }
}

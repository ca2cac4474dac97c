//! Provider adapter trait and context construction

use async_trait::async_trait;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use si_config::Settings;
use si_runtime::{
    Credentials, ExecOptions, FieldSpec, HttpExecutor, ProviderId, Request, Resolver, Response,
    ResponseNormalizer, Result, RuntimeContext, RuntimeError,
};
use std::collections::BTreeMap;

/// Flag values given on the command line, keyed by flag name (`--api-token`).
#[derive(Debug, Clone, Default)]
pub struct ContextFlags {
    pub account: Option<String>,
    pub env: Option<String>,
    pub base_url: Option<String>,
    values: BTreeMap<String, String>,
}

impl ContextFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(mut self, account: Option<&str>) -> Self {
        self.account = non_empty(account);
        self
    }

    pub fn env(mut self, env: Option<&str>) -> Self {
        self.env = non_empty(env);
        self
    }

    pub fn base_url(mut self, base_url: Option<&str>) -> Self {
        self.base_url = non_empty(base_url);
        self
    }

    /// Record `value` for `flag`; empty values are ignored.
    pub fn with(mut self, flag: &str, value: Option<&str>) -> Self {
        self.set(flag, value);
        self
    }

    pub fn set(&mut self, flag: &str, value: Option<&str>) {
        if let Some(value) = non_empty(value) {
            self.values.insert(flag.to_string(), value);
        }
    }

    pub fn get(&self, flag: &str) -> Option<&str> {
        self.values.get(flag).map(String::as_str)
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Builds a [`RuntimeContext`] field by field, recording the source of every
/// resolved value.
pub struct ContextBuilder<'a> {
    resolver: Resolver,
    flags: &'a ContextFlags,
    ctx: RuntimeContext,
    base_url_source: String,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(settings: &Settings, provider: ProviderId, flags: &'a ContextFlags) -> Result<Self> {
        let resolver = Resolver::new(
            settings,
            provider,
            flags.account.as_deref(),
            flags.env.as_deref(),
        )?;
        let base = resolver.base_url(flags.base_url.as_deref(), provider.spec().base_url);
        let mut ctx = RuntimeContext::new(provider, base.value.trim_end_matches('/'));
        ctx.account_alias = resolver.alias().to_string();
        ctx.environment = resolver.environment();
        ctx.log_path = resolver.log_path();
        Ok(Self {
            resolver,
            flags,
            ctx,
            base_url_source: base.source,
        })
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn flags(&self) -> &ContextFlags {
        self.flags
    }

    /// Replace the registry base URL unless one was configured explicitly.
    pub fn default_base_url(&mut self, url: impl Into<String>) {
        if self.base_url_source.is_empty() {
            self.ctx.base_url = url.into().trim_end_matches('/').to_string();
        }
    }

    pub fn require(&mut self, spec: &FieldSpec) -> Result<String> {
        let found = self.resolver.require(spec, self.flags.get(spec.flag))?;
        self.ctx.add_source(&found.source);
        Ok(found.value)
    }

    pub fn optional(&mut self, spec: &FieldSpec) -> Option<String> {
        let found = self.resolver.field(spec, self.flags.get(spec.flag));
        if found.is_empty() {
            return None;
        }
        self.ctx.add_source(&found.source);
        Some(found.value)
    }

    /// Resolve an identifier and store it under `key` in the context ids.
    pub fn id(&mut self, key: &str, spec: &FieldSpec) -> Option<String> {
        let value = self.optional(spec)?;
        self.ctx.set_id(key, value.clone());
        Some(value)
    }

    pub fn require_id(&mut self, key: &str, spec: &FieldSpec) -> Result<String> {
        let value = self.require(spec)?;
        self.ctx.set_id(key, value.clone());
        Ok(value)
    }

    pub fn finish(mut self, credentials: Credentials) -> RuntimeContext {
        self.ctx.credentials = credentials;
        tracing::debug!(
            provider = self.ctx.provider.as_str(),
            alias = self.ctx.account_alias.as_str(),
            source = self.ctx.source.as_str(),
            "resolved runtime context"
        );
        self.ctx
    }
}

/// One provider adapter.
///
/// Adapters resolve their own context and know one cheap authenticated call
/// used by `auth status` and `doctor`. Everything else goes through
/// [`Provider::send`].
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Name used in human output ("Cloudflare").
    fn display_name(&self) -> &'static str;

    fn context(&self, settings: &Settings, flags: &ContextFlags) -> Result<RuntimeContext>;

    fn normalizer(&self) -> &dyn ResponseNormalizer;

    fn verify_request(&self, ctx: &RuntimeContext) -> Result<Request>;

    /// Adjust a raw request before it is sent (API version prefix, ...).
    fn prepare_raw(&self, request: Request) -> Request {
        request
    }

    async fn send(&self, ctx: &RuntimeContext, request: &Request) -> Result<Response> {
        let opts = ExecOptions::from_context(ctx);
        HttpExecutor::shared()
            .send(&opts, request, self.normalizer())
            .await
    }

    async fn verify(&self, ctx: &RuntimeContext) -> Result<Response> {
        let request = self.verify_request(ctx)?;
        self.send(ctx, &request).await
    }
}

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'?')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Percent-encode one path segment.
pub fn segment(value: &str) -> String {
    utf8_percent_encode(value.trim(), SEGMENT).to_string()
}

/// Prefix `path` with `/<version>` unless it already carries it.
pub fn versioned(version: &str, path: &str) -> String {
    let path = if path.starts_with('/') || path.starts_with("http") {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if version.is_empty() || path.starts_with("http") {
        return path;
    }
    let prefix = format!("/{version}");
    if path == prefix || path.starts_with(&format!("{prefix}/")) {
        return path;
    }
    format!("{prefix}{path}")
}

/// Context id or a usage error naming the flag that provides it.
pub fn required_id<'c>(ctx: &'c RuntimeContext, key: &str, flag: &str) -> Result<&'c str> {
    ctx.id(key).ok_or_else(|| {
        RuntimeError::usage(format!(
            "{} {} is required (set {flag} or configure it on the account)",
            ctx.provider,
            key.replace('_', " ")
        ))
    })
}

/// Short human summary of a successful response.
pub fn summarize(response: &Response) -> String {
    if !response.list.is_empty() {
        return format!("items={}", response.list.len());
    }
    match &response.data {
        Some(data) => {
            for key in ["id", "name", "login", "username", "status"] {
                if let Some(value) = data.get(key).and_then(|v| v.as_str()) {
                    return format!("{key}={value}");
                }
            }
            format!("status={}", response.status_code)
        }
        None => format!("status={}", response.status_code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use si_runtime::{EntryField, Environment};

    const TOKEN: FieldSpec = FieldSpec::secret(
        "test token",
        "--token",
        "API_TOKEN",
        Some(EntryField::ApiTokenEnv),
        &["SI_PROVIDER_TEST_TOKEN"],
    );

    #[test]
    fn test_flags_ignore_empty_values() {
        let flags = ContextFlags::new()
            .account(Some("  "))
            .with("--token", Some(""))
            .with("--project", Some(" proj-1 "));
        assert!(flags.account.is_none());
        assert!(flags.get("--token").is_none());
        assert_eq!(flags.get("--project"), Some("proj-1"));
    }

    #[test]
    fn test_builder_records_sources() {
        let settings = Settings::default();
        let flags = ContextFlags::new()
            .env(Some("staging"))
            .base_url(Some("http://127.0.0.1:9/api/"))
            .with("--token", Some("tok-123"));
        let mut builder = ContextBuilder::new(&settings, ProviderId::Workos, &flags).unwrap();
        builder.default_base_url("https://ignored.example");
        let token = builder.require(&TOKEN).unwrap();
        let ctx = builder.finish(Credentials::Bearer(token));
        assert_eq!(ctx.base_url, "http://127.0.0.1:9/api");
        assert_eq!(ctx.environment, Environment::Staging);
        assert_eq!(ctx.source, "flag:--token");
    }

    #[test]
    fn test_missing_required_lists_candidates() {
        temp_env::with_var("SI_PROVIDER_TEST_TOKEN", None::<&str>, || {
            let settings = Settings::default();
            let flags = ContextFlags::new();
            let mut builder = ContextBuilder::new(&settings, ProviderId::Workos, &flags).unwrap();
            let err = builder.require(&TOKEN).unwrap_err();
            assert!(err.is_missing_credential());
            let message = err.to_string();
            assert!(message.contains("--token"));
            assert!(message.contains("SI_PROVIDER_TEST_TOKEN"));
        });
    }

    #[test]
    fn test_versioned_paths() {
        assert_eq!(versioned("v2", "/me"), "/v2/me");
        assert_eq!(versioned("v2", "/v2/me"), "/v2/me");
        assert_eq!(versioned("v22.0", "me"), "/v22.0/me");
        assert_eq!(versioned("", "/api/v1/me"), "/api/v1/me");
        assert_eq!(versioned("2", "https://api.x.com/2/users/me"), "https://api.x.com/2/users/me");
    }

    #[test]
    fn test_segment_escapes_separators() {
        assert_eq!(segment("a/b c"), "a%2Fb%20c");
        assert_eq!(segment("serviceusage.googleapis.com"), "serviceusage.googleapis.com");
    }
}

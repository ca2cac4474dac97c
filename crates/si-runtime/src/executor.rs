//! HTTP executor
//!
//! Every provider call goes through [`HttpExecutor::execute`]:
//!
//! 1. cache lookup (safe methods only)
//! 2. breaker check, cooldown and concurrency permit
//! 3. build request, attach credentials, send under the attempt budget
//! 4. normalize, feed back into health and breaker, log the event
//! 5. on success cache/invalidate; on failure retry when the method is safe
//!    and the failure transient

use crate::auth;
use crate::cache::ResponseCache;
use crate::client::{DEFAULT_TIMEOUT, shared_client};
use crate::context::{Credentials, RuntimeContext};
use crate::error::{Result, RuntimeError};
use crate::eventlog::{self, Event, EventKind};
use crate::guard::{Outcome, ProviderGuards};
use crate::netpolicy::{RetryConfig, is_safe_method, retry_after_for, should_retry};
use crate::request::{Body, Request, Response, ResponseNormalizer, resolve_url};
use crate::spec::ProviderId;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Method, StatusCode};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Per-call execution parameters.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub provider: ProviderId,
    /// Breaker, cache and health key within the provider (usually the account alias).
    pub subject: String,
    pub account: String,
    pub environment: String,
    pub base_url: String,
    pub credentials: Credentials,
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    /// Overall deadline across all attempts.
    pub deadline: Option<Instant>,
    pub log_path: Option<PathBuf>,
    pub disable_cache: bool,
}

impl ExecOptions {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            subject: String::new(),
            account: String::new(),
            environment: String::new(),
            base_url: provider.spec().base_url.to_string(),
            credentials: Credentials::None,
            max_retries: RetryConfig::default().max_retries,
            attempt_timeout: DEFAULT_TIMEOUT,
            deadline: None,
            log_path: None,
            disable_cache: false,
        }
    }

    pub fn from_context(ctx: &RuntimeContext) -> Self {
        Self {
            subject: ctx.account_alias.clone(),
            account: ctx.account_alias.clone(),
            environment: ctx.environment.as_str().to_string(),
            base_url: ctx.base_url.clone(),
            credentials: ctx.credentials.clone(),
            log_path: ctx.log_path.clone(),
            ..Self::new(ctx.provider)
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.deadline = Some(Instant::now() + timeout);
        }
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn event(&self, kind: EventKind, method: &Method, url: &Url) -> Event {
        let mut event = Event::new(kind, self.provider.as_str(), method.as_str(), url.as_str());
        event.account = self.account.clone();
        event.environment = self.environment.clone();
        event
    }

    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

#[derive(Debug, Default)]
pub struct HttpExecutor {
    guards: Arc<ProviderGuards>,
    cache: Arc<ResponseCache>,
    retry: RetryConfig,
}

static SHARED: OnceLock<HttpExecutor> = OnceLock::new();

enum AttemptError {
    Deadline,
    Transport(RuntimeError),
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide executor sharing cache, breaker and health state.
    pub fn shared() -> &'static HttpExecutor {
        SHARED.get_or_init(HttpExecutor::new)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn guards(&self) -> &ProviderGuards {
        &self.guards
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Resolve `request` against `opts.base_url` and execute it with shared
    /// provider headers, adapter headers and body.
    pub async fn send(
        &self,
        opts: &ExecOptions,
        request: &Request,
        normalizer: &dyn ResponseNormalizer,
    ) -> Result<Response> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| RuntimeError::usage(format!("invalid http method {:?}", request.method)))?;
        let url = resolve_url(&opts.base_url, &request.path, &request.query)?;
        let body = match &request.media_path {
            Some(path) => Some(tokio::fs::read(path).await?),
            None if request.body.is_none() => None,
            None => Some(request.body.to_bytes()?),
        };
        let content_type = match (&request.media_path, &request.body) {
            (Some(_), _) if request.content_type.trim().is_empty() => "application/octet-stream".to_string(),
            (None, Body::None) => String::new(),
            _ => request.content_type().to_string(),
        };
        let spec = opts.provider.spec();
        let headers = request.headers.clone();
        self.execute(opts, method, url, normalizer, move |client, method, url| {
            let mut builder = client
                .request(method.clone(), url.clone())
                .header(reqwest::header::ACCEPT, spec.accept)
                .header(reqwest::header::USER_AGENT, spec.user_agent);
            for (name, value) in spec.default_headers {
                builder = builder.header(*name, *value);
            }
            for (name, value) in &headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(bytes) = &body {
                builder = builder.body(bytes.clone());
                if !content_type.is_empty() {
                    builder = builder.header(CONTENT_TYPE, content_type.as_str());
                }
            }
            builder
        })
        .await
    }

    /// Run one logical call through cache, guards and retries.
    pub async fn execute<F>(
        &self,
        opts: &ExecOptions,
        method: Method,
        url: Url,
        normalizer: &dyn ResponseNormalizer,
        build: F,
    ) -> Result<Response>
    where
        F: Fn(&reqwest::Client, &Method, &Url) -> reqwest::RequestBuilder,
    {
        let provider = opts.provider;
        let endpoint = url.as_str().to_string();
        let log_path = opts.log_path.as_deref();

        if !opts.disable_cache
            && let Some(hit) = self.cache.lookup(provider, &opts.subject, method.as_str(), &endpoint)
        {
            let resp = normalizer.normalize(hit.status, &hit.headers, &hit.body);
            let mut event = opts.event(EventKind::CacheHit, &method, &url);
            event.status_code = Some(resp.status_code);
            event.request_id = resp.request_id.clone();
            eventlog::record(log_path, event);
            return Ok(resp);
        }

        let client = shared_client(opts.attempt_timeout)?;
        let attempts = opts.max_retries.saturating_add(1);
        let started = Instant::now();

        for attempt in 1..=attempts {
            if opts.remaining().is_some_and(|r| r.is_zero()) {
                return Err(self.cancelled(opts, &method, &url, attempt, started));
            }
            let permit = match opts.remaining() {
                Some(remaining) => {
                    match tokio::time::timeout(remaining, self.guards.acquire(provider, &opts.subject, self.retry.max_retry_after)).await {
                        Ok(permit) => permit?,
                        Err(_) => return Err(self.cancelled(opts, &method, &url, attempt, started)),
                    }
                }
                None => {
                    self.guards
                        .acquire(provider, &opts.subject, self.retry.max_retry_after)
                        .await?
                }
            };

            let mut request = build(&client, &method, &url).build()?;
            auth::apply(&opts.credentials, &client, &opts.base_url, &mut request).await?;

            let budget = match opts.remaining() {
                Some(remaining) => remaining.min(opts.attempt_timeout),
                None => opts.attempt_timeout,
            };
            tracing::debug!(
                provider = provider.as_str(),
                method = method.as_str(),
                attempt,
                "sending request"
            );
            let attempt_start = Instant::now();
            let outcome = self.send_once(&client, request, budget, opts).await;
            let latency = attempt_start.elapsed();
            drop(permit);

            let (status, headers, body) = match outcome {
                Ok(parts) => parts,
                Err(AttemptError::Deadline) => {
                    self.guards.feedback(provider, &opts.subject, Outcome::Transport, None, latency);
                    return Err(self.cancelled(opts, &method, &url, attempt, started));
                }
                Err(AttemptError::Transport(err)) => {
                    self.guards.feedback(provider, &opts.subject, Outcome::Transport, None, latency);
                    let mut event = opts.event(EventKind::Error, &method, &url);
                    event.attempt = attempt;
                    event.duration_ms = started.elapsed().as_millis() as u64;
                    event.error = err.to_string();
                    eventlog::record(log_path, event);
                    if attempt < attempts && should_retry(method.as_str(), None, true) {
                        self.sleep(opts, attempt, None, &method, &url, started).await?;
                        continue;
                    }
                    return Err(err);
                }
            };

            let resp = normalizer.normalize(status, &headers, &body);
            let retry_after = retry_after_for(
                status.as_u16(),
                headers
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            self.guards.feedback(
                provider,
                &opts.subject,
                Outcome::Status(status.as_u16()),
                retry_after,
                latency,
            );
            let mut event = opts.event(EventKind::Response, &method, &url);
            event.attempt = attempt;
            event.status_code = Some(resp.status_code);
            event.request_id = resp.request_id.clone();
            event.duration_ms = started.elapsed().as_millis() as u64;

            if normalizer.is_success(&resp) {
                eventlog::record(log_path, event);
                if !opts.disable_cache {
                    if is_safe_method(method.as_str()) {
                        self.cache.store(
                            provider,
                            &opts.subject,
                            method.as_str(),
                            &endpoint,
                            status,
                            &headers,
                            &body,
                            provider.spec().cache_ttl,
                        );
                    } else {
                        self.cache.invalidate(provider, &opts.subject);
                    }
                }
                return Ok(resp);
            }

            let err = normalizer.normalize_error(status, &headers, &body);
            event.error = err.to_string();
            eventlog::record(log_path, event);
            if attempt < attempts && should_retry(method.as_str(), Some(status.as_u16()), false) {
                self.sleep(opts, attempt, retry_after, &method, &url, started).await?;
                continue;
            }
            return Err(err.into());
        }
        Err(RuntimeError::Network("request failed".to_string()))
    }

    async fn send_once(
        &self,
        client: &reqwest::Client,
        request: reqwest::Request,
        budget: Duration,
        opts: &ExecOptions,
    ) -> std::result::Result<(StatusCode, HeaderMap, String), AttemptError> {
        let call = async {
            let response = client.execute(request).await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, headers, body))
        };
        match tokio::time::timeout(budget, call).await {
            Ok(Ok(parts)) => Ok(parts),
            Ok(Err(err)) => Err(AttemptError::Transport(err.into())),
            Err(_) if opts.remaining().is_some_and(|r| r.is_zero()) => Err(AttemptError::Deadline),
            Err(_) => Err(AttemptError::Transport(RuntimeError::Network(format!(
                "attempt timed out after {}ms",
                budget.as_millis()
            )))),
        }
    }

    async fn sleep(
        &self,
        opts: &ExecOptions,
        attempt: u32,
        retry_after: Option<Duration>,
        method: &Method,
        url: &Url,
        started: Instant,
    ) -> Result<()> {
        let delay = self.retry.delay(attempt, retry_after);
        if let Some(remaining) = opts.remaining()
            && remaining <= delay
        {
            tokio::time::sleep(remaining).await;
            return Err(self.cancelled(opts, method, url, attempt, started));
        }
        tracing::debug!(
            provider = opts.provider.as_str(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "retrying request"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    fn cancelled(
        &self,
        opts: &ExecOptions,
        method: &Method,
        url: &Url,
        attempt: u32,
        started: Instant,
    ) -> RuntimeError {
        let err = RuntimeError::Cancelled("deadline exceeded".to_string());
        let mut event = opts.event(EventKind::Error, method, url);
        event.attempt = attempt;
        event.duration_ms = started.elapsed().as_millis() as u64;
        event.error = err.to_string();
        eventlog::record(opts.log_path.as_deref(), event);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::DefaultNormalizer;
    use axum::Router;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus};
    use axum::routing::{any, get};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.0,
            ..RetryConfig::default()
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn flaky(hits: Arc<AtomicUsize>, failures: usize) -> Router {
        Router::new().route(
            "/items",
            any(move || {
                let hits = hits.clone();
                async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst);
                    if n < failures {
                        (AxumStatus::SERVICE_UNAVAILABLE, String::new())
                    } else {
                        (AxumStatus::OK, r#"{"items":[{"id":"a"}]}"#.to_string())
                    }
                }
            }),
        )
    }

    fn opts(provider: ProviderId, base: &str) -> ExecOptions {
        let mut opts = ExecOptions::new(provider);
        opts.base_url = base.to_string();
        opts.subject = "test".to_string();
        opts
    }

    #[tokio::test]
    async fn test_get_retries_transient_failures() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(flaky(hits.clone(), 2)).await;
        let exec = HttpExecutor::new().with_retry(fast_retry());
        let resp = exec
            .send(&opts(ProviderId::Workos, &base), &Request::get("/items"), &DefaultNormalizer(ProviderId::Workos))
            .await
            .unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.list.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_post_is_never_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(flaky(hits.clone(), 5)).await;
        let exec = HttpExecutor::new().with_retry(fast_retry());
        let req = Request::post("/items").json(serde_json::json!({"name": "x"}));
        let err = exec
            .send(&opts(ProviderId::Workos, &base), &req, &DefaultNormalizer(ProviderId::Workos))
            .await
            .unwrap_err();
        assert_eq!(err.provider_error().unwrap().status_code, 503);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(flaky(hits.clone(), 100)).await;
        let exec = HttpExecutor::new().with_retry(fast_retry());
        let err = exec
            .send(
                &opts(ProviderId::Workos, &base).with_max_retries(1),
                &Request::get("/items"),
                &DefaultNormalizer(ProviderId::Workos),
            )
            .await
            .unwrap_err();
        assert!(err.is_provider());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network_and_logs() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(flaky(hits.clone(), 0)).await;
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("github.log");
        let exec = HttpExecutor::new().with_retry(fast_retry());
        let mut o = opts(ProviderId::Github, &base);
        o.log_path = Some(log.clone());
        let n = DefaultNormalizer(ProviderId::Github);
        exec.send(&o, &Request::get("/items"), &n).await.unwrap();
        let cached = exec.send(&o, &Request::get("/items"), &n).await.unwrap();
        assert_eq!(cached.list.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let content = std::fs::read_to_string(&log).unwrap();
        let events: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events[0]["event"], "response");
        assert_eq!(events[1]["event"], "cache_hit");

        exec.send(&o, &Request::post("/items"), &n).await.unwrap();
        exec.send(&o, &Request::get("/items"), &n).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_trace_invalidates_cached_reads() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(flaky(hits.clone(), 0)).await;
        let exec = HttpExecutor::new().with_retry(fast_retry());
        let o = opts(ProviderId::Github, &base);
        let n = DefaultNormalizer(ProviderId::Github);
        exec.send(&o, &Request::get("/items"), &n).await.unwrap();
        assert_eq!(exec.cache.len(), 1);
        exec.send(&o, &Request::new("TRACE", "/items"), &n).await.unwrap();
        assert!(exec.cache.is_empty());
        exec.send(&o, &Request::get("/items"), &n).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_deadline_cancels() {
        let app = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let base = serve(app).await;
        let exec = HttpExecutor::new().with_retry(fast_retry());
        let o = opts(ProviderId::Workos, &base).with_timeout(Duration::from_millis(100));
        let err = exec
            .send(&o, &Request::get("/slow"), &DefaultNormalizer(ProviderId::Workos))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_auth_and_shared_headers_are_sent() {
        let app = Router::new().route(
            "/echo",
            get(|headers: AxumHeaders| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let version = headers
                    .get("x-github-api-version")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                axum::Json(serde_json::json!({"auth": auth, "version": version}))
            }),
        );
        let base = serve(app).await;
        let exec = HttpExecutor::new();
        let mut o = opts(ProviderId::Github, &base);
        o.credentials = Credentials::Bearer("ghp_test".to_string());
        o.disable_cache = true;
        let resp = exec
            .send(&o, &Request::get("/echo"), &DefaultNormalizer(ProviderId::Github))
            .await
            .unwrap();
        assert_eq!(resp.data_str("auth"), Some("Bearer ghp_test"));
        assert_eq!(resp.data_str("version"), Some("2022-11-28"));
    }

    #[tokio::test]
    async fn test_breaker_fails_fast() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(flaky(hits.clone(), 100)).await;
        let exec = HttpExecutor::new().with_retry(fast_retry());
        let o = opts(ProviderId::Workos, &base).with_max_retries(0);
        let n = DefaultNormalizer(ProviderId::Workos);
        for _ in 0..crate::guard::BREAKER_THRESHOLD {
            let _ = exec.send(&o, &Request::get("/items"), &n).await;
        }
        let err = exec.send(&o, &Request::get("/items"), &n).await.unwrap_err();
        assert!(matches!(err, RuntimeError::CircuitOpen { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), crate::guard::BREAKER_THRESHOLD as usize);
    }
}

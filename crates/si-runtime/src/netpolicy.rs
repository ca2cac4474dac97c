//! Retry policy: safe-method classification, retry decisions and backoff

use rand::Rng;
use std::time::Duration;

/// Retry configuration shared by every provider call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Upper bound for a server-provided `Retry-After`.
    pub max_retry_after: Duration,
    /// Relative jitter applied to computed delays (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            max_retry_after: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Base delay before retry number `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exp);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    /// Delay before retry number `attempt`, honoring `Retry-After` when given.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after.filter(|d| !d.is_zero()) {
            return wait.min(self.max_retry_after);
        }
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        Duration::from_millis((base.as_millis() as f64 * factor) as u64).min(self.max_delay)
    }
}

/// `GET`, `HEAD` and `OPTIONS`.
pub fn is_safe_method(method: &str) -> bool {
    matches!(
        method.trim().to_ascii_uppercase().as_str(),
        "GET" | "HEAD" | "OPTIONS"
    )
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

/// Pure retry decision.
///
/// Unsafe methods are never retried. Safe methods retry on transport errors
/// and on 408, 429 and 5xx.
pub fn should_retry(method: &str, status: Option<u16>, transport_error: bool) -> bool {
    if !is_safe_method(method) {
        return false;
    }
    if transport_error {
        return true;
    }
    status.is_some_and(is_retryable_status)
}

/// Parse `Retry-After` as integer seconds or an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<i64>() {
        return (secs > 0).then(|| Duration::from_secs(secs as u64));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    delta.to_std().ok().filter(|d| !d.is_zero())
}

/// `Retry-After` is only honored for 429 and 503.
pub fn retry_after_for(status: u16, header: Option<&str>) -> Option<Duration> {
    if status != 429 && status != 503 {
        return None;
    }
    header.and_then(parse_retry_after)
}

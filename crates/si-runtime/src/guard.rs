//! Provider guards: circuit breaker, health counters, concurrency limits
//! and server-requested cooldowns.

use crate::error::{Result, RuntimeError};
use crate::spec::ProviderId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const BREAKER_THRESHOLD: u32 = 5;
pub const BREAKER_OPEN_FOR: Duration = Duration::from_secs(30);
const LATENCY_WINDOW: usize = 256;

type Key = (ProviderId, String);

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct HealthState {
    requests: u64,
    success: u64,
    rate_limited: u64,
    server_errors: u64,
    transport_errors: u64,
    latencies_ms: Vec<u64>,
}

/// Health of one `(provider, subject)` pair.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthEntry {
    pub provider: ProviderId,
    pub subject: String,
    pub requests: u64,
    pub success: u64,
    #[serde(rename = "429")]
    pub rate_limited: u64,
    #[serde(rename = "5xx")]
    pub server_errors: u64,
    pub transport_errors: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub breaker_open: bool,
}

/// Outcome of one attempt, fed back into the guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Status(u16),
    Transport,
}

impl Outcome {
    fn is_failure(&self) -> bool {
        match self {
            Self::Transport => true,
            Self::Status(code) => *code == 429 || (500..=599).contains(code),
        }
    }
}

#[derive(Debug, Default)]
pub struct ProviderGuards {
    breakers: Mutex<HashMap<Key, BreakerState>>,
    health: Mutex<HashMap<Key, HealthState>>,
    cooldowns: Mutex<HashMap<Key, Instant>>,
    semaphores: Mutex<HashMap<ProviderId, Arc<Semaphore>>>,
}

fn key(provider: ProviderId, subject: &str) -> Key {
    (provider, subject.trim().to_string())
}

fn percentile(sorted: &[u64], pct: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = (sorted.len() * pct).div_ceil(100).saturating_sub(1);
    sorted[idx.min(sorted.len() - 1)]
}

impl ProviderGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail fast when the breaker for `(provider, subject)` is open.
    pub fn check_breaker(&self, provider: ProviderId, subject: &str) -> Result<()> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        let Some(state) = breakers.get_mut(&key(provider, subject)) else {
            return Ok(());
        };
        match state.open_until {
            Some(until) if Instant::now() < until => Err(RuntimeError::CircuitOpen {
                provider: provider.as_str().to_string(),
                subject: subject.trim().to_string(),
                retry_in_secs: until.saturating_duration_since(Instant::now()).as_secs().max(1),
            }),
            Some(_) => {
                // Half-open: let the next attempt through.
                state.open_until = None;
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn breaker_open(&self, provider: ProviderId, subject: &str) -> bool {
        self.breakers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key(provider, subject))
            .and_then(|s| s.open_until)
            .is_some_and(|until| Instant::now() < until)
    }

    /// Wait out a cooldown requested earlier via `Retry-After`, then take a
    /// concurrency permit for `provider`.
    pub async fn acquire(
        &self,
        provider: ProviderId,
        subject: &str,
        max_wait: Duration,
    ) -> Result<OwnedSemaphorePermit> {
        self.check_breaker(provider, subject)?;
        let wait = {
            let cooldowns = self.cooldowns.lock().unwrap_or_else(|e| e.into_inner());
            cooldowns
                .get(&key(provider, subject))
                .map(|until| until.saturating_duration_since(Instant::now()))
                .unwrap_or_default()
        };
        if !wait.is_zero() {
            tracing::debug!(provider = provider.as_str(), wait_ms = wait.as_millis() as u64, "provider cooldown");
            tokio::time::sleep(wait.min(max_wait)).await;
        }
        let semaphore = {
            let mut semaphores = self.semaphores.lock().unwrap_or_else(|e| e.into_inner());
            semaphores
                .entry(provider)
                .or_insert_with(|| Arc::new(Semaphore::new(provider.spec().concurrency.max(1))))
                .clone()
        };
        semaphore
            .acquire_owned()
            .await
            .map_err(|e| RuntimeError::Cancelled(e.to_string()))
    }

    /// Record an attempt outcome with its latency.
    pub fn feedback(
        &self,
        provider: ProviderId,
        subject: &str,
        outcome: Outcome,
        retry_after: Option<Duration>,
        latency: Duration,
    ) {
        let k = key(provider, subject);
        {
            let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
            let state = breakers.entry(k.clone()).or_default();
            if outcome.is_failure() {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= BREAKER_THRESHOLD {
                    state.open_until = Some(Instant::now() + BREAKER_OPEN_FOR);
                    tracing::warn!(
                        provider = provider.as_str(),
                        subject = k.1.as_str(),
                        failures = state.consecutive_failures,
                        "circuit breaker opened"
                    );
                }
            } else {
                state.consecutive_failures = 0;
                state.open_until = None;
            }
        }
        {
            let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
            let state = health.entry(k.clone()).or_default();
            state.requests += 1;
            match outcome {
                Outcome::Transport => state.transport_errors += 1,
                Outcome::Status(code) if (200..300).contains(&code) => state.success += 1,
                Outcome::Status(429) => state.rate_limited += 1,
                Outcome::Status(code) if code >= 500 => state.server_errors += 1,
                Outcome::Status(_) => {}
            }
            if state.latencies_ms.len() >= LATENCY_WINDOW {
                state.latencies_ms.remove(0);
            }
            state.latencies_ms.push(latency.as_millis() as u64);
        }
        if let Some(wait) = retry_after.filter(|d| !d.is_zero()) {
            self.cooldowns
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(k, Instant::now() + wait);
        }
    }

    /// Health entries, optionally filtered to one provider, sorted by key.
    pub fn health_snapshot(&self, provider: Option<ProviderId>) -> Vec<HealthEntry> {
        let health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<HealthEntry> = health
            .iter()
            .filter(|((p, _), _)| provider.is_none_or(|want| *p == want))
            .map(|((p, subject), state)| {
                let mut sorted = state.latencies_ms.clone();
                sorted.sort_unstable();
                HealthEntry {
                    provider: *p,
                    subject: subject.clone(),
                    requests: state.requests,
                    success: state.success,
                    rate_limited: state.rate_limited,
                    server_errors: state.server_errors,
                    transport_errors: state.transport_errors,
                    p50_ms: percentile(&sorted, 50),
                    p95_ms: percentile(&sorted, 95),
                    breaker_open: false,
                }
            })
            .collect();
        drop(health);
        for entry in &mut out {
            entry.breaker_open = self.breaker_open(entry.provider, &entry.subject);
        }
        out.sort_by(|a, b| (a.provider, &a.subject).cmp(&(b.provider, &b.subject)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_breaker_opens_after_repeated_failures() {
        let guards = ProviderGuards::new();
        for _ in 0..BREAKER_THRESHOLD {
            guards.check_breaker(ProviderId::Github, "core").unwrap();
            guards.feedback(ProviderId::Github, "core", Outcome::Status(503), None, MS);
        }
        let err = guards.check_breaker(ProviderId::Github, "core").unwrap_err();
        assert!(matches!(err, RuntimeError::CircuitOpen { .. }));
        assert!(guards.check_breaker(ProviderId::Github, "other").is_ok());
    }

    #[test]
    fn test_breaker_closes_on_success() {
        let guards = ProviderGuards::new();
        for _ in 0..BREAKER_THRESHOLD - 1 {
            guards.feedback(ProviderId::Github, "core", Outcome::Transport, None, MS);
        }
        guards.feedback(ProviderId::Github, "core", Outcome::Status(200), None, MS);
        guards.feedback(ProviderId::Github, "core", Outcome::Status(500), None, MS);
        assert!(guards.check_breaker(ProviderId::Github, "core").is_ok());
        assert!(!guards.breaker_open(ProviderId::Github, "core"));
    }

    #[test]
    fn test_client_errors_do_not_trip_breaker() {
        let guards = ProviderGuards::new();
        for _ in 0..10 {
            guards.feedback(ProviderId::Cloudflare, "acme", Outcome::Status(403), None, MS);
        }
        assert!(guards.check_breaker(ProviderId::Cloudflare, "acme").is_ok());
    }

    #[test]
    fn test_health_snapshot_tracks_latency_and_status() {
        let guards = ProviderGuards::new();
        guards.feedback(ProviderId::Github, "core", Outcome::Status(200), None, Duration::from_millis(100));
        guards.feedback(ProviderId::Github, "core", Outcome::Status(429), None, Duration::from_millis(220));
        guards.feedback(ProviderId::Github, "core", Outcome::Status(502), None, Duration::from_millis(340));
        guards.feedback(ProviderId::Gcp, "p", Outcome::Status(200), None, MS);

        let entries = guards.health_snapshot(Some(ProviderId::Github));
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.requests, 3);
        assert_eq!(entry.success, 1);
        assert_eq!(entry.rate_limited, 1);
        assert_eq!(entry.server_errors, 1);
        assert_eq!(entry.p50_ms, 220);
        assert_eq!(entry.p95_ms, 340);
        assert_eq!(guards.health_snapshot(None).len(), 2);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_cooldown() {
        let guards = ProviderGuards::new();
        guards.feedback(
            ProviderId::SocialX,
            "core",
            Outcome::Status(429),
            Some(Duration::from_millis(80)),
            MS,
        );
        let start = Instant::now();
        let _permit = guards
            .acquire(ProviderId::SocialX, "core", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}

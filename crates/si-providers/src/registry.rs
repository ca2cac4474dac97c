//! `providers list|health` and adapter lookup

use crate::appstore::AppStore;
use crate::aws::{Aws, AwsService};
use crate::cloudflare::Cloudflare;
use crate::gcp::{Gcp, Gemini};
use crate::github::GitHub;
use crate::play::GooglePlay;
use crate::provider::Provider;
use crate::social::Social;
use crate::workos::WorkOs;
use crate::youtube::YouTube;
use si_runtime::spec::{ProviderSpec, specs};
use si_runtime::{HealthEntry, HttpExecutor, ProviderId};

/// Adapter for `id`. AWS resolves to STS and Bedrock to the runtime endpoint.
pub fn adapter(id: ProviderId) -> Box<dyn Provider> {
    match id {
        ProviderId::Cloudflare => Box::new(Cloudflare),
        ProviderId::Aws => Box::new(Aws::new(AwsService::Sts)),
        ProviderId::Bedrock => Box::new(Aws::new(AwsService::BedrockRuntime)),
        ProviderId::Gcp => Box::new(Gcp),
        ProviderId::Gemini => Box::new(Gemini),
        ProviderId::Github => Box::new(GitHub),
        ProviderId::Workos => Box::new(WorkOs),
        ProviderId::SocialFacebook
        | ProviderId::SocialInstagram
        | ProviderId::SocialX
        | ProviderId::SocialLinkedin
        | ProviderId::SocialReddit => Box::new(Social::for_network(id)),
        ProviderId::GooglePlay => Box::new(GooglePlay),
        ProviderId::Youtube => Box::new(YouTube),
        ProviderId::AppStore => Box::new(AppStore),
    }
}

pub fn provider_list() -> &'static [ProviderSpec] {
    specs()
}

pub fn render_list(rows: &[ProviderSpec]) -> String {
    let mut lines = vec![format!(
        "{:<18} {:<16} {:<6} {:<5} {}",
        "PROVIDER", "AUTH", "TTL", "CONC", "BASE URL"
    )];
    for spec in rows {
        lines.push(format!(
            "{:<18} {:<16} {:<6} {:<5} {}",
            spec.id.as_str(),
            spec.auth_style.as_str(),
            format!("{}s", spec.cache_ttl.as_secs()),
            spec.concurrency,
            spec.base_url
        ));
    }
    lines.join("\n")
}

/// Health counters gathered by the shared executor in this process.
pub fn health(provider: Option<ProviderId>) -> Vec<HealthEntry> {
    HttpExecutor::shared().guards().health_snapshot(provider)
}

pub fn render_health(entries: &[HealthEntry]) -> String {
    if entries.is_empty() {
        return "No provider traffic recorded in this process.".to_string();
    }
    let mut lines = vec![format!(
        "{:<18} {:<14} {:>6} {:>6} {:>5} {:>5} {:>7} {:>7} {}",
        "PROVIDER", "SUBJECT", "REQS", "OK", "429", "5XX", "P50MS", "P95MS", "BREAKER"
    )];
    for entry in entries {
        lines.push(format!(
            "{:<18} {:<14} {:>6} {:>6} {:>5} {:>5} {:>7} {:>7} {}",
            entry.provider.as_str(),
            if entry.subject.is_empty() { "-" } else { &entry.subject },
            entry.requests,
            entry.success,
            entry.rate_limited,
            entry.server_errors,
            entry.p50_ms,
            entry.p95_ms,
            if entry.breaker_open { "open" } else { "closed" }
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_provider_has_an_adapter() {
        for id in ProviderId::ALL {
            assert_eq!(adapter(*id).id(), *id);
        }
    }

    #[test]
    fn test_render_list_has_row_per_spec() {
        let text = render_list(provider_list());
        assert_eq!(text.lines().count(), ProviderId::ALL.len() + 1);
        assert!(text.contains("github"));
        assert!(text.contains("15s"));
    }

    #[test]
    fn test_render_health_empty() {
        assert!(render_health(&[]).contains("No provider traffic"));
    }
}

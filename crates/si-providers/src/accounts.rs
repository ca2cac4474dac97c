//! `context list|current|use` over the settings account registry

use serde::Serialize;
use si_config::{AccountEntry, Settings};
use si_runtime::{Environment, ProviderId, Resolver, Result, RuntimeError};
use std::collections::BTreeMap;

/// One configured account, identifiers only.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AccountRow {
    pub alias: String,
    pub name: String,
    pub default: bool,
    #[serde(flatten)]
    pub ids: BTreeMap<String, String>,
}

fn entry_ids(entry: &AccountEntry) -> BTreeMap<String, String> {
    let fields = [
        ("account_id", &entry.account_id),
        ("project_id", &entry.project_id),
        ("organization_id", &entry.organization_id),
        ("owner", &entry.owner),
        ("region", &entry.region),
        ("prod_zone", &entry.prod_zone_id),
        ("staging_zone", &entry.staging_zone_id),
        ("dev_zone", &entry.dev_zone_id),
        ("package_name", &entry.package_name),
        ("channel_id", &entry.channel_id),
        ("app_id", &entry.app_id),
        ("installation_id", &entry.installation_id),
        ("issuer_id", &entry.issuer_id),
        ("key_id", &entry.key_id),
    ];
    fields
        .into_iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(key, value)| (key.to_string(), value.trim().to_string()))
        .collect()
}

pub fn list_accounts(settings: &Settings, provider: ProviderId) -> Vec<AccountRow> {
    let Some(section) = settings.provider(provider.settings_section()) else {
        return Vec::new();
    };
    section
        .accounts
        .iter()
        .map(|(alias, entry)| AccountRow {
            alias: alias.clone(),
            name: entry.name.clone(),
            default: section.default_account == *alias,
            ids: entry_ids(entry),
        })
        .collect()
}

/// Selected account and environment without resolving credentials.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentContext {
    pub provider: ProviderId,
    pub account_alias: String,
    pub environment: Environment,
    pub base_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub env_prefix: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub base_url_source: String,
}

pub fn current(
    settings: &Settings,
    provider: ProviderId,
    account: Option<&str>,
    env: Option<&str>,
) -> Result<CurrentContext> {
    let resolver = Resolver::new(settings, provider, account, env)?;
    let base = resolver.base_url(None, provider.spec().base_url);
    Ok(CurrentContext {
        provider,
        account_alias: resolver.alias().to_string(),
        environment: resolver.environment(),
        base_url: base.value,
        env_prefix: resolver.prefix().to_string(),
        base_url_source: base.source,
    })
}

/// Set the default account (and optionally environment) for `provider`.
///
/// The alias must exist; the caller persists `settings`.
pub fn use_account(
    settings: &mut Settings,
    provider: ProviderId,
    alias: &str,
    env: Option<&str>,
) -> Result<()> {
    let alias = alias.trim();
    let section = settings
        .provider_mut(provider.settings_section())
        .ok_or_else(|| RuntimeError::usage(format!("no settings section for {provider}")))?;
    if !alias.is_empty() && !section.accounts.contains_key(alias) {
        let known = section.aliases().join(", ");
        return Err(RuntimeError::usage(format!(
            "unknown {provider} account {alias:?} (configured: {})",
            if known.is_empty() { "none" } else { &known }
        )));
    }
    if let Some(env) = env.map(str::trim).filter(|e| !e.is_empty()) {
        section.default_env = Environment::parse(env)?.as_str().to_string();
    }
    section.default_account = alias.to_string();
    tracing::info!(provider = provider.as_str(), alias, "default account updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.cloudflare.accounts.insert(
            "acme".to_string(),
            AccountEntry {
                name: "Acme Corp".to_string(),
                account_id: "acct_1".to_string(),
                prod_zone_id: "zone_p".to_string(),
                ..Default::default()
            },
        );
        settings
            .cloudflare
            .accounts
            .insert("side".to_string(), AccountEntry::default());
        settings
    }

    #[test]
    fn test_list_accounts_marks_default() {
        let mut settings = settings();
        settings.cloudflare.default_account = "acme".to_string();
        let rows = list_accounts(&settings, ProviderId::Cloudflare);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].default);
        assert_eq!(rows[0].ids["prod_zone"], "zone_p");
        assert!(!rows[1].default);
        assert!(rows[1].ids.is_empty());

        let json = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(json["account_id"], "acct_1");
        assert_eq!(json["name"], "Acme Corp");
    }

    #[test]
    fn test_use_account_validates_alias_and_env() {
        let mut settings = settings();
        let err = use_account(&mut settings, ProviderId::Cloudflare, "ghost", None).unwrap_err();
        assert!(err.to_string().contains("acme, side"));

        let err = use_account(&mut settings, ProviderId::Cloudflare, "acme", Some("qa")).unwrap_err();
        assert!(err.is_usage());
        assert_eq!(settings.cloudflare.default_account, "");

        use_account(&mut settings, ProviderId::Cloudflare, "acme", Some("stage")).unwrap();
        assert_eq!(settings.cloudflare.default_account, "acme");
        assert_eq!(settings.cloudflare.default_env, "staging");
        settings.validate().unwrap();
    }

    #[test]
    fn test_current_uses_flags() {
        let settings = settings();
        let current = current(&settings, ProviderId::Cloudflare, Some("acme"), Some("dev")).unwrap();
        assert_eq!(current.account_alias, "acme");
        assert_eq!(current.environment, Environment::Dev);
        assert_eq!(current.env_prefix, "CLOUDFLARE_ACME_");
    }
}

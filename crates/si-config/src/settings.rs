//! Settings document types
//!
//! The document is plain JSON. Every struct keeps an `extra` map so that
//! fields written by newer releases (or by hand) survive a load/save cycle.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Provider sections known to the settings document.
pub const PROVIDER_SECTIONS: &[&str] = &[
    "cloudflare",
    "aws",
    "gcp",
    "github",
    "workos",
    "social",
    "google_play",
    "youtube",
    "appstore",
    "bedrock",
];

/// Root settings document (`~/.si/settings.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "ProviderSettings::is_empty")]
    pub cloudflare: ProviderSettings,
    #[serde(default, skip_serializing_if = "ProviderSettings::is_empty")]
    pub aws: ProviderSettings,
    #[serde(default, skip_serializing_if = "ProviderSettings::is_empty")]
    pub gcp: ProviderSettings,
    #[serde(default, skip_serializing_if = "ProviderSettings::is_empty")]
    pub github: ProviderSettings,
    #[serde(default, skip_serializing_if = "ProviderSettings::is_empty")]
    pub workos: ProviderSettings,
    #[serde(default, skip_serializing_if = "ProviderSettings::is_empty")]
    pub social: ProviderSettings,
    #[serde(default, skip_serializing_if = "ProviderSettings::is_empty")]
    pub google_play: ProviderSettings,
    #[serde(default, skip_serializing_if = "ProviderSettings::is_empty")]
    pub youtube: ProviderSettings,
    #[serde(default, skip_serializing_if = "ProviderSettings::is_empty")]
    pub appstore: ProviderSettings,
    #[serde(default, skip_serializing_if = "ProviderSettings::is_empty")]
    pub bedrock: ProviderSettings,

    #[serde(default)]
    pub sun: SunSettings,
    #[serde(default)]
    pub vault: VaultSettings,
    #[serde(default)]
    pub resolver: ResolverSettings,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Settings {
    /// Provider section by name (`cloudflare`, `aws`, ...).
    pub fn provider(&self, name: &str) -> Option<&ProviderSettings> {
        Some(match name {
            "cloudflare" => &self.cloudflare,
            "aws" => &self.aws,
            "gcp" => &self.gcp,
            "github" => &self.github,
            "workos" => &self.workos,
            "social" => &self.social,
            "google_play" => &self.google_play,
            "youtube" => &self.youtube,
            "appstore" => &self.appstore,
            "bedrock" => &self.bedrock,
            _ => return None,
        })
    }

    pub fn provider_mut(&mut self, name: &str) -> Option<&mut ProviderSettings> {
        Some(match name {
            "cloudflare" => &mut self.cloudflare,
            "aws" => &mut self.aws,
            "gcp" => &mut self.gcp,
            "github" => &mut self.github,
            "workos" => &mut self.workos,
            "social" => &mut self.social,
            "google_play" => &mut self.google_play,
            "youtube" => &mut self.youtube,
            "appstore" => &mut self.appstore,
            "bedrock" => &mut self.bedrock,
            _ => return None,
        })
    }

    /// Check that every `default_account` names a configured alias.
    pub fn validate(&self) -> crate::Result<()> {
        for name in PROVIDER_SECTIONS {
            let Some(section) = self.provider(name) else {
                continue;
            };
            let alias = section.default_account.trim();
            if !alias.is_empty() && !section.accounts.contains_key(alias) {
                return Err(crate::ConfigError::InvalidDefaultAccount {
                    provider: (*name).to_string(),
                    alias: alias.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Per-provider section: defaults plus the account registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_account: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_env: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_base_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_file: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub accounts: BTreeMap<String, AccountEntry>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProviderSettings {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Account aliases in sorted order.
    pub fn aliases(&self) -> Vec<String> {
        self.accounts.keys().cloned().collect()
    }
}

/// One provider account.
///
/// Holds identifiers and the *names* of environment variables that carry
/// credentials. Secret values never live here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vault_prefix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_base_url: String,

    // Identifiers
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account_id_env: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_id_env: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organization_id_env: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prod_zone_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub staging_zone_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dev_zone_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub package_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel_id: String,

    // Credential references
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_token_env: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key_env: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token_env: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub oauth_token_env: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id_env: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret_env: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_key_id_env: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_access_key_env: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_token_env: String,

    // GitHub App
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_id_env: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_private_key_env: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub installation_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub installation_id_env: String,

    // App Store Connect
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issuer_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_key_env: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `sun` section: object store endpoint and machine identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SunSettings {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub machine_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator_id: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_sync: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `vault` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VaultSettings {
    /// Default scope when `--scope` is not given.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sync_backend: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `resolver` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolverSettings {
    /// `settings` (default) or `env`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id_precedence: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

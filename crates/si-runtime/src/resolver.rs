//! Credential resolver
//!
//! Turns flag overrides, the selected account and the environment into
//! `(value, source)` pairs using a fixed precedence chain:
//!
//! 1. explicit flag (`flag:--name`)
//! 2. env var referenced by the account entry (`env:KEY`)
//! 3. account-prefixed env var, `<PREFIX><KEY>` (`env:KEY`)
//! 4. provider-generic env vars (`env:KEY`)
//!
//! Identifier fields additionally consult inline settings values
//! (`settings.<field>`); whether those win over prefixed env vars is an
//! [`IdPrecedence`] choice.

use crate::context::Environment;
use crate::error::{Result, RuntimeError};
use crate::spec::ProviderId;
use si_config::{AccountEntry, ProviderSettings, Settings};
use std::path::PathBuf;

/// A resolved value and where it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolved {
    pub value: String,
    pub source: String,
}

impl Resolved {
    fn new(value: &str, source: impl Into<String>) -> Self {
        Self {
            value: value.trim().to_string(),
            source: source.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Relative order of inline settings IDs and account-prefixed env vars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdPrecedence {
    #[default]
    SettingsFirst,
    EnvFirst,
}

impl IdPrecedence {
    /// `SI_ID_PRECEDENCE` env, then `resolver.id_precedence`, then settings-first.
    pub fn from_settings(settings: &Settings) -> Self {
        let raw = env_value("SI_ID_PRECEDENCE")
            .unwrap_or_else(|| settings.resolver.id_precedence.trim().to_string());
        match raw.to_ascii_lowercase().as_str() {
            "env" | "env-first" | "env_first" => Self::EnvFirst,
            _ => Self::SettingsFirst,
        }
    }
}

/// Account entry fields addressable by a [`FieldSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryField {
    AccountId,
    AccountIdEnv,
    ProjectId,
    ProjectIdEnv,
    OrganizationId,
    OrganizationIdEnv,
    Owner,
    Region,
    /// `prod_zone_id` / `staging_zone_id` / `dev_zone_id` by environment.
    ZoneId,
    PackageName,
    ChannelId,
    ApiTokenEnv,
    ApiKeyEnv,
    AccessTokenEnv,
    OAuthTokenEnv,
    ClientIdEnv,
    ClientSecretEnv,
    AccessKeyIdEnv,
    SecretAccessKeyEnv,
    SessionTokenEnv,
    AppId,
    AppIdEnv,
    AppPrivateKeyEnv,
    InstallationId,
    InstallationIdEnv,
    IssuerId,
    KeyId,
    PrivateKeyEnv,
}

impl EntryField {
    pub fn name(&self, env: Environment) -> &'static str {
        match self {
            Self::AccountId => "account_id",
            Self::AccountIdEnv => "account_id_env",
            Self::ProjectId => "project_id",
            Self::ProjectIdEnv => "project_id_env",
            Self::OrganizationId => "organization_id",
            Self::OrganizationIdEnv => "organization_id_env",
            Self::Owner => "owner",
            Self::Region => "region",
            Self::ZoneId => match env {
                Environment::Prod => "prod_zone_id",
                Environment::Staging => "staging_zone_id",
                Environment::Dev => "dev_zone_id",
            },
            Self::PackageName => "package_name",
            Self::ChannelId => "channel_id",
            Self::ApiTokenEnv => "api_token_env",
            Self::ApiKeyEnv => "api_key_env",
            Self::AccessTokenEnv => "access_token_env",
            Self::OAuthTokenEnv => "oauth_token_env",
            Self::ClientIdEnv => "client_id_env",
            Self::ClientSecretEnv => "client_secret_env",
            Self::AccessKeyIdEnv => "access_key_id_env",
            Self::SecretAccessKeyEnv => "secret_access_key_env",
            Self::SessionTokenEnv => "session_token_env",
            Self::AppId => "app_id",
            Self::AppIdEnv => "app_id_env",
            Self::AppPrivateKeyEnv => "app_private_key_env",
            Self::InstallationId => "installation_id",
            Self::InstallationIdEnv => "installation_id_env",
            Self::IssuerId => "issuer_id",
            Self::KeyId => "key_id",
            Self::PrivateKeyEnv => "private_key_env",
        }
    }

    pub fn get<'a>(&self, entry: &'a AccountEntry, env: Environment) -> &'a str {
        let value = match self {
            Self::AccountId => &entry.account_id,
            Self::AccountIdEnv => &entry.account_id_env,
            Self::ProjectId => &entry.project_id,
            Self::ProjectIdEnv => &entry.project_id_env,
            Self::OrganizationId => &entry.organization_id,
            Self::OrganizationIdEnv => &entry.organization_id_env,
            Self::Owner => &entry.owner,
            Self::Region => &entry.region,
            Self::ZoneId => match env {
                Environment::Prod => &entry.prod_zone_id,
                Environment::Staging => &entry.staging_zone_id,
                Environment::Dev => &entry.dev_zone_id,
            },
            Self::PackageName => &entry.package_name,
            Self::ChannelId => &entry.channel_id,
            Self::ApiTokenEnv => &entry.api_token_env,
            Self::ApiKeyEnv => &entry.api_key_env,
            Self::AccessTokenEnv => &entry.access_token_env,
            Self::OAuthTokenEnv => &entry.oauth_token_env,
            Self::ClientIdEnv => &entry.client_id_env,
            Self::ClientSecretEnv => &entry.client_secret_env,
            Self::AccessKeyIdEnv => &entry.access_key_id_env,
            Self::SecretAccessKeyEnv => &entry.secret_access_key_env,
            Self::SessionTokenEnv => &entry.session_token_env,
            Self::AppId => &entry.app_id,
            Self::AppIdEnv => &entry.app_id_env,
            Self::AppPrivateKeyEnv => &entry.app_private_key_env,
            Self::InstallationId => &entry.installation_id,
            Self::InstallationIdEnv => &entry.installation_id_env,
            Self::IssuerId => &entry.issuer_id,
            Self::KeyId => &entry.key_id,
            Self::PrivateKeyEnv => &entry.private_key_env,
        };
        value.trim()
    }
}

/// Describes where one field may come from.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Human label used in errors ("cloudflare api token").
    pub label: &'static str,
    /// Flag name including dashes (`--api-token`).
    pub flag: &'static str,
    /// Suffix for the account-prefixed env var (`API_TOKEN`). `{ENV}` is
    /// replaced with `PROD`/`STAGING`/`DEV`.
    pub key: &'static str,
    /// Inline settings value (identifiers only, never secrets).
    pub inline: Option<EntryField>,
    /// Entry field naming an env var to read.
    pub env_ref: Option<EntryField>,
    /// Provider-generic env vars, in order.
    pub generic: &'static [&'static str],
}

impl FieldSpec {
    pub const fn secret(
        label: &'static str,
        flag: &'static str,
        key: &'static str,
        env_ref: Option<EntryField>,
        generic: &'static [&'static str],
    ) -> Self {
        Self {
            label,
            flag,
            key,
            inline: None,
            env_ref,
            generic,
        }
    }

    pub const fn id(
        label: &'static str,
        flag: &'static str,
        key: &'static str,
        inline: Option<EntryField>,
        env_ref: Option<EntryField>,
        generic: &'static [&'static str],
    ) -> Self {
        Self {
            label,
            flag,
            key,
            inline,
            env_ref,
            generic,
        }
    }
}

/// Pick the account alias: flag, settings default, `<PROVIDER>_DEFAULT_ACCOUNT`,
/// then the single configured alias. Unknown aliases resolve to an empty entry.
pub fn resolve_account(
    section: &ProviderSettings,
    provider: ProviderId,
    account_flag: Option<&str>,
) -> (String, AccountEntry) {
    let mut selected = account_flag.map(str::trim).unwrap_or_default().to_string();
    if selected.is_empty() {
        selected = section.default_account.trim().to_string();
    }
    if selected.is_empty() {
        selected = env_value(&format!("{}_DEFAULT_ACCOUNT", provider.env_prefix())).unwrap_or_default();
    }
    if selected.is_empty() && section.accounts.len() == 1 {
        selected = section.accounts.keys().next().cloned().unwrap_or_default();
    }
    if selected.is_empty() {
        return (String::new(), AccountEntry::default());
    }
    let entry = section.accounts.get(&selected).cloned().unwrap_or_default();
    (selected, entry)
}

/// Flag, `settings.default_env`, `<PROVIDER>_DEFAULT_ENV`, then `prod`.
pub fn resolve_environment(
    section: &ProviderSettings,
    provider: ProviderId,
    env_flag: Option<&str>,
) -> Result<Environment> {
    let raw = env_flag
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| Some(section.default_env.trim().to_string()).filter(|v| !v.is_empty()))
        .or_else(|| env_value(&format!("{}_DEFAULT_ENV", provider.env_prefix())))
        .unwrap_or_else(|| "prod".to_string());
    Environment::parse(&raw)
}

/// Uppercase slug: ASCII letters and digits kept, every other run becomes `_`.
pub fn slug_upper(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_uppercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// Env prefix for an account: `vault_prefix` (uppercased, trailing `_`
/// forced) or `<PROVIDER>_<SLUG(alias)>_`. Empty when neither applies.
pub fn account_prefix(provider: ProviderId, alias: &str, entry: &AccountEntry) -> String {
    let vault_prefix = entry.vault_prefix.trim();
    if !vault_prefix.is_empty() {
        let mut prefix = vault_prefix.to_ascii_uppercase();
        if !prefix.ends_with('_') {
            prefix.push('_');
        }
        return prefix;
    }
    let slug = slug_upper(alias);
    if slug.is_empty() {
        return String::new();
    }
    format!("{}_{}_", provider.env_prefix(), slug)
}

/// Trimmed, non-empty env var value.
pub fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolver bound to one provider, account and environment.
#[derive(Debug, Clone)]
pub struct Resolver {
    provider: ProviderId,
    section: ProviderSettings,
    alias: String,
    entry: AccountEntry,
    environment: Environment,
    prefix: String,
    precedence: IdPrecedence,
}

impl Resolver {
    pub fn new(
        settings: &Settings,
        provider: ProviderId,
        account_flag: Option<&str>,
        env_flag: Option<&str>,
    ) -> Result<Self> {
        let section = settings
            .provider(provider.settings_section())
            .cloned()
            .unwrap_or_default();
        let (alias, entry) = resolve_account(&section, provider, account_flag);
        let environment = resolve_environment(&section, provider, env_flag)?;
        let prefix = account_prefix(provider, &alias, &entry);
        let precedence = IdPrecedence::from_settings(settings);
        tracing::debug!(
            provider = provider.as_str(),
            alias = alias.as_str(),
            environment = environment.as_str(),
            "resolved account"
        );
        Ok(Self {
            provider,
            section,
            alias,
            entry,
            environment,
            prefix,
            precedence,
        })
    }

    pub fn with_precedence(mut self, precedence: IdPrecedence) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn entry(&self) -> &AccountEntry {
        &self.entry
    }

    pub fn section(&self) -> &ProviderSettings {
        &self.section
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn prefixed_key(&self, key: &str) -> Option<String> {
        if self.prefix.is_empty() || key.is_empty() {
            return None;
        }
        Some(format!(
            "{}{}",
            self.prefix,
            key.replace("{ENV}", self.environment.env_key())
        ))
    }

    /// Resolve one field. Returns an empty [`Resolved`] when the chain is exhausted.
    pub fn field(&self, spec: &FieldSpec, flag_value: Option<&str>) -> Resolved {
        if let Some(value) = flag_value.map(str::trim).filter(|v| !v.is_empty()) {
            return Resolved::new(value, format!("flag:{}", spec.flag));
        }

        let inline = || -> Option<Resolved> {
            let field = spec.inline?;
            let value = field.get(&self.entry, self.environment);
            (!value.is_empty())
                .then(|| Resolved::new(value, format!("settings.{}", field.name(self.environment))))
        };
        let env_ref = || -> Option<Resolved> {
            let field = spec.env_ref?;
            let key = field.get(&self.entry, self.environment);
            if key.is_empty() {
                return None;
            }
            env_value(key).map(|v| Resolved::new(&v, format!("env:{key}")))
        };
        let prefixed = || -> Option<Resolved> {
            let key = self.prefixed_key(spec.key)?;
            env_value(&key).map(|v| Resolved::new(&v, format!("env:{key}")))
        };

        let ordered: [&dyn Fn() -> Option<Resolved>; 3] = match self.precedence {
            IdPrecedence::SettingsFirst => [&inline, &env_ref, &prefixed],
            IdPrecedence::EnvFirst => [&env_ref, &prefixed, &inline],
        };
        for step in ordered {
            if let Some(found) = step() {
                return found;
            }
        }

        for key in spec.generic {
            if let Some(value) = env_value(key) {
                return Resolved::new(&value, format!("env:{key}"));
            }
        }
        Resolved::default()
    }

    /// Like [`Resolver::field`] but fails with `MissingCredential`.
    pub fn require(&self, spec: &FieldSpec, flag_value: Option<&str>) -> Result<Resolved> {
        let resolved = self.field(spec, flag_value);
        if !resolved.is_empty() {
            return Ok(resolved);
        }
        Err(RuntimeError::MissingCredential {
            what: spec.label.to_string(),
            tried: self.candidates(spec),
        })
    }

    /// Every slot consulted for `spec`, as printable names.
    pub fn candidates(&self, spec: &FieldSpec) -> Vec<String> {
        let mut tried = vec![spec.flag.to_string()];
        if let Some(field) = spec.inline {
            tried.push(format!("settings.{}", field.name(self.environment)));
        }
        if let Some(field) = spec.env_ref {
            let key = field.get(&self.entry, self.environment);
            if !key.is_empty() {
                tried.push(key.to_string());
            }
        }
        match self.prefixed_key(spec.key) {
            Some(key) => tried.push(key),
            None if !spec.key.is_empty() => tried.push(format!(
                "{}_<ACCOUNT>_{}",
                self.provider.env_prefix(),
                spec.key.replace("{ENV}", self.environment.env_key())
            )),
            None => {}
        }
        tried.extend(spec.generic.iter().map(|k| k.to_string()));
        tried.dedup();
        tried
    }

    /// Flag, account `api_base_url`, section `api_base_url`, `<PROVIDER>_API_BASE_URL`,
    /// then `default`.
    pub fn base_url(&self, flag_value: Option<&str>, default: &str) -> Resolved {
        if let Some(value) = flag_value.map(str::trim).filter(|v| !v.is_empty()) {
            return Resolved::new(value, "flag:--base-url");
        }
        if !self.entry.api_base_url.trim().is_empty() {
            return Resolved::new(&self.entry.api_base_url, "settings.account.api_base_url");
        }
        if !self.section.api_base_url.trim().is_empty() {
            return Resolved::new(&self.section.api_base_url, "settings.api_base_url");
        }
        let key = format!("{}_API_BASE_URL", self.provider.env_prefix());
        if let Some(value) = env_value(&key) {
            return Resolved::new(&value, format!("env:{key}"));
        }
        Resolved::new(default, "")
    }

    /// `SI_<PROVIDER>_LOG_FILE`, section `log_file`, then `~/.si/logs/<name>.log`.
    pub fn log_path(&self) -> Option<PathBuf> {
        let key = format!("SI_{}_LOG_FILE", self.provider.env_prefix());
        if let Some(value) = env_value(&key) {
            return Some(PathBuf::from(value));
        }
        if !self.section.log_file.trim().is_empty() {
            return Some(PathBuf::from(self.section.log_file.trim()));
        }
        si_config::logs_dir()
            .ok()
            .map(|dir| dir.join(format!("{}.log", self.provider.log_name())))
    }
}

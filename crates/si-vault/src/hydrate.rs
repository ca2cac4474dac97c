//! Env hydration from the vault
//!
//! Before provider commands run, missing environment variables are filled
//! from the scope's KV values. Nothing here aborts the command it precedes:
//! [`auto_hydrate`] logs failures at `warn` and reports zero keys.

use crate::backend::resolve_backend;
use crate::crypto::is_encrypted;
use crate::dotenv::normalize_value;
use crate::error::Result;
use crate::identity::{VaultIdentity, load_identity};
use crate::kv::{KvStore, plain_value};
use crate::target::resolve_target;
use si_config::Settings;
use si_sun::SunClient;

pub const AUTO_ENV: &str = "SI_VAULT_AUTO";
pub const LEGACY_AUTO_ENV: &str = "SI_VAULT_AUTO_ENV";

/// Root commands that get hydrated.
pub const HYDRATE_COMMANDS: &[&str] = &[
    "stripe",
    "github",
    "cloudflare",
    "cf",
    "google",
    "apple",
    "social",
    "workos",
    "aws",
    "gcp",
    "openai",
    "oci",
    "image",
    "images",
    "publish",
    "pub",
    "providers",
    "provider",
    "integrations",
    "apis",
    "paas",
];

const NEVER_HYDRATE: &[&str] = &["vault", "sun", "build"];

fn is_disabled(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// `SI_VAULT_AUTO` (or the legacy `SI_VAULT_AUTO_ENV`) unless set to a
/// false value.
pub fn auto_enabled() -> bool {
    let raw = std::env::var(AUTO_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| std::env::var(LEGACY_AUTO_ENV).ok());
    !raw.is_some_and(|v| is_disabled(&v))
}

pub fn should_hydrate(command: &str) -> bool {
    let command = command.trim().to_ascii_lowercase();
    if NEVER_HYDRATE.contains(&command.as_str()) {
        return false;
    }
    auto_enabled() && HYDRATE_COMMANDS.contains(&command.as_str())
}

/// Plain values of the scope, sorted by key. With `skip_present`, keys
/// already in the environment are left out. The identity is only loaded
/// once an encrypted value is met; values that fail to decode are skipped.
pub async fn resolve_values(
    client: &SunClient,
    store: &KvStore<'_>,
    skip_present: bool,
) -> Result<Vec<(String, String)>> {
    let mut identity: Option<VaultIdentity> = None;
    let mut out = Vec::new();
    for (key, raw) in store.load_raw_values().await? {
        if skip_present && std::env::var_os(&key).is_some() {
            continue;
        }
        let encrypted = normalize_value(&raw).is_ok_and(|v| is_encrypted(&v));
        if encrypted && identity.is_none() {
            identity = Some(load_identity(client).await?);
        }
        match plain_value(&raw, identity.as_ref()) {
            Ok(value) => out.push((key, value)),
            Err(err) => tracing::warn!(key = key.as_str(), error = %err, "skipping vault key"),
        }
    }
    Ok(out)
}

/// Export `pairs` into this process's environment. Returns how many were set.
pub fn apply_env(pairs: &[(String, String)]) -> usize {
    let mut count = 0;
    for (key, value) in pairs {
        if std::env::var_os(key).is_some() {
            continue;
        }
        // SAFETY: called from the main thread before the command spawns
        // tasks or threads that read the environment.
        unsafe { std::env::set_var(key, value) };
        count += 1;
    }
    count
}

async fn hydrate(settings: &Settings) -> Result<usize> {
    resolve_backend(settings)?;
    let client = SunClient::from_settings(settings)?;
    let target = resolve_target(settings, "")?;
    target.guard_repo_scope()?;
    let store = KvStore::new(&client, &target);
    let pairs = resolve_values(&client, &store, true).await?;
    let count = apply_env(&pairs);
    tracing::debug!(scope = target.scope.as_str(), count, "hydrated env from vault");
    Ok(count)
}

/// Hydrate before running root command `command`. Returns the number of
/// variables set; failures are logged and yield 0.
pub async fn auto_hydrate(settings: &Settings, command: &str) -> usize {
    if !should_hydrate(command) {
        return 0;
    }
    match hydrate(settings).await {
        Ok(count) => count,
        Err(err) => {
            tracing::warn!(command, error = %err, "vault env hydration skipped");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encrypt_value;
    use crate::identity::{IDENTITY_KIND, IDENTITY_NAME};
    use crate::target::VaultTarget;
    use serial_test::serial;
    use si_sun::testing::StubSun;
    use std::time::Duration;

    #[test]
    #[serial]
    fn test_gate() {
        temp_env::with_vars([(AUTO_ENV, None::<&str>), (LEGACY_AUTO_ENV, None)], || {
            assert!(should_hydrate("openai"));
            assert!(should_hydrate("Cloudflare"));
            assert!(!should_hydrate("vault"));
            assert!(!should_hydrate("sun"));
            assert!(!should_hydrate("build"));
            assert!(!should_hydrate("settings"));
        });
        temp_env::with_vars([(AUTO_ENV, Some("off")), (LEGACY_AUTO_ENV, None)], || {
            assert!(!should_hydrate("openai"));
        });
        temp_env::with_vars([(AUTO_ENV, None::<&str>), (LEGACY_AUTO_ENV, Some("0"))], || {
            assert!(!should_hydrate("github"));
        });
        temp_env::with_vars([(AUTO_ENV, Some("1")), (LEGACY_AUTO_ENV, Some("0"))], || {
            assert!(should_hydrate("github"));
        });
    }

    #[test]
    #[serial]
    fn test_apply_env_never_overwrites() {
        temp_env::with_vars(
            [("SI_HYDRATE_TEST_NEW", None::<&str>), ("SI_HYDRATE_TEST_SET", Some("mine"))],
            || {
                let pairs = vec![
                    ("SI_HYDRATE_TEST_NEW".to_string(), "vault".to_string()),
                    ("SI_HYDRATE_TEST_SET".to_string(), "vault".to_string()),
                ];
                assert_eq!(apply_env(&pairs), 1);
                assert_eq!(std::env::var("SI_HYDRATE_TEST_NEW").unwrap(), "vault");
                assert_eq!(std::env::var("SI_HYDRATE_TEST_SET").unwrap(), "mine");
            },
        );
    }

    #[test]
    #[serial]
    fn test_resolve_values_decrypts_lazily() {
        let stub = StubSun::start();
        let identity = VaultIdentity::generate();
        let secret = crate::crypto::identity_secret(&identity.identities()[0]);
        stub.seed(IDENTITY_KIND, IDENTITY_NAME, format!("{secret}\n").as_bytes(), "text/plain", Default::default());

        let client = SunClient::new(stub.base_url(), StubSun::TOKEN, Duration::from_secs(5)).unwrap();
        let target = VaultTarget {
            scope: "aureuma/dev".to_string(),
            file_is_explicit: true,
            cwd: std::env::temp_dir(),
            repo_root: String::new(),
            origin: "flag".to_string(),
            source_path: None,
        };
        let store = KvStore::new(&client, &target);
        let ct = encrypt_value("vault-secret-value", &identity.recipients()).unwrap();
        let kind = store.kind().to_string();
        stub.seed(&kind, "SI_HYDRATE_TEST_KEY", format!("{ct}\n").as_bytes(), "text/plain", Default::default());
        stub.seed(&kind, "SI_HYDRATE_TEST_PLAIN", b"plain\n", "text/plain", Default::default());
        stub.seed(&kind, "SI_HYDRATE_TEST_BROKEN", b"encrypted:si:v2:AAAA\n", "text/plain", Default::default());

        temp_env::with_vars(
            [
                ("SI_VAULT_IDENTITY", None::<&str>),
                ("SI_HYDRATE_TEST_KEY", None),
                ("SI_HYDRATE_TEST_PLAIN", Some("already")),
            ],
            || {
                let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
                let pairs = runtime.block_on(resolve_values(&client, &store, true)).unwrap();
                assert_eq!(
                    pairs,
                    vec![("SI_HYDRATE_TEST_KEY".to_string(), "vault-secret-value".to_string())]
                );
                let all = runtime.block_on(resolve_values(&client, &store, false)).unwrap();
                assert_eq!(all.len(), 2);
            },
        );
    }
}

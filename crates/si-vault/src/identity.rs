//! Vault identity lifecycle
//!
//! The age identity lives in sun as kind `sun_vault_identity`, name
//! `default`. The payload holds one `AGE-SECRET-KEY-1...` line per key: the
//! first is current, the rest are backups kept after rotation so older
//! ciphertext still decrypts.

use crate::crypto::{identity_secret, parse_identity};
use crate::error::{Result, VaultError};
use age::x25519;
use serde_json::{Map, Value, json};
use si_sun::SunClient;

pub const IDENTITY_KIND: &str = "sun_vault_identity";
pub const IDENTITY_NAME: &str = "default";
/// Overrides the sun-stored identity.
pub const IDENTITY_ENV: &str = "SI_VAULT_IDENTITY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    Env,
    Sun,
    Generated,
}

impl IdentitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::Sun => "sun",
            Self::Generated => "generated",
        }
    }
}

#[derive(Clone)]
pub struct VaultIdentity {
    current: x25519::Identity,
    backups: Vec<x25519::Identity>,
    pub source: IdentitySource,
}

impl std::fmt::Debug for VaultIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultIdentity")
            .field("recipient", &self.recipient().to_string())
            .field("backups", &self.backups.len())
            .field("source", &self.source)
            .finish()
    }
}

impl VaultIdentity {
    pub fn generate() -> Self {
        Self {
            current: x25519::Identity::generate(),
            backups: Vec::new(),
            source: IdentitySource::Generated,
        }
    }

    /// One key per line; blank lines and `#` comments are skipped.
    pub fn parse(text: &str, source: IdentitySource) -> Result<Self> {
        let mut keys = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(parse_identity);
        let current = keys
            .next()
            .ok_or_else(|| VaultError::InvalidIdentity("empty identity payload".to_string()))??;
        let backups = keys.collect::<Result<Vec<_>>>()?;
        Ok(Self {
            current,
            backups,
            source,
        })
    }

    pub fn recipient(&self) -> x25519::Recipient {
        self.current.to_public()
    }

    /// Recipients new ciphertext is written to.
    pub fn recipients(&self) -> Vec<x25519::Recipient> {
        vec![self.recipient()]
    }

    /// Current key first, then backups.
    pub fn identities(&self) -> Vec<x25519::Identity> {
        std::iter::once(self.current.clone())
            .chain(self.backups.iter().cloned())
            .collect()
    }

    pub fn backup_count(&self) -> usize {
        self.backups.len()
    }

    pub fn backup_recipients(&self) -> Vec<String> {
        self.backups.iter().map(|b| b.to_public().to_string()).collect()
    }

    /// New current key; the previous keys become backups.
    pub fn rotated(&self) -> Self {
        let mut backups = vec![self.current.clone()];
        backups.extend(self.backups.iter().cloned());
        Self {
            current: x25519::Identity::generate(),
            backups,
            source: IdentitySource::Generated,
        }
    }

    fn payload(&self) -> String {
        let mut out = String::new();
        for identity in self.identities() {
            out.push_str(&identity_secret(&identity));
            out.push('\n');
        }
        out
    }

    fn metadata(&self, source: &str) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("source".to_string(), json!(source.trim()));
        metadata.insert("recipient".to_string(), json!(self.recipient().to_string()));
        let backups = self.backup_recipients();
        if !backups.is_empty() {
            metadata.insert("backup_recipients".to_string(), json!(backups));
        }
        metadata
    }
}

fn from_env() -> Option<Result<VaultIdentity>> {
    let raw = std::env::var(IDENTITY_ENV).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    Some(VaultIdentity::parse(&raw, IdentitySource::Env))
}

async fn fetch(client: &SunClient) -> Result<Option<VaultIdentity>> {
    match client.get_payload(IDENTITY_KIND, IDENTITY_NAME).await {
        Ok(payload) => {
            let text = String::from_utf8_lossy(&payload);
            VaultIdentity::parse(&text, IdentitySource::Sun).map(Some)
        }
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(VaultError::sun("identity read")(err)),
    }
}

/// Identity for read paths. Never generates one.
pub async fn load_identity(client: &SunClient) -> Result<VaultIdentity> {
    if let Some(identity) = from_env() {
        return identity;
    }
    fetch(client).await?.ok_or(VaultError::IdentityMissing)
}

/// Identity for write paths: generated and persisted on first use.
pub async fn ensure_identity(client: &SunClient, source: &str) -> Result<VaultIdentity> {
    if let Some(identity) = from_env() {
        return identity;
    }
    if let Some(identity) = fetch(client).await? {
        return Ok(identity);
    }
    let identity = VaultIdentity::generate();
    persist_identity(client, &identity, source).await?;
    tracing::info!(recipient = %identity.recipient(), "bootstrapped vault identity");
    Ok(identity)
}

pub async fn persist_identity(client: &SunClient, identity: &VaultIdentity, source: &str) -> Result<i64> {
    let metadata = identity.metadata(source);
    let result = client
        .put_object(
            IDENTITY_KIND,
            IDENTITY_NAME,
            identity.payload().as_bytes(),
            "text/plain",
            Some(&metadata),
            None,
        )
        .await
        .map_err(VaultError::sun("identity upload"))?;
    Ok(result.revision())
}

/// Replace the stored identity with a fresh key, keeping the old ones as
/// backups. Fails when `SI_VAULT_IDENTITY` pins the identity.
pub async fn rotate_identity(client: &SunClient, source: &str) -> Result<VaultIdentity> {
    if from_env().is_some() {
        return Err(VaultError::InvalidIdentity(format!(
            "{IDENTITY_ENV} is set; unset it before rotating the stored identity"
        )));
    }
    let rotated = match fetch(client).await? {
        Some(existing) => existing.rotated(),
        None => VaultIdentity::generate(),
    };
    persist_identity(client, &rotated, source).await?;
    tracing::info!(
        recipient = %rotated.recipient(),
        backups = rotated.backup_count(),
        "rotated vault identity"
    );
    Ok(rotated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{decrypt_value, encrypt_value};
    use serial_test::serial;
    use si_sun::testing::StubSun;
    use std::time::Duration;

    fn client(stub: &StubSun) -> SunClient {
        SunClient::new(stub.base_url(), StubSun::TOKEN, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_parse_multi_key_payload() {
        let a = x25519::Identity::generate();
        let b = x25519::Identity::generate();
        let text = format!("# si vault\n{}\n\n{}\n", identity_secret(&a), identity_secret(&b));
        let identity = VaultIdentity::parse(&text, IdentitySource::Sun).unwrap();
        assert_eq!(identity.recipient().to_string(), a.to_public().to_string());
        assert_eq!(identity.backup_recipients(), vec![b.to_public().to_string()]);
        assert!(VaultIdentity::parse("\n# nothing\n", IdentitySource::Sun).is_err());
        assert!(VaultIdentity::parse("AGE-SECRET-KEY-1BROKEN", IdentitySource::Sun).is_err());
    }

    #[test]
    fn test_rotated_keeps_old_keys() {
        let first = VaultIdentity::generate();
        let ct = encrypt_value("old secret", &first.recipients()).unwrap();
        let second = first.rotated();
        assert_ne!(second.recipient().to_string(), first.recipient().to_string());
        assert_eq!(second.backup_count(), 1);
        assert_eq!(decrypt_value(&ct, &second.identities()).unwrap(), "old secret");
        assert_eq!(second.rotated().backup_count(), 2);
    }

    #[tokio::test]
    #[serial]
    async fn test_load_fails_closed_and_ensure_bootstraps() {
        let stub = StubSun::start();
        let client = client(&stub);
        let _guard = EnvGuard::unset(IDENTITY_ENV);

        assert!(matches!(load_identity(&client).await, Err(VaultError::IdentityMissing)));
        let ensured = ensure_identity(&client, "test").await.unwrap();
        let loaded = load_identity(&client).await.unwrap();
        assert_eq!(loaded.recipient().to_string(), ensured.recipient().to_string());
        assert_eq!(loaded.source, IdentitySource::Sun);

        let metadata = stub.metadata(IDENTITY_KIND, IDENTITY_NAME).unwrap();
        assert_eq!(metadata["recipient"], json!(ensured.recipient().to_string()));
    }

    #[tokio::test]
    #[serial]
    async fn test_rotate_persists_backups() {
        let stub = StubSun::start();
        let client = client(&stub);
        let _guard = EnvGuard::unset(IDENTITY_ENV);

        let before = ensure_identity(&client, "test").await.unwrap();
        let rotated = rotate_identity(&client, "keygen").await.unwrap();
        assert_eq!(rotated.backup_recipients()[0], before.recipient().to_string());

        let metadata = stub.metadata(IDENTITY_KIND, IDENTITY_NAME).unwrap();
        assert_eq!(metadata["source"], json!("keygen"));
        assert_eq!(metadata["backup_recipients"][0], json!(before.recipient().to_string()));
        let loaded = load_identity(&client).await.unwrap();
        assert_eq!(loaded.recipient().to_string(), rotated.recipient().to_string());
    }

    #[tokio::test]
    #[serial]
    async fn test_env_override_wins() {
        let stub = StubSun::start();
        let client = client(&stub);
        let pinned = x25519::Identity::generate();
        let _guard = EnvGuard::set(IDENTITY_ENV, &identity_secret(&pinned));

        let loaded = load_identity(&client).await.unwrap();
        assert_eq!(loaded.source, IdentitySource::Env);
        assert_eq!(loaded.recipient().to_string(), pinned.to_public().to_string());
        assert!(rotate_identity(&client, "keygen").await.is_err());
    }

    /// Restores an env var on drop; async tests cannot use `temp_env::with_var`.
    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = std::env::var(key).ok();
            unsafe { std::env::set_var(key, value) };
            Self { key, previous }
        }

        fn unset(key: &'static str) -> Self {
            let previous = std::env::var(key).ok();
            unsafe { std::env::remove_var(key) };
            Self { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(value) => unsafe { std::env::set_var(self.key, value) },
                None => unsafe { std::env::remove_var(self.key) },
            }
        }
    }
}

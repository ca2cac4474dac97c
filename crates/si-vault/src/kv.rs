//! Sun KV backend
//!
//! Every key of a scope is one object under [`kv_kind`]. Writes carry the
//! latest revision so concurrent edits surface as [`VaultError::Conflict`];
//! unset writes a tombstone revision instead of deleting history.

use crate::crypto::{decrypt_value, encrypt_value, is_encrypted};
use crate::dotenv::{DotenvFile, PUBLIC_KEY_NAME, normalize_value, validate_key_name};
use crate::error::{Result, VaultError};
use crate::identity::VaultIdentity;
use crate::scope::{kv_kind, target_hashes};
use crate::target::VaultTarget;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use si_sun::{ObjectMeta, Revision, SunClient};
use std::collections::{BTreeMap, BTreeSet};

pub const LIST_LIMIT: usize = 500;
const METADATA_VERSION: i64 = 1;

fn meta_bool(metadata: &Map<String, Value>, key: &str) -> bool {
    match metadata.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => crate::target::is_truthy(s),
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

fn meta_str(metadata: &Map<String, Value>, key: &str) -> String {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Key as listed in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub deleted: bool,
    pub revision: i64,
    pub operation: String,
    pub changed_at: String,
    pub source: String,
}

impl KvEntry {
    fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            key: meta.name.trim().to_string(),
            deleted: meta_bool(&meta.metadata, "deleted"),
            revision: meta.latest_revision,
            operation: meta_str(&meta.metadata, "operation"),
            changed_at: meta_str(&meta.metadata, "changed_at"),
            source: meta_str(&meta.metadata, "source"),
        }
    }
}

/// Outcome of pushing a dotenv document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorResult {
    pub pushed: usize,
    pub tombstoned: usize,
}

pub struct KvStore<'a> {
    client: &'a SunClient,
    target: &'a VaultTarget,
    kind: String,
}

impl<'a> KvStore<'a> {
    pub fn new(client: &'a SunClient, target: &'a VaultTarget) -> Self {
        Self {
            client,
            target,
            kind: kv_kind(&target.scope),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    async fn list_meta(&self) -> Result<Vec<ObjectMeta>> {
        self.client
            .list_objects(&self.kind, "", LIST_LIMIT)
            .await
            .map_err(VaultError::sun("key list"))
    }

    async fn lookup(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let items = self
            .client
            .list_objects(&self.kind, key, 1)
            .await
            .map_err(VaultError::sun(format!("key metadata read ({key})")))?;
        Ok(items
            .into_iter()
            .next()
            .filter(|item| item.name.trim().eq_ignore_ascii_case(key.trim())))
    }

    async fn payload(&self, key: &str) -> Result<String> {
        let payload = self
            .client
            .get_payload(&self.kind, key)
            .await
            .map_err(VaultError::sun(format!("key payload read ({key})")))?;
        let text = String::from_utf8_lossy(&payload);
        let line = text.strip_suffix('\n').unwrap_or(text.as_ref());
        Ok(line.strip_suffix('\r').unwrap_or(line).to_string())
    }

    /// Every listed key, tombstones included, sorted by name.
    pub async fn entries(&self) -> Result<Vec<KvEntry>> {
        let mut entries: Vec<KvEntry> = self
            .list_meta()
            .await?
            .iter()
            .map(KvEntry::from_meta)
            .filter(|e| !e.key.is_empty())
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Live raw values keyed by name. Empty values are skipped unless the
    /// object is marked `allow_empty`.
    pub async fn load_raw_values(&self) -> Result<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();
        for item in self.list_meta().await? {
            let key = item.name.trim();
            if key.is_empty() || meta_bool(&item.metadata, "deleted") {
                continue;
            }
            let raw = self.payload(key).await?;
            if raw.is_empty() && !meta_bool(&item.metadata, "allow_empty") {
                continue;
            }
            values.insert(key.to_string(), raw);
        }
        tracing::debug!(kind = self.kind.as_str(), keys = values.len(), "loaded vault keys");
        Ok(values)
    }

    /// Raw value of `key`; `None` when missing or tombstoned.
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let Some(item) = self.lookup(key).await? else {
            return Ok(None);
        };
        if meta_bool(&item.metadata, "deleted") {
            return Ok(None);
        }
        self.payload(item.name.trim()).await.map(Some)
    }

    fn metadata(&self, key: &str, raw: Option<&str>, source: &str) -> Map<String, Value> {
        let (repo_hash, file_hash) = target_hashes(&self.target.repo_root, &self.target.scope);
        let mut metadata = Map::new();
        metadata.insert("version".to_string(), json!(METADATA_VERSION));
        metadata.insert("scope".to_string(), json!(self.target.scope));
        metadata.insert("repo_hash".to_string(), json!(repo_hash));
        metadata.insert("file_hash".to_string(), json!(file_hash));
        metadata.insert("key".to_string(), json!(key));
        metadata.insert("operation".to_string(), json!(if raw.is_some() { "set" } else { "unset" }));
        metadata.insert("deleted".to_string(), json!(raw.is_none()));
        metadata.insert(
            "changed_at".to_string(),
            json!(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)),
        );
        if let Some(raw) = raw {
            metadata.insert(
                "value_sha256".to_string(),
                json!(hex::encode(Sha256::digest(raw.as_bytes()))),
            );
        }
        if !source.trim().is_empty() {
            metadata.insert("source".to_string(), json!(source.trim()));
        }
        metadata
    }

    async fn write(&self, key: &str, raw: Option<&str>, source: &str) -> Result<i64> {
        validate_key_name(key)?;
        let expected = self
            .lookup(key)
            .await?
            .map(|item| item.latest_revision)
            .unwrap_or(0);
        self.write_at(key, raw, source, expected).await
    }

    async fn write_at(&self, key: &str, raw: Option<&str>, source: &str, expected: i64) -> Result<i64> {
        validate_key_name(key)?;
        let metadata = self.metadata(key, raw, source);
        let payload = raw
            .map(|r| format!("{r}\n").into_bytes())
            .unwrap_or_default();
        match self
            .client
            .put_object(&self.kind, key, &payload, "text/plain", Some(&metadata), Some(expected))
            .await
        {
            Ok(result) => Ok(result.revision()),
            Err(err) if err.is_conflict() => Err(VaultError::Conflict {
                key: key.to_string(),
                expected,
            }),
            Err(err) => Err(VaultError::sun(format!("key write ({key})"))(err)),
        }
    }

    /// Store an already-encoded value. Returns the new revision.
    pub async fn put_raw(&self, key: &str, raw: &str, source: &str) -> Result<i64> {
        let revision = self.write(key, Some(raw), source).await?;
        tracing::info!(kind = self.kind.as_str(), key, revision, "vault key set");
        Ok(revision)
    }

    /// Store a value only if `key` is still at revision `expected`
    /// (0 for a key that does not exist yet).
    pub async fn put_raw_at(&self, key: &str, raw: &str, source: &str, expected: i64) -> Result<i64> {
        self.write_at(key, Some(raw), source, expected).await
    }

    /// Tombstone `key`. Returns false when it was not live.
    pub async fn unset(&self, key: &str, source: &str) -> Result<bool> {
        validate_key_name(key)?;
        match self.lookup(key).await? {
            Some(item) if !meta_bool(&item.metadata, "deleted") => {}
            _ => return Ok(false),
        }
        let revision = self.write(key, None, source).await?;
        tracing::info!(kind = self.kind.as_str(), key, revision, "vault key unset");
        Ok(true)
    }

    /// Revisions of `key`, newest first.
    pub async fn history(&self, key: &str, limit: usize) -> Result<Vec<Revision>> {
        validate_key_name(key)?;
        match self.client.list_revisions(&self.kind, key, limit).await {
            Ok(revisions) => Ok(revisions),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(VaultError::sun(format!("key history ({key})"))(err)),
        }
    }

    /// Push every entry of `doc` and tombstone live keys it does not contain.
    pub async fn mirror(&self, doc: &DotenvFile, source: &str) -> Result<MirrorResult> {
        let mut local = BTreeMap::new();
        for entry in doc.entries()? {
            if entry.key == PUBLIC_KEY_NAME {
                continue;
            }
            local.insert(entry.key, entry.value_raw);
        }
        let mut result = MirrorResult::default();
        for (key, raw) in &local {
            if self.get_raw(key).await?.as_deref() == Some(raw.as_str()) {
                continue;
            }
            self.write(key, Some(raw), source).await?;
            result.pushed += 1;
        }
        let local_keys: BTreeSet<&str> = local.keys().map(String::as_str).collect();
        for entry in self.entries().await? {
            if entry.deleted || local_keys.contains(entry.key.as_str()) {
                continue;
            }
            self.write(&entry.key, None, source).await?;
            result.tombstoned += 1;
        }
        Ok(result)
    }

    /// Re-encrypt every live encrypted value to the current recipient.
    pub async fn reencrypt(&self, identity: &VaultIdentity, source: &str) -> Result<usize> {
        let identities = identity.identities();
        let recipients = identity.recipients();
        let mut count = 0;
        for (key, raw) in self.load_raw_values().await? {
            if !is_encrypted(&raw) {
                continue;
            }
            let plain = decrypt_value(&raw, &identities)?;
            let fresh = encrypt_value(&plain, &recipients)?;
            self.write(&key, Some(&fresh), source).await?;
            count += 1;
        }
        Ok(count)
    }
}

/// Plain value of a stored raw value: dotenv quoting undone, ciphertext
/// decrypted with `identity` (loaded on demand).
pub fn plain_value(raw: &str, identity: Option<&VaultIdentity>) -> Result<String> {
    let value = normalize_value(raw).map_err(|message| VaultError::Dotenv { line: 0, message })?;
    if !is_encrypted(&value) {
        return Ok(value);
    }
    let identity = identity.ok_or(VaultError::IdentityMissing)?;
    decrypt_value(&value, &identity.identities())
}

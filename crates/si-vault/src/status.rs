//! `si vault status` report

use crate::backend::{BackendResolution, resolve_backend};
use crate::crypto::is_encrypted;
use crate::dotenv::{PUBLIC_KEY_NAME, normalize_value};
use crate::error::Result;
use crate::identity::load_identity;
use crate::kv::KvStore;
use crate::target::VaultTarget;
use serde::Serialize;
use si_config::Settings;
use si_sun::SunClient;

#[derive(Debug, Clone, Serialize)]
pub struct IdentityStatus {
    pub recipient: String,
    pub backup_keys: usize,
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct KvSummary {
    pub keys: usize,
    pub encrypted: usize,
    pub plaintext: usize,
    pub plaintext_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VaultStatus {
    pub scope: String,
    pub scope_source: String,
    pub kind: String,
    pub repo_root: String,
    pub sun_base_url: String,
    pub backend: String,
    pub backend_source: String,
    pub sun_backup_enabled: bool,
    pub sun_backup_strict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_kv: Option<KvSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_kv_error: Option<String>,
}

impl VaultStatus {
    pub fn is_ok(&self) -> bool {
        self.identity_error.is_none() && self.cloud_kv_error.is_none()
    }

    pub fn render_text(&self) -> String {
        let mut lines = vec![
            format!("scope: {} ({})", self.scope, self.scope_source),
            format!("kind: {}", self.kind),
            format!("sun: {}", self.sun_base_url),
            format!("backend: {} ({})", self.backend, self.backend_source),
        ];
        if !self.repo_root.is_empty() {
            lines.push(format!("repo: {}", self.repo_root));
        }
        match (&self.identity, &self.identity_error) {
            (_, Some(err)) => lines.push(format!("identity: error ({err})")),
            (Some(id), None) => {
                lines.push(format!("identity: ok ({})", id.source));
                lines.push(format!("recipient: {}", id.recipient));
                lines.push(format!("backup_keys: {}", id.backup_keys));
            }
            (None, None) => {}
        }
        match (&self.cloud_kv, &self.cloud_kv_error) {
            (_, Some(err)) => lines.push(format!("cloud_kv: error ({err})")),
            (Some(kv), None) => {
                lines.push(format!("cloud_kv: ok ({} keys)", kv.keys));
                lines.push(format!("encrypted: {}", kv.encrypted));
                lines.push(format!("plaintext: {}", kv.plaintext));
                if !kv.plaintext_keys.is_empty() {
                    lines.push(format!("plaintext_keys: {}", kv.plaintext_keys.join(", ")));
                }
            }
            (None, None) => {}
        }
        lines.join("\n")
    }
}

/// Gather status for `target`. Backend errors are fatal; identity and KV
/// failures are reported in the result.
pub async fn collect_status(settings: &Settings, target: &VaultTarget) -> Result<VaultStatus> {
    let backend: BackendResolution = resolve_backend(settings)?;
    let client = SunClient::from_settings(settings)?;
    let store = KvStore::new(&client, target);

    let (identity, identity_error) = match load_identity(&client).await {
        Ok(id) => (
            Some(IdentityStatus {
                recipient: id.recipient().to_string(),
                backup_keys: id.backup_count(),
                source: id.source.as_str().to_string(),
            }),
            None,
        ),
        Err(err) => (None, Some(err.to_string())),
    };

    let (cloud_kv, cloud_kv_error) = match store.load_raw_values().await {
        Ok(mut values) => {
            values.remove(PUBLIC_KEY_NAME);
            let mut summary = KvSummary {
                keys: values.len(),
                ..Default::default()
            };
            for (key, raw) in values {
                if normalize_value(&raw).is_ok_and(|v| is_encrypted(&v)) {
                    summary.encrypted += 1;
                } else {
                    summary.plaintext += 1;
                    summary.plaintext_keys.push(key);
                }
            }
            (Some(summary), None)
        }
        Err(err) => (None, Some(err.to_string())),
    };

    Ok(VaultStatus {
        scope: target.scope.clone(),
        scope_source: target.origin.clone(),
        kind: store.kind().to_string(),
        repo_root: target.repo_root.clone(),
        sun_base_url: client.base_url().to_string(),
        backend: backend.mode.to_string(),
        backend_source: backend.source.to_string(),
        sun_backup_enabled: backend.sun_backup_enabled(),
        sun_backup_strict: backend.sun_backup_strict(),
        identity,
        identity_error,
        cloud_kv,
        cloud_kv_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encrypt_value;
    use crate::identity::{IDENTITY_KIND, IDENTITY_NAME, VaultIdentity};
    use serial_test::serial;
    use si_sun::testing::StubSun;

    fn target() -> VaultTarget {
        VaultTarget {
            scope: "aureuma/dev".to_string(),
            file_is_explicit: true,
            cwd: std::env::temp_dir(),
            repo_root: String::new(),
            origin: "flag".to_string(),
            source_path: None,
        }
    }

    fn settings(stub: &StubSun) -> Settings {
        let mut settings = Settings::default();
        settings.sun.base_url = stub.base_url().to_string();
        settings.sun.token = StubSun::TOKEN.to_string();
        settings
    }

    fn collect(settings: &Settings, target: &VaultTarget) -> VaultStatus {
        temp_env::with_vars(
            [
                ("SI_VAULT_IDENTITY", None::<&str>),
                ("SI_VAULT_SYNC_BACKEND", None),
                ("SI_SUN_BASE_URL", None),
                ("SI_SUN_TOKEN", None),
            ],
            || {
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap()
                    .block_on(collect_status(settings, target))
                    .unwrap()
            },
        )
    }

    #[test]
    #[serial]
    fn test_status_counts_keys() {
        let stub = StubSun::start();
        let identity = VaultIdentity::generate();
        let secret = crate::crypto::identity_secret(&identity.identities()[0]);
        stub.seed(IDENTITY_KIND, IDENTITY_NAME, format!("{secret}\n").as_bytes(), "text/plain", Default::default());
        let target = target();
        let kind = crate::scope::kv_kind(&target.scope);
        let ct = encrypt_value("vault-secret-value", &identity.recipients()).unwrap();
        stub.seed(&kind, "OPENAI_API_KEY", format!("{ct}\n").as_bytes(), "text/plain", Default::default());

        let status = collect(&settings(&stub), &target);
        assert!(status.is_ok());
        let text = status.render_text();
        assert!(text.contains("cloud_kv: ok (1 keys)"), "{text}");
        assert!(text.contains("identity: ok (sun)"));
        assert!(!text.contains("plaintext_keys"));

        stub.seed(&kind, "PLAIN", b"value\n", "text/plain", Default::default());
        stub.seed(&kind, "SI_VAULT_PUBLIC_KEY", b"age1header\n", "text/plain", Default::default());
        let status = collect(&settings(&stub), &target);
        let kv = status.cloud_kv.unwrap();
        assert_eq!((kv.keys, kv.encrypted, kv.plaintext), (2, 1, 1));
        assert_eq!(kv.plaintext_keys, vec!["PLAIN"]);
    }

    #[test]
    #[serial]
    fn test_status_reports_missing_identity() {
        let stub = StubSun::start();
        let status = collect(&settings(&stub), &target());
        assert!(!status.is_ok());
        assert!(status.render_text().contains("identity: error (vault identity missing"));
        assert!(status.render_text().contains("cloud_kv: ok (0 keys)"));
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("identity").is_none());
        assert_eq!(json["backend"], "sun");
    }
}

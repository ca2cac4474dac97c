//! App Store Connect adapter

use crate::provider::{ContextBuilder, ContextFlags, Provider, segment};
use si_config::Settings;
use si_runtime::{
    AppStoreCredentials, Credentials, DefaultNormalizer, EntryField, FieldSpec, ProviderId,
    Request, Response, ResponseNormalizer, Result, RuntimeContext, RuntimeError,
};

pub const ISSUER_ID: FieldSpec = FieldSpec::id(
    "app store issuer id",
    "--issuer-id",
    "ISSUER_ID",
    Some(EntryField::IssuerId),
    None,
    &["APPLE_APPSTORE_ISSUER_ID"],
);

pub const KEY_ID: FieldSpec = FieldSpec::id(
    "app store key id",
    "--key-id",
    "KEY_ID",
    Some(EntryField::KeyId),
    None,
    &["APPLE_APPSTORE_KEY_ID"],
);

pub const PRIVATE_KEY: FieldSpec = FieldSpec::secret(
    "app store private key",
    "--private-key",
    "PRIVATE_KEY_PEM",
    Some(EntryField::PrivateKeyEnv),
    &["APPLE_APPSTORE_PRIVATE_KEY_PEM"],
);

pub const PRIVATE_KEY_FILE: FieldSpec = FieldSpec::secret(
    "app store private key file",
    "--private-key-file",
    "PRIVATE_KEY_FILE",
    None,
    &["APPLE_APPSTORE_PRIVATE_KEY_FILE"],
);

/// Inline PEM first, then a `.p8` file.
fn private_key(builder: &mut ContextBuilder<'_>) -> Result<String> {
    if let Some(pem) = builder.optional(&PRIVATE_KEY) {
        return Ok(pem.replace("\\n", "\n"));
    }
    if let Some(path) = builder.optional(&PRIVATE_KEY_FILE) {
        return std::fs::read_to_string(&path).map_err(|e| {
            RuntimeError::usage(format!("failed to read app store private key {path}: {e}"))
        });
    }
    let mut tried = builder.resolver().candidates(&PRIVATE_KEY);
    tried.extend(builder.resolver().candidates(&PRIVATE_KEY_FILE));
    Err(RuntimeError::MissingCredential {
        what: PRIVATE_KEY.label.to_string(),
        tried,
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AppStore;

impl AppStore {
    pub async fn list_apps(
        &self,
        ctx: &RuntimeContext,
        bundle_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Response> {
        let mut request = Request::get("/v1/apps").query("filter[bundleId]", bundle_id.unwrap_or_default());
        if let Some(limit) = limit {
            request = request.query("limit", limit.min(200).to_string());
        }
        self.send(ctx, &request).await
    }

    pub async fn get_app(&self, ctx: &RuntimeContext, id: &str) -> Result<Response> {
        self.send(ctx, &Request::get(format!("/v1/apps/{}", segment(id))))
            .await
    }
}

impl Provider for AppStore {
    fn id(&self) -> ProviderId {
        ProviderId::AppStore
    }

    fn display_name(&self) -> &'static str {
        "App Store Connect"
    }

    fn context(&self, settings: &Settings, flags: &ContextFlags) -> Result<RuntimeContext> {
        let mut builder = ContextBuilder::new(settings, ProviderId::AppStore, flags)?;
        let issuer_id = builder.require_id("issuer_id", &ISSUER_ID)?;
        let key_id = builder.require_id("key_id", &KEY_ID)?;
        let private_key_pem = private_key(&mut builder)?;
        Ok(builder.finish(Credentials::AppStore(AppStoreCredentials {
            issuer_id,
            key_id,
            private_key_pem,
        })))
    }

    fn normalizer(&self) -> &dyn ResponseNormalizer {
        &DefaultNormalizer(ProviderId::AppStore)
    }

    fn verify_request(&self, _ctx: &RuntimeContext) -> Result<Request> {
        Ok(Request::get("/v1/apps").query("limit", "1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubApi;
    use serde_json::json;
    use serial_test::serial;

    const TEST_KEY: &str = include_str!("../../si-runtime/tests/fixtures/appstore_test_key.p8");

    fn clear_env() -> [(&'static str, Option<&'static str>); 4] {
        [
            ("APPSTORE_DEFAULT_ACCOUNT", None),
            ("APPSTORE_API_BASE_URL", None),
            ("APPLE_APPSTORE_PRIVATE_KEY_PEM", None),
            ("APPLE_APPSTORE_PRIVATE_KEY_FILE", None),
        ]
    }

    #[test]
    #[serial]
    fn test_missing_key_lists_both_sources() {
        temp_env::with_vars(clear_env(), || {
            let flags = ContextFlags::new()
                .with("--issuer-id", Some("issuer-1"))
                .with("--key-id", Some("KEY123"));
            let err = AppStore.context(&Settings::default(), &flags).unwrap_err();
            let message = err.to_string();
            assert!(message.contains("--private-key"));
            assert!(message.contains("APPLE_APPSTORE_PRIVATE_KEY_FILE"));
        });
    }

    #[tokio::test]
    #[serial]
    async fn test_apps_list_with_key_file() {
        let stub = StubApi::start(&[(
            "/v1/apps",
            200,
            json!({"data": [{"id": "123", "attributes": {"bundleId": "com.example.app"}}]}),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("AuthKey.p8");
        std::fs::write(&key_path, TEST_KEY).unwrap();
        let flags = ContextFlags::new()
            .base_url(Some(&stub.base_url))
            .with("--issuer-id", Some("issuer-1"))
            .with("--key-id", Some("KEY123"))
            .with("--private-key-file", key_path.to_str());

        unsafe { std::env::set_var("SI_APPSTORE_LOG_FILE", dir.path().join("appstore.log")) };
        let ctx = AppStore.context(&Settings::default(), &flags).unwrap();
        let resp = AppStore.list_apps(&ctx, Some("com.example.app"), Some(500)).await;
        unsafe { std::env::remove_var("SI_APPSTORE_LOG_FILE") };

        assert_eq!(resp.unwrap().list.len(), 1);
        assert_eq!(ctx.id("key_id"), Some("KEY123"));
        let req = stub.last();
        assert_eq!(req.query, "filter%5BbundleId%5D=com.example.app&limit=200");
        assert!(req.headers["authorization"].starts_with("Bearer ey"));
    }
}

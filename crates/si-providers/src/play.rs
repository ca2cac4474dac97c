//! Google Play Developer API adapter

use crate::provider::{ContextBuilder, ContextFlags, Provider, required_id, segment};
use si_config::Settings;
use si_runtime::{
    Credentials, DefaultNormalizer, EntryField, FieldSpec, ProviderId, Request, Response,
    ResponseNormalizer, Result, RuntimeContext, RuntimeError,
};

pub const ACCESS_TOKEN: FieldSpec = FieldSpec::secret(
    "google play access token",
    "--access-token",
    "ACCESS_TOKEN",
    Some(EntryField::AccessTokenEnv),
    &["GOOGLE_PLAY_ACCESS_TOKEN", "GOOGLE_OAUTH_ACCESS_TOKEN"],
);

pub const PACKAGE_NAME: FieldSpec = FieldSpec::id(
    "google play package name",
    "--package",
    "PACKAGE_NAME",
    Some(EntryField::PackageName),
    None,
    &["GOOGLE_PLAY_PACKAGE_NAME"],
);

#[derive(Debug, Clone, Copy, Default)]
pub struct GooglePlay;

impl GooglePlay {
    fn app_path(ctx: &RuntimeContext) -> Result<String> {
        let package = required_id(ctx, "package_name", "--package")?;
        Ok(format!("/androidpublisher/v3/applications/{}", segment(package)))
    }

    fn edit_path(ctx: &RuntimeContext, edit_id: &str) -> Result<String> {
        if edit_id.trim().is_empty() {
            return Err(RuntimeError::usage("edit id is required"));
        }
        Ok(format!("{}/edits/{}", Self::app_path(ctx)?, segment(edit_id)))
    }

    /// Open a new edit; `data.id` is the edit id.
    pub async fn insert_edit(&self, ctx: &RuntimeContext) -> Result<Response> {
        let path = format!("{}/edits", Self::app_path(ctx)?);
        self.send(ctx, &Request::post(path).json(serde_json::json!({})))
            .await
    }

    pub async fn commit_edit(&self, ctx: &RuntimeContext, edit_id: &str) -> Result<Response> {
        let path = format!("{}:commit", Self::edit_path(ctx, edit_id)?);
        tracing::info!(edit_id, "committing google play edit");
        self.send(ctx, &Request::post(path)).await
    }

    pub async fn delete_edit(&self, ctx: &RuntimeContext, edit_id: &str) -> Result<Response> {
        let path = Self::edit_path(ctx, edit_id)?;
        self.send(ctx, &Request::new("DELETE", path)).await
    }

    pub async fn list_tracks(&self, ctx: &RuntimeContext, edit_id: &str) -> Result<Response> {
        let path = format!("{}/tracks", Self::edit_path(ctx, edit_id)?);
        self.send(ctx, &Request::get(path)).await
    }
}

impl Provider for GooglePlay {
    fn id(&self) -> ProviderId {
        ProviderId::GooglePlay
    }

    fn display_name(&self) -> &'static str {
        "Google Play"
    }

    fn context(&self, settings: &Settings, flags: &ContextFlags) -> Result<RuntimeContext> {
        let mut builder = ContextBuilder::new(settings, ProviderId::GooglePlay, flags)?;
        builder.id("package_name", &PACKAGE_NAME);
        let token = builder.require(&ACCESS_TOKEN)?;
        Ok(builder.finish(Credentials::Bearer(token)))
    }

    fn normalizer(&self) -> &dyn ResponseNormalizer {
        &DefaultNormalizer(ProviderId::GooglePlay)
    }

    fn verify_request(&self, ctx: &RuntimeContext) -> Result<Request> {
        Ok(Request::get(format!("{}/reviews", Self::app_path(ctx)?)).query("maxResults", "1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubApi;
    use serde_json::json;

    const APP: &str = "/androidpublisher/v3/applications/com.example.app";

    #[tokio::test]
    async fn test_edit_lifecycle() {
        let insert = format!("POST {APP}/edits");
        let commit = format!("POST {APP}/edits/edit-1:commit");
        let tracks = format!("{APP}/edits/edit-1/tracks");
        let delete = format!("DELETE {APP}/edits/edit-2");
        let stub = StubApi::start(&[
            (insert.as_str(), 200, json!({"id": "edit-1", "expiryTimeSeconds": "1700000000"})),
            (commit.as_str(), 200, json!({"id": "edit-1"})),
            (tracks.as_str(), 200, json!({"tracks": [{"track": "internal"}, {"track": "production"}]})),
            (delete.as_str(), 200, json!({})),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = stub.context(ProviderId::GooglePlay, dir.path());
        ctx.credentials = Credentials::Bearer("ya29.play".to_string());
        ctx.set_id("package_name", "com.example.app");

        let edit = GooglePlay.insert_edit(&ctx).await.unwrap();
        assert_eq!(edit.data_str("id"), Some("edit-1"));

        let tracks = GooglePlay.list_tracks(&ctx, "edit-1").await.unwrap();
        let names: Vec<_> = tracks
            .data
            .unwrap()["tracks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["track"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["internal", "production"]);

        GooglePlay.commit_edit(&ctx, "edit-1").await.unwrap();
        assert_eq!(stub.last().method, "POST");

        GooglePlay.delete_edit(&ctx, "edit-2").await.unwrap();
        assert_eq!(stub.last().method, "DELETE");

        assert!(GooglePlay.commit_edit(&ctx, " ").await.unwrap_err().is_usage());
    }

    #[test]
    fn test_verify_requires_package() {
        let ctx = RuntimeContext::new(ProviderId::GooglePlay, "https://androidpublisher.googleapis.com");
        let err = GooglePlay.verify_request(&ctx).unwrap_err();
        assert!(err.to_string().contains("--package"));
    }
}

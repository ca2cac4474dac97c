//! Google Cloud adapters: Service Usage (bearer) and Gemini (api key)

use crate::provider::{ContextBuilder, ContextFlags, Provider, required_id, segment};
use si_config::Settings;
use si_runtime::{
    Credentials, DefaultNormalizer, EntryField, FieldSpec, ProviderId, Request, Response,
    ResponseNormalizer, Result, RuntimeContext, RuntimeError,
};

pub const PROJECT_ID: FieldSpec = FieldSpec::id(
    "gcp project id",
    "--project",
    "PROJECT_ID",
    Some(EntryField::ProjectId),
    Some(EntryField::ProjectIdEnv),
    &["GCP_PROJECT_ID", "GOOGLE_CLOUD_PROJECT"],
);

pub const ACCESS_TOKEN: FieldSpec = FieldSpec::secret(
    "gcp access token",
    "--access-token",
    "ACCESS_TOKEN",
    Some(EntryField::AccessTokenEnv),
    &["GOOGLE_OAUTH_ACCESS_TOKEN", "GCP_ACCESS_TOKEN"],
);

pub const GEMINI_API_KEY: FieldSpec = FieldSpec::secret(
    "gemini api key",
    "--api-key",
    "API_KEY",
    Some(EntryField::ApiKeyEnv),
    &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
);

/// `compute` → `compute.googleapis.com`; qualified names pass through.
pub fn service_name(raw: &str) -> Result<String> {
    let name = raw.trim().trim_start_matches("services/");
    if name.is_empty() {
        return Err(RuntimeError::usage("service name is required"));
    }
    Ok(if name.contains('.') {
        name.to_string()
    } else {
        format!("{name}.googleapis.com")
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Gcp;

impl Gcp {
    fn services_path(ctx: &RuntimeContext) -> Result<String> {
        let project = required_id(ctx, "project_id", "--project")?;
        Ok(format!("/v1/projects/{}/services", segment(project)))
    }

    pub async fn list_services(
        &self,
        ctx: &RuntimeContext,
        filter: Option<&str>,
        page_size: Option<u32>,
    ) -> Result<Response> {
        let mut request = Request::get(Self::services_path(ctx)?);
        if let Some(size) = page_size {
            request = request.query("pageSize", size.to_string());
        }
        let request = request.query("filter", filter.unwrap_or_default());
        self.send(ctx, &request).await
    }

    pub async fn get_service(&self, ctx: &RuntimeContext, name: &str) -> Result<Response> {
        let path = format!("{}/{}", Self::services_path(ctx)?, segment(&service_name(name)?));
        self.send(ctx, &Request::get(path)).await
    }

    pub async fn enable_service(&self, ctx: &RuntimeContext, name: &str) -> Result<Response> {
        self.toggle(ctx, name, "enable").await
    }

    pub async fn disable_service(&self, ctx: &RuntimeContext, name: &str) -> Result<Response> {
        self.toggle(ctx, name, "disable").await
    }

    async fn toggle(&self, ctx: &RuntimeContext, name: &str, action: &str) -> Result<Response> {
        let path = format!(
            "{}/{}:{action}",
            Self::services_path(ctx)?,
            segment(&service_name(name)?)
        );
        tracing::info!(project = ctx.id("project_id").unwrap_or_default(), service = name, action, "toggling gcp service");
        self.send(ctx, &Request::post(path).json(serde_json::json!({})))
            .await
    }
}

impl Provider for Gcp {
    fn id(&self) -> ProviderId {
        ProviderId::Gcp
    }

    fn display_name(&self) -> &'static str {
        "GCP"
    }

    fn context(&self, settings: &Settings, flags: &ContextFlags) -> Result<RuntimeContext> {
        let mut builder = ContextBuilder::new(settings, ProviderId::Gcp, flags)?;
        builder.id("project_id", &PROJECT_ID);
        let token = builder.require(&ACCESS_TOKEN)?;
        Ok(builder.finish(Credentials::Bearer(token)))
    }

    fn normalizer(&self) -> &dyn ResponseNormalizer {
        &DefaultNormalizer(ProviderId::Gcp)
    }

    fn verify_request(&self, ctx: &RuntimeContext) -> Result<Request> {
        Ok(Request::get(format!(
            "{}/serviceusage.googleapis.com",
            Self::services_path(ctx)?
        )))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Gemini;

impl Gemini {
    pub async fn list_models(&self, ctx: &RuntimeContext, page_size: Option<u32>) -> Result<Response> {
        let mut request = Request::get("/v1beta/models");
        if let Some(size) = page_size {
            request = request.query("pageSize", size.to_string());
        }
        self.send(ctx, &request).await
    }
}

impl Provider for Gemini {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn display_name(&self) -> &'static str {
        "Gemini"
    }

    fn context(&self, settings: &Settings, flags: &ContextFlags) -> Result<RuntimeContext> {
        let mut builder = ContextBuilder::new(settings, ProviderId::Gemini, flags)?;
        builder.id("project_id", &PROJECT_ID);
        let key = builder.require(&GEMINI_API_KEY)?;
        Ok(builder.finish(Credentials::ApiKey {
            param: "key".to_string(),
            key,
        }))
    }

    fn normalizer(&self) -> &dyn ResponseNormalizer {
        &DefaultNormalizer(ProviderId::Gemini)
    }

    fn verify_request(&self, _ctx: &RuntimeContext) -> Result<Request> {
        Ok(Request::get("/v1beta/models").query("pageSize", "1"))
    }
}

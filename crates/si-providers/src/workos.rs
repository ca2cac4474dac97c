//! WorkOS adapter

use crate::provider::{ContextBuilder, ContextFlags, Provider, segment};
use si_config::Settings;
use si_runtime::{
    Credentials, DefaultNormalizer, EntryField, FieldSpec, ProviderId, Request, Response,
    ResponseNormalizer, Result, RuntimeContext,
};

pub const API_KEY: FieldSpec = FieldSpec::secret(
    "workos api key",
    "--api-key",
    "API_KEY",
    Some(EntryField::ApiKeyEnv),
    &["WORKOS_API_KEY", "WORKOS_MANAGEMENT_API_KEY"],
);

pub const ORGANIZATION_ID: FieldSpec = FieldSpec::id(
    "workos organization id",
    "--organization-id",
    "ORGANIZATION_ID",
    Some(EntryField::OrganizationId),
    Some(EntryField::OrganizationIdEnv),
    &["WORKOS_ORGANIZATION_ID"],
);

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkOs;

impl Provider for WorkOs {
    fn id(&self) -> ProviderId {
        ProviderId::Workos
    }

    fn display_name(&self) -> &'static str {
        "WorkOS"
    }

    fn context(&self, settings: &Settings, flags: &ContextFlags) -> Result<RuntimeContext> {
        let mut builder = ContextBuilder::new(settings, ProviderId::Workos, flags)?;
        let key = builder.require(&API_KEY)?;
        builder.id("organization_id", &ORGANIZATION_ID);
        Ok(builder.finish(Credentials::Bearer(key)))
    }

    fn normalizer(&self) -> &dyn ResponseNormalizer {
        &DefaultNormalizer(ProviderId::Workos)
    }

    fn verify_request(&self, _ctx: &RuntimeContext) -> Result<Request> {
        Ok(Request::get("/organizations").query("limit", "1"))
    }
}

impl WorkOs {
    pub async fn list_organizations(
        &self,
        ctx: &RuntimeContext,
        domain: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Response> {
        let mut request = Request::get("/organizations").query("domains[]", domain.unwrap_or_default());
        if let Some(limit) = limit {
            request = request.query("limit", limit.to_string());
        }
        self.send(ctx, &request).await
    }

    pub async fn get_organization(&self, ctx: &RuntimeContext, id: &str) -> Result<Response> {
        self.send(ctx, &Request::get(format!("/organizations/{}", segment(id))))
            .await
    }

    /// Users, scoped to the context organization unless `organization` is given.
    pub async fn list_users(
        &self,
        ctx: &RuntimeContext,
        organization: Option<&str>,
        email: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Response> {
        let organization = organization
            .or_else(|| ctx.id("organization_id"))
            .unwrap_or_default();
        let mut request = Request::get("/user_management/users")
            .query("organization_id", organization)
            .query("email", email.unwrap_or_default());
        if let Some(limit) = limit {
            request = request.query("limit", limit.to_string());
        }
        self.send(ctx, &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubApi;
    use serde_json::json;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_context_reads_generic_env() {
        temp_env::with_vars(
            [
                ("WORKOS_DEFAULT_ACCOUNT", None),
                ("WORKOS_API_KEY", None),
                ("WORKOS_MANAGEMENT_API_KEY", Some("sk_mgmt_1234567890")),
                ("WORKOS_ORGANIZATION_ID", Some("org_01")),
            ],
            || {
                let ctx = WorkOs.context(&Settings::default(), &ContextFlags::new()).unwrap();
                assert_eq!(ctx.source, "env:WORKOS_MANAGEMENT_API_KEY,env:WORKOS_ORGANIZATION_ID");
                assert_eq!(ctx.id("organization_id"), Some("org_01"));
                assert_eq!(ctx.base_url, "https://api.workos.com");
            },
        );
    }

    #[tokio::test]
    async fn test_list_users_scopes_to_organization() {
        let stub = StubApi::start(&[(
            "/user_management/users",
            200,
            json!({"data": [{"id": "user_1", "email": "a@example.com"}], "list_metadata": {}}),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = stub.context(ProviderId::Workos, dir.path());
        ctx.credentials = Credentials::Bearer("sk_test_users".to_string());
        ctx.set_id("organization_id", "org_01");

        let resp = WorkOs.list_users(&ctx, None, None, Some(5)).await.unwrap();
        assert_eq!(resp.list.len(), 1);
        assert_eq!(stub.last().query, "organization_id=org_01&limit=5");

        WorkOs.list_users(&ctx, Some("org_02"), Some("b@example.com"), None).await.unwrap();
        assert_eq!(stub.last().query, "organization_id=org_02&email=b%40example.com");
    }

    #[tokio::test]
    async fn test_get_organization_not_found() {
        let stub = StubApi::start(&[]).await;
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = stub.context(ProviderId::Workos, dir.path());
        ctx.credentials = Credentials::Bearer("sk_test_missing".to_string());

        let err = WorkOs.get_organization(&ctx, "org_missing").await.unwrap_err();
        assert_eq!(err.provider_error().unwrap().status_code, 404);
        assert_eq!(stub.last().path, "/organizations/org_missing");
    }
}

//! AWS adapter (IAM, STS, S3, Bedrock)
//!
//! Every service is SigV4-signed with the same key pair; only the endpoint
//! and signing name differ. Query APIs answer in XML, which is folded into
//! `data`/`list` by [`AwsNormalizer`].

use crate::provider::{ContextBuilder, ContextFlags, Provider, segment};
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde_json::Value;
use si_config::Settings;
use si_runtime::{
    AwsCredentials, Credentials, DefaultNormalizer, EntryField, FieldSpec, JsonMap, ProviderId,
    Request, Response, ResponseNormalizer, Result, RuntimeContext,
};
use std::sync::LazyLock;

pub const DEFAULT_REGION: &str = "us-east-1";

pub const ACCESS_KEY_ID: FieldSpec = FieldSpec::secret(
    "aws access key id",
    "--access-key-id",
    "ACCESS_KEY_ID",
    Some(EntryField::AccessKeyIdEnv),
    &["AWS_ACCESS_KEY_ID"],
);

pub const SECRET_ACCESS_KEY: FieldSpec = FieldSpec::secret(
    "aws secret access key",
    "--secret-access-key",
    "SECRET_ACCESS_KEY",
    Some(EntryField::SecretAccessKeyEnv),
    &["AWS_SECRET_ACCESS_KEY"],
);

pub const SESSION_TOKEN: FieldSpec = FieldSpec::secret(
    "aws session token",
    "--session-token",
    "SESSION_TOKEN",
    Some(EntryField::SessionTokenEnv),
    &["AWS_SESSION_TOKEN"],
);

pub const REGION: FieldSpec = FieldSpec::id(
    "aws region",
    "--region",
    "REGION",
    Some(EntryField::Region),
    None,
    &["AWS_REGION", "AWS_DEFAULT_REGION"],
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwsService {
    Iam,
    Sts,
    S3,
    BedrockRuntime,
    Bedrock,
}

impl AwsService {
    /// SigV4 service name.
    pub fn signing_name(&self) -> &'static str {
        match self {
            Self::Iam => "iam",
            Self::Sts => "sts",
            Self::S3 => "s3",
            Self::BedrockRuntime | Self::Bedrock => "bedrock",
        }
    }

    pub fn endpoint(&self, region: &str) -> String {
        match self {
            Self::Iam => "https://iam.amazonaws.com".to_string(),
            Self::Sts => format!("https://sts.{region}.amazonaws.com"),
            Self::S3 => format!("https://s3.{region}.amazonaws.com"),
            Self::BedrockRuntime => format!("https://bedrock-runtime.{region}.amazonaws.com"),
            Self::Bedrock => format!("https://bedrock.{region}.amazonaws.com"),
        }
    }

    /// IAM is global and always signs for us-east-1.
    fn signing_region<'r>(&self, region: &'r str) -> &'r str {
        match self {
            Self::Iam => DEFAULT_REGION,
            _ => region,
        }
    }

    const fn provider(&self) -> ProviderId {
        match self {
            Self::BedrockRuntime | Self::Bedrock => ProviderId::Bedrock,
            _ => ProviderId::Aws,
        }
    }
}

static XML_LEAF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([A-Za-z][A-Za-z0-9]*)>([^<]*)</([A-Za-z][A-Za-z0-9]*)>").expect("static regex")
});
static XML_MEMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<member>(.*?)</member>").expect("static regex"));
static XML_BUCKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Bucket>(.*?)</Bucket>").expect("static regex"));

/// Leaf elements of an XML fragment, first occurrence wins.
pub fn xml_fields(xml: &str) -> JsonMap {
    let mut out = JsonMap::new();
    for caps in XML_LEAF.captures_iter(xml) {
        if caps[1] != caps[3] || out.contains_key(&caps[1]) {
            continue;
        }
        out.insert(caps[1].to_string(), Value::String(caps[2].trim().to_string()));
    }
    out
}

fn xml_records(xml: &str) -> Vec<JsonMap> {
    [&*XML_MEMBER, &*XML_BUCKET]
        .iter()
        .map(|re| {
            re.captures_iter(xml)
                .map(|caps| xml_fields(&caps[1]))
                .filter(|m| !m.is_empty())
                .collect::<Vec<_>>()
        })
        .find(|records| !records.is_empty())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy)]
pub struct AwsNormalizer(pub ProviderId);

impl ResponseNormalizer for AwsNormalizer {
    fn provider(&self) -> ProviderId {
        self.0
    }

    fn normalize(&self, status: StatusCode, headers: &HeaderMap, body: &str) -> Response {
        let mut out = DefaultNormalizer(self.0).normalize(status, headers, body);
        if out.data.is_none() && out.list.is_empty() && body.trim_start().starts_with('<') {
            out.list = xml_records(body);
            out.data = Some(xml_fields(body));
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Aws {
    pub service: AwsService,
    normalizer: AwsNormalizer,
}

impl Aws {
    pub const fn new(service: AwsService) -> Self {
        Self {
            service,
            normalizer: AwsNormalizer(service.provider()),
        }
    }

    fn query_action(action: &str, version: &str) -> Request {
        Request::get("/").query("Action", action).query("Version", version)
    }

    /// STS GetCallerIdentity; `data` carries `Account`, `Arn` and `UserId`.
    pub async fn caller_identity(&self, ctx: &RuntimeContext) -> Result<Response> {
        self.send(ctx, &Self::query_action("GetCallerIdentity", "2011-06-15"))
            .await
    }

    pub async fn list_users(&self, ctx: &RuntimeContext, max_items: Option<u32>) -> Result<Response> {
        let mut request = Self::query_action("ListUsers", "2010-05-08");
        if let Some(max) = max_items {
            request = request.query("MaxItems", max.to_string());
        }
        self.send(ctx, &request).await
    }

    pub async fn list_buckets(&self, ctx: &RuntimeContext) -> Result<Response> {
        self.send(ctx, &Request::get("/")).await
    }

    pub async fn invoke_model(&self, ctx: &RuntimeContext, model_id: &str, body: Value) -> Result<Response> {
        tracing::debug!(model = model_id, "invoking bedrock model");
        let path = format!("/model/{}/invoke", segment(model_id));
        self.send(ctx, &Request::post(path).json(body)).await
    }

    pub async fn list_models(&self, ctx: &RuntimeContext, provider: Option<&str>) -> Result<Response> {
        let request = Request::get("/foundation-models").query("byProvider", provider.unwrap_or_default());
        self.send(ctx, &request).await
    }
}

impl Provider for Aws {
    fn id(&self) -> ProviderId {
        self.service.provider()
    }

    fn display_name(&self) -> &'static str {
        match self.service {
            AwsService::BedrockRuntime | AwsService::Bedrock => "Bedrock",
            _ => "AWS",
        }
    }

    fn context(&self, settings: &Settings, flags: &ContextFlags) -> Result<RuntimeContext> {
        let mut builder = ContextBuilder::new(settings, self.id(), flags)?;
        let region = builder
            .id("region", &REGION)
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        builder.default_base_url(self.service.endpoint(&region));
        let access_key_id = builder.require(&ACCESS_KEY_ID)?;
        let secret_access_key = builder.require(&SECRET_ACCESS_KEY)?;
        let session_token = builder.optional(&SESSION_TOKEN).unwrap_or_default();
        let mut ctx = builder.finish(Credentials::Aws(AwsCredentials {
            access_key_id,
            secret_access_key,
            session_token,
            region: self.service.signing_region(&region).to_string(),
            service: self.service.signing_name().to_string(),
        }));
        ctx.set_id("region", region);
        Ok(ctx)
    }

    fn normalizer(&self) -> &dyn ResponseNormalizer {
        &self.normalizer
    }

    fn verify_request(&self, _ctx: &RuntimeContext) -> Result<Request> {
        Ok(match self.service {
            AwsService::Sts => Self::query_action("GetCallerIdentity", "2011-06-15"),
            AwsService::Iam => Self::query_action("ListUsers", "2010-05-08").query("MaxItems", "1"),
            AwsService::S3 => Request::get("/"),
            AwsService::BedrockRuntime | AwsService::Bedrock => Request::get("/foundation-models"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubApi;
    use serde_json::json;
    use serial_test::serial;

    const IDENTITY_XML: &str = r#"<GetCallerIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <GetCallerIdentityResult>
    <Arn>arn:aws:iam::123456789012:user/ops</Arn>
    <UserId>AIDAEXAMPLE</UserId>
    <Account>123456789012</Account>
  </GetCallerIdentityResult>
  <ResponseMetadata><RequestId>req-1</RequestId></ResponseMetadata>
</GetCallerIdentityResponse>"#;

    const USERS_XML: &str = r#"<ListUsersResponse><ListUsersResult><Users>
  <member><UserName>alice</UserName><UserId>U1</UserId></member>
  <member><UserName>bob</UserName><UserId>U2</UserId></member>
</Users><IsTruncated>false</IsTruncated></ListUsersResult></ListUsersResponse>"#;

    fn creds() -> Credentials {
        Credentials::Aws(AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: String::new(),
            region: DEFAULT_REGION.to_string(),
            service: "sts".to_string(),
        })
    }

    #[test]
    fn test_xml_fields_and_records() {
        let fields = xml_fields(IDENTITY_XML);
        assert_eq!(fields["Account"], "123456789012");
        assert_eq!(fields["RequestId"], "req-1");
        let users = xml_records(USERS_XML);
        assert_eq!(users.len(), 2);
        assert_eq!(users[1]["UserName"], "bob");
    }

    #[test]
    fn test_service_endpoints() {
        assert_eq!(AwsService::Sts.endpoint("eu-west-1"), "https://sts.eu-west-1.amazonaws.com");
        assert_eq!(AwsService::Iam.endpoint("eu-west-1"), "https://iam.amazonaws.com");
        assert_eq!(AwsService::Iam.signing_region("eu-west-1"), "us-east-1");
        assert_eq!(Aws::new(AwsService::BedrockRuntime).id(), ProviderId::Bedrock);
    }

    #[test]
    #[serial]
    fn test_context_picks_region_endpoint() {
        temp_env::with_vars(
            [
                ("AWS_DEFAULT_ACCOUNT", None),
                ("AWS_API_BASE_URL", None),
                ("AWS_REGION", None),
                ("AWS_DEFAULT_REGION", Some("eu-central-1")),
                ("AWS_ACCESS_KEY_ID", Some("AKIDEXAMPLE")),
                ("AWS_SECRET_ACCESS_KEY", Some("secret-example")),
                ("AWS_SESSION_TOKEN", None),
            ],
            || {
                let ctx = Aws::new(AwsService::S3)
                    .context(&Settings::default(), &ContextFlags::new())
                    .unwrap();
                assert_eq!(ctx.base_url, "https://s3.eu-central-1.amazonaws.com");
                assert_eq!(ctx.id("region"), Some("eu-central-1"));
                match &ctx.credentials {
                    Credentials::Aws(aws) => {
                        assert_eq!(aws.service, "s3");
                        assert_eq!(aws.region, "eu-central-1");
                        assert!(aws.session_token.is_empty());
                    }
                    other => panic!("unexpected credentials {other:?}"),
                }
            },
        );
    }

    #[tokio::test]
    async fn test_caller_identity_is_signed_and_parsed() {
        let stub = StubApi::start(&[]).await;
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = stub.context(ProviderId::Aws, dir.path());
        ctx.credentials = creds();

        let err = Aws::new(AwsService::Sts).caller_identity(&ctx).await.unwrap_err();
        assert_eq!(err.provider_error().unwrap().status_code, 404);
        let req = stub.last();
        assert_eq!(req.query, "Action=GetCallerIdentity&Version=2011-06-15");
        assert!(req.headers["authorization"].starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(req.headers.contains_key("x-amz-date"));
        assert!(req.headers.contains_key("x-amz-content-sha256"));

        let normalized = AwsNormalizer(ProviderId::Aws).normalize(StatusCode::OK, &HeaderMap::new(), IDENTITY_XML);
        assert_eq!(normalized.data_str("Arn"), Some("arn:aws:iam::123456789012:user/ops"));
    }

    #[tokio::test]
    async fn test_invoke_model_posts_json() {
        let stub = StubApi::start(&[(
            "POST /model/anthropic.claude-v2/invoke",
            200,
            json!({"completion": "hi", "stop_reason": "end_turn"}),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = stub.context(ProviderId::Bedrock, dir.path());
        ctx.credentials = creds();

        let resp = Aws::new(AwsService::BedrockRuntime)
            .invoke_model(&ctx, "anthropic.claude-v2", json!({"prompt": "hello"}))
            .await
            .unwrap();
        assert_eq!(resp.data_str("completion"), Some("hi"));
        let req = stub.last();
        assert_eq!(req.headers["content-type"], "application/json");
        assert_eq!(req.body, r#"{"prompt":"hello"}"#);
    }
}

//! Social network adapters (Facebook, Instagram, X, LinkedIn, Reddit)
//!
//! The networks share the `social` settings section but keep their own env
//! prefixes. Raw paths are rooted under the network's API version.

use crate::provider::{ContextBuilder, ContextFlags, Provider, versioned};
use si_config::Settings;
use si_runtime::{
    Credentials, DefaultNormalizer, EntryField, FieldSpec, ProviderId, Request, Response,
    ResponseNormalizer, Result, RuntimeContext, RuntimeError,
};

const FACEBOOK_TOKEN: FieldSpec = FieldSpec::secret(
    "facebook access token",
    "--access-token",
    "ACCESS_TOKEN",
    Some(EntryField::AccessTokenEnv),
    &["FACEBOOK_ACCESS_TOKEN", "META_ACCESS_TOKEN"],
);

const INSTAGRAM_TOKEN: FieldSpec = FieldSpec::secret(
    "instagram access token",
    "--access-token",
    "ACCESS_TOKEN",
    Some(EntryField::AccessTokenEnv),
    &["INSTAGRAM_ACCESS_TOKEN", "META_ACCESS_TOKEN"],
);

const X_TOKEN: FieldSpec = FieldSpec::secret(
    "x bearer token",
    "--access-token",
    "BEARER_TOKEN",
    Some(EntryField::AccessTokenEnv),
    &["X_BEARER_TOKEN", "TWITTER_BEARER_TOKEN", "X_ACCESS_TOKEN"],
);

const LINKEDIN_TOKEN: FieldSpec = FieldSpec::secret(
    "linkedin access token",
    "--access-token",
    "ACCESS_TOKEN",
    Some(EntryField::AccessTokenEnv),
    &["LINKEDIN_ACCESS_TOKEN"],
);

const REDDIT_TOKEN: FieldSpec = FieldSpec::secret(
    "reddit access token",
    "--access-token",
    "ACCESS_TOKEN",
    Some(EntryField::AccessTokenEnv),
    &["REDDIT_ACCESS_TOKEN"],
);

/// How the token travels; `--auth-style` overrides the network default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialAuth {
    None,
    Bearer,
    Query,
}

impl SocialAuth {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "bearer" => Ok(Self::Bearer),
            "query" | "access_token" => Ok(Self::Query),
            other => Err(RuntimeError::usage(format!(
                "invalid auth style {other:?} (expected none|bearer|query)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Social {
    network: ProviderId,
}

impl Social {
    /// `facebook|fb`, `instagram|ig`, `x|twitter`, `linkedin`, `reddit`.
    pub fn parse(raw: &str) -> Result<Self> {
        match ProviderId::parse(raw) {
            Some(
                network @ (ProviderId::SocialFacebook
                | ProviderId::SocialInstagram
                | ProviderId::SocialX
                | ProviderId::SocialLinkedin
                | ProviderId::SocialReddit),
            ) => Ok(Self { network }),
            _ => Err(RuntimeError::usage(format!(
                "unknown social network {:?} (expected facebook|instagram|x|linkedin|reddit)",
                raw.trim()
            ))),
        }
    }

    /// Adapter for a social provider id; other ids fall back to Reddit's rules.
    pub fn for_network(network: ProviderId) -> Self {
        Self { network }
    }

    pub fn network(&self) -> ProviderId {
        self.network
    }

    fn token_spec(&self) -> &'static FieldSpec {
        match self.network {
            ProviderId::SocialFacebook => &FACEBOOK_TOKEN,
            ProviderId::SocialInstagram => &INSTAGRAM_TOKEN,
            ProviderId::SocialX => &X_TOKEN,
            ProviderId::SocialLinkedin => &LINKEDIN_TOKEN,
            _ => &REDDIT_TOKEN,
        }
    }

    fn default_auth(&self) -> SocialAuth {
        match self.network {
            ProviderId::SocialFacebook | ProviderId::SocialInstagram => SocialAuth::Query,
            _ => SocialAuth::Bearer,
        }
    }

    fn profile_request(&self) -> Request {
        let request = match self.network {
            ProviderId::SocialFacebook => Request::get("/me").query("fields", "id,name"),
            ProviderId::SocialInstagram => Request::get("/me").query("fields", "id,username"),
            ProviderId::SocialX => Request::get("/users/me"),
            ProviderId::SocialLinkedin => Request::get("/me"),
            _ => Request::get("/api/v1/me"),
        };
        self.prepare_raw(request)
    }

    /// Profile of the token owner.
    pub async fn profile(&self, ctx: &RuntimeContext) -> Result<Response> {
        self.send(ctx, &self.profile_request()).await
    }
}

impl Provider for Social {
    fn id(&self) -> ProviderId {
        self.network
    }

    fn display_name(&self) -> &'static str {
        match self.network {
            ProviderId::SocialFacebook => "Facebook",
            ProviderId::SocialInstagram => "Instagram",
            ProviderId::SocialX => "X",
            ProviderId::SocialLinkedin => "LinkedIn",
            _ => "Reddit",
        }
    }

    fn context(&self, settings: &Settings, flags: &ContextFlags) -> Result<RuntimeContext> {
        let mut builder = ContextBuilder::new(settings, self.network, flags)?;
        let auth = match flags.get("--auth-style") {
            Some(raw) => SocialAuth::parse(raw)?,
            None => self.default_auth(),
        };
        let credentials = match auth {
            SocialAuth::None => Credentials::None,
            SocialAuth::Bearer => Credentials::Bearer(builder.require(self.token_spec())?),
            SocialAuth::Query => Credentials::Query {
                param: "access_token".to_string(),
                token: builder.require(self.token_spec())?,
            },
        };
        Ok(builder.finish(credentials))
    }

    fn normalizer(&self) -> &dyn ResponseNormalizer {
        match self.network {
            ProviderId::SocialFacebook => &DefaultNormalizer(ProviderId::SocialFacebook),
            ProviderId::SocialInstagram => &DefaultNormalizer(ProviderId::SocialInstagram),
            ProviderId::SocialX => &DefaultNormalizer(ProviderId::SocialX),
            ProviderId::SocialLinkedin => &DefaultNormalizer(ProviderId::SocialLinkedin),
            _ => &DefaultNormalizer(ProviderId::SocialReddit),
        }
    }

    fn verify_request(&self, _ctx: &RuntimeContext) -> Result<Request> {
        Ok(self.profile_request())
    }

    fn prepare_raw(&self, mut request: Request) -> Request {
        request.path = versioned(self.network.spec().api_version, &request.path);
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubApi;
    use serde_json::json;
    use serial_test::serial;

    #[test]
    fn test_parse_networks() {
        assert_eq!(Social::parse("FB").unwrap().network(), ProviderId::SocialFacebook);
        assert_eq!(Social::parse("twitter").unwrap().network(), ProviderId::SocialX);
        assert!(Social::parse("myspace").unwrap_err().is_usage());
    }

    #[test]
    fn test_raw_paths_are_versioned() {
        let linkedin = Social::parse("linkedin").unwrap();
        assert_eq!(linkedin.prepare_raw(Request::get("/me")).path, "/v2/me");
        let facebook = Social::parse("facebook").unwrap();
        assert_eq!(facebook.prepare_raw(Request::get("/v22.0/me")).path, "/v22.0/me");
        let reddit = Social::parse("reddit").unwrap();
        assert_eq!(reddit.prepare_raw(Request::get("/api/v1/me")).path, "/api/v1/me");
    }

    #[test]
    #[serial]
    fn test_auth_style_none_needs_no_token() {
        temp_env::with_vars(
            [("SOCIAL_DEFAULT_ACCOUNT", None::<&str>), ("LINKEDIN_ACCESS_TOKEN", None), ("LINKEDIN_DEFAULT_ACCOUNT", None)],
            || {
                let linkedin = Social::parse("linkedin").unwrap();
                let err = linkedin
                    .context(&Settings::default(), &ContextFlags::new())
                    .unwrap_err();
                assert!(err.is_missing_credential());

                let flags = ContextFlags::new().with("--auth-style", Some("none"));
                let ctx = linkedin.context(&Settings::default(), &flags).unwrap();
                assert!(ctx.credentials.is_none());
                assert_eq!(ctx.base_url, "https://api.linkedin.com");
            },
        );
    }

    #[tokio::test]
    async fn test_facebook_profile_uses_query_token() {
        let stub = StubApi::start(&[("/v22.0/me", 200, json!({"id": "10", "name": "Page Bot"}))]).await;
        let dir = tempfile::tempdir().unwrap();
        let facebook = Social::parse("facebook").unwrap();
        let mut ctx = stub.context(ProviderId::SocialFacebook, dir.path());
        ctx.credentials = Credentials::Query {
            param: "access_token".to_string(),
            token: "EAAB-test".to_string(),
        };

        let resp = facebook.profile(&ctx).await.unwrap();
        assert_eq!(resp.data_str("name"), Some("Page Bot"));
        let req = stub.last();
        assert_eq!(req.query, "fields=id%2Cname&access_token=EAAB-test");
        assert!(!req.headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_x_profile_uses_bearer() {
        let stub = StubApi::start(&[("/2/users/me", 200, json!({"data": {"id": "42", "username": "si"}}))]).await;
        let dir = tempfile::tempdir().unwrap();
        let x = Social::parse("x").unwrap();
        let mut ctx = stub.context(ProviderId::SocialX, dir.path());
        ctx.credentials = Credentials::Bearer("AAAA-x-token".to_string());

        x.profile(&ctx).await.unwrap();
        assert_eq!(stub.last().headers["authorization"], "Bearer AAAA-x-token");
    }
}

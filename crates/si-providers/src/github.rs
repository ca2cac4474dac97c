//! GitHub adapter
//!
//! Two auth modes: a personal/OAuth token sent as bearer, or a GitHub App
//! whose installation token is minted by the runtime on each call.

use crate::provider::{ContextBuilder, ContextFlags, Provider, segment};
use si_config::Settings;
use si_runtime::{
    Credentials, DefaultNormalizer, EntryField, FieldSpec, GitHubAppCredentials, ProviderId,
    Request, Response, ResponseNormalizer, Result, RuntimeContext, RuntimeError,
};

pub const TOKEN: FieldSpec = FieldSpec::secret(
    "github token",
    "--token",
    "TOKEN",
    Some(EntryField::OAuthTokenEnv),
    &["GITHUB_TOKEN", "GH_TOKEN", "GITHUB_PAT", "GH_PAT", "GITHUB_OAUTH_TOKEN"],
);

pub const APP_ID: FieldSpec = FieldSpec::id(
    "github app id",
    "--app-id",
    "APP_ID",
    Some(EntryField::AppId),
    Some(EntryField::AppIdEnv),
    &["GITHUB_APP_ID"],
);

pub const APP_KEY: FieldSpec = FieldSpec::secret(
    "github app private key",
    "--app-key",
    "APP_PRIVATE_KEY_PEM",
    Some(EntryField::AppPrivateKeyEnv),
    &["GITHUB_APP_PRIVATE_KEY_PEM"],
);

pub const INSTALLATION_ID: FieldSpec = FieldSpec::id(
    "github installation id",
    "--installation-id",
    "INSTALLATION_ID",
    Some(EntryField::InstallationId),
    Some(EntryField::InstallationIdEnv),
    &["GITHUB_INSTALLATION_ID"],
);

pub const OWNER: FieldSpec = FieldSpec::id(
    "github owner",
    "--owner",
    "OWNER",
    Some(EntryField::Owner),
    None,
    &["GITHUB_DEFAULT_OWNER"],
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    OAuth,
    App,
}

impl AuthMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "oauth" | "token" | "pat" => Ok(Self::OAuth),
            "app" | "github-app" | "installation" => Ok(Self::App),
            other => Err(RuntimeError::usage(format!(
                "invalid github auth mode {other:?} (expected oauth|app)"
            ))),
        }
    }
}

/// `--auth-mode`, `GITHUB_AUTH_MODE`, then app when an app id is resolvable.
fn auth_mode(builder: &ContextBuilder<'_>) -> Result<AuthMode> {
    let explicit = builder
        .flags()
        .get("--auth-mode")
        .map(str::to_string)
        .or_else(|| si_runtime::resolver::env_value("GITHUB_AUTH_MODE"));
    if let Some(raw) = explicit {
        return AuthMode::parse(&raw);
    }
    let has_app = !builder
        .resolver()
        .field(&APP_ID, builder.flags().get(APP_ID.flag))
        .is_empty();
    Ok(if has_app { AuthMode::App } else { AuthMode::OAuth })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GitHub;

impl GitHub {
    fn is_app(ctx: &RuntimeContext) -> bool {
        matches!(ctx.credentials, Credentials::GitHubApp(_))
    }

    pub async fn list_repos(
        &self,
        ctx: &RuntimeContext,
        owner: Option<&str>,
        per_page: Option<u32>,
    ) -> Result<Response> {
        let owner = owner.or_else(|| ctx.id("owner")).unwrap_or_default();
        let path = if Self::is_app(ctx) {
            "/installation/repositories".to_string()
        } else if owner.is_empty() {
            "/user/repos".to_string()
        } else {
            format!("/users/{}/repos", segment(owner))
        };
        let mut request = Request::get(path);
        if let Some(per_page) = per_page {
            request = request.query("per_page", per_page.to_string());
        }
        self.send(ctx, &request).await
    }

    /// `repo` is `owner/name`, or a bare name under the context owner.
    pub async fn get_repo(&self, ctx: &RuntimeContext, repo: &str) -> Result<Response> {
        let (owner, name) = match repo.trim().split_once('/') {
            Some((owner, name)) => (owner.to_string(), name.to_string()),
            None => {
                let owner = ctx.id("owner").ok_or_else(|| {
                    RuntimeError::usage("github repo must be owner/name (or set --owner)")
                })?;
                (owner.to_string(), repo.trim().to_string())
            }
        };
        if owner.is_empty() || name.is_empty() {
            return Err(RuntimeError::usage(format!("invalid github repo {repo:?}")));
        }
        let path = format!("/repos/{}/{}", segment(&owner), segment(&name));
        self.send(ctx, &Request::get(path)).await
    }
}

impl Provider for GitHub {
    fn id(&self) -> ProviderId {
        ProviderId::Github
    }

    fn display_name(&self) -> &'static str {
        "GitHub"
    }

    fn context(&self, settings: &Settings, flags: &ContextFlags) -> Result<RuntimeContext> {
        let mut builder = ContextBuilder::new(settings, ProviderId::Github, flags)?;
        let owner = builder.id("owner", &OWNER).unwrap_or_default();
        let credentials = match auth_mode(&builder)? {
            AuthMode::OAuth => Credentials::Bearer(builder.require(&TOKEN)?),
            AuthMode::App => {
                let app_id = builder.require_id("app_id", &APP_ID)?;
                let private_key_pem = builder.require(&APP_KEY)?.replace("\\n", "\n");
                let installation_id = builder.id("installation_id", &INSTALLATION_ID).unwrap_or_default();
                Credentials::GitHubApp(GitHubAppCredentials {
                    app_id,
                    private_key_pem,
                    installation_id,
                    owner,
                })
            }
        };
        Ok(builder.finish(credentials))
    }

    fn normalizer(&self) -> &dyn ResponseNormalizer {
        &DefaultNormalizer(ProviderId::Github)
    }

    fn verify_request(&self, ctx: &RuntimeContext) -> Result<Request> {
        Ok(if Self::is_app(ctx) {
            Request::get("/installation/repositories").query("per_page", "1")
        } else {
            Request::get("/user")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubApi;
    use serde_json::json;
    use serial_test::serial;

    const GITHUB_VARS: [(&str, Option<&str>); 8] = [
        ("GITHUB_DEFAULT_ACCOUNT", None),
        ("GITHUB_AUTH_MODE", None),
        ("GITHUB_APP_ID", None),
        ("GITHUB_TOKEN", None),
        ("GH_TOKEN", None),
        ("GITHUB_PAT", None),
        ("GH_PAT", Some("ghp_from_pat_env_123")),
        ("GITHUB_DEFAULT_OWNER", Some("acme")),
    ];

    #[test]
    #[serial]
    fn test_oauth_mode_without_app_id() {
        temp_env::with_vars(GITHUB_VARS, || {
            let ctx = GitHub.context(&Settings::default(), &ContextFlags::new()).unwrap();
            assert!(matches!(ctx.credentials, Credentials::Bearer(ref t) if t == "ghp_from_pat_env_123"));
            assert_eq!(ctx.id("owner"), Some("acme"));
            assert_eq!(ctx.source, "env:GITHUB_DEFAULT_OWNER,env:GH_PAT");
        });
    }

    #[test]
    #[serial]
    fn test_app_mode_when_app_id_present() {
        temp_env::with_vars(GITHUB_VARS, || {
            let flags = ContextFlags::new()
                .with("--app-id", Some("12345"))
                .with("--app-key", Some("-----BEGIN KEY-----\\nabc\\n-----END KEY-----"))
                .with("--installation-id", Some("777"));
            let ctx = GitHub.context(&Settings::default(), &flags).unwrap();
            match &ctx.credentials {
                Credentials::GitHubApp(app) => {
                    assert_eq!(app.app_id, "12345");
                    assert_eq!(app.installation_id, "777");
                    assert_eq!(app.owner, "acme");
                    assert!(app.private_key_pem.contains("\nabc\n"));
                }
                other => panic!("unexpected credentials {other:?}"),
            }
            assert_eq!(GitHub.verify_request(&ctx).unwrap().path, "/installation/repositories");

            let forced = flags.clone().with("--auth-mode", Some("oauth"));
            let ctx = GitHub.context(&Settings::default(), &forced).unwrap();
            assert!(matches!(ctx.credentials, Credentials::Bearer(_)));
        });
    }

    #[test]
    fn test_invalid_auth_mode() {
        let flags = ContextFlags::new().with("--auth-mode", Some("ssh"));
        let err = GitHub.context(&Settings::default(), &flags).unwrap_err();
        assert!(err.is_usage());
    }

    #[tokio::test]
    async fn test_repo_paths() {
        let stub = StubApi::start(&[
            ("/users/acme/repos", 200, json!([{"name": "one"}, {"name": "two"}])),
            ("/repos/acme/one", 200, json!({"name": "one", "private": false})),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = stub.context(ProviderId::Github, dir.path());
        ctx.credentials = Credentials::Bearer("ghp_repo_paths".to_string());
        ctx.set_id("owner", "acme");

        let repos = GitHub.list_repos(&ctx, None, Some(50)).await.unwrap();
        assert_eq!(repos.list.len(), 2);
        assert_eq!(stub.last().query, "per_page=50");

        let repo = GitHub.get_repo(&ctx, "one").await.unwrap();
        assert_eq!(repo.data_str("name"), Some("one"));
        GitHub.get_repo(&ctx, "acme/one").await.unwrap();
        assert_eq!(stub.last().path, "/repos/acme/one");

        assert!(GitHub.get_repo(&ctx, "/").await.unwrap_err().is_usage());
    }
}

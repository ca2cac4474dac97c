//! Provider spec registry
//!
//! Static table of per-provider defaults: base URL, API version, headers,
//! public probe, auth style, cache TTL and concurrency limit.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Provider identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Cloudflare,
    Aws,
    Bedrock,
    Gcp,
    Gemini,
    Github,
    Workos,
    SocialFacebook,
    SocialInstagram,
    SocialX,
    SocialLinkedin,
    SocialReddit,
    GooglePlay,
    Youtube,
    #[serde(rename = "appstore")]
    AppStore,
}

impl ProviderId {
    pub const ALL: &'static [ProviderId] = &[
        ProviderId::Cloudflare,
        ProviderId::Aws,
        ProviderId::Bedrock,
        ProviderId::Gcp,
        ProviderId::Gemini,
        ProviderId::Github,
        ProviderId::Workos,
        ProviderId::SocialFacebook,
        ProviderId::SocialInstagram,
        ProviderId::SocialX,
        ProviderId::SocialLinkedin,
        ProviderId::SocialReddit,
        ProviderId::GooglePlay,
        ProviderId::Youtube,
        ProviderId::AppStore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloudflare => "cloudflare",
            Self::Aws => "aws",
            Self::Bedrock => "bedrock",
            Self::Gcp => "gcp",
            Self::Gemini => "gemini",
            Self::Github => "github",
            Self::Workos => "workos",
            Self::SocialFacebook => "social_facebook",
            Self::SocialInstagram => "social_instagram",
            Self::SocialX => "social_x",
            Self::SocialLinkedin => "social_linkedin",
            Self::SocialReddit => "social_reddit",
            Self::GooglePlay => "google_play",
            Self::Youtube => "youtube",
            Self::AppStore => "appstore",
        }
    }

    /// Parse an id or one of its aliases (`cf`, `twitter`, `google-play`, ...).
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_lowercase().replace('-', "_");
        Some(match key.as_str() {
            "cloudflare" | "cf" => Self::Cloudflare,
            "aws" | "aws_iam" | "aws_sts" | "aws_s3" => Self::Aws,
            "bedrock" | "aws_bedrock" => Self::Bedrock,
            "gcp" | "gcp_serviceusage" | "serviceusage" => Self::Gcp,
            "gemini" | "vertex" | "generativelanguage" => Self::Gemini,
            "github" | "gh" => Self::Github,
            "workos" => Self::Workos,
            "social_facebook" | "facebook" | "fb" => Self::SocialFacebook,
            "social_instagram" | "instagram" | "ig" => Self::SocialInstagram,
            "social_x" | "x" | "twitter" => Self::SocialX,
            "social_linkedin" | "linkedin" => Self::SocialLinkedin,
            "social_reddit" | "reddit" => Self::SocialReddit,
            "google_play" | "play" | "googleplay" => Self::GooglePlay,
            "youtube" | "yt" => Self::Youtube,
            "appstore" | "app_store" | "apple_appstore" => Self::AppStore,
            _ => return None,
        })
    }

    /// Prefix for provider-scoped env vars (`CLOUDFLARE_DEFAULT_ACCOUNT`, ...).
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Self::Cloudflare => "CLOUDFLARE",
            Self::Aws => "AWS",
            Self::Bedrock => "AWS",
            Self::Gcp => "GCP",
            Self::Gemini => "GEMINI",
            Self::Github => "GITHUB",
            Self::Workos => "WORKOS",
            Self::SocialFacebook => "FACEBOOK",
            Self::SocialInstagram => "INSTAGRAM",
            Self::SocialX => "X",
            Self::SocialLinkedin => "LINKEDIN",
            Self::SocialReddit => "REDDIT",
            Self::GooglePlay => "GOOGLE_PLAY",
            Self::Youtube => "YOUTUBE",
            Self::AppStore => "APPSTORE",
        }
    }

    /// Section of the settings document holding this provider's accounts.
    pub fn settings_section(&self) -> &'static str {
        match self {
            Self::Cloudflare => "cloudflare",
            Self::Aws => "aws",
            Self::Bedrock => "bedrock",
            Self::Gcp | Self::Gemini => "gcp",
            Self::Github => "github",
            Self::Workos => "workos",
            Self::SocialFacebook
            | Self::SocialInstagram
            | Self::SocialX
            | Self::SocialLinkedin
            | Self::SocialReddit => "social",
            Self::GooglePlay => "google_play",
            Self::Youtube => "youtube",
            Self::AppStore => "appstore",
        }
    }

    /// Name of the default JSONL log file under `~/.si/logs/`.
    pub fn log_name(&self) -> &'static str {
        match self {
            Self::Gcp => "gcp-serviceusage",
            Self::Gemini => "gcp-gemini",
            other => other.as_str(),
        }
    }

    pub fn spec(&self) -> &'static ProviderSpec {
        spec(*self)
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How credentials are attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthStyle {
    None,
    Bearer,
    /// `?access_token=<token>`
    Query,
    /// `?key=<api key>`
    ApiKey,
    Sigv4,
    AppInstallation,
    /// ES256 token minted per request (App Store Connect).
    Jwt,
}

impl AuthStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bearer => "bearer",
            Self::Query => "query",
            Self::ApiKey => "api-key",
            Self::Sigv4 => "sigv4",
            Self::AppInstallation => "app-installation",
            Self::Jwt => "jwt",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicProbe {
    pub method: &'static str,
    pub path: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderSpec {
    pub id: ProviderId,
    pub base_url: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub api_version: &'static str,
    pub accept: &'static str,
    pub user_agent: &'static str,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub default_headers: &'static [(&'static str, &'static str)],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_probe: Option<PublicProbe>,
    pub auth_style: AuthStyle,
    /// Header names consulted in order for the request id.
    pub request_id_headers: &'static [&'static str],
    #[serde(serialize_with = "serialize_secs")]
    pub cache_ttl: Duration,
    pub concurrency: usize,
}

fn serialize_secs<S: serde::Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(value.as_secs())
}

const USER_AGENT: &str = concat!("si/", env!("CARGO_PKG_VERSION"));

static SPECS: &[ProviderSpec] = &[
    ProviderSpec {
        id: ProviderId::Cloudflare,
        base_url: "https://api.cloudflare.com/client/v4",
        api_version: "v4",
        accept: "application/json",
        user_agent: USER_AGENT,
        default_headers: &[],
        public_probe: None,
        auth_style: AuthStyle::Bearer,
        request_id_headers: &["CF-Ray", "X-Request-Id"],
        cache_ttl: Duration::from_secs(10),
        concurrency: 8,
    },
    ProviderSpec {
        id: ProviderId::Aws,
        base_url: "https://iam.amazonaws.com",
        api_version: "2010-05-08",
        accept: "application/json",
        user_agent: USER_AGENT,
        default_headers: &[],
        public_probe: None,
        auth_style: AuthStyle::Sigv4,
        request_id_headers: &["x-amzn-RequestId", "x-amz-request-id", "x-amz-id-2"],
        cache_ttl: Duration::ZERO,
        concurrency: 8,
    },
    ProviderSpec {
        id: ProviderId::Bedrock,
        base_url: "https://bedrock-runtime.us-east-1.amazonaws.com",
        api_version: "",
        accept: "application/json",
        user_agent: USER_AGENT,
        default_headers: &[],
        public_probe: None,
        auth_style: AuthStyle::Sigv4,
        request_id_headers: &["x-amzn-RequestId"],
        cache_ttl: Duration::ZERO,
        concurrency: 4,
    },
    ProviderSpec {
        id: ProviderId::Gcp,
        base_url: "https://serviceusage.googleapis.com",
        api_version: "v1",
        accept: "application/json",
        user_agent: USER_AGENT,
        default_headers: &[],
        public_probe: None,
        auth_style: AuthStyle::Bearer,
        request_id_headers: &["X-Request-Id", "X-Google-Request-Id", "X-Goog-Request-Id"],
        cache_ttl: Duration::from_secs(10),
        concurrency: 8,
    },
    ProviderSpec {
        id: ProviderId::Gemini,
        base_url: "https://generativelanguage.googleapis.com",
        api_version: "v1beta",
        accept: "application/json",
        user_agent: USER_AGENT,
        default_headers: &[],
        public_probe: None,
        auth_style: AuthStyle::ApiKey,
        request_id_headers: &["X-Request-Id", "X-Google-Request-Id"],
        cache_ttl: Duration::ZERO,
        concurrency: 4,
    },
    ProviderSpec {
        id: ProviderId::Github,
        base_url: "https://api.github.com",
        api_version: "2022-11-28",
        accept: "application/vnd.github+json",
        user_agent: USER_AGENT,
        default_headers: &[("X-GitHub-Api-Version", "2022-11-28")],
        public_probe: Some(PublicProbe {
            method: "GET",
            path: "/meta",
        }),
        auth_style: AuthStyle::Bearer,
        request_id_headers: &["X-GitHub-Request-Id", "X-Request-Id"],
        cache_ttl: Duration::from_secs(15),
        concurrency: 8,
    },
    ProviderSpec {
        id: ProviderId::Workos,
        base_url: "https://api.workos.com",
        api_version: "",
        accept: "application/json",
        user_agent: USER_AGENT,
        default_headers: &[],
        public_probe: None,
        auth_style: AuthStyle::Bearer,
        request_id_headers: &["X-Request-Id"],
        cache_ttl: Duration::ZERO,
        concurrency: 8,
    },
    ProviderSpec {
        id: ProviderId::SocialFacebook,
        base_url: "https://graph.facebook.com",
        api_version: "v22.0",
        accept: "application/json",
        user_agent: USER_AGENT,
        default_headers: &[],
        public_probe: None,
        auth_style: AuthStyle::Query,
        request_id_headers: &["x-fb-trace-id", "x-fb-rev"],
        cache_ttl: Duration::ZERO,
        concurrency: 4,
    },
    ProviderSpec {
        id: ProviderId::SocialInstagram,
        base_url: "https://graph.facebook.com",
        api_version: "v22.0",
        accept: "application/json",
        user_agent: USER_AGENT,
        default_headers: &[],
        public_probe: None,
        auth_style: AuthStyle::Query,
        request_id_headers: &["x-fb-trace-id", "x-fb-rev"],
        cache_ttl: Duration::ZERO,
        concurrency: 4,
    },
    ProviderSpec {
        id: ProviderId::SocialX,
        base_url: "https://api.twitter.com",
        api_version: "2",
        accept: "application/json",
        user_agent: USER_AGENT,
        default_headers: &[],
        public_probe: None,
        auth_style: AuthStyle::Bearer,
        request_id_headers: &["x-transaction-id"],
        cache_ttl: Duration::ZERO,
        concurrency: 2,
    },
    ProviderSpec {
        id: ProviderId::SocialLinkedin,
        base_url: "https://api.linkedin.com",
        api_version: "v2",
        accept: "application/json",
        user_agent: USER_AGENT,
        default_headers: &[("X-Restli-Protocol-Version", "2.0.0")],
        public_probe: None,
        auth_style: AuthStyle::Bearer,
        request_id_headers: &["x-li-uuid", "x-restli-id"],
        cache_ttl: Duration::ZERO,
        concurrency: 4,
    },
    ProviderSpec {
        id: ProviderId::SocialReddit,
        base_url: "https://oauth.reddit.com",
        api_version: "",
        accept: "application/json",
        user_agent: USER_AGENT,
        default_headers: &[],
        public_probe: Some(PublicProbe {
            method: "GET",
            path: "/api/v1/scopes",
        }),
        auth_style: AuthStyle::Bearer,
        request_id_headers: &["x-request-id"],
        cache_ttl: Duration::ZERO,
        concurrency: 2,
    },
    ProviderSpec {
        id: ProviderId::GooglePlay,
        base_url: "https://androidpublisher.googleapis.com",
        api_version: "v3",
        accept: "application/json",
        user_agent: USER_AGENT,
        default_headers: &[],
        public_probe: None,
        auth_style: AuthStyle::Bearer,
        request_id_headers: &["X-Request-Id", "X-Google-Request-Id"],
        cache_ttl: Duration::ZERO,
        concurrency: 4,
    },
    ProviderSpec {
        id: ProviderId::Youtube,
        base_url: "https://www.googleapis.com",
        api_version: "v3",
        accept: "application/json",
        user_agent: USER_AGENT,
        default_headers: &[],
        public_probe: None,
        auth_style: AuthStyle::ApiKey,
        request_id_headers: &["X-Request-Id", "X-Google-Request-Id"],
        cache_ttl: Duration::from_secs(10),
        concurrency: 4,
    },
    ProviderSpec {
        id: ProviderId::AppStore,
        base_url: "https://api.appstoreconnect.apple.com",
        api_version: "v1",
        accept: "application/json",
        user_agent: USER_AGENT,
        default_headers: &[],
        public_probe: None,
        auth_style: AuthStyle::Jwt,
        request_id_headers: &["x-request-id", "x-apple-request-uuid"],
        cache_ttl: Duration::ZERO,
        concurrency: 4,
    },
];

/// Spec for `id`.
pub fn spec(id: ProviderId) -> &'static ProviderSpec {
    // Every id has exactly one row; fall back to the first row otherwise.
    SPECS.iter().find(|s| s.id == id).unwrap_or(&SPECS[0])
}

/// All specs, in registry order.
pub fn specs() -> &'static [ProviderSpec] {
    SPECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_provider_has_a_spec() {
        for id in ProviderId::ALL {
            let spec = spec(*id);
            assert_eq!(spec.id, *id, "missing spec row for {id}");
            assert!(spec.base_url.starts_with("https://"));
            assert!(!spec.user_agent.is_empty());
            assert!(spec.concurrency > 0);
        }
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(ProviderId::parse("twitter"), Some(ProviderId::SocialX));
        assert_eq!(ProviderId::parse("google-play"), Some(ProviderId::GooglePlay));
        assert_eq!(ProviderId::parse("CF"), Some(ProviderId::Cloudflare));
        assert_eq!(ProviderId::parse("nope"), None);
    }

    #[test]
    fn test_roundtrip_names() {
        for id in ProviderId::ALL {
            assert_eq!(ProviderId::parse(id.as_str()), Some(*id));
        }
    }

    #[test]
    fn test_public_probe_never_needs_auth() {
        let probe = spec(ProviderId::Github).public_probe.as_ref().unwrap();
        assert_eq!(probe.method, "GET");
        assert_eq!(probe.path, "/meta");
    }
}

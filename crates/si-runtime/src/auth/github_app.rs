//! GitHub App installation tokens
//!
//! A short-lived RS256 app JWT is exchanged for an installation token, which
//! is cached in-process until shortly before it expires.

use crate::context::GitHubAppCredentials;
use crate::error::{Result, RuntimeError};
use crate::request::{normalize_error, request_id_from, resolve_url};
use crate::spec::ProviderId;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

/// Tokens are refreshed this long before `expires_at`.
pub const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

static TOKEN_CACHE: LazyLock<Mutex<HashMap<String, CachedToken>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Installation {
    id: u64,
    #[serde(default)]
    account: Option<InstallationAccount>,
}

#[derive(Debug, Deserialize)]
struct InstallationAccount {
    #[serde(default)]
    login: String,
}

/// RS256 app JWT: `iat = now - 60s`, `exp = now + 8min`, `iss = app_id`.
pub fn app_jwt(app_id: &str, private_key_pem: &str, now: DateTime<Utc>) -> Result<String> {
    let app_id = app_id.trim();
    if app_id.is_empty() {
        return Err(RuntimeError::Signing("github app id is required".to_string()));
    }
    let key = EncodingKey::from_rsa_pem(normalize_pem(private_key_pem).as_bytes())
        .map_err(|e| RuntimeError::Signing(format!("invalid github app private key: {e}")))?;
    let claims = AppClaims {
        iat: (now - ChronoDuration::seconds(60)).timestamp(),
        exp: (now + ChronoDuration::minutes(8)).timestamp(),
        iss: app_id.to_string(),
    };
    encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| RuntimeError::Signing(e.to_string()))
}

/// Private keys stored in env vars often carry literal `\n` sequences.
pub(crate) fn normalize_pem(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains("\\n") && !trimmed.contains('\n') {
        trimmed.replace("\\n", "\n")
    } else {
        trimmed.to_string()
    }
}

fn cache_key(base_url: &str, app_id: &str, installation_id: &str) -> String {
    format!("{}|{}|{}", base_url.trim_end_matches('/'), app_id.trim(), installation_id.trim())
}

fn cached(key: &str, now: DateTime<Utc>) -> Option<String> {
    let cache = TOKEN_CACHE.lock().unwrap_or_else(|e| e.into_inner());
    let entry = cache.get(key)?;
    (entry.expires_at - ChronoDuration::seconds(REFRESH_MARGIN_SECS) > now).then(|| entry.token.clone())
}

async fn send(
    client: &reqwest::Client,
    method: reqwest::Method,
    url: url::Url,
    jwt: &str,
) -> Result<String> {
    let spec = ProviderId::Github.spec();
    let response = client
        .request(method, url)
        .bearer_auth(jwt)
        .header(reqwest::header::ACCEPT, spec.accept)
        .header(reqwest::header::USER_AGENT, spec.user_agent)
        .send()
        .await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await?;
    if !status.is_success() {
        let request_id = request_id_from(&headers, spec.request_id_headers);
        return Err(normalize_error(ProviderId::Github, status, request_id, &body).into());
    }
    Ok(body)
}

/// Find the installation whose account login equals `owner`.
pub async fn discover_installation(
    client: &reqwest::Client,
    base_url: &str,
    jwt: &str,
    owner: &str,
) -> Result<String> {
    let owner = owner.trim();
    if owner.is_empty() {
        return Err(RuntimeError::MissingCredential {
            what: "github app installation id".to_string(),
            tried: vec![
                "--installation-id".to_string(),
                "GITHUB_INSTALLATION_ID".to_string(),
                "--owner".to_string(),
            ],
        });
    }
    let url = resolve_url(base_url, "/app/installations", &[("per_page".to_string(), "100".to_string())])?;
    let body = send(client, reqwest::Method::GET, url, jwt).await?;
    let installations: Vec<Installation> = serde_json::from_str(&body)?;
    installations
        .into_iter()
        .find(|inst| {
            inst.account
                .as_ref()
                .is_some_and(|acct| acct.login.eq_ignore_ascii_case(owner))
        })
        .map(|inst| inst.id.to_string())
        .ok_or_else(|| RuntimeError::usage(format!("no github app installation found for owner {owner:?}")))
}

/// Installation token for `creds`, minted or served from the cache.
pub async fn installation_token(
    client: &reqwest::Client,
    base_url: &str,
    creds: &GitHubAppCredentials,
) -> Result<String> {
    let now = Utc::now();
    let jwt = app_jwt(&creds.app_id, &creds.private_key_pem, now)?;
    let installation_id = match creds.installation_id.trim() {
        "" => discover_installation(client, base_url, &jwt, &creds.owner).await?,
        id => id.to_string(),
    };
    let key = cache_key(base_url, &creds.app_id, &installation_id);
    if let Some(token) = cached(&key, now) {
        tracing::debug!(installation_id = installation_id.as_str(), "github installation token cache hit");
        return Ok(token);
    }

    let path = format!("/app/installations/{installation_id}/access_tokens");
    let url = resolve_url(base_url, &path, &[])?;
    let body = send(client, reqwest::Method::POST, url, &jwt).await?;
    let parsed: AccessTokenResponse = serde_json::from_str(&body)?;
    if parsed.token.trim().is_empty() {
        return Err(RuntimeError::Decode("github installation token response had no token".to_string()));
    }
    let expires_at = parsed.expires_at.unwrap_or(now + ChronoDuration::minutes(55));
    TOKEN_CACHE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(
            key,
            CachedToken {
                token: parsed.token.clone(),
                expires_at,
            },
        );
    tracing::debug!(installation_id = installation_id.as_str(), "minted github installation token");
    Ok(parsed.token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PRIVATE_KEY: &str = include_str!("../../tests/fixtures/github_app_test_key.pem");
    const PUBLIC_KEY: &str = include_str!("../../tests/fixtures/github_app_test_key.pub.pem");

    #[test]
    fn test_app_jwt_claims() {
        let now = Utc::now();
        let jwt = app_jwt("12345", PRIVATE_KEY, now).unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp", "iss"]);
        let decoded = decode::<AppClaims>(
            &jwt,
            &DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();
        assert_eq!(decoded.claims.iss, "12345");
        assert_eq!(decoded.claims.iat, now.timestamp() - 60);
        assert_eq!(decoded.claims.exp, now.timestamp() + 480);
    }

    #[test]
    fn test_escaped_newlines_in_pem() {
        let escaped = PRIVATE_KEY.trim().replace('\n', "\\n");
        assert!(app_jwt("1", &escaped, Utc::now()).is_ok());
        assert!(matches!(
            app_jwt("1", "not a key", Utc::now()),
            Err(RuntimeError::Signing(_))
        ));
    }

    async fn spawn_github(mints: Arc<AtomicUsize>) -> String {
        let app = Router::new()
            .route(
                "/app/installations",
                get(|| async {
                    Json(serde_json::json!([
                        {"id": 7, "account": {"login": "other"}},
                        {"id": 42, "account": {"login": "Acme"}}
                    ]))
                }),
            )
            .route(
                "/app/installations/{id}/access_tokens",
                post(
                    |State(mints): State<Arc<AtomicUsize>>,
                     axum::extract::Path(id): axum::extract::Path<String>| async move {
                        let n = mints.fetch_add(1, Ordering::SeqCst);
                        let expires = (Utc::now() + ChronoDuration::minutes(30)).to_rfc3339();
                        Json(serde_json::json!({"token": format!("ghs_{id}_{n}"), "expires_at": expires}))
                    },
                ),
            )
            .with_state(mints);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_installation_token_discovery_and_cache() {
        let mints = Arc::new(AtomicUsize::new(0));
        let base = spawn_github(mints.clone()).await;
        let client = reqwest::Client::new();
        let creds = GitHubAppCredentials {
            app_id: "99".to_string(),
            private_key_pem: PRIVATE_KEY.to_string(),
            installation_id: String::new(),
            owner: "acme".to_string(),
        };
        let first = installation_token(&client, &base, &creds).await.unwrap();
        assert_eq!(first, "ghs_42_0");
        let second = installation_token(&client, &base, &creds).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(mints.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_owner_fails() {
        let base = spawn_github(Arc::new(AtomicUsize::new(0))).await;
        let creds = GitHubAppCredentials {
            app_id: "99".to_string(),
            private_key_pem: PRIVATE_KEY.to_string(),
            installation_id: String::new(),
            owner: "nobody".to_string(),
        };
        let err = installation_token(&reqwest::Client::new(), &base, &creds)
            .await
            .unwrap_err();
        assert!(err.is_usage());
    }
}

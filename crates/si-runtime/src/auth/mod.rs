//! Attaching credentials to outgoing requests

pub mod github_app;
pub mod sigv4;

use crate::context::{AppStoreCredentials, Credentials};
use crate::error::{Result, RuntimeError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::{Deserialize, Serialize};

/// Claims of an App Store Connect API token.
#[derive(Debug, Serialize, Deserialize)]
pub struct AppStoreClaims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub aud: String,
}

/// ES256 token for App Store Connect, valid for 20 minutes.
pub fn app_store_jwt(creds: &AppStoreCredentials, now: DateTime<Utc>) -> Result<String> {
    if creds.issuer_id.trim().is_empty() || creds.key_id.trim().is_empty() {
        return Err(RuntimeError::Signing(
            "app store issuer id and key id are required".to_string(),
        ));
    }
    let key = EncodingKey::from_ec_pem(github_app::normalize_pem(&creds.private_key_pem).as_bytes())
        .map_err(|e| RuntimeError::Signing(format!("invalid app store private key: {e}")))?;
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(creds.key_id.trim().to_string());
    header.typ = Some("JWT".to_string());
    let claims = AppStoreClaims {
        iss: creds.issuer_id.trim().to_string(),
        iat: now.timestamp(),
        exp: (now + ChronoDuration::minutes(20)).timestamp(),
        aud: "appstoreconnect-v1".to_string(),
    };
    encode(&header, &claims, &key).map_err(|e| RuntimeError::Signing(e.to_string()))
}

fn bearer(request: &mut reqwest::Request, token: &str) -> Result<()> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
        .map_err(|e| RuntimeError::Signing(e.to_string()))?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

fn append_query(request: &mut reqwest::Request, param: &str, value: &str) {
    let param = param.trim();
    let url = request.url_mut();
    let existing: Vec<(String, String)> = url
        .query_pairs()
        .into_owned()
        .filter(|(k, _)| k != param)
        .collect();
    url.set_query(None);
    url.query_pairs_mut()
        .extend_pairs(existing)
        .append_pair(param, value.trim());
}

/// Apply `credentials` to a fully built request. Runs last so SigV4 signs the
/// final headers and body.
pub async fn apply(
    credentials: &Credentials,
    client: &reqwest::Client,
    base_url: &str,
    request: &mut reqwest::Request,
) -> Result<()> {
    match credentials {
        Credentials::None => Ok(()),
        Credentials::Bearer(token) => bearer(request, token),
        Credentials::Query { param, token } => {
            append_query(request, param, token);
            Ok(())
        }
        Credentials::ApiKey { param, key } => {
            append_query(request, param, key);
            Ok(())
        }
        Credentials::Aws(aws) => sigv4::sign_request(aws, request),
        Credentials::GitHubApp(app) => {
            let token = github_app::installation_token(client, base_url, app).await?;
            bearer(request, &token)
        }
        Credentials::AppStore(asc) => {
            let token = app_store_jwt(asc, Utc::now())?;
            bearer(request, &token)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    const EC_KEY: &str = include_str!("../../tests/fixtures/appstore_test_key.p8");
    const EC_PUB: &str = include_str!("../../tests/fixtures/appstore_test_key.pub.pem");

    fn request(url: &str) -> reqwest::Request {
        reqwest::Request::new(reqwest::Method::GET, url::Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_bearer_and_query_styles() {
        let client = reqwest::Client::new();
        let mut req = request("https://api.workos.com/organizations");
        apply(&Credentials::Bearer("tok".into()), &client, "", &mut req).await.unwrap();
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer tok");

        let mut req = request("https://graph.facebook.com/v22.0/me?fields=id");
        let creds = Credentials::Query {
            param: "access_token".into(),
            token: "EAAB".into(),
        };
        apply(&creds, &client, "", &mut req).await.unwrap();
        assert_eq!(req.url().query(), Some("fields=id&access_token=EAAB"));
        assert!(req.headers().get(AUTHORIZATION).is_none());

        let mut req = request("https://www.googleapis.com/youtube/v3/channels?part=id&key=old");
        let creds = Credentials::ApiKey {
            param: "key".into(),
            key: "AIza".into(),
        };
        apply(&creds, &client, "", &mut req).await.unwrap();
        assert_eq!(req.url().query(), Some("part=id&key=AIza"));
    }

    #[tokio::test]
    async fn test_none_adds_nothing() {
        let mut req = request("https://api.github.com/meta");
        apply(&Credentials::None, &reqwest::Client::new(), "", &mut req)
            .await
            .unwrap();
        assert!(req.headers().is_empty());
        assert_eq!(req.url().query(), None);
    }

    #[test]
    fn test_app_store_jwt() {
        let creds = AppStoreCredentials {
            issuer_id: "issuer-1".into(),
            key_id: "KEY123".into(),
            private_key_pem: EC_KEY.into(),
        };
        let now = Utc::now();
        let token = app_store_jwt(&creds, now).unwrap();
        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("KEY123"));
        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_audience(&["appstoreconnect-v1"]);
        let data = decode::<AppStoreClaims>(
            &token,
            &DecodingKey::from_ec_pem(EC_PUB.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();
        assert_eq!(data.claims.iss, "issuer-1");
        assert_eq!(data.claims.exp - data.claims.iat, 1200);
    }
}

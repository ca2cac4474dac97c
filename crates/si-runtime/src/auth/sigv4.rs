//! AWS Signature Version 4

use crate::context::AwsCredentials;
use crate::error::{Result, RuntimeError};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use sha2::{Digest, Sha256};
use url::Url;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// RFC 3986 unreserved characters stay literal; everything else is encoded.
const AWS_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| RuntimeError::Signing(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn aws_encode(value: &str) -> String {
    utf8_percent_encode(value, AWS_ENCODE).to_string()
}

pub fn canonical_uri(url: &Url) -> String {
    let path = url.path().trim();
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Sorted by key, then by value within a key.
pub fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (aws_encode(&k), aws_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date)?;
    let k_region = hmac_sha256(&k_date, region)?;
    let k_service = hmac_sha256(&k_region, service)?;
    hmac_sha256(&k_service, "aws4_request")
}

/// Canonical request, string to sign and resulting headers for one request.
#[derive(Debug, Clone)]
pub struct Signature {
    pub canonical_request: String,
    pub string_to_sign: String,
    pub authorization: String,
    pub amz_date: String,
    pub payload_hash: String,
}

/// Compute the signature without touching any request.
pub fn compute(
    creds: &AwsCredentials,
    method: &str,
    url: &Url,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<Signature> {
    let access_key = creds.access_key_id.trim();
    let secret_key = creds.secret_access_key.trim();
    if access_key.is_empty() || secret_key.is_empty() {
        return Err(RuntimeError::Signing(
            "aws access key and secret key are required for signing".to_string(),
        ));
    }
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host.to_ascii_lowercase(), port),
        (Some(host), None) => host.to_ascii_lowercase(),
        (None, _) => {
            return Err(RuntimeError::Signing(
                "request host is required for aws signing".to_string(),
            ));
        }
    };
    let region = match creds.region.trim() {
        "" => "us-east-1",
        r => r,
    };
    let service = match creds.service.trim() {
        "" => "iam".to_string(),
        s => s.to_ascii_lowercase(),
    };

    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let payload_hash = sha256_hex(body);
    let session_token = creds.session_token.trim();

    let mut headers: Vec<(&str, String)> = vec![
        ("host", host),
        ("x-amz-content-sha256", payload_hash.clone()),
        ("x-amz-date", amz_date.clone()),
    ];
    if !session_token.is_empty() {
        headers.push(("x-amz-security-token", session_token.to_string()));
    }
    headers.sort_by(|a, b| a.0.cmp(b.0));

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, canonical_header_value(value)))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = [
        method.trim().to_ascii_uppercase(),
        canonical_uri(url),
        canonical_query(url),
        canonical_headers,
        signed_headers.clone(),
        payload_hash.clone(),
    ]
    .join("\n");

    let scope = format!("{date_stamp}/{region}/{service}/aws4_request");
    let string_to_sign = [
        ALGORITHM.to_string(),
        amz_date.clone(),
        scope.clone(),
        sha256_hex(canonical_request.as_bytes()),
    ]
    .join("\n");

    let key = signing_key(secret_key, &date_stamp, region, &service)?;
    let signature = hex::encode(hmac_sha256(&key, &string_to_sign)?);
    let authorization = format!(
        "{ALGORITHM} Credential={access_key}/{scope}, SignedHeaders={signed_headers}, Signature={signature}"
    );

    Ok(Signature {
        canonical_request,
        string_to_sign,
        authorization,
        amz_date,
        payload_hash,
    })
}

/// Sign `request` in place using the current time.
pub fn sign_request(creds: &AwsCredentials, request: &mut reqwest::Request) -> Result<()> {
    sign_request_at(creds, request, Utc::now())
}

pub fn sign_request_at(
    creds: &AwsCredentials,
    request: &mut reqwest::Request,
    now: DateTime<Utc>,
) -> Result<()> {
    let body = request
        .body()
        .and_then(|b| b.as_bytes())
        .map(<[u8]>::to_vec)
        .unwrap_or_default();
    let sig = compute(creds, request.method().as_str(), request.url(), &body, now)?;
    let headers: &mut HeaderMap = request.headers_mut();
    set_header(headers, "x-amz-date", &sig.amz_date)?;
    set_header(headers, "x-amz-content-sha256", &sig.payload_hash)?;
    if !creds.session_token.trim().is_empty() {
        set_header(headers, "x-amz-security-token", creds.session_token.trim())?;
    }
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&sig.authorization).map_err(|e| RuntimeError::Signing(e.to_string()))?,
    );
    Ok(())
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value).map_err(|e| RuntimeError::Signing(e.to_string()))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn creds(session_token: &str) -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: session_token.to_string(),
            region: "us-east-1".to_string(),
            service: "iam".to_string(),
        }
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap()
    }

    #[test]
    fn test_signature_is_deterministic() {
        let url = Url::parse("https://iam.amazonaws.com/?Version=2010-05-08&Action=ListUsers").unwrap();
        let a = compute(&creds(""), "GET", &url, b"", fixed_time()).unwrap();
        let b = compute(&creds(""), "GET", &url, b"", fixed_time()).unwrap();
        assert_eq!(a.authorization, b.authorization);
        assert!(a.authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/iam/aws4_request, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature="
        ));
    }

    #[test]
    fn test_canonical_request_layout() {
        let url = Url::parse("https://iam.amazonaws.com/?Version=2010-05-08&Action=ListUsers").unwrap();
        let sig = compute(&creds(""), "get", &url, b"", fixed_time()).unwrap();
        let empty_hash = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let expected = format!(
            "GET\n/\nAction=ListUsers&Version=2010-05-08\nhost:iam.amazonaws.com\nx-amz-content-sha256:{empty_hash}\nx-amz-date:20150830T123600Z\n\nhost;x-amz-content-sha256;x-amz-date\n{empty_hash}"
        );
        assert_eq!(sig.canonical_request, expected);
        assert!(sig.string_to_sign.starts_with(
            "AWS4-HMAC-SHA256\n20150830T123600Z\n20150830/us-east-1/iam/aws4_request\n"
        ));
    }

    #[test]
    fn test_session_token_is_signed_only_when_present() {
        let url = Url::parse("https://sts.amazonaws.com/").unwrap();
        let with = compute(&creds("tok"), "POST", &url, b"Action=GetCallerIdentity", fixed_time()).unwrap();
        assert!(with.authorization.contains("x-amz-date;x-amz-security-token"));
        let without = compute(&creds(""), "POST", &url, b"Action=GetCallerIdentity", fixed_time()).unwrap();
        assert!(!without.authorization.contains("x-amz-security-token"));
        assert_ne!(with.authorization, without.authorization);
    }

    #[test]
    fn test_query_encoding() {
        let url = Url::parse("https://s3.amazonaws.com/?b=two%20words&a=x*y&a=a~b&c=1%2B1").unwrap();
        assert_eq!(canonical_query(&url), "a=a~b&a=x%2Ay&b=two%20words&c=1%2B1");
    }

    #[test]
    fn test_signing_key_matches_aws_example() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_missing_keys_fail() {
        let url = Url::parse("https://iam.amazonaws.com/").unwrap();
        let mut c = creds("");
        c.secret_access_key.clear();
        assert!(matches!(
            compute(&c, "GET", &url, b"", fixed_time()),
            Err(RuntimeError::Signing(_))
        ));
    }

    #[test]
    fn test_sign_request_sets_headers() {
        let url = Url::parse("https://iam.amazonaws.com/").unwrap();
        let mut req = reqwest::Request::new(reqwest::Method::POST, url);
        *req.body_mut() = Some(reqwest::Body::from("Action=ListUsers"));
        sign_request_at(&creds("tok"), &mut req, fixed_time()).unwrap();
        let headers = req.headers();
        assert_eq!(headers["x-amz-date"], "20150830T123600Z");
        assert_eq!(headers["x-amz-security-token"], "tok");
        assert_eq!(headers["x-amz-content-sha256"], sha256_hex(b"Action=ListUsers"));
        assert!(headers[AUTHORIZATION].to_str().unwrap().starts_with(ALGORITHM));
    }
}

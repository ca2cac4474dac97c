//! age encryption of single values
//!
//! Values are stored as `encrypted:si:v2:<base64url>` where the payload is the
//! age binary with its constant `age-encryption.org/v1\n-> X25519 ` prefix cut
//! off. `v1` (full binary) and the compact `es2:` prefix are still read.

use crate::error::{Result, VaultError};
use age::secrecy::ExposeSecret;
use age::x25519;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use std::io::{Read, Write};
use std::str::FromStr;

pub const PREFIX_V1: &str = "encrypted:si:v1:";
pub const PREFIX_V2: &str = "encrypted:si:v2:";
pub const PREFIX_V2_COMPACT: &str = "es2:";

const AGE_MAGIC_LINE: &str = "age-encryption.org/v1\n";
const AGE_X25519_STANZA: &str = "-> X25519 ";
const AGE_MAC_LINE: &str = "\n--- ";

fn compact_prefix() -> Vec<u8> {
    format!("{AGE_MAGIC_LINE}{AGE_X25519_STANZA}").into_bytes()
}

pub fn is_encrypted(value: &str) -> bool {
    let value = value.trim();
    value.starts_with(PREFIX_V1) || value.starts_with(PREFIX_V2) || value.starts_with(PREFIX_V2_COMPACT)
}

pub fn parse_recipient(raw: &str) -> Result<x25519::Recipient> {
    x25519::Recipient::from_str(raw.trim())
        .map_err(|e| VaultError::Encrypt(format!("invalid recipient {:?}: {e}", raw.trim())))
}

pub fn parse_identity(raw: &str) -> Result<x25519::Identity> {
    x25519::Identity::from_str(raw.trim()).map_err(|e| VaultError::InvalidIdentity(e.to_string()))
}

/// `AGE-SECRET-KEY-1...` text of an identity.
pub fn identity_secret(identity: &x25519::Identity) -> String {
    identity.to_string().expose_secret().to_string()
}

/// Encrypt `plaintext` to every recipient.
pub fn encrypt_value(plaintext: &str, recipients: &[x25519::Recipient]) -> Result<String> {
    if recipients.is_empty() {
        return Err(VaultError::Encrypt("no recipients configured".to_string()));
    }
    let encryptor = age::Encryptor::with_recipients(recipients.iter().map(|r| r as &dyn age::Recipient))
        .map_err(|e| VaultError::Encrypt(e.to_string()))?;
    let mut raw = Vec::new();
    let mut writer = encryptor
        .wrap_output(&mut raw)
        .map_err(|e| VaultError::Encrypt(e.to_string()))?;
    writer.write_all(plaintext.as_bytes())?;
    writer.finish()?;

    let prefix = compact_prefix();
    match raw.strip_prefix(prefix.as_slice()) {
        Some(body) => Ok(format!("{PREFIX_V2}{}", URL_SAFE_NO_PAD.encode(body))),
        None => Ok(format!("{PREFIX_V1}{}", URL_SAFE_NO_PAD.encode(&raw))),
    }
}

fn decode_any(payload: &str) -> Result<Vec<u8>> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(VaultError::Decrypt("invalid ciphertext payload: empty".to_string()));
    }
    let mut last = None;
    for engine in [&URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD_NO_PAD, &STANDARD] {
        match engine.decode(payload) {
            Ok(raw) => return Ok(raw),
            Err(err) => last = Some(err),
        }
    }
    Err(VaultError::Decrypt(format!(
        "invalid ciphertext payload: {}",
        last.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Full age binary behind any accepted prefix.
pub fn ciphertext_bytes(ciphertext: &str) -> Result<Vec<u8>> {
    let ciphertext = ciphertext.trim();
    let compact = ciphertext
        .strip_prefix(PREFIX_V2)
        .or_else(|| ciphertext.strip_prefix(PREFIX_V2_COMPACT));
    if let Some(payload) = compact {
        let mut out = compact_prefix();
        out.extend(decode_any(payload)?);
        return Ok(out);
    }
    if let Some(payload) = ciphertext.strip_prefix(PREFIX_V1) {
        return decode_any(payload);
    }
    Err(VaultError::Decrypt(format!(
        "value is not {PREFIX_V2}, {PREFIX_V2_COMPACT}, or {PREFIX_V1} ciphertext"
    )))
}

/// Structural check without decrypting.
pub fn validate_ciphertext(ciphertext: &str) -> Result<()> {
    let raw = ciphertext_bytes(ciphertext)?;
    if !raw.starts_with(AGE_MAGIC_LINE.as_bytes()) {
        return Err(VaultError::Decrypt("invalid ciphertext payload: not age format".to_string()));
    }
    if !raw.windows(AGE_MAC_LINE.len()).any(|w| w == AGE_MAC_LINE.as_bytes()) {
        return Err(VaultError::Decrypt(
            "invalid ciphertext payload: missing age MAC stanza".to_string(),
        ));
    }
    Ok(())
}

/// Decrypt with the first identity that matches.
pub fn decrypt_value(ciphertext: &str, identities: &[x25519::Identity]) -> Result<String> {
    if identities.is_empty() {
        return Err(VaultError::IdentityMissing);
    }
    let raw = ciphertext_bytes(ciphertext)?;
    let decryptor = age::Decryptor::new(raw.as_slice()).map_err(|e| VaultError::Decrypt(e.to_string()))?;
    let mut reader = decryptor
        .decrypt(identities.iter().map(|i| i as &dyn age::Identity))
        .map_err(|e| VaultError::Decrypt(e.to_string()))?;
    let mut plain = Vec::new();
    reader.read_to_end(&mut plain)?;
    String::from_utf8(plain).map_err(|_| VaultError::Decrypt("plaintext is not UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let identity = x25519::Identity::generate();
        let recipients = vec![identity.to_public()];
        for plain in ["", "vault-secret-value", "multi\nline ✓ ünïcode", " padded "] {
            let ct = encrypt_value(plain, &recipients).unwrap();
            assert!(ct.starts_with(PREFIX_V2) || ct.starts_with(PREFIX_V1), "{ct}");
            assert!(is_encrypted(&ct));
            validate_ciphertext(&ct).unwrap();
            assert_eq!(decrypt_value(&ct, std::slice::from_ref(&identity)).unwrap(), plain);
        }
    }

    #[test]
    fn test_legacy_prefixes_decrypt() {
        let identity = x25519::Identity::generate();
        let ct = encrypt_value("legacy", &[identity.to_public()]).unwrap();
        let full = ciphertext_bytes(&ct).unwrap();

        let v1 = format!("{PREFIX_V1}{}", URL_SAFE_NO_PAD.encode(&full));
        assert_eq!(decrypt_value(&v1, std::slice::from_ref(&identity)).unwrap(), "legacy");

        if let Some(body) = full.strip_prefix(compact_prefix().as_slice()) {
            let es2 = format!("{PREFIX_V2_COMPACT}{}", STANDARD.encode(body));
            assert_eq!(decrypt_value(&es2, std::slice::from_ref(&identity)).unwrap(), "legacy");
        }
    }

    #[test]
    fn test_wrong_identity_fails() {
        let identity = x25519::Identity::generate();
        let other = x25519::Identity::generate();
        let ct = encrypt_value("secret", &[identity.to_public()]).unwrap();
        assert!(matches!(decrypt_value(&ct, &[other.clone()]), Err(VaultError::Decrypt(_))));
        assert_eq!(decrypt_value(&ct, &[other, identity]).unwrap(), "secret");
        assert!(matches!(decrypt_value(&ct, &[]), Err(VaultError::IdentityMissing)));
    }

    #[test]
    fn test_rejects_plain_and_garbage() {
        assert!(!is_encrypted("plain"));
        assert!(ciphertext_bytes("plain").is_err());
        assert!(validate_ciphertext("encrypted:si:v1:bm90LWFnZQ").is_err());
        assert!(encrypt_value("x", &[]).is_err());
    }

    #[test]
    fn test_identity_text_roundtrip() {
        let identity = x25519::Identity::generate();
        let secret = identity_secret(&identity);
        assert!(secret.starts_with("AGE-SECRET-KEY-1"));
        let parsed = parse_identity(&format!("  {secret}\n")).unwrap();
        assert_eq!(parsed.to_public().to_string(), identity.to_public().to_string());
        assert!(parse_identity("nope").is_err());
        assert!(parse_recipient(&identity.to_public().to_string()).is_ok());
    }
}

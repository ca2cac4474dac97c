//! Scope normalization and object kind mapping
//!
//! A scope is either a single segment (`default`, `prod`) or a `/`-separated
//! namespace (`aureuma/dev`). Each scope maps to one sun object kind holding a
//! KV object per key.

use sha2::{Digest, Sha256};

pub const DEFAULT_SCOPE: &str = "default";
pub const KV_KIND_PREFIX: &str = "vault_kv.";
/// Longest object kind the store accepts.
pub const MAX_KIND_LEN: usize = 128;
/// `vault_kv.` plus the scope must fit in [`MAX_KIND_LEN`].
pub const MAX_SCOPE_LEN: usize = MAX_KIND_LEN - KV_KIND_PREFIX.len();
const SCOPED_HASH_CHARS: usize = 16;
const TRIM_CHARS: &[char] = &['-', '_', '/', '.', ':'];

fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

fn is_windows_drive(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

/// Dotenv-style paths from older settings (`/abs/.env.prod`, `~/x.env`).
fn looks_like_legacy_path(lower: &str) -> bool {
    if lower.is_empty() {
        return false;
    }
    if lower.starts_with('/') || lower.starts_with('~') || is_windows_drive(lower) {
        return true;
    }
    let base = base_name(lower);
    base == ".env" || base == "default.env" || base.starts_with(".env.") || base.ends_with(".env")
}

fn normalize_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let mut last_dash = false;
    for ch in part.trim().to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '-' | '_' | '.' | ':') {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches(&['-', '_', '.', ':'][..]).to_string()
}

fn tidy(scope: &str) -> String {
    let mut scope = scope.to_string();
    while scope.contains("//") {
        scope = scope.replace("//", "/");
    }
    scope.trim_matches(TRIM_CHARS).to_string()
}

/// Canonical form of a user-supplied scope. Never empty.
pub fn normalize_scope(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return DEFAULT_SCOPE.to_string();
    }
    let slashed = raw.replace('\\', "/");
    let lower = slashed.to_lowercase();
    let normalized = if looks_like_legacy_path(&lower) {
        let base = base_name(&lower).trim();
        match base {
            "" | "." | ".." | ".env" | "default.env" => return DEFAULT_SCOPE.to_string(),
            _ => {}
        }
        if let Some(rest) = base.strip_prefix(".env.") {
            rest.to_string()
        } else if let Some(rest) = base.strip_suffix(".env") {
            rest.to_string()
        } else {
            base.trim_start_matches('.').to_string()
        }
    } else {
        lower
    };

    let parts: Vec<String> = normalized
        .split('/')
        .map(normalize_part)
        .filter(|p| !p.is_empty())
        .collect();
    let scope = tidy(&parts.join("/"));
    if scope.is_empty() {
        return DEFAULT_SCOPE.to_string();
    }
    if scope.len() <= MAX_SCOPE_LEN {
        return scope;
    }
    let cut = tidy(&scope[..MAX_SCOPE_LEN]);
    if cut.is_empty() {
        DEFAULT_SCOPE.to_string()
    } else {
        cut
    }
}

/// Object kind holding the keys of `scope`.
///
/// Namespaced scopes keep a readable prefix and gain a hash suffix so that
/// truncation never makes two scopes collide.
pub fn kv_kind(scope: &str) -> String {
    let scope = normalize_scope(scope);
    if !scope.contains('/') {
        return format!("{KV_KIND_PREFIX}{scope}");
    }
    let digest = hex::encode(Sha256::digest(scope.as_bytes()));
    let suffix = format!("s.{}", &digest[..SCOPED_HASH_CHARS]);
    let max_human = MAX_KIND_LEN - KV_KIND_PREFIX.len() - 1 - suffix.len();
    let mut human = scope.replace('/', ".");
    if human.len() > max_human {
        human = human[..max_human].trim_matches(&['-', '_', '.', ':'][..]).to_string();
    }
    if human.is_empty() {
        return format!("{KV_KIND_PREFIX}{suffix}");
    }
    format!("{KV_KIND_PREFIX}{human}.{suffix}")
}

/// Short hashes recorded in KV metadata: `(repo_hash, file_hash)`.
pub fn target_hashes(repo_root: &str, scope: &str) -> (String, String) {
    let repo = Sha256::digest(repo_root.trim().as_bytes());
    let file = Sha256::digest(normalize_scope(scope).as_bytes());
    (hex::encode(&repo[..8]), hex::encode(&file[..8]))
}

//! si vault
//!
//! Scope-namespaced secrets stored in sun, encrypted with an age identity
//! that itself lives in sun.
//!
//! # Architecture
//!
//! ```text
//!  --scope / SI_VAULT_SCOPE / settings.vault.file
//!                   │
//!             resolve_target ── guard_repo_scope
//!                   │
//!  ┌────────────────▼─────────────────┐      ┌────────────────────────┐
//!  │ KvStore  (vault_kv.<scope>)      │◀────▶│ sun_vault_identity     │
//!  │ set / unset / list / history     │      │ current + backup keys  │
//!  └────────────────┬─────────────────┘      └────────────────────────┘
//!                   │ raw values
//!          crypto (age) + dotenv codec
//!                   │
//!        status ─ hydrate ─ vault run
//! ```
//!
//! # Modules
//!
//! - [`scope`]: scope normalization and object kind mapping
//! - [`target`]: target resolution and the cross-repo guard
//! - [`dotenv`]: layout-preserving dotenv codec
//! - [`crypto`]: age encryption of single values
//! - [`backend`]: sync backend selection
//! - [`identity`]: identity bootstrap, load and rotation
//! - [`kv`]: per-key objects with revision checks
//! - [`status`]: status report
//! - [`hydrate`]: env hydration before provider commands

pub mod backend;
pub mod crypto;
pub mod dotenv;
pub mod error;
pub mod hydrate;
pub mod identity;
pub mod kv;
pub mod scope;
pub mod status;
pub mod target;

// Re-exports
pub use backend::{BackendResolution, SyncBackend, resolve_backend};
pub use crypto::{decrypt_value, encrypt_value, is_encrypted};
pub use dotenv::{
    DotenvFile, Entry, PUBLIC_KEY_NAME, normalize_value, render_value, validate_key_name,
};
pub use error::{Result, VaultError};
pub use hydrate::{apply_env, auto_enabled, auto_hydrate, resolve_values, should_hydrate};
pub use identity::{IdentitySource, VaultIdentity, ensure_identity, load_identity, rotate_identity};
pub use kv::{KvEntry, KvStore, MirrorResult, plain_value};
pub use scope::{DEFAULT_SCOPE, kv_kind, normalize_scope};
pub use status::{VaultStatus, collect_status};
pub use target::{VaultTarget, resolve_target};

//! si provider runtime
//!
//! Shared machinery behind every provider command.
//!
//! # Architecture
//!
//! ```text
//! flags + settings + env
//!         │
//! ┌───────▼────────┐     ┌──────────────┐
//! │    Resolver    │────▶│RuntimeContext│
//! └────────────────┘     └──────┬───────┘
//!                               │  Request
//! ┌─────────────────────────────▼──────────────────────┐
//! │                   HttpExecutor                     │
//! │  cache ─ breaker ─ permit ─ auth ─ send ─ retry    │
//! │                    │                               │
//! │            ResponseNormalizer ── eventlog (JSONL)  │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`spec`]: static provider registry (base URL, headers, auth style)
//! - [`resolver`]: flag/env/settings precedence chains
//! - [`executor`]: retries, deadlines, cache, breaker, logging
//! - [`auth`]: bearer, query, api-key, SigV4, GitHub App, App Store JWT
//! - [`redact`]: the single redaction function used for logs and output

pub mod auth;
pub mod cache;
pub mod client;
pub mod context;
pub mod error;
pub mod eventlog;
pub mod executor;
pub mod guard;
pub mod netpolicy;
pub mod redact;
pub mod request;
pub mod resolver;
pub mod spec;

// Re-exports
pub use context::{
    AppStoreCredentials, AwsCredentials, Credentials, Environment, GitHubAppCredentials,
    RuntimeContext,
};
pub use error::{ProviderError, Result, RuntimeError};
pub use executor::{ExecOptions, HttpExecutor};
pub use guard::HealthEntry;
pub use netpolicy::{RetryConfig, is_safe_method, should_retry};
pub use redact::{preview_secret, redact};
pub use request::{Body, DefaultNormalizer, JsonMap, Request, Response, ResponseNormalizer};
pub use resolver::{EntryField, FieldSpec, IdPrecedence, Resolved, Resolver};
pub use spec::{AuthStyle, ProviderId, ProviderSpec};

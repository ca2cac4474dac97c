//! si provider adapters
//!
//! One adapter per control plane, all sharing the runtime's resolver and
//! executor.
//!
//! # Architecture
//!
//! ```text
//!  ContextFlags + Settings
//!          │
//!  ┌───────▼─────────┐   context()   ┌────────────────┐
//!  │ Provider (trait)│──────────────▶│ RuntimeContext │
//!  │  Cloudflare     │               └───────┬────────┘
//!  │  Aws / Bedrock  │  verify() / typed ops │
//!  │  Gcp / Gemini   │───────────────────────▼
//!  │  GitHub, ...    │            HttpExecutor::shared()
//!  └─────────────────┘
//!          │
//!   status::auth_status ─ status::doctor ─ cloudflare smoke
//! ```
//!
//! # Modules
//!
//! - [`provider`]: the [`Provider`] trait and [`ContextBuilder`]
//! - [`status`]: `auth status` and `doctor`
//! - [`accounts`]: `context list|current|use`
//! - [`registry`]: adapter lookup and `providers list|health`
//! - one module per provider

pub mod accounts;
pub mod appstore;
pub mod aws;
pub mod cloudflare;
pub mod gcp;
pub mod github;
pub mod play;
pub mod provider;
pub mod registry;
pub mod social;
pub mod status;
pub mod workos;
pub mod youtube;

#[cfg(test)]
mod stub;

// Re-exports
pub use accounts::{AccountRow, CurrentContext, current, list_accounts, use_account};
pub use appstore::AppStore;
pub use aws::{Aws, AwsService};
pub use cloudflare::{Cloudflare, SmokeReport};
pub use gcp::{Gcp, Gemini};
pub use github::GitHub;
pub use play::GooglePlay;
pub use provider::{ContextBuilder, ContextFlags, Provider, segment, summarize, versioned};
pub use registry::{adapter, health, provider_list};
pub use social::Social;
pub use status::{AuthStatus, DoctorReport, auth_status, doctor};
pub use workos::WorkOs;
pub use youtube::YouTube;

//! si sun integration
//!
//! Client for the sun object store plus the two features built on it:
//! browser sign-in and the machine job dispatcher.
//!
//! # Architecture
//!
//! ```text
//!  si sun auth login ──▶ BrowserLogin ──▶ 127.0.0.1 callback
//!                                              │ token
//! ┌────────────────────────────────────────────▼──────┐
//! │                     SunClient                     │
//! │   objects ─ revisions ─ tokens ─ audit ─ whoami   │
//! └─────────────▲──────────────────────────▲──────────┘
//!               │                          │
//!        Dispatcher (si_machine,     si-vault KV backend
//!        si_machine_job, CAS)
//! ```
//!
//! # Modules
//!
//! - [`client`]: authenticated HTTP client with bounded retries
//! - [`login`]: one-shot browser callback listener
//! - [`machine`]: machine registry, ACLs, job queue and runner

pub mod client;
pub mod error;
pub mod login;
pub mod machine;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports
pub use client::{AuditEvent, IssuedToken, ObjectMeta, PutResult, Revision, SunClient, TokenRecord, Whoami, split_csv};
pub use error::{JobError, Result, SunError};
pub use login::{BrowserLogin, LoginResult};
pub use machine::{
    DispatchRequest, Dispatcher, JobFilter, JobRunner, JobStatus, MachineJob, MachineRecord,
    RegisterRequest, ServeOptions, ServeSummary,
};

//! cmdetl-gi library interface
//!
//! Generates report identifiers for every configured CollaborateMD instance
//! and records them in the PostgreSQL ledger. The binaries in this crate are
//! thin wrappers around [`InstanceOrchestrator`] and [`ResultsDownloader`].

pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::db::{IdentifierLedger, MemoryLedger, PgLedger};
pub use crate::error::{ReportError, ReportResult};
pub use crate::services::{InstanceOrchestrator, ReportPoller, ResultsDownloader};

/// Log filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_DIRECTIVES: &str = "cmdetl_gi=info,cmdetl_common=info";

/// Build identification captured by build.rs
pub const GIT_HASH: &str = env!("GIT_HASH");
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
pub const BUILD_PROFILE: &str = env!("BUILD_PROFILE");

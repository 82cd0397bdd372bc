//! # cmdetl common library
//!
//! Shared code for the cmdetl crates:
//! - Configuration loading, environment overrides and validation
//! - Ledger database pool and schema bootstrap
//! - Error type
//! - Tracing setup

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod logging;

pub use config::{InstanceConfig, PipelineConfig, PollingConfig, PostgresConfig, ReportConfig};
pub use error::{Error, Result};

//! Common error types for cmdetl

use thiserror::Error;

/// Common result type for cmdetl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across cmdetl crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be located, read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration was readable but failed validation.
    ///
    /// Carries every problem found so the operator can fix them in one pass.
    #[error("Configuration validation failed:\n  {}", .0.join("\n  "))]
    Validation(Vec<String>),

    /// Requested resource (e.g. an instance key) not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

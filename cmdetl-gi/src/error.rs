//! Error types for cmdetl-gi
//!
//! Every variant is terminal for the account/report pair it occurred on. The
//! poller turns them into a failed outcome; none of them stop other pairs or
//! other instances.

use thiserror::Error;

/// Report API, payload and ledger errors
#[derive(Debug, Error)]
pub enum ReportError {
    /// Network-level failure (connect, timeout, body read)
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Vendor answered with a non-200 status
    #[error("API returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Malformed or unexpected XML payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// Ledger read/write failure
    #[error("Ledger error: {0}")]
    Ledger(#[from] cmdetl_common::Error),

    /// Results archive could not be decoded or unpacked
    #[error("Archive error: {0}")]
    Archive(String),

    /// Local file I/O (results output)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for report operations
pub type ReportResult<T> = Result<T, ReportError>;

/// Longest response body kept in an HTTP error
pub const MAX_ERROR_BODY: usize = 512;

impl ReportError {
    /// Non-200 vendor response, body cut to [`MAX_ERROR_BODY`] bytes
    pub fn http_status(status: u16, body: &str) -> Self {
        ReportError::HttpStatus {
            status,
            body: truncate(body, MAX_ERROR_BODY),
        }
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

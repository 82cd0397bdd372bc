//! Data models for cmdetl-gi

pub mod outcome;
pub mod report;

pub use outcome::{InstanceReport, PollOutcome, RunSummary};
pub use report::{
    Classification, LedgerKey, LedgerRecord, ReportMatrix, ReportRequest, ReportStatus,
    ReportStatusResponse,
};

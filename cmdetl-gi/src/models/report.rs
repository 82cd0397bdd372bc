//! Report requests, vendor status responses and ledger rows

use cmdetl_common::ReportConfig;
use std::collections::BTreeMap;
use std::fmt;

/// Substring that marks a response as "job still in progress"
const STILL_RUNNING_MARKER: &str = "still running";

/// One unit of work: generate `report_name` for `account_id` on an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub instance_key: String,
    pub account_id: String,
    pub report_id: String,
    pub filter_id: String,
    pub report_name: String,
}

impl ReportRequest {
    pub fn new(instance_key: &str, account_id: &str, report: &ReportConfig) -> Self {
        Self {
            instance_key: instance_key.to_string(),
            account_id: account_id.to_string(),
            report_id: report.report_id.clone(),
            filter_id: report.filter_id.clone(),
            report_name: report.name.clone(),
        }
    }

    /// Ledger key this request writes under
    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey {
            customer_account: self.account_id.clone(),
            report_name: self.report_name.clone(),
            instance_key: self.instance_key.clone(),
        }
    }
}

impl fmt::Display for ReportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} (report {}, filter {})",
            self.instance_key, self.account_id, self.report_name, self.report_id, self.filter_id
        )
    }
}

/// `Status` element of a run-report response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportStatus {
    Success,
    ReportRunning,
    Other(String),
}

impl ReportStatus {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "SUCCESS" => ReportStatus::Success,
            "REPORT RUNNING" => ReportStatus::ReportRunning,
            other => ReportStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ReportStatus::Success => "SUCCESS",
            ReportStatus::ReportRunning => "REPORT RUNNING",
            ReportStatus::Other(raw) => raw,
        }
    }
}

/// How the poller should treat a parsed response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Vendor job still in progress; retry the same request later
    Running,
    /// Vendor refused the request
    Rejected,
    /// Vendor issued an identifier
    Accepted,
}

/// Parsed run-report response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportStatusResponse {
    pub status: ReportStatus,
    pub identifier: String,
    pub status_message: String,
}

impl ReportStatusResponse {
    /// Classify the response
    ///
    /// "still running" in the message wins over everything, including a
    /// `SUCCESS` status. Otherwise only `SUCCESS` and `REPORT RUNNING` are
    /// accepted.
    pub fn classify(&self) -> Classification {
        if self.status_message.contains(STILL_RUNNING_MARKER) {
            return Classification::Running;
        }
        match self.status {
            ReportStatus::Success | ReportStatus::ReportRunning => Classification::Accepted,
            ReportStatus::Other(_) => Classification::Rejected,
        }
    }
}

/// (account, report, instance) triple the ledger tracks one active identifier for
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LedgerKey {
    pub customer_account: String,
    pub report_name: String,
    pub instance_key: String,
}

/// One row of `account_reports`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    pub customer_account: String,
    pub report_name: String,
    pub instance_key: String,
    pub identifier: String,
    /// 1 = active, 0 = superseded
    pub status: i32,
}

impl LedgerRecord {
    pub const ACTIVE: i32 = 1;
    pub const SUPERSEDED: i32 = 0;

    pub fn is_active(&self) -> bool {
        self.status == Self::ACTIVE
    }

    pub fn matches(&self, key: &LedgerKey) -> bool {
        self.customer_account == key.customer_account
            && self.report_name == key.report_name
            && self.instance_key == key.instance_key
    }
}

/// account → report name → active identifier, for one instance
pub type ReportMatrix = BTreeMap<String, BTreeMap<String, String>>;

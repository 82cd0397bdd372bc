//! Per-account report poller
//!
//! Drives one account/report pair until a terminal outcome:
//!
//! ```text
//! REQUESTING ─┬─ HTTP != 200 / transport / parse error ──► ERROR (terminal)
//!             ├─ "still running" ──► RUNNING ── sleep ──► REQUESTING
//!             ├─ status not accepted ──► REJECTED (terminal)
//!             ├─ identifier in ledger ──► DUPLICATE ── sleep ──► REQUESTING
//!             └─ new identifier ──► ACCEPTED: register (terminal)
//! ```
//!
//! Vendor jobs can legitimately run for many minutes, so RUNNING/DUPLICATE
//! retries are unbounded unless `max_attempts` is configured. The poller
//! never returns an error: every failure is logged and becomes
//! [`PollOutcome::Failed`] for that pair only.

use crate::db::IdentifierLedger;
use crate::error::ReportError;
use crate::models::{Classification, PollOutcome, ReportRequest};
use crate::services::report_client::ReportApi;
use crate::services::response_parser::parse_status_response;
use cmdetl_common::PollingConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Why an attempt loops back to REQUESTING
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryReason {
    Running,
    Duplicate,
}

enum Step {
    Retry(RetryReason),
    Done(PollOutcome),
}

/// Poller shared by all pairs of one instance
pub struct ReportPoller {
    api: Arc<dyn ReportApi>,
    ledger: Arc<dyn IdentifierLedger>,
    polling: PollingConfig,
}

impl ReportPoller {
    pub fn new(
        api: Arc<dyn ReportApi>,
        ledger: Arc<dyn IdentifierLedger>,
        polling: PollingConfig,
    ) -> Self {
        Self { api, ledger, polling }
    }

    pub fn polling(&self) -> &PollingConfig {
        &self.polling
    }

    /// Run one pair to a terminal outcome
    pub async fn poll(&self, request: &ReportRequest) -> PollOutcome {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let reason = match self.attempt(request, attempt).await {
                Step::Done(outcome) => {
                    log_outcome(request, &outcome);
                    return outcome;
                }
                Step::Retry(reason) => reason,
            };

            if let Some(max) = self.polling.max_attempts {
                if attempt >= max {
                    let outcome = PollOutcome::Exhausted { attempts: attempt };
                    log_outcome(request, &outcome);
                    return outcome;
                }
            }

            let delay = self.delay_for(reason);
            match reason {
                RetryReason::Running => info!(
                    account = %request.account_id,
                    report = %request.report_name,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    "Report is still running; waiting before retrying"
                ),
                RetryReason::Duplicate => info!(
                    account = %request.account_id,
                    report = %request.report_name,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    "Vendor returned an identifier already in the ledger; waiting for a fresh one"
                ),
            }
            tokio::time::sleep(delay).await;
        }
    }

    fn delay_for(&self, reason: RetryReason) -> Duration {
        match reason {
            RetryReason::Running => self.polling.running_delay,
            RetryReason::Duplicate => self.polling.duplicate_delay,
        }
    }

    /// One REQUESTING step
    async fn attempt(&self, request: &ReportRequest, attempt: u32) -> Step {
        let response = match self.api.run_report(request).await {
            Ok(response) => response,
            Err(e) => return Step::Done(PollOutcome::Failed(e)),
        };

        info!(
            account = %request.account_id,
            report = %request.report_name,
            report_id = %request.report_id,
            filter_id = %request.filter_id,
            status = response.status,
            attempt,
            "Run report request completed"
        );

        if !response.is_ok() {
            return Step::Done(PollOutcome::Failed(ReportError::http_status(
                response.status,
                &response.body,
            )));
        }

        let parsed = match parse_status_response(&response.body) {
            Ok(parsed) => parsed,
            Err(e) => return Step::Done(PollOutcome::Failed(e)),
        };

        debug!(
            identifier = %parsed.identifier,
            status = %parsed.status.as_str(),
            status_message = %parsed.status_message,
            "Parsed report status"
        );

        match parsed.classify() {
            Classification::Running => Step::Retry(RetryReason::Running),
            Classification::Rejected => Step::Done(PollOutcome::Rejected {
                status: parsed.status.as_str().to_string(),
                status_message: parsed.status_message,
            }),
            Classification::Accepted => self.accept(request, parsed.identifier, attempt).await,
        }
    }

    /// ACCEPTED: dedupe against the ledger, then register
    async fn accept(&self, request: &ReportRequest, identifier: String, attempt: u32) -> Step {
        if identifier.is_empty() {
            return Step::Done(PollOutcome::Failed(ReportError::Parse(
                "Accepted response carried an empty Identifier".to_string(),
            )));
        }

        let key = request.ledger_key();

        match self.ledger.is_duplicate(&key, &identifier).await {
            Ok(true) => return Step::Retry(RetryReason::Duplicate),
            Ok(false) => {}
            Err(e) => return Step::Done(PollOutcome::Failed(e.into())),
        }

        match self.ledger.register_identifier(&key, &identifier).await {
            Ok(superseded) => {
                debug!(identifier = %identifier, superseded, "Identifier registered");
                Step::Done(PollOutcome::Registered {
                    identifier,
                    attempts: attempt,
                })
            }
            Err(e) => Step::Done(PollOutcome::Failed(e.into())),
        }
    }
}

fn log_outcome(request: &ReportRequest, outcome: &PollOutcome) {
    match outcome {
        PollOutcome::Registered { identifier, attempts } => info!(
            account = %request.account_id,
            report = %request.report_name,
            identifier = %identifier,
            attempts,
            "Report started and ledger updated"
        ),
        PollOutcome::Rejected { status, status_message } => warn!(
            account = %request.account_id,
            report = %request.report_name,
            status = %status,
            status_message = %status_message,
            "Vendor rejected report request"
        ),
        PollOutcome::Failed(e) => error!(
            account = %request.account_id,
            report = %request.report_name,
            error = %e,
            "Report request failed"
        ),
        PollOutcome::Exhausted { attempts } => warn!(
            account = %request.account_id,
            report = %request.report_name,
            attempts,
            "Giving up after max_attempts"
        ),
    }
}

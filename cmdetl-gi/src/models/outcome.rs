//! Terminal poller outcomes and per-run summaries

use crate::error::ReportError;
use uuid::Uuid;

/// Terminal state of one account/report pair
#[derive(Debug)]
pub enum PollOutcome {
    /// New identifier recorded as the active one
    Registered { identifier: String, attempts: u32 },
    /// Vendor refused the request
    Rejected { status: String, status_message: String },
    /// Transport, HTTP, parse or ledger failure
    Failed(ReportError),
    /// `max_attempts` reached while the vendor kept answering "running"/duplicate
    Exhausted { attempts: u32 },
}

impl PollOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, PollOutcome::Registered { .. })
    }
}

/// Counters for one instance task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceReport {
    pub instance_key: String,
    pub registered: usize,
    pub rejected: usize,
    pub failed: usize,
    pub exhausted: usize,
    /// False when the instance task itself errored or panicked
    pub completed: bool,
}

impl InstanceReport {
    /// Empty counters; `completed` stays false until the instance finishes
    pub fn new(instance_key: &str) -> Self {
        Self {
            instance_key: instance_key.to_string(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: &PollOutcome) {
        match outcome {
            PollOutcome::Registered { .. } => self.registered += 1,
            PollOutcome::Rejected { .. } => self.rejected += 1,
            PollOutcome::Failed(_) => self.failed += 1,
            PollOutcome::Exhausted { .. } => self.exhausted += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.registered + self.rejected + self.failed + self.exhausted
    }
}

/// Result of one orchestrator run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Sorted by instance key
    pub instances: Vec<InstanceReport>,
}

impl RunSummary {
    pub fn instance(&self, instance_key: &str) -> Option<&InstanceReport> {
        self.instances.iter().find(|r| r.instance_key == instance_key)
    }

    pub fn all_completed(&self) -> bool {
        self.instances.iter().all(|r| r.completed)
    }

    pub fn total_registered(&self) -> usize {
        self.instances.iter().map(|r| r.registered).sum()
    }
}

//! In-process ledger
//!
//! Same contract as [`PgLedger`](super::PgLedger) without a database; backs
//! the poller and orchestrator tests.

use super::ledger::IdentifierLedger;
use crate::models::{LedgerKey, LedgerRecord, ReportMatrix};
use async_trait::async_trait;
use cmdetl_common::Result;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<LedgerRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-populated with rows (e.g. identifiers issued on an earlier run)
    pub fn with_records(records: Vec<LedgerRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Snapshot of every row, in insertion order
    pub async fn records(&self) -> Vec<LedgerRecord> {
        self.records.lock().await.clone()
    }

    /// Active rows for `key`
    pub async fn active(&self, key: &LedgerKey) -> Vec<LedgerRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.matches(key) && r.is_active())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl IdentifierLedger for MemoryLedger {
    async fn is_duplicate(&self, key: &LedgerKey, identifier: &str) -> Result<bool> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .any(|r| r.matches(key) && r.identifier == identifier))
    }

    async fn register_identifier(&self, key: &LedgerKey, identifier: &str) -> Result<u64> {
        // One lock for both steps: the in-memory equivalent of the transaction
        let mut records = self.records.lock().await;

        let mut superseded = 0;
        for record in records.iter_mut().filter(|r| r.matches(key) && r.is_active()) {
            record.status = LedgerRecord::SUPERSEDED;
            superseded += 1;
        }

        records.push(LedgerRecord {
            customer_account: key.customer_account.clone(),
            report_name: key.report_name.clone(),
            instance_key: key.instance_key.clone(),
            identifier: identifier.to_string(),
            status: LedgerRecord::ACTIVE,
        });

        Ok(superseded)
    }

    async fn active_identifiers(&self, instance_key: &str) -> Result<ReportMatrix> {
        let records = self.records.lock().await;
        let mut matrix = ReportMatrix::new();
        for record in records
            .iter()
            .filter(|r| r.instance_key == instance_key && r.is_active())
        {
            matrix
                .entry(record.customer_account.clone())
                .or_default()
                .insert(record.report_name.clone(), record.identifier.clone());
        }
        Ok(matrix)
    }
}

//! Identifier ledger
//!
//! The ledger records, per (account, report, instance), which vendor report
//! identifier is currently active and which ones it superseded. Rows are
//! never deleted; superseding flips `status` from 1 to 0.

use crate::models::{LedgerKey, LedgerRecord, ReportMatrix};
use async_trait::async_trait;
use cmdetl_common::db::ledger_table;
use cmdetl_common::Result;
use sqlx::PgPool;
use tracing::debug;

/// Storage seam for the report poller
#[async_trait]
pub trait IdentifierLedger: Send + Sync {
    /// True if `identifier` was ever recorded for `key`, active or superseded
    async fn is_duplicate(&self, key: &LedgerKey, identifier: &str) -> Result<bool>;

    /// Supersede the active row of `key` and insert `identifier` as active.
    ///
    /// Both writes commit together or not at all. Returns the number of rows
    /// superseded (0 or 1 while the invariant holds).
    async fn register_identifier(&self, key: &LedgerKey, identifier: &str) -> Result<u64>;

    /// Active identifiers of one instance
    async fn active_identifiers(&self, instance_key: &str) -> Result<ReportMatrix>;
}

/// PostgreSQL ledger over `{schema}.account_reports`
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
    table: String,
}

impl PgLedger {
    pub fn new(pool: PgPool, schema: &str) -> Result<Self> {
        Ok(Self {
            pool,
            table: ledger_table(schema)?,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Every row for `key`, superseded rows first (diagnostics and tests)
    pub async fn history(&self, key: &LedgerKey) -> Result<Vec<LedgerRecord>> {
        let rows: Vec<(String, String, String, String, i32)> = sqlx::query_as(&format!(
            "SELECT customer_account, report_name, instance_key, identifier, status \
             FROM {} \
             WHERE customer_account = $1 AND report_name = $2 AND instance_key = $3 \
             ORDER BY status, identifier",
            self.table
        ))
        .bind(&key.customer_account)
        .bind(&key.report_name)
        .bind(&key.instance_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(customer_account, report_name, instance_key, identifier, status)| LedgerRecord {
                customer_account,
                report_name,
                instance_key,
                identifier,
                status,
            })
            .collect())
    }
}

#[async_trait]
impl IdentifierLedger for PgLedger {
    async fn is_duplicate(&self, key: &LedgerKey, identifier: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS ( \
                SELECT 1 FROM {} \
                WHERE customer_account = $1 AND report_name = $2 \
                  AND instance_key = $3 AND identifier = $4 \
             )",
            self.table
        ))
        .bind(&key.customer_account)
        .bind(&key.report_name)
        .bind(&key.instance_key)
        .bind(identifier)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn register_identifier(&self, key: &LedgerKey, identifier: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let superseded = sqlx::query(&format!(
            "UPDATE {} SET status = $4 \
             WHERE customer_account = $1 AND report_name = $2 \
               AND instance_key = $3 AND status = $5",
            self.table
        ))
        .bind(&key.customer_account)
        .bind(&key.report_name)
        .bind(&key.instance_key)
        .bind(LedgerRecord::SUPERSEDED)
        .bind(LedgerRecord::ACTIVE)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(&format!(
            "INSERT INTO {} (customer_account, report_name, instance_key, identifier, status) \
             VALUES ($1, $2, $3, $4, $5)",
            self.table
        ))
        .bind(&key.customer_account)
        .bind(&key.report_name)
        .bind(&key.instance_key)
        .bind(identifier)
        .bind(LedgerRecord::ACTIVE)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            account = %key.customer_account,
            report = %key.report_name,
            instance = %key.instance_key,
            identifier = %identifier,
            superseded,
            "Ledger updated"
        );

        Ok(superseded)
    }

    async fn active_identifiers(&self, instance_key: &str) -> Result<ReportMatrix> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(&format!(
            "SELECT customer_account, report_name, identifier FROM {} \
             WHERE instance_key = $1 AND status = $2 \
             ORDER BY customer_account, report_name",
            self.table
        ))
        .bind(instance_key)
        .bind(LedgerRecord::ACTIVE)
        .fetch_all(&self.pool)
        .await?;

        let mut matrix = ReportMatrix::new();
        for (account, report_name, identifier) in rows {
            matrix.entry(account).or_default().insert(report_name, identifier);
        }
        Ok(matrix)
    }
}

//! Database initialization
//!
//! Opens the PostgreSQL pool that backs the identifier ledger and, on request,
//! creates the ledger table. Bootstrap is opt-in: production warehouses
//! usually already carry `account_reports`, and the partial unique index
//! below would refuse to build over a table that already holds two active
//! rows for one key.

use crate::config::{is_sql_identifier, PostgresConfig};
use crate::{Error, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Ledger table name, unqualified
pub const LEDGER_TABLE: &str = "account_reports";

/// Schema-qualified ledger table, e.g. `dw_data.account_reports`
pub fn ledger_table(schema: &str) -> Result<String> {
    if !is_sql_identifier(schema) {
        return Err(Error::Config(format!(
            "Schema '{}' is not a valid SQL identifier",
            schema
        )));
    }
    Ok(format!("{}.{}", schema, LEDGER_TABLE))
}

/// Connection options for the configured ledger database
pub fn connect_options(config: &PostgresConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.database)
}

/// Open a connection pool to the ledger database
///
/// Connects eagerly so that a wrong host or password fails at startup rather
/// than on the first ledger write.
pub async fn connect(config: &PostgresConfig, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(connect_options(config))
        .await?;

    info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        schema = %config.schema,
        "Ledger database connection established"
    );

    Ok(pool)
}

/// Create schema, ledger table and indexes if they do not exist (idempotent)
pub async fn ensure_ledger_schema(pool: &PgPool, schema: &str) -> Result<()> {
    let table = ledger_table(schema)?;

    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
        .execute(pool)
        .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id BIGSERIAL PRIMARY KEY,
            customer_account TEXT NOT NULL,
            report_name TEXT NOT NULL,
            identifier TEXT NOT NULL,
            status INTEGER NOT NULL DEFAULT 1,
            instance_key TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#
    ))
    .execute(pool)
    .await?;

    // At most one active identifier per key
    sqlx::query(&format!(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS account_reports_one_active
        ON {table} (customer_account, report_name, instance_key)
        WHERE status = 1
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE INDEX IF NOT EXISTS account_reports_identifier
        ON {table} (customer_account, report_name, instance_key, identifier)
        "#
    ))
    .execute(pool)
    .await?;

    info!(table = %table, "Ledger schema ready");
    Ok(())
}

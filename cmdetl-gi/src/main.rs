//! cmdetl-gi - CollaborateMD report identifier generation
//!
//! For every configured instance, asks the vendor to generate each configured
//! report for each account and records the returned identifier in the
//! `account_reports` ledger. Instances run concurrently on a bounded pool;
//! accounts within an instance run one at a time.
//!
//! Exit status is 1 when configuration is invalid, the ledger database is
//! unreachable, or the run is interrupted. Per-account and per-instance
//! failures are logged and do not change the exit status.

use anyhow::{Context, Result};
use clap::Parser;
use cmdetl_common::config::{resolve_config_path, PipelineConfig};
use cmdetl_gi::{InstanceOrchestrator, PgLedger, DEFAULT_LOG_DIRECTIVES};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Command-line arguments for cmdetl-gi
#[derive(Parser, Debug)]
#[command(name = "cmdetl-gi")]
#[command(about = "Generate CollaborateMD report identifiers for all configured instances")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "CMDETL_CONFIG")]
    config: Option<PathBuf>,

    /// Instances processed concurrently (default: instance count, at most 32)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    workers: Option<u16>,

    /// Only process these instances (repeatable)
    #[arg(short, long = "instance", value_name = "KEY")]
    instances: Vec<String>,

    /// Create the ledger schema, table and indexes if missing
    #[arg(long)]
    init_schema: bool,

    /// Give up on an account/report pair after this many requests
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: Option<u32>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = cmdetl_common::logging::init_tracing(DEFAULT_LOG_DIRECTIVES) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = cmdetl_gi::GIT_HASH,
        built = cmdetl_gi::BUILD_TIMESTAMP,
        profile = cmdetl_gi::BUILD_PROFILE,
        "Starting cmdetl-gi"
    );

    tokio::select! {
        result = run(args) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{:#}", e);
                ExitCode::FAILURE
            }
        },
        _ = shutdown_signal() => {
            warn!("Run interrupted; ledger rows already written are kept");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config_path = resolve_config_path(args.config.as_deref())?;
    info!(path = %config_path.display(), "Using configuration file");

    let mut config = PipelineConfig::load(&config_path)?;
    config.retain_instances(&args.instances)?;
    if args.max_attempts.is_some() {
        config.polling.max_attempts = args.max_attempts;
    }

    let workers = args.workers.map(usize::from);
    let pool_size = workers
        .unwrap_or_else(|| cmdetl_gi::services::default_workers(config.instances.len()))
        .max(2) as u32;

    let pool = cmdetl_common::db::connect(&config.postgres, pool_size)
        .await
        .context("Failed to connect to the ledger database")?;
    info!(
        host = %config.postgres.host,
        database = %config.postgres.database,
        schema = %config.postgres.schema,
        "Ledger database connected"
    );

    if args.init_schema {
        cmdetl_common::db::ensure_ledger_schema(&pool, &config.postgres.schema).await?;
    }

    let ledger = Arc::new(PgLedger::new(pool.clone(), &config.postgres.schema)?);
    let orchestrator = InstanceOrchestrator::new(config, ledger).with_workers(workers);
    let summary = orchestrator.run().await;

    info!(
        run_id = %summary.run_id,
        instances = summary.instances.len(),
        registered = summary.total_registered(),
        all_completed = summary.all_completed(),
        "Run complete"
    );

    pool.close().await;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}

//! fetch-results - download consolidated report CSVs
//!
//! Reads the active identifiers of an instance from the ledger, downloads the
//! results of each from the vendor and writes one CSV per report name under
//! `{output_dir}/{instance_key}/`.

use anyhow::{Context, Result};
use clap::Parser;
use cmdetl_common::config::{resolve_config_path, PipelineConfig};
use cmdetl_gi::services::CollaborateClient;
use cmdetl_gi::{PgLedger, ResultsDownloader, DEFAULT_LOG_DIRECTIVES};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "fetch-results")]
#[command(about = "Download report results for the active identifiers of an instance")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "CMDETL_CONFIG")]
    config: Option<PathBuf>,

    /// Instance to download (repeatable; default: all)
    #[arg(short, long = "instance", value_name = "KEY")]
    instances: Vec<String>,

    /// Directory receiving `{instance}/{report}.csv`
    #[arg(short, long, default_value = "csv_files")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = cmdetl_common::logging::init_tracing(DEFAULT_LOG_DIRECTIVES) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config_path = resolve_config_path(args.config.as_deref())?;
    let mut config = PipelineConfig::load(&config_path)?;
    config.retain_instances(&args.instances)?;

    let pool = cmdetl_common::db::connect(&config.postgres, 2)
        .await
        .context("Failed to connect to the ledger database")?;
    let ledger = Arc::new(PgLedger::new(pool.clone(), &config.postgres.schema)?);

    let mut files = 0;
    for instance in config.instances.values() {
        let api = Arc::new(CollaborateClient::new(instance, config.polling.request_timeout)?);
        let downloader = ResultsDownloader::new(api, ledger.clone(), args.output_dir.clone());
        match downloader.download_instance(instance).await {
            Ok(written) => files += written.len(),
            Err(e) => error!(instance = %instance.instance_key, error = %e, "Download failed"),
        }
    }

    info!(files, output_dir = %args.output_dir.display(), "Download complete");
    pool.close().await;
    Ok(())
}

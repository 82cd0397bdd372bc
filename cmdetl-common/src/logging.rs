//! Tracing subscriber setup shared by the cmdetl binaries

use crate::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence; `default_directives` (e.g.
/// `"cmdetl_gi=info,cmdetl_common=info"`) applies when it is unset or invalid.
pub fn init_tracing(default_directives: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {}", e)))
}

use std::env;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is absent: `LOG_LEVEL` for our events,
/// HTTP internals kept at `warn`.
fn fallback_directive() -> String {
    let level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    format!("{},hyper=warn,reqwest=warn", level.trim().to_lowercase())
}

pub fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_directive()))
        .context("invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}

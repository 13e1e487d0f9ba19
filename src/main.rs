//! # kubeloop
//!
//! Entry point of the reconciliation-loop simulator.
//!
//! ## Startup
//!
//! 1. **Arguments** - parsed with clap
//! 2. **Tracing** - `--log-level`, else `RUST_LOG`, else `info`, on stderr
//! 3. **Configuration** - defaults, then `kubeloop.toml`, then `KUBELOOP_*`,
//!    then flags
//! 4. **Command** - apply, plan, run or replay
//!
//! ## Error Handling
//!
//! Every failure propagates as `anyhow::Error` with context and ends the
//! process with a non-zero exit code and the error chain on stderr.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use kubeloop::cli::Cli;
use kubeloop::commands::execute_command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_deref())?;

    execute_command(cli).await
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("Invalid --log-level '{directives}'"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    Ok(())
}

//! Common utilities shared by the core's binaries: CLI parsing, logging
//! setup, and the ctrlc-driven shutdown channel every long-running process
//! waits on.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CommonArgs {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Log level (overridden by RUST_LOG if set).
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

/// Initializes tracing with an `EnvFilter`, falling back to `level` when
/// `RUST_LOG` is unset.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    Ok(())
}

/// A `tokio::sync::watch` channel that flips to `true` on SIGINT/SIGTERM.
/// Every background worker in the supervisor selects against its receiver.
pub fn shutdown_channel() -> Result<tokio::sync::watch::Receiver<bool>> {
    let (tx, rx) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        tracing::info!("shutdown signal received");
        let _ = tx.send(true);
    })?;
    Ok(rx)
}

//! Tracing-based logging setup.
//!
//! The crate logs through the `tracing` macros; this module installs the
//! global `tracing-subscriber` fmt subscriber. The `RUST_LOG` environment
//! variable, when set, overrides the configured level.

use crate::error::{HostError, HostResult};
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Parse a configured log level name.
pub fn parse_log_level(level: &str) -> HostResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(HostError::Config(format!("Invalid log level: {other}"))),
    }
}

/// Install the global subscriber at the configured level.
///
/// Calling this more than once is harmless; later calls leave the first
/// subscriber in place.
pub fn init(level: &str) -> HostResult<()> {
    let level = parse_log_level(level)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let _ = fmt().with_env_filter(filter).try_init();
    Ok(())
}

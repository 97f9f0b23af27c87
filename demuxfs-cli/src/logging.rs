//! Logging setup: console output with local timestamps.
//!
//! The core crate logs through the `log` facade; a `tracing-log` bridge
//! routes those records into the `tracing-subscriber` registry set up here.

use std::io;

use chrono::Local;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize console logging.
///
/// `verbose` lowers the default filter to debug; `RUST_LOG` overrides
/// either default.
pub fn init_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let default_filter = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_level(true)
            .with_timer(LocalTimeTimer),
    );

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to set default subscriber: {e}"))?;
    tracing_log::LogTracer::init().map_err(|e| format!("Failed to initialize LogTracer: {e}"))?;
    Ok(())
}

/// Local-time formatter for log lines.
#[derive(Debug, Clone, Copy)]
struct LocalTimeTimer;

impl fmt::time::FormatTime for LocalTimeTimer {
    fn format_time(&self, w: &mut fmt::format::Writer) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.6f"))
    }
}

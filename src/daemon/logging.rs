//! Logging initialization for the Session Hub daemon.
//!
//! Configures the `tracing` subscriber with level filtering via the `SHUB_LOG`
//! environment variable. Falls back to the `[daemon].log_level` from the
//! configuration file when the variable is unset.
//!
//! # Usage
//!
//! ```bash
//! # Configured level
//! shub daemon
//!
//! # Debug level
//! SHUB_LOG=debug shub daemon
//!
//! # Module-specific filtering
//! SHUB_LOG=session_hub::sessions=trace,info shub daemon
//! ```

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::schema::LogLevel;

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "SHUB_LOG";

/// Builds the filter from `SHUB_LOG`, falling back to `level`.
pub fn filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level.as_directive()))
}

/// Initialize the tracing subscriber.
///
/// Output goes to stderr, or is appended to `file` when given. Does nothing
/// if a global subscriber is already set.
pub fn init(level: LogLevel, file: Option<&Path>) -> std::io::Result<()> {
    let builder = fmt().with_env_filter(filter(level)).with_target(false);

    let result = match file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    if result.is_err() {
        tracing::debug!("global subscriber already installed");
    }
    Ok(())
}

//! Daemon module for Session Hub.
//!
//! This module provides process lifecycle management, daemonization, and the
//! main entry point for running the daemon.

mod handlers;
pub mod logging;
pub mod server;

pub use server::SocketServer;

use std::error::Error;
use std::sync::Arc;

use fork::{daemon, Fork};
use tokio::runtime::Runtime;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::client::process::ProcessClientFactory;
use crate::config::loader::ConfigLoader;
use crate::config::settings::Settings;
use crate::config::xdg;
use crate::sessions::LifecycleController;
use crate::DaemonConfig;

/// Result type alias for daemon operations.
pub type DaemonResult<T> = Result<T, Box<dyn Error>>;

/// Wait for a shutdown signal (SIGINT or SIGTERM).
///
/// If SIGTERM handler registration fails, falls back to SIGINT only
/// with a warning message.
async fn wait_for_shutdown() {
    match unix_signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("received SIGINT (Ctrl+C), shutting down");
                },
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                },
            }
        }
        Err(e) => {
            warn!(error = %e, "could not register SIGTERM handler, using SIGINT only");
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "failed waiting for SIGINT");
            } else {
                info!("received SIGINT (Ctrl+C), shutting down");
            }
        }
    }
}

/// Daemonize the current process.
///
/// This function forks the process and detaches it from the terminal.
/// The parent process exits immediately with code 0, and the child
/// continues execution as a background daemon.
///
/// # Arguments
///
/// * `nochdir` - If false, changes the working directory to `/`.
///   If true, keeps the current working directory.
/// * `noclose` - If false, redirects stdin/stdout/stderr to /dev/null.
///   If true, keeps the standard file descriptors.
///
/// # Note
///
/// This function MUST be called BEFORE starting the Tokio runtime,
/// as forking after Tokio initialization corrupts global state for
/// signal handling.
pub fn daemonize_process(nochdir: bool, noclose: bool) -> DaemonResult<()> {
    match daemon(nochdir, noclose) {
        Ok(Fork::Child) => Ok(()),
        Ok(Fork::Parent(_)) => {
            std::process::exit(0);
        }
        Err(e) => Err(Box::new(std::io::Error::other(format!(
            "Failed to daemonize: {}",
            e
        )))),
    }
}

/// Run the daemon with the given configuration.
///
/// Loads the configuration file, daemonizes if requested, then starts the
/// Tokio runtime, restores on-disk sessions (when enabled) and serves the
/// socket until SIGINT/SIGTERM. On shutdown every running client is stopped;
/// credentials and records stay on disk.
///
/// # Example
///
/// ```no_run
/// use session_hub::{DaemonConfig, daemon::run_daemon};
/// use std::path::PathBuf;
///
/// let config = DaemonConfig::new(
///     PathBuf::from("/tmp/session-hub.sock"),
///     false, // foreground mode
/// );
/// run_daemon(config).expect("Failed to run daemon");
/// ```
pub fn run_daemon(config: DaemonConfig) -> DaemonResult<()> {
    // Read configuration first so errors still reach the terminal.
    let file_config = ConfigLoader::load(config.config_path.as_deref())?;
    let settings = Settings::from_config(&file_config)?;

    // Daemonize BEFORE starting the Tokio runtime.
    if config.daemonize {
        daemonize_process(false, false)?;
    }

    let log_file = Some(file_config.daemon.log_file.trim())
        .filter(|f| !f.is_empty())
        .map(xdg::expand_tilde);
    logging::init(file_config.daemon.log_level, log_file.as_deref())?;

    info!(
        socket_path = %config.socket_path.display(),
        daemonize = config.daemonize,
        sessions_dir = %settings.paths.sessions_dir.display(),
        "session hub daemon starting"
    );

    let runtime = Runtime::new().map_err(|e| {
        Box::new(std::io::Error::other(format!(
            "Failed to create Tokio runtime: {}",
            e
        ))) as Box<dyn Error>
    })?;

    runtime
        .block_on(serve(&config, settings))
        .map_err(|e| -> Box<dyn Error> { e })?;

    info!("daemon stopped");
    Ok(())
}

/// Serves the socket until a shutdown signal, then stops every client.
async fn serve(
    config: &DaemonConfig,
    settings: Settings,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let restore_on_start = settings.lifecycle.restore_on_start;
    let factory = Arc::new(ProcessClientFactory::from_settings(&settings.client));
    let controller = LifecycleController::new(settings, factory)?;

    let mut server = SocketServer::new(
        config.socket_path.to_string_lossy().to_string(),
        controller.clone(),
    );
    server.start().await?;

    if restore_on_start {
        match controller.restore().await {
            Ok(report) => info!(
                restored = report.restored.len(),
                failed = report.failed.len(),
                "restored sessions from disk"
            ),
            Err(e) => error!(error = %e, "session restore failed"),
        }
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        let _ = shutdown_tx.send(());
    });

    info!("daemon running, press Ctrl+C or send SIGTERM to stop");
    let served = server.run_with_shutdown(shutdown_rx).await;
    drop(server);

    controller.shutdown().await;
    served
}

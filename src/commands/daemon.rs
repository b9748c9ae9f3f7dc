//! Daemon lifecycle command implementations.

use std::path::Path;
use std::process::ExitCode;

use session_hub::{daemon::run_daemon, DaemonConfig};

/// Checks if daemon is already running by attempting to connect to the socket.
///
/// Returns `true` if the socket exists and accepts connections, `false` otherwise.
pub(crate) fn is_daemon_running(socket: &Path) -> bool {
    use std::os::unix::net::UnixStream;
    UnixStream::connect(socket).is_ok()
}

/// Starts the daemon unless one is already serving `config.socket_path`.
pub(crate) fn run_daemon_command(config: DaemonConfig) -> ExitCode {
    if is_daemon_running(&config.socket_path) {
        println!(
            "Reusing existing daemon at {}; no new daemon started.",
            config.socket_path.display()
        );
        return ExitCode::SUCCESS;
    }

    // 1. daemonize if requested, 2. start the runtime, 3. serve until SIGINT/SIGTERM
    if let Err(e) = run_daemon(config) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

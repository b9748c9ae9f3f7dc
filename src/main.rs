//! Session Hub - CLI entry point
//!
//! Runs the session hub daemon and talks to a running one over its Unix
//! socket.

mod commands;

use clap::{Parser, Subcommand};
use commands::*;
use session_hub::config::xdg;
use session_hub::DaemonConfig;
use std::path::PathBuf;
use std::process::ExitCode;

/// Session Hub daemon and client
#[derive(Parser)]
#[command(name = "shub")]
#[command(version, about = "Session lifecycle daemon for chat automation clients")]
struct Cli {
    /// Socket path for IPC communication
    #[arg(long, global = true, default_value_os_t = xdg::socket_path())]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the shub CLI
#[derive(Subcommand)]
enum Commands {
    /// Start the daemon process
    Daemon {
        /// Run as a background daemon (detached from terminal)
        #[arg(long)]
        daemonize: bool,

        /// Configuration file (defaults to the XDG location)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Start a session, or report the running one
    Create {
        /// Session ID
        session_id: String,
        /// Webhook receiving this session's events
        #[arg(long)]
        webhook: Option<String>,
    },

    /// Probe a session's health
    Status {
        /// Session ID
        session_id: String,
    },

    /// Print the last QR code issued for a session
    Qr {
        /// Session ID
        session_id: String,
    },

    /// Replace a session's webhook; omit the URL to clear it
    Webhook {
        /// Session ID
        session_id: String,
        /// New webhook URL
        url: Option<String>,
    },

    /// Log out and delete a session with its credentials
    Delete {
        /// Session ID
        session_id: String,
    },

    /// Delete all on-disk sessions
    Flush {
        /// Only delete sessions that are not connected
        #[arg(long)]
        only_inactive: bool,
    },

    /// List persisted and running sessions
    List,

    /// Check daemon health status
    Health,

    /// Manage configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Actions for the `config` subcommand.
#[derive(Subcommand)]
enum ConfigAction {
    /// Create default configuration file
    Init {
        /// Overwrite existing configuration (creates backup)
        #[arg(long)]
        force: bool,
    },
    /// Show configuration file path
    Path,
    /// Validate configuration file
    Validate,
}

fn main() -> ExitCode {
    // Parse CLI arguments BEFORE any fork/runtime operations
    // This ensures errors are shown to the user in the terminal
    let cli = Cli::parse();
    let socket = cli.socket;

    match cli.command {
        Commands::Daemon { daemonize, config } => {
            let mut daemon_config = DaemonConfig::new(socket, daemonize);
            if let Some(path) = config {
                daemon_config = daemon_config.with_config_path(path);
            }
            run_daemon_command(daemon_config)
        }
        Commands::Create {
            session_id,
            webhook,
        } => run_create_command(&socket, &session_id, webhook),
        Commands::Status { session_id } => run_status_command(&socket, &session_id),
        Commands::Qr { session_id } => run_qr_command(&socket, &session_id),
        Commands::Webhook { session_id, url } => run_webhook_command(&socket, &session_id, url),
        Commands::Delete { session_id } => run_delete_command(&socket, &session_id),
        Commands::Flush { only_inactive } => run_flush_command(&socket, only_inactive),
        Commands::List => run_list_command(&socket),
        Commands::Health => run_health_command(&socket),
        Commands::Config { action } => run_config_command(action),
    }
}

fn run_config_command(action: ConfigAction) -> ExitCode {
    use session_hub::config::{default, loader::ConfigLoader, settings::Settings};

    let result = match action {
        ConfigAction::Init { force } => default::create_default_config(force).map(|path| {
            println!("Created configuration at {}", path.display());
        }),
        ConfigAction::Path => {
            println!("{}", xdg::config_path().display());
            Ok(())
        }
        ConfigAction::Validate => ConfigLoader::load_default()
            .and_then(|config| Settings::from_config(&config).map(|_| config))
            .map(|config| {
                println!("Configuration is valid");
                println!("{config:#?}");
            }),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Config error: {e}");
            ExitCode::FAILURE
        }
    }
}

//! Session Hub library
//!
//! This crate runs many independent chat automation sessions side by side.
//! Each session drives an external automation client; the hub tracks its
//! lifecycle, restarts it when the browser page dies, persists per-session
//! metadata and forwards client events to per-session webhooks.
//!
//! # Platform Support
//!
//! This crate currently supports **Unix-like systems only** (Linux, macOS).
//!
//! Unix-specific features used:
//! - Unix domain sockets for IPC
//! - `fork()` for daemon process creation
//! - Unix signal handling (SIGTERM, SIGINT)

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Automation client capability, driver process backend and test fake.
pub mod client;

/// Configuration utilities including XDG path resolution.
pub mod config;

/// Daemon module providing process lifecycle management and daemonization.
pub mod daemon;

/// Session lifecycle management and event dispatch.
pub mod sessions;

/// Error types shared by the session operations.
mod error;
pub use error::*;

/// IPC wire types for JSON Lines protocol.
mod ipc;
pub use ipc::*;

/// Health status and diagnostics types.
mod health;
pub use health::*;

/// Lifecycle state of a registered session.
///
/// ```text
/// Absent --create--> Initializing --(auth event)--> AwaitingAuth --(ready)--> Connected
/// Initializing|AwaitingAuth|Connected --(page closed/error)--> Crashed
/// Crashed --(auto-restart)--> Initializing
/// Crashed --(no auto-restart)--> NotConnected
/// any --delete--> Destroyed --> Absent
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Client constructed, initialization in flight.
    Initializing,
    /// Client asked for pairing or just authenticated.
    AwaitingAuth,
    /// Client reported ready.
    Connected,
    /// Client is registered but not usable until manual action.
    NotConnected,
    /// Browser page closed or errored.
    Crashed,
    /// Torn down by a delete request.
    Destroyed,
}

impl LifecycleState {
    /// Returns `true` for states in which the page is expected to be alive.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            LifecycleState::Initializing | LifecycleState::AwaitingAuth | LifecycleState::Connected
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Initializing => "initializing",
            LifecycleState::AwaitingAuth => "awaiting_auth",
            LifecycleState::Connected => "connected",
            LifecycleState::NotConnected => "not_connected",
            LifecycleState::Crashed => "crashed",
            LifecycleState::Destroyed => "destroyed",
        };
        write!(f, "{}", s)
    }
}

/// Error type for parsing LifecycleState from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLifecycleStateError(pub String);

impl fmt::Display for ParseLifecycleStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid lifecycle state: {}", self.0)
    }
}

impl std::error::Error for ParseLifecycleStateError {}

impl FromStr for LifecycleState {
    type Err = ParseLifecycleStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initializing" => Ok(LifecycleState::Initializing),
            "awaiting_auth" => Ok(LifecycleState::AwaitingAuth),
            "connected" => Ok(LifecycleState::Connected),
            "not_connected" => Ok(LifecycleState::NotConnected),
            "crashed" => Ok(LifecycleState::Crashed),
            "destroyed" => Ok(LifecycleState::Destroyed),
            _ => Err(ParseLifecycleStateError(s.to_string())),
        }
    }
}

/// Configuration for the daemon process.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Path to the Unix socket for IPC communication.
    pub socket_path: PathBuf,
    /// Whether to run as a background daemon.
    pub daemonize: bool,
    /// Explicit configuration file; `None` means the XDG default.
    pub config_path: Option<PathBuf>,
}

impl DaemonConfig {
    /// Creates a new DaemonConfig using the default configuration file.
    pub fn new(socket_path: PathBuf, daemonize: bool) -> Self {
        Self {
            socket_path,
            daemonize,
            config_path: None,
        }
    }

    /// Uses `path` instead of the XDG default configuration file.
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }
}

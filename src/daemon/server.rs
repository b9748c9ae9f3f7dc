//! Unix Socket Server for IPC
//!
//! This module implements the Unix socket server through which the `shub`
//! CLI (or any local tool) drives the session hub. One JSON command per line
//! in, one JSON response per line out; see [`crate::IpcCommand`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use session_hub::client::process::ProcessClientFactory;
//! use session_hub::config::{schema::Config, settings::Settings};
//! use session_hub::daemon::SocketServer;
//! use session_hub::sessions::LifecycleController;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let settings = Settings::from_config(&Config::default())?;
//!     let factory = Arc::new(ProcessClientFactory::from_settings(&settings.client));
//!     let controller = LifecycleController::new(settings, factory)?;
//!     let mut server = SocketServer::new("/tmp/session-hub.sock".to_string(), controller);
//!     server.start().await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use super::handlers::{
    handle_create_command, handle_delete_command, handle_flush_command, handle_health_command,
    handle_list_command, handle_qr_command, handle_status_command, handle_sub_command,
    handle_webhook_command, DaemonState,
};
use crate::sessions::LifecycleController;
use crate::{IpcCommand, IpcCommandKind, IpcResponse, IPC_VERSION};

type ServerResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Unix socket server for daemon IPC.
///
/// The `SocketServer` handles:
/// - Socket creation and binding
/// - Stale socket cleanup on startup
/// - Graceful socket cleanup on shutdown (via Drop)
/// - Connection acceptance and handling
pub struct SocketServer {
    /// Path to the Unix socket file
    socket_path: String,
    /// The Unix listener, set after start() is called
    listener: Option<UnixListener>,
    controller: LifecycleController,
    /// Timestamp when the server was created (for uptime calculation).
    start_time: Instant,
    /// Count of currently active client connections.
    active_connections: Arc<AtomicUsize>,
}

impl SocketServer {
    /// Creates a new `SocketServer` serving `controller` at `socket_path`.
    ///
    /// The server is not started until `start()` is called.
    pub fn new(socket_path: String, controller: LifecycleController) -> Self {
        tracing::debug!(socket_path = %socket_path, "creating socket server");
        Self {
            socket_path,
            listener: None,
            controller,
            start_time: Instant::now(),
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the configured socket path.
    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Returns the count of active connections.
    pub fn active_connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Cleans up a stale socket file from a previous daemon crash.
    ///
    /// - If the file exists and a daemon is running (can connect), returns an error
    /// - If the file exists but is stale (cannot connect), removes it
    /// - If the file does not exist, does nothing
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` with `AddrInUse` if another daemon is already running.
    async fn cleanup_stale_socket(&self) -> std::io::Result<()> {
        let path = Path::new(&self.socket_path);
        if !path.exists() {
            return Ok(());
        }

        match UnixStream::connect(&self.socket_path).await {
            Ok(_) => {
                tracing::error!(socket_path = %self.socket_path, "another daemon is already running");
                Err(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    "Another daemon is already running",
                ))
            }
            Err(_) => {
                tracing::info!(socket_path = %self.socket_path, "removing stale socket file");
                fs::remove_file(path)
            }
        }
    }

    /// Starts the server by cleaning up any stale socket and binding to the socket path.
    ///
    /// This method must be called before `run()`.
    pub async fn start(&mut self) -> ServerResult<()> {
        self.cleanup_stale_socket().await?;

        if let Some(parent) = Path::new(&self.socket_path).parent() {
            fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        self.listener = Some(listener);

        tracing::info!(socket_path = %self.socket_path, "socket server started");
        Ok(())
    }

    fn state(&self) -> DaemonState {
        DaemonState {
            controller: self.controller.clone(),
            start_time: self.start_time,
            active_connections: Arc::clone(&self.active_connections),
            socket_path: self.socket_path.clone(),
        }
    }

    fn listener(&self) -> ServerResult<&UnixListener> {
        self.listener
            .as_ref()
            .ok_or_else(|| "server not started - call start() first".into())
    }

    /// Runs the server accept loop, spawning a task for each client connection.
    ///
    /// Runs until the accept loop fails.
    pub async fn run(&self) -> ServerResult<()> {
        let (_tx, rx) = broadcast::channel(1);
        self.run_with_shutdown(rx).await
    }

    /// Runs the server with graceful shutdown support.
    ///
    /// Accepts connections until `shutdown_rx` fires. Connections already
    /// being served finish on their own tasks.
    pub async fn run_with_shutdown(&self, mut shutdown_rx: broadcast::Receiver<()>) -> ServerResult<()> {
        let listener = self.listener()?;
        let daemon_state = self.state();

        tracing::info!("socket server accepting connections");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            tracing::debug!("accepted client connection");
                            let state = daemon_state.clone();
                            tokio::spawn(async move {
                                state.active_connections.fetch_add(1, Ordering::Relaxed);
                                let result = handle_client(stream, &state).await;
                                state.active_connections.fetch_sub(1, Ordering::Relaxed);
                                if let Err(e) = result {
                                    tracing::warn!(error = %e, "client handler error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("shutdown signal received, stopping server");
                    break;
                }
            }
        }

        Ok(())
    }
}

impl Drop for SocketServer {
    /// Cleans up the socket file on drop (best-effort).
    fn drop(&mut self) {
        if self.listener.is_none() {
            return;
        }
        let path = Path::new(&self.socket_path);
        if path.exists() {
            tracing::debug!(socket_path = %self.socket_path, "cleaning up socket file");
            if let Err(e) = fs::remove_file(path) {
                tracing::error!(
                    socket_path = %self.socket_path,
                    error = %e,
                    "failed to remove socket file; next daemon start may fail"
                );
            }
        }
    }
}

/// Handles a single client connection.
///
/// Reads JSON commands line by line and answers each with one JSON line.
/// `SUB` turns the connection into a notification stream until the client
/// goes away.
async fn handle_client(stream: UnixStream, state: &DaemonState) -> ServerResult<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            tracing::debug!("client disconnected");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match parse_command(trimmed) {
            Err(response) => response,
            Ok((IpcCommandKind::Sub, _)) => {
                handle_sub_command(&state.controller, &mut writer).await?;
                break;
            }
            Ok((kind, cmd)) => dispatch(kind, &cmd, state).await,
        };

        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Parses and version-checks one request line.
fn parse_command(line: &str) -> Result<(IpcCommandKind, IpcCommand), String> {
    let cmd: IpcCommand = serde_json::from_str(line)
        .map_err(|e| IpcResponse::error(format!("invalid JSON: {}", e)).to_json_line())?;
    if cmd.version != IPC_VERSION {
        return Err(IpcResponse::error(format!(
            "unsupported protocol version {} (expected {})",
            cmd.version, IPC_VERSION
        ))
        .to_json_line());
    }
    let kind = cmd
        .cmd
        .parse::<IpcCommandKind>()
        .map_err(|e| IpcResponse::error(e).to_json_line())?;
    Ok((kind, cmd))
}

async fn dispatch(kind: IpcCommandKind, cmd: &IpcCommand, state: &DaemonState) -> String {
    match kind {
        IpcCommandKind::Create => handle_create_command(cmd, state).await,
        IpcCommandKind::Status => handle_status_command(cmd, state).await,
        IpcCommandKind::Qr => handle_qr_command(cmd, state).await,
        IpcCommandKind::Webhook => handle_webhook_command(cmd, state).await,
        IpcCommandKind::Delete => handle_delete_command(cmd, state).await,
        IpcCommandKind::Flush => handle_flush_command(cmd, state).await,
        IpcCommandKind::List => handle_list_command(state).await,
        IpcCommandKind::Health => handle_health_command(state).await,
        IpcCommandKind::Sub => IpcResponse::error("SUB must be sent on its own connection").to_json_line(),
    }
}

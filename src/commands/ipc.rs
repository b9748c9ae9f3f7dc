//! IPC command implementations.
//!
//! Each `run_*` function connects to the daemon socket, sends one JSON
//! command, and prints the answer.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::ExitCode;

use serde_json::Value;
use session_hub::sessions::{FlushReport, SessionStatus, SessionSummary};
use session_hub::{format_uptime, HealthStatus, IpcCommand, IpcCommandKind, IpcResponse};

/// Sends `cmd` and returns the response payload (`Value::Null` when absent).
fn send_command(socket: &Path, cmd: &IpcCommand) -> Result<Value, String> {
    let stream = UnixStream::connect(socket)
        .map_err(|_| format!("daemon not running (cannot connect to {:?})", socket))?;
    let mut writer = stream
        .try_clone()
        .map_err(|e| format!("failed to clone unix stream: {}", e))?;
    let mut reader = BufReader::new(stream);

    let line = cmd
        .to_json_line()
        .map_err(|e| format!("failed to serialize {} command: {}", cmd.cmd, e))?;
    writer
        .write_all(line.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|_| format!("failed to send {} command", cmd.cmd))?;

    let mut response = String::new();
    reader
        .read_line(&mut response)
        .map_err(|_| "failed to read daemon response".to_string())?;

    match serde_json::from_str::<IpcResponse>(response.trim()) {
        Ok(resp) if resp.ok => Ok(resp.data.unwrap_or(Value::Null)),
        Ok(resp) => Err(resp.error.unwrap_or_else(|| "unknown error".to_string())),
        Err(e) => Err(format!("failed to parse daemon response: {}", e)),
    }
}

/// Sends `cmd` and decodes its payload as `T`.
fn request<T: serde::de::DeserializeOwned>(socket: &Path, cmd: &IpcCommand) -> Result<T, String> {
    let data = send_command(socket, cmd)?;
    serde_json::from_value(data).map_err(|e| format!("unexpected {} response: {}", cmd.cmd, e))
}

fn fail(message: impl std::fmt::Display) -> ExitCode {
    eprintln!("Error: {}", message);
    ExitCode::FAILURE
}

/// Starts a session (or reports the already running one).
pub(crate) fn run_create_command(socket: &Path, session_id: &str, webhook: Option<String>) -> ExitCode {
    let cmd = IpcCommand::new(IpcCommandKind::Create)
        .with_session(session_id)
        .with_webhook(webhook);
    match send_command(socket, &cmd) {
        Ok(data) => {
            let verb = if data["created"].as_bool().unwrap_or(false) {
                "created"
            } else {
                "already running"
            };
            println!(
                "Session {}: {} ({})",
                session_id,
                verb,
                data["state"].as_str().unwrap_or("unknown")
            );
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

/// Prints the probe result of a session. Fails when the session is not healthy.
pub(crate) fn run_status_command(socket: &Path, session_id: &str) -> ExitCode {
    let cmd = IpcCommand::new(IpcCommandKind::Status).with_session(session_id);
    match request::<SessionStatus>(socket, &cmd) {
        Ok(status) => {
            println!("Session {}", status.session_id);
            println!(
                "  State:      {}",
                status
                    .state
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "not registered".to_string())
            );
            println!(
                "  Connection: {}",
                status
                    .validation
                    .state
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            println!("  Message:    {}", status.validation.reason);
            println!(
                "  Webhook:    {}",
                status.webhook_url.as_deref().unwrap_or("-")
            );
            if status.validation.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => fail(e),
    }
}

/// Prints the last QR code issued for a session.
pub(crate) fn run_qr_command(socket: &Path, session_id: &str) -> ExitCode {
    let cmd = IpcCommand::new(IpcCommandKind::Qr).with_session(session_id);
    match send_command(socket, &cmd) {
        Ok(data) => match data["qr"].as_str() {
            Some(qr) => {
                println!("{}", qr);
                ExitCode::SUCCESS
            }
            None => fail(format!("no QR code issued for session {}", session_id)),
        },
        Err(e) => fail(e),
    }
}

/// Replaces (or with `None`, clears) the webhook of a session.
pub(crate) fn run_webhook_command(socket: &Path, session_id: &str, url: Option<String>) -> ExitCode {
    let cleared = url.is_none();
    let cmd = IpcCommand::new(IpcCommandKind::Webhook)
        .with_session(session_id)
        .with_webhook(url);
    match send_command(socket, &cmd) {
        Ok(_) if cleared => {
            println!("Webhook of {} cleared.", session_id);
            ExitCode::SUCCESS
        }
        Ok(_) => {
            println!("Webhook of {} updated.", session_id);
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

/// Deletes a session and its credentials.
pub(crate) fn run_delete_command(socket: &Path, session_id: &str) -> ExitCode {
    let cmd = IpcCommand::new(IpcCommandKind::Delete).with_session(session_id);
    match send_command(socket, &cmd) {
        Ok(data) => {
            println!(
                "Session {} deleted ({}).",
                session_id,
                data["validation"]["reason"].as_str().unwrap_or("unknown")
            );
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

/// Deletes every on-disk session, or only the unhealthy ones.
pub(crate) fn run_flush_command(socket: &Path, only_inactive: bool) -> ExitCode {
    let cmd = IpcCommand::new(IpcCommandKind::Flush).with_only_inactive(only_inactive);
    match request::<FlushReport>(socket, &cmd) {
        Ok(report) => {
            println!("Deleted: {}", join_or_dash(&report.deleted));
            println!("Kept:    {}", join_or_dash(&report.kept));
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

/// Lists persisted and running sessions.
pub(crate) fn run_list_command(socket: &Path) -> ExitCode {
    match request::<Vec<SessionSummary>>(socket, &IpcCommand::new(IpcCommandKind::List)) {
        Ok(rows) if rows.is_empty() => {
            println!("No sessions.");
            ExitCode::SUCCESS
        }
        Ok(rows) => {
            println!("{:<24} {:<14} WEBHOOK", "SESSION", "STATE");
            for row in rows {
                println!(
                    "{:<24} {:<14} {}",
                    row.session_id,
                    row.state
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "stopped".to_string()),
                    row.webhook_url.as_deref().unwrap_or("-")
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

/// Connects to the daemon socket, sends HEALTH, and displays health info.
///
/// Returns `ExitCode::SUCCESS` if the daemon is running, `ExitCode::FAILURE` if unreachable.
pub(crate) fn run_health_command(socket: &Path) -> ExitCode {
    match request::<HealthStatus>(socket, &IpcCommand::new(IpcCommandKind::Health)) {
        Ok(health) => {
            let memory_str = match health.memory_mb {
                Some(mb) => format!("{:.1} MB", mb),
                None => "N/A".to_string(),
            };
            println!("Session Hub Daemon");
            println!("  Status:      running");
            println!("  Uptime:      {}", format_uptime(health.uptime_seconds));
            println!(
                "  Sessions:    {} registered ({} connected, {} pending, {} inactive)",
                health.sessions.registered,
                health.sessions.connected,
                health.sessions.pending,
                health.sessions.inactive
            );
            println!("  Connections: {}", health.connections);
            println!("  Memory:      {}", memory_str);
            println!("  Socket:      {}", health.socket_path);
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("Session Hub Daemon");
            println!("  Status:      not running ({})", e);
            ExitCode::FAILURE
        }
    }
}

fn join_or_dash(ids: &[String]) -> String {
    if ids.is_empty() {
        "-".to_string()
    } else {
        ids.join(", ")
    }
}

//! Command handlers for the daemon socket protocol.
//!
//! Each `handle_*` function processes a single JSON IPC command received from
//! a client connection and returns a JSON Lines response string (or streams
//! data for SUB). Handlers hold no locks of their own; per-session
//! serialization happens inside [`LifecycleController`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

use crate::sessions::LifecycleController;
use crate::{
    get_memory_usage_mb, HealthStatus, IpcCommand, IpcNotification, IpcResponse, SessionCounts,
};

/// Shared daemon state passed to each client handler.
#[derive(Clone)]
pub(super) struct DaemonState {
    pub(super) controller: LifecycleController,
    pub(super) start_time: Instant,
    pub(super) active_connections: Arc<AtomicUsize>,
    pub(super) socket_path: String,
}

fn require_session_id<'a>(cmd: &'a IpcCommand, name: &str) -> Result<&'a str, String> {
    match cmd.session_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(IpcResponse::error(format!("{} requires session_id", name)).to_json_line()),
    }
}

/// Handles the CREATE command.
///
/// Expects `cmd.session_id`, optional `cmd.webhook_url`. Creating a session
/// that is already registered succeeds with `created: false`.
pub(super) async fn handle_create_command(cmd: &IpcCommand, state: &DaemonState) -> String {
    let session_id = match require_session_id(cmd, "CREATE") {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state
        .controller
        .create(session_id, cmd.webhook_url.as_deref())
        .await
    {
        Ok(outcome) => {
            let handle = outcome.handle();
            IpcResponse::success(Some(json!({
                "session_id": handle.session_id,
                "created": outcome.is_created(),
                "state": handle.state,
                "generation": handle.generation,
            })))
            .to_json_line()
        }
        Err(e) => IpcResponse::error(e.to_string()).to_json_line(),
    }
}

/// Handles the STATUS command.
///
/// Never fails for a well-formed request: unknown sessions report
/// `session_not_found` in the validation.
pub(super) async fn handle_status_command(cmd: &IpcCommand, state: &DaemonState) -> String {
    let session_id = match require_session_id(cmd, "STATUS") {
        Ok(id) => id,
        Err(response) => return response,
    };
    let status = state.controller.status(session_id).await;
    IpcResponse::success_with(&status).to_json_line()
}

/// Handles the QR command.
pub(super) async fn handle_qr_command(cmd: &IpcCommand, state: &DaemonState) -> String {
    let session_id = match require_session_id(cmd, "QR") {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.controller.qr(session_id).await {
        Ok(qr) => IpcResponse::success(Some(json!({
            "session_id": session_id,
            "qr": qr,
        })))
        .to_json_line(),
        Err(e) => IpcResponse::error(e.to_string()).to_json_line(),
    }
}

/// Handles the WEBHOOK command. A missing `webhook_url` clears the webhook.
pub(super) async fn handle_webhook_command(cmd: &IpcCommand, state: &DaemonState) -> String {
    let session_id = match require_session_id(cmd, "WEBHOOK") {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state
        .controller
        .change_webhook(session_id, cmd.webhook_url.as_deref())
        .await
    {
        Ok(()) => IpcResponse::success(Some(json!({
            "session_id": session_id,
            "webhook_url": cmd.webhook_url,
        })))
        .to_json_line(),
        Err(e) => IpcResponse::error(e.to_string()).to_json_line(),
    }
}

/// Handles the DELETE command: validates, then tears the session down.
pub(super) async fn handle_delete_command(cmd: &IpcCommand, state: &DaemonState) -> String {
    let session_id = match require_session_id(cmd, "DELETE") {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.controller.validate_and_delete(session_id).await {
        Ok(validation) => IpcResponse::success(Some(json!({
            "session_id": session_id,
            "validation": validation,
        })))
        .to_json_line(),
        Err(e) => IpcResponse::error(e.to_string()).to_json_line(),
    }
}

/// Handles the FLUSH command. `only_inactive` defaults to `false`.
pub(super) async fn handle_flush_command(cmd: &IpcCommand, state: &DaemonState) -> String {
    let only_inactive = cmd.only_inactive.unwrap_or(false);
    match state.controller.flush(only_inactive).await {
        Ok(report) => IpcResponse::success_with(&report).to_json_line(),
        Err(e) => IpcResponse::error(e.to_string()).to_json_line(),
    }
}

/// Handles the LIST command.
pub(super) async fn handle_list_command(state: &DaemonState) -> String {
    match state.controller.list().await {
        Ok(rows) => IpcResponse::success_with(&rows).to_json_line(),
        Err(e) => IpcResponse::error(e.to_string()).to_json_line(),
    }
}

/// Handles the HEALTH command.
///
/// Returns daemon health information as JSON.
pub(super) async fn handle_health_command(state: &DaemonState) -> String {
    let states = state
        .controller
        .registry()
        .list()
        .await
        .into_iter()
        .map(|handle| handle.state);

    let health = HealthStatus {
        uptime_seconds: state.start_time.elapsed().as_secs(),
        sessions: SessionCounts::from_states(states),
        connections: state.active_connections.load(Ordering::Relaxed),
        memory_mb: get_memory_usage_mb(),
        socket_path: state.socket_path.clone(),
    };
    IpcResponse::success_with(&health).to_json_line()
}

/// Handles the SUB command.
///
/// Streams one "update" notification per lifecycle transition until the
/// client disconnects. Lagging subscribers get a "warn" notification.
pub(super) async fn handle_sub_command(
    controller: &LifecycleController,
    writer: &mut tokio::net::unix::OwnedWriteHalf,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut updates = controller.subscribe();

    let ok_msg = IpcResponse::success(Some(json!("subscribed")));
    writer.write_all(ok_msg.to_json_line().as_bytes()).await?;
    writer.flush().await?;

    tracing::debug!("client subscribed to session updates");

    loop {
        let notification = match updates.recv().await {
            Ok(update) => IpcNotification::session_update(&update),
            Err(broadcast::error::RecvError::Closed) => {
                tracing::debug!("subscriber channel closed");
                break;
            }
            Err(broadcast::error::RecvError::Lagged(count)) => {
                tracing::warn!(missed = count, "subscriber lagged");
                IpcNotification::warn(format!("lagged {}", count))
            }
        };
        if write_or_disconnect(writer, &notification.to_json_line()).await {
            break;
        }
    }

    Ok(())
}

/// Writes a message to the client. Returns `true` if the client disconnected.
async fn write_or_disconnect(writer: &mut tokio::net::unix::OwnedWriteHalf, message: &str) -> bool {
    if let Err(e) = writer.write_all(message.as_bytes()).await {
        tracing::debug!(error = %e, "subscriber disconnected (write failed)");
        return true;
    }
    if let Err(e) = writer.flush().await {
        tracing::debug!(error = %e, "subscriber disconnected (flush failed)");
        return true;
    }
    false
}

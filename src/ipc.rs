//! IPC wire types for JSON Lines protocol over Unix domain sockets.

use std::fmt;
use std::str::FromStr;

use crate::sessions::SessionUpdate;
use crate::LifecycleState;

/// IPC protocol version. Included in every message for forward/backward
/// compatibility.
pub const IPC_VERSION: u32 = 1;

/// Commands understood by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcCommandKind {
    Create,
    Status,
    Qr,
    Webhook,
    Delete,
    Flush,
    List,
    Health,
    Sub,
}

impl IpcCommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IpcCommandKind::Create => "CREATE",
            IpcCommandKind::Status => "STATUS",
            IpcCommandKind::Qr => "QR",
            IpcCommandKind::Webhook => "WEBHOOK",
            IpcCommandKind::Delete => "DELETE",
            IpcCommandKind::Flush => "FLUSH",
            IpcCommandKind::List => "LIST",
            IpcCommandKind::Health => "HEALTH",
            IpcCommandKind::Sub => "SUB",
        }
    }
}

impl fmt::Display for IpcCommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IpcCommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CREATE" => Ok(IpcCommandKind::Create),
            "STATUS" => Ok(IpcCommandKind::Status),
            "QR" => Ok(IpcCommandKind::Qr),
            "WEBHOOK" => Ok(IpcCommandKind::Webhook),
            "DELETE" => Ok(IpcCommandKind::Delete),
            "FLUSH" => Ok(IpcCommandKind::Flush),
            "LIST" => Ok(IpcCommandKind::List),
            "HEALTH" => Ok(IpcCommandKind::Health),
            "SUB" => Ok(IpcCommandKind::Sub),
            _ => Err(format!("unknown command: {}", s)),
        }
    }
}

/// Incoming command from a client to the daemon.
///
/// Every message is a single JSON line:
/// `{"version": 1, "cmd": "CREATE", "session_id": "alice", ...}\n`
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct IpcCommand {
    /// Protocol version (must be [`IPC_VERSION`]).
    pub version: u32,
    /// Command name, see [`IpcCommandKind`].
    pub cmd: String,
    /// Session identifier (CREATE, STATUS, QR, WEBHOOK, DELETE).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Webhook URL (CREATE, WEBHOOK). Absent on WEBHOOK clears it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Only delete sessions whose probe failed (FLUSH).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_inactive: Option<bool>,
}

impl IpcCommand {
    /// Command of `kind` with no arguments.
    pub fn new(kind: IpcCommandKind) -> Self {
        Self {
            version: IPC_VERSION,
            cmd: kind.to_string(),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_webhook(mut self, webhook_url: Option<String>) -> Self {
        self.webhook_url = webhook_url;
        self
    }

    pub fn with_only_inactive(mut self, only_inactive: bool) -> Self {
        self.only_inactive = Some(only_inactive);
        self
    }

    /// Serializes to a JSON line (with trailing newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        Ok(format!("{}\n", serde_json::to_string(self)?))
    }
}

/// Response envelope from daemon to client.
///
/// Sent as a single JSON line: `{"version": 1, "ok": true, ...}\n`
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IpcResponse {
    /// Protocol version.
    pub version: u32,
    /// Whether the command succeeded.
    pub ok: bool,
    /// Error message when `ok` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Command-specific payload (varies by command).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl IpcResponse {
    /// Creates a success response with optional data payload.
    pub fn success(data: Option<serde_json::Value>) -> Self {
        Self {
            version: IPC_VERSION,
            ok: true,
            error: None,
            data,
        }
    }

    /// Creates a success response carrying `data` serialized as JSON.
    pub fn success_with<T: serde::Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self::success(Some(value)),
            Err(e) => Self::error(format!("failed to serialize response: {}", e)),
        }
    }

    /// Creates an error response with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            version: IPC_VERSION,
            ok: false,
            error: Some(message.into()),
            data: None,
        }
    }

    /// Serializes to a JSON line (with trailing newline).
    pub fn to_json_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("{}\n", json),
            // Only `data` can fail to serialize, and it is already a Value.
            Err(_) => "{\"version\":1,\"ok\":false,\"error\":\"serialization failed\"}\n".to_string(),
        }
    }
}

/// A SUB notification pushed from daemon to subscriber.
///
/// Sent as a single JSON line on the SUB stream.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IpcNotification {
    /// Protocol version.
    pub version: u32,
    /// Notification type: "update" or "warn".
    #[serde(rename = "type")]
    pub notification_type: String,
    /// Session identifier (for "update").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// New lifecycle state (for "update").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<LifecycleState>,
    /// Client generation the state belongs to (for "update").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    /// Warning message (for "warn").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IpcNotification {
    /// Creates an "update" notification for a lifecycle transition.
    pub fn session_update(update: &SessionUpdate) -> Self {
        Self {
            version: IPC_VERSION,
            notification_type: "update".to_string(),
            session_id: Some(update.session_id.clone()),
            state: Some(update.state),
            generation: Some(update.generation),
            message: None,
        }
    }

    /// Creates a "warn" notification.
    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            version: IPC_VERSION,
            notification_type: "warn".to_string(),
            session_id: None,
            state: None,
            generation: None,
            message: Some(message.into()),
        }
    }

    /// Serializes to a JSON line (with trailing newline).
    pub fn to_json_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("{}\n", json),
            Err(_) => "{\"version\":1,\"type\":\"warn\",\"message\":\"serialization failed\"}\n"
                .to_string(),
        }
    }
}

//! Protocol events emitted by an automation client.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

/// Catalog of client events the hub knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AuthFailure,
    Authenticated,
    Call,
    ChangeState,
    Disconnected,
    LoadingScreen,
    Message,
    MessageCreate,
    MessageAck,
    MessageReaction,
    MessageRevokeEveryone,
    Ready,
    Qr,
}

impl EventKind {
    /// Every event kind, in catalog order.
    pub const ALL: [EventKind; 13] = [
        EventKind::AuthFailure,
        EventKind::Authenticated,
        EventKind::Call,
        EventKind::ChangeState,
        EventKind::Disconnected,
        EventKind::LoadingScreen,
        EventKind::Message,
        EventKind::MessageCreate,
        EventKind::MessageAck,
        EventKind::MessageReaction,
        EventKind::MessageRevokeEveryone,
        EventKind::Ready,
        EventKind::Qr,
    ];

    /// Wire name used by the driver protocol.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::AuthFailure => "auth_failure",
            EventKind::Authenticated => "authenticated",
            EventKind::Call => "call",
            EventKind::ChangeState => "change_state",
            EventKind::Disconnected => "disconnected",
            EventKind::LoadingScreen => "loading_screen",
            EventKind::Message => "message",
            EventKind::MessageCreate => "message_create",
            EventKind::MessageAck => "message_ack",
            EventKind::MessageReaction => "message_reaction",
            EventKind::MessageRevokeEveryone => "message_revoke_everyone",
            EventKind::Ready => "ready",
            EventKind::Qr => "qr",
        }
    }

    /// Name carried in the `event` field of the webhook body.
    ///
    /// Authentication failures are reported as `status` to webhook consumers.
    pub fn webhook_name(self) -> &'static str {
        match self {
            EventKind::AuthFailure => "status",
            other => other.as_str(),
        }
    }

    /// Message-bearing events eligible for contact and media enrichment.
    pub fn is_message(self) -> bool {
        matches!(self, EventKind::Message | EventKind::MessageCreate)
    }

    /// Key of the payload object whose `id.participant` marks group traffic.
    fn subject_key(self) -> Option<&'static str> {
        match self {
            EventKind::Message | EventKind::MessageCreate => Some("message"),
            EventKind::MessageReaction => Some("reaction"),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for parsing EventKind from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventKindError(pub String);

impl fmt::Display for ParseEventKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event: {}", self.0)
    }
}

impl std::error::Error for ParseEventKindError {}

impl FromStr for EventKind {
    type Err = ParseEventKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseEventKindError(s.to_string()))
    }
}

/// One event emitted by a client, with its opaque payload.
///
/// Payloads are objects keyed by argument name, e.g. `{"message": {...}}`
/// for `message_create` or `{"percent": 40, "message": "..."}` for
/// `loading_screen`. The `qr` payload is `{"qr": "<code>"}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEvent {
    pub kind: EventKind,
    pub data: Value,
}

impl ClientEvent {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self { kind, data }
    }

    /// Builds an event from a driver wire name; unknown names yield `None`.
    pub fn from_wire(name: &str, data: Value) -> Option<Self> {
        name.parse().ok().map(|kind| Self::new(kind, data))
    }

    /// Returns `true` when the event belongs to a multi-party conversation.
    pub fn is_participant_scoped(&self) -> bool {
        let Some(key) = self.kind.subject_key() else {
            return false;
        };
        match self.data.pointer(&format!("/{key}/id/participant")) {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    /// QR code carried by a `qr` event.
    pub fn qr_code(&self) -> Option<&str> {
        if self.kind != EventKind::Qr {
            return None;
        }
        self.data
            .get("qr")
            .and_then(Value::as_str)
            .or_else(|| self.data.as_str())
    }
}

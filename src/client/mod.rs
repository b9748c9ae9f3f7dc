//! Automation client capability.
//!
//! The hub never speaks the chat protocol itself. Each session owns one
//! [`AutomationClient`] built by a [`ClientFactory`]; the client drives a
//! headless browser and reports protocol events on an ordered channel.
//!
//! Two implementations ship with the crate:
//! - [`process::ProcessClientFactory`] spawns a driver program per session
//!   and talks JSON Lines over its stdio.
//! - [`fake::FakeClientFactory`] is an in-memory stand-in for tests.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

mod event;
pub mod fake;
pub mod process;

pub use event::{ClientEvent, EventKind, ParseEventKindError};

/// Archive of pinned web versions used by [`WebVersionCache::Remote`].
const REMOTE_WEB_VERSION_ARCHIVE: &str =
    "https://raw.githubusercontent.com/wppconnect-team/wa-version/main/html";

/// Connection state as reported by the chat service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Conflict,
    Connected,
    DeprecatedVersion,
    Opening,
    Pairing,
    Proxyblock,
    SmbTosBlock,
    Timeout,
    TosBlock,
    Unlaunched,
    Unpaired,
    UnpairedIdle,
    /// Any state this build does not know about.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Conflict => "CONFLICT",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::DeprecatedVersion => "DEPRECATED_VERSION",
            ConnectionState::Opening => "OPENING",
            ConnectionState::Pairing => "PAIRING",
            ConnectionState::Proxyblock => "PROXYBLOCK",
            ConnectionState::SmbTosBlock => "SMB_TOS_BLOCK",
            ConnectionState::Timeout => "TIMEOUT",
            ConnectionState::TosBlock => "TOS_BLOCK",
            ConnectionState::Unlaunched => "UNLAUNCHED",
            ConnectionState::Unpaired => "UNPAIRED",
            ConnectionState::UnpairedIdle => "UNPAIRED_IDLE",
            ConnectionState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Errors reported by an automation client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// An operation needed a running driver before `initialize`.
    #[error("client is not initialized")]
    NotInitialized,

    /// The browser page is gone.
    #[error("browser page is closed")]
    PageClosed,

    /// The driver program could not be started.
    #[error("failed to start driver '{command}'")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The driver answered a request with an error.
    #[error("{method} failed: {message}")]
    Request { method: String, message: String },

    /// The driver sent something that is not valid protocol.
    #[error("driver protocol error: {0}")]
    Protocol(String),

    /// The driver exited while a request was pending.
    #[error("driver exited")]
    Exited,

    /// Generic failure from a client implementation.
    #[error("{0}")]
    Other(String),
}

/// Lifecycle signals of a browser page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSignal {
    Closed,
    Error(String),
}

/// Attachment downloaded from a message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MediaPayload {
    /// Declared content type.
    pub mimetype: String,
    /// Base64 encoded content.
    pub data: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub filesize: Option<u64>,
}

/// Handle to the browser page backing a client.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Returns `true` once the page has closed.
    fn is_closed(&self) -> bool;

    /// Evaluates `expression` in the page.
    async fn evaluate(&self, expression: &str) -> Result<Value, ClientError>;

    /// Subscribes to close/error signals emitted after this call.
    fn signals(&self) -> broadcast::Receiver<PageSignal>;
}

/// Capability interface of one session's automation client.
#[async_trait]
pub trait AutomationClient: Send + Sync {
    /// Launches the browser and starts the protocol handshake.
    async fn initialize(&self) -> Result<(), ClientError>;

    /// Connection state reported by the chat service.
    async fn state(&self) -> Result<ConnectionState, ClientError>;

    /// Logs the account out and closes the browser.
    ///
    /// Must not remove the credential directory; the lifecycle controller
    /// owns its deletion.
    async fn logout(&self) -> Result<(), ClientError>;

    /// Closes the browser without logging out.
    async fn destroy(&self) -> Result<(), ClientError>;

    /// Page handle, once the browser has opened one.
    fn page(&self) -> Option<Arc<dyn PageHandle>>;

    /// Returns `true` while the browser process is connected.
    fn browser_connected(&self) -> bool;

    /// Contact record for a chat id.
    async fn contact(&self, contact_id: &str) -> Result<Value, ClientError>;

    /// Profile picture URL for a chat id, if one is visible.
    async fn profile_pic_url(&self, contact_id: &str) -> Result<Option<String>, ClientError>;

    /// Downloads the attachment of `message`.
    async fn download_media(&self, message: &Value) -> Result<Option<MediaPayload>, ClientError>;
}

/// How the client obtains a pinned web version.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebVersionCache {
    None,
    Local,
    Remote { remote_path: String },
}

impl WebVersionCache {
    /// Remote cache pointing at the public archive entry for `version`.
    pub fn remote(version: &str) -> Self {
        WebVersionCache::Remote {
            remote_path: format!("{REMOTE_WEB_VERSION_ARCHIVE}/{version}.html"),
        }
    }
}

/// Options used to build one session's client.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClientOptions {
    pub session_id: String,
    /// Root under which the client keeps its `session-<id>` credentials.
    pub data_path: PathBuf,
    /// Browser fingerprint (user agent).
    pub user_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chrome_bin: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_version: Option<String>,
    pub web_version_cache: WebVersionCache,
}

/// A freshly built client and its ordered event stream.
pub struct ClientParts {
    pub client: Arc<dyn AutomationClient>,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
}

/// Builds clients for sessions.
pub trait ClientFactory: Send + Sync {
    fn build(&self, options: ClientOptions) -> Result<ClientParts, ClientError>;
}

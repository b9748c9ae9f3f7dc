//! TOML configuration schema types for Session Hub.
//!
//! All structs derive `Deserialize` and `Serialize` with sensible defaults via
//! `#[serde(default)]`. Every field is read once at daemon start; changes need
//! a restart.
//!
//! Duration fields use human-readable strings (e.g. `"30s"`, `"500ms"`)
//! parsed by the `humantime` crate in [`crate::config::settings`].

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration encompassing all sections.
///
/// Corresponds to the full TOML file structure:
/// ```toml
/// [daemon]
/// [sessions]
/// [client]
/// [webhook]
/// [media]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Daemon process settings.
    pub daemon: TomlDaemonConfig,
    /// Session lifecycle settings.
    pub sessions: SessionsConfig,
    /// Automation client driver settings.
    pub client: ClientConfig,
    /// Webhook delivery settings.
    pub webhook: WebhookConfig,
    /// Media asset store settings.
    pub media: MediaConfig,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Daemon process configuration from the TOML `[daemon]` section.
///
/// Named `TomlDaemonConfig` to avoid collision with the runtime
/// `crate::DaemonConfig` (socket path / daemonize flag).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TomlDaemonConfig {
    /// Logging verbosity, overridden by `SHUB_LOG` when set.
    pub log_level: LogLevel,
    /// Path to log file. Empty string means stderr.
    pub log_file: String,
}

impl Default for TomlDaemonConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_file: String::new(),
        }
    }
}

/// Log verbosity levels (kebab-case in TOML).
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    /// Only errors.
    Error,
    /// Errors and warnings.
    Warn,
    /// Informational messages (default).
    Info,
    /// Debug-level detail.
    Debug,
    /// Full trace output.
    Trace,
}

impl LogLevel {
    /// Returns the `EnvFilter` directive for this level.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Session lifecycle configuration from the `[sessions]` section.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SessionsConfig {
    /// Root directory holding one `session-<id>` credential directory per
    /// session. Empty means `$XDG_DATA_HOME/session-hub/sessions`.
    pub sessions_dir: String,
    /// JSON file holding session records. Empty means
    /// `$XDG_DATA_HOME/session-hub/sessions.json`.
    pub records_file: String,
    /// Restart a session when its browser page closes or errors.
    pub auto_restart: bool,
    /// Recreate sessions from credential directories at daemon start.
    pub restore_on_start: bool,
    /// Move a session to `not_connected` when client initialization fails.
    /// When false the session stays `initializing` until a crash signal.
    pub fail_on_init_error: bool,
    /// Ceiling for waiting on the client's page handle to appear.
    pub page_wait_timeout: String,
    /// Ceiling for the page responsiveness probe.
    pub probe_timeout: String,
    /// Ceiling for waiting on the browser to disconnect during deletion.
    pub disconnect_timeout: String,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            sessions_dir: String::new(),
            records_file: String::new(),
            auto_restart: true,
            restore_on_start: true,
            fail_on_init_error: false,
            page_wait_timeout: "30s".to_string(),
            probe_timeout: "30s".to_string(),
            disconnect_timeout: "30s".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Automation client driver configuration from the `[client]` section.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Driver program spawned once per session.
    pub command: String,
    /// Extra arguments passed to the driver program.
    pub args: Vec<String>,
    /// Browser executable handed to the driver. Empty means driver default.
    pub chrome_bin: String,
    /// Pinned chat web version. Empty means latest.
    pub web_version: String,
    /// Where the pinned web version is cached.
    pub web_version_cache: WebVersionCacheType,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command: "shub-driver".to_string(),
            args: Vec::new(),
            chrome_bin: String::new(),
            web_version: String::new(),
            web_version_cache: WebVersionCacheType::None,
        }
    }
}

/// Web version cache strategies (kebab-case in TOML).
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum WebVersionCacheType {
    /// No cache; the driver loads whatever the service serves.
    None,
    /// Cache fetched versions on local disk.
    Local,
    /// Load the pinned version from the public version archive.
    Remote,
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

/// Webhook delivery configuration from the `[webhook]` section.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WebhookConfig {
    /// Fallback URL for sessions without their own webhook. Empty disables.
    pub base_url: String,
    /// Event names that are never forwarded.
    pub disabled_events: Vec<String>,
    /// Per-request timeout.
    pub timeout: String,
    /// Attach contact, profile picture and media to message events.
    pub enrich_messages: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            disabled_events: Vec::new(),
            timeout: "10s".to_string(),
            enrich_messages: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// Media asset store configuration from the `[media]` section.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MediaConfig {
    /// Download and persist attachments of message events.
    pub enabled: bool,
    /// Directory for persisted attachments. Empty means
    /// `$XDG_DATA_HOME/session-hub/assets`.
    pub assets_dir: String,
    /// Base URL under which `assets/<file>` is served.
    pub public_base_url: String,
    /// Attachments larger than this many bytes are not persisted.
    pub max_attachment_size: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            assets_dir: String::new(),
            public_base_url: "http://localhost:3000".to_string(),
            max_attachment_size: 10_000_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

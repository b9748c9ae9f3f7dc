//! Default configuration template and file creation utilities.
//!
//! Provides a well-commented TOML template that matches `Config::default()`
//! and functions to write it to the XDG config path.

use std::fs;
use std::path::PathBuf;

use crate::config::error::ConfigError;
use crate::config::xdg;

// ---------------------------------------------------------------------------
// Default TOML template
// ---------------------------------------------------------------------------

/// A well-commented TOML template with all default values.
///
/// Every value here must match `Config::default()` from `schema.rs`.
/// Sections: `[daemon]`, `[sessions]`, `[client]`, `[webhook]`, `[media]`.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Session Hub Configuration
#
# This file was auto-generated with default values.
# All values shown below are the built-in defaults.
#
# Location: $XDG_CONFIG_HOME/session-hub/config.toml

# ==============================================================================
# Daemon
# ==============================================================================

[daemon]

# Logging verbosity level. SHUB_LOG overrides this when set.
# Options: "error", "warn", "info", "debug", "trace"
log_level = "info"

# Path to log file. Empty string means log to stderr.
# Tilde (~) is expanded to the user's home directory.
log_file = ""

# ==============================================================================
# Sessions
# ==============================================================================

[sessions]

# Directory holding one "session-<id>" credential directory per session.
# Empty means $XDG_DATA_HOME/session-hub/sessions
sessions_dir = ""

# JSON file with per-session webhook URL and browser fingerprint.
# Empty means $XDG_DATA_HOME/session-hub/sessions.json
records_file = ""

# Restart a session when its browser page closes or crashes.
auto_restart = true

# Recreate every session found in sessions_dir when the daemon starts.
restore_on_start = true

# When client initialization fails, move the session to "not_connected".
# When false, the session stays "initializing" until a crash is observed.
fail_on_init_error = false

# Ceiling for waiting on the client's browser page to appear.
page_wait_timeout = "30s"

# Ceiling for the page responsiveness probe used by status and delete.
probe_timeout = "30s"

# Ceiling for waiting on the browser to disconnect while deleting.
disconnect_timeout = "30s"

# ==============================================================================
# Automation client driver
# ==============================================================================

[client]

# Program spawned once per session. It speaks JSON Lines on stdin/stdout.
command = "shub-driver"

# Extra arguments for the driver program.
args = []

# Browser executable handed to the driver. Empty uses the driver default.
chrome_bin = ""

# Pin the chat web version, e.g. "2.2412.54". Empty means latest.
web_version = ""

# Cache for the pinned web version.
# Options: "none", "local", "remote"
web_version_cache = "none"

# ==============================================================================
# Webhooks
# ==============================================================================

[webhook]

# Fallback URL for sessions created without their own webhook.
# Empty disables delivery for those sessions.
base_url = ""

# Event names that are never forwarded, e.g. ["message_ack", "loading_screen"].
# Available: auth_failure, authenticated, call, change_state, disconnected,
#   loading_screen, message, message_create, message_ack, message_reaction,
#   message_revoke_everyone, ready
disabled_events = []

# Timeout for a single webhook POST.
timeout = "10s"

# Attach contact, profile picture and stored media to message events.
enrich_messages = true

# ==============================================================================
# Media
# ==============================================================================

[media]

# Download attachments of message events into assets_dir.
enabled = true

# Empty means $XDG_DATA_HOME/session-hub/assets
assets_dir = ""

# Base URL under which "assets/<file>" is served to webhook consumers.
public_base_url = "http://localhost:3000"

# Attachments larger than this many bytes are not stored.
max_attachment_size = 10000000
"#;

// ---------------------------------------------------------------------------
// File creation functions
// ---------------------------------------------------------------------------

/// Creates (or force-overwrites) the default config file.
///
/// - If the file exists and `force` is `false`, returns `ConfigError::AlreadyExists`.
/// - If the file exists and `force` is `true`, backs it up to `.toml.backup` first.
/// - Returns the path where the config was written.
pub fn create_default_config(force: bool) -> Result<PathBuf, ConfigError> {
    let path = xdg::config_path();

    if path.exists() {
        if !force {
            return Err(ConfigError::AlreadyExists { path: path.clone() });
        }
        let backup_path = path.with_extension("toml.backup");
        fs::rename(&path, &backup_path).map_err(|e| ConfigError::WriteError {
            path: backup_path.clone(),
            source: e,
        })?;
        tracing::info!("Backed up existing config to {}", backup_path.display());
    }

    write_default_config(&path)?;
    Ok(path)
}

/// Writes the default template to `path`, creating parent dirs and setting 0600 permissions.
fn write_default_config(path: &PathBuf) -> Result<(), ConfigError> {
    xdg::ensure_config_dir().map_err(|e| ConfigError::WriteError {
        path: path.clone(),
        source: e,
    })?;

    fs::write(path, DEFAULT_CONFIG_TEMPLATE).map_err(|e| ConfigError::WriteError {
        path: path.clone(),
        source: e,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| {
            ConfigError::WriteError {
                path: path.clone(),
                source: e,
            }
        })?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Platform-aware path resolution for session-hub.
//!
//! On **Linux**, follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/session-hub` or `~/.config/session-hub`
//! - Data: `$XDG_DATA_HOME/session-hub` or `~/.local/share/session-hub`
//! - Runtime/socket: `$XDG_RUNTIME_DIR` or `/tmp`
//!
//! On **macOS**, uses Apple conventions with XDG env var overrides:
//! - Config and data: `~/Library/Application Support/session-hub`
//! - Runtime/socket: `$XDG_RUNTIME_DIR` or `$TMPDIR` or `/tmp`

use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "session-hub";

/// Home directory, or `/` when it cannot be determined.
fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

/// Returns the configuration directory for session-hub.
///
/// Resolution order:
/// 1. `$XDG_CONFIG_HOME/session-hub` (if env var set, any platform)
/// 2. Platform default:
///    - Linux: `~/.config/session-hub`
///    - macOS: `~/Library/Application Support/session-hub`
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join(APP_NAME);
    }
    platform_config_dir().join(APP_NAME)
}

/// Platform-native config base directory (without XDG override).
fn platform_config_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        dirs::config_dir().unwrap_or_else(|| home_dir().join("Library/Application Support"))
    }
    #[cfg(not(target_os = "macos"))]
    {
        home_dir().join(".config")
    }
}

/// Returns the path to the main configuration file.
///
/// Resolves to `config_dir()/config.toml`.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Returns the data directory holding session credentials, records and assets.
///
/// Resolution order:
/// 1. `$XDG_DATA_HOME/session-hub` (if env var set, any platform)
/// 2. Platform default:
///    - Linux: `~/.local/share/session-hub`
///    - macOS: `~/Library/Application Support/session-hub`
pub fn data_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join(APP_NAME);
    }
    platform_data_dir().join(APP_NAME)
}

fn platform_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir().unwrap_or_else(|| home_dir().join("Library/Application Support"))
    }
    #[cfg(not(target_os = "macos"))]
    {
        home_dir().join(".local/share")
    }
}

/// Returns the runtime directory for transient files (sockets, pid files).
///
/// Resolution order:
/// 1. `$XDG_RUNTIME_DIR` (if set, any platform)
/// 2. Platform default:
///    - Linux: `/tmp` (XDG_RUNTIME_DIR is usually set by systemd)
///    - macOS: `$TMPDIR` or `/tmp`
pub fn runtime_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(xdg);
    }
    platform_runtime_dir()
}

/// Platform-native runtime directory (without XDG override).
fn platform_runtime_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        std::env::var("TMPDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
    #[cfg(not(target_os = "macos"))]
    {
        PathBuf::from("/tmp")
    }
}

/// Returns the path to the Unix domain socket.
///
/// Resolves to `runtime_dir()/session-hub.sock`.
pub fn socket_path() -> PathBuf {
    runtime_dir().join(format!("{APP_NAME}.sock"))
}

/// Expands a leading `~` in a path string to the user's home directory.
///
/// If the path does not start with `~`, it is returned as-is.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        home_dir().join(rest)
    } else if path == "~" {
        home_dir()
    } else {
        PathBuf::from(path)
    }
}

/// Creates a directory and all parent directories with mode 0700.
///
/// Equivalent to `mkdir -p` with restricted permissions.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Creates the configuration directory if it does not exist, returning its path.
pub fn ensure_config_dir() -> std::io::Result<PathBuf> {
    let dir = config_dir();
    ensure_dir(&dir)?;
    Ok(dir)
}

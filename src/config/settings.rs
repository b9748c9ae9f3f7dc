//! Runtime settings derived from the TOML schema.
//!
//! The schema keeps durations and paths as strings so the template stays
//! readable; this module turns them into typed values once, at daemon start.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::EventKind;
use crate::config::error::ConfigError;
use crate::config::schema::{Config, WebVersionCacheType};
use crate::config::xdg;

/// Cadence of every bounded polling loop (page wait, probe, disconnect wait).
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// On-disk locations.
    pub paths: PathSettings,
    /// Lifecycle controller switches and ceilings.
    pub lifecycle: LifecycleSettings,
    /// Health probe ceilings.
    pub probe: ProbeSettings,
    /// Client construction options.
    pub client: ClientSettings,
    /// Event dispatch options.
    pub webhook: WebhookSettings,
    /// Media asset store options.
    pub media: MediaSettings,
}

/// On-disk locations.
#[derive(Debug, Clone)]
pub struct PathSettings {
    /// Root of the `session-<id>` credential directories.
    pub sessions_dir: PathBuf,
    /// JSON file with session records.
    pub records_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub auto_restart: bool,
    pub restore_on_start: bool,
    pub fail_on_init_error: bool,
    pub disconnect_timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub page_wait_timeout: Duration,
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub command: String,
    pub args: Vec<String>,
    pub chrome_bin: Option<PathBuf>,
    pub web_version: Option<String>,
    pub web_version_cache: WebVersionCacheType,
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    /// Used when a session has no webhook of its own.
    pub base_url: Option<String>,
    pub disabled_events: HashSet<EventKind>,
    pub timeout: Duration,
    pub enrich_messages: bool,
}

#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub enabled: bool,
    pub assets_dir: PathBuf,
    pub public_base_url: String,
    pub max_attachment_size: u64,
}

impl Settings {
    /// Resolves `config` into runtime settings.
    ///
    /// Empty path fields fall back to the XDG data directory; durations are
    /// parsed with `humantime`; unknown event names are rejected.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let data_dir = xdg::data_dir();
        let sessions = &config.sessions;

        let disabled_events = config
            .webhook
            .disabled_events
            .iter()
            .map(|name| {
                name.parse::<EventKind>()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "webhook.disabled_events".to_string(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(Self {
            paths: PathSettings {
                sessions_dir: path_or(&sessions.sessions_dir, &data_dir, "sessions"),
                records_file: path_or(&sessions.records_file, &data_dir, "sessions.json"),
            },
            lifecycle: LifecycleSettings {
                auto_restart: sessions.auto_restart,
                restore_on_start: sessions.restore_on_start,
                fail_on_init_error: sessions.fail_on_init_error,
                disconnect_timeout: duration(
                    "sessions.disconnect_timeout",
                    &sessions.disconnect_timeout,
                )?,
                poll_interval: POLL_INTERVAL,
            },
            probe: ProbeSettings {
                page_wait_timeout: duration(
                    "sessions.page_wait_timeout",
                    &sessions.page_wait_timeout,
                )?,
                probe_timeout: duration("sessions.probe_timeout", &sessions.probe_timeout)?,
                poll_interval: POLL_INTERVAL,
            },
            client: ClientSettings {
                command: config.client.command.clone(),
                args: config.client.args.clone(),
                chrome_bin: non_empty(&config.client.chrome_bin).map(xdg::expand_tilde),
                web_version: non_empty(&config.client.web_version).map(str::to_string),
                web_version_cache: config.client.web_version_cache,
            },
            webhook: WebhookSettings {
                base_url: non_empty(&config.webhook.base_url).map(str::to_string),
                disabled_events,
                timeout: duration("webhook.timeout", &config.webhook.timeout)?,
                enrich_messages: config.webhook.enrich_messages,
            },
            media: MediaSettings {
                enabled: config.media.enabled,
                assets_dir: path_or(&config.media.assets_dir, &data_dir, "assets"),
                public_base_url: config.media.public_base_url.trim_end_matches('/').to_string(),
                max_attachment_size: config.media.max_attachment_size,
            },
        })
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn path_or(value: &str, data_dir: &Path, default_name: &str) -> PathBuf {
    match non_empty(value) {
        Some(v) => xdg::expand_tilde(v),
        None => data_dir.join(default_name),
    }
}

fn duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{value:?}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_resolve() {
        let settings = Settings::from_config(&Config::default()).expect("defaults are valid");
        assert!(settings.lifecycle.auto_restart);
        assert_eq!(settings.lifecycle.disconnect_timeout, Duration::from_secs(30));
        assert_eq!(settings.probe.poll_interval, Duration::from_millis(100));
        assert_eq!(settings.webhook.timeout, Duration::from_secs(10));
        assert!(settings.webhook.base_url.is_none());
        assert!(settings.client.chrome_bin.is_none());
    }

    #[test]
    #[serial]
    fn empty_paths_fall_back_to_data_dir() {
        let original = std::env::var("XDG_DATA_HOME").ok();
        std::env::set_var("XDG_DATA_HOME", "/srv/data");
        let settings = Settings::from_config(&Config::default()).expect("defaults are valid");
        match original {
            Some(v) => std::env::set_var("XDG_DATA_HOME", v),
            None => std::env::remove_var("XDG_DATA_HOME"),
        }
        assert_eq!(
            settings.paths.sessions_dir,
            PathBuf::from("/srv/data/session-hub/sessions")
        );
        assert_eq!(
            settings.paths.records_file,
            PathBuf::from("/srv/data/session-hub/sessions.json")
        );
        assert_eq!(
            settings.media.assets_dir,
            PathBuf::from("/srv/data/session-hub/assets")
        );
    }

    #[test]
    fn invalid_duration_names_key() {
        let mut config = Config::default();
        config.sessions.probe_timeout = "soon".to_string();
        let err = Settings::from_config(&config).expect_err("should fail");
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "sessions.probe_timeout"),
            other => panic!("expected InvalidValue, got: {other:?}"),
        }
    }

    #[test]
    fn disabled_events_are_parsed() {
        let mut config = Config::default();
        config.webhook.disabled_events = vec!["message_ack".to_string()];
        let settings = Settings::from_config(&config).expect("valid");
        assert!(settings.webhook.disabled_events.contains(&EventKind::MessageAck));
    }

    #[test]
    fn unknown_disabled_event_is_rejected() {
        let mut config = Config::default();
        config.webhook.disabled_events = vec!["group_join".to_string()];
        assert!(matches!(
            Settings::from_config(&config),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn public_base_url_drops_trailing_slash() {
        let mut config = Config::default();
        config.media.public_base_url = "https://cdn.example.com/".to_string();
        let settings = Settings::from_config(&config).expect("valid");
        assert_eq!(settings.media.public_base_url, "https://cdn.example.com");
    }
}

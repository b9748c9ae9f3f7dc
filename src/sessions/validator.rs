//! On-demand health probe for registered sessions.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::client::{AutomationClient, ConnectionState, PageHandle};
use crate::config::settings::ProbeSettings;
use crate::sessions::registry::SessionRegistry;
use crate::SessionError;

pub const REASON_NOT_FOUND: &str = "session_not_found";
pub const REASON_NOT_CONNECTED: &str = "session_not_connected";
pub const REASON_CONNECTED: &str = "session_connected";
pub const REASON_TAB_CLOSED: &str = "browser tab closed";

/// Outcome of a health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub success: bool,
    pub state: Option<ConnectionState>,
    pub reason: String,
}

impl Validation {
    pub fn not_found() -> Self {
        Self::failure(REASON_NOT_FOUND)
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            state: None,
            reason: reason.into(),
        }
    }

    pub fn not_connected(state: ConnectionState) -> Self {
        Self {
            success: false,
            state: Some(state),
            reason: REASON_NOT_CONNECTED.to_string(),
        }
    }

    pub fn connected() -> Self {
        Self {
            success: true,
            state: Some(ConnectionState::Connected),
            reason: REASON_CONNECTED.to_string(),
        }
    }

    pub fn is_not_connected(&self) -> bool {
        !self.success && self.reason == REASON_NOT_CONNECTED
    }
}

/// Determines whether a session's client is connected, hung or gone.
#[derive(Debug, Clone)]
pub struct HealthValidator {
    registry: SessionRegistry,
    settings: ProbeSettings,
}

impl HealthValidator {
    pub fn new(registry: SessionRegistry, settings: ProbeSettings) -> Self {
        Self { registry, settings }
    }

    /// Probes `session_id`. Never fails; every problem becomes a reason.
    pub async fn validate(&self, session_id: &str) -> Validation {
        let Some(handle) = self.registry.get(session_id).await else {
            return Validation::not_found();
        };
        let result = self.probe(handle.client.as_ref()).await;
        if !result.success {
            tracing::debug!(session_id, reason = %result.reason, "session validation failed");
        }
        result
    }

    async fn probe(&self, client: &dyn AutomationClient) -> Validation {
        let page = match self.wait_for_page(client).await {
            Ok(page) => page,
            Err(e) => return Validation::failure(e.to_string()),
        };

        match self.wait_responsive(page.as_ref()).await {
            Ok(true) => {}
            Ok(false) => return Validation::failure(REASON_TAB_CLOSED),
            Err(e) => return Validation::failure(e.to_string()),
        }

        match client.state().await {
            Ok(ConnectionState::Connected) => Validation::connected(),
            Ok(state) => Validation::not_connected(state),
            Err(e) => Validation::failure(e.to_string()),
        }
    }

    async fn wait_for_page(
        &self,
        client: &dyn AutomationClient,
    ) -> Result<Arc<dyn PageHandle>, SessionError> {
        let deadline = Instant::now() + self.settings.page_wait_timeout;
        loop {
            if let Some(page) = client.page() {
                return Ok(page);
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Timeout {
                    operation: "browser page",
                    after: self.settings.page_wait_timeout,
                });
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Returns `Ok(false)` as soon as the page reports closed.
    async fn wait_responsive(&self, page: &dyn PageHandle) -> Result<bool, SessionError> {
        let deadline = Instant::now() + self.settings.probe_timeout;
        loop {
            if page.is_closed() {
                return Ok(false);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = tokio::time::timeout(remaining.max(Duration::from_millis(1)), page.evaluate("1"));
            if let Ok(Ok(_)) = attempt.await {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Timeout {
                    operation: "page to respond",
                    after: self.settings.probe_timeout,
                });
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

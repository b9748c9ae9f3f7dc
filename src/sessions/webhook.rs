//! Outbound webhook delivery.
//!
//! Every forwarded event is a single JSON POST:
//!
//! ```json
//! {"event": "message_create", "sessionId": "alice", "data": {"message": {...}}}
//! ```
//!
//! Delivery is best effort. Failures are logged by [`WebhookSender::send`] and
//! never retried.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::client::EventKind;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook endpoint answered {status}")]
    Status { status: u16 },
}

/// Body of a webhook POST.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload<'a> {
    pub event: &'a str,
    pub session_id: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: &'a Value,
}

#[derive(Debug, Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// POSTs one event and reports the outcome.
    pub async fn deliver(
        &self,
        url: &str,
        session_id: &str,
        kind: EventKind,
        data: &Value,
    ) -> Result<(), DeliveryError> {
        let payload = WebhookPayload {
            event: kind.webhook_name(),
            session_id,
            data,
        };
        let response = self.client.post(url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    /// Fire-and-forget variant of [`deliver`](Self::deliver).
    pub async fn send(&self, url: &str, session_id: &str, kind: EventKind, data: &Value) {
        match self.deliver(url, session_id, kind, data).await {
            Ok(()) => tracing::trace!(session_id, event = %kind, "webhook delivered"),
            Err(e) => tracing::warn!(session_id, event = %kind, url, error = %e, "webhook delivery failed"),
        }
    }
}

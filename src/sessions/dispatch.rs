//! Per-session event dispatch.
//!
//! Each registered client gets one dispatcher task that drains the client's
//! ordered event queue. For every event the task:
//!
//! 1. applies its lifecycle effect (`qr`, `authenticated`, `ready`,
//!    `disconnected`) to the registry entry it was spawned for;
//! 2. drops it when it is `qr`, disabled, or belongs to a multi-party
//!    conversation;
//! 3. enriches message events with the peer's contact, profile picture and
//!    persisted attachment;
//! 4. looks up the session's webhook in the record store and POSTs it.
//!
//! POSTs are awaited in order, so a session's webhook sees events in the
//! order the client emitted them. Sessions never wait on each other.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::{AutomationClient, ClientEvent, EventKind};
use crate::config::settings::WebhookSettings;
use crate::sessions::media::AssetStore;
use crate::sessions::records::SessionStore;
use crate::sessions::registry::SessionRegistry;
use crate::sessions::webhook::WebhookSender;
use crate::LifecycleState;

#[derive(Debug, Clone)]
pub struct EventDispatcher {
    registry: SessionRegistry,
    store: SessionStore,
    sender: WebhookSender,
    /// `None` when attachments are not persisted.
    assets: Option<AssetStore>,
    settings: WebhookSettings,
}

/// Where a dispatcher task delivers for.
struct Target {
    session_id: String,
    generation: u64,
    client: Arc<dyn AutomationClient>,
    enabled: HashSet<EventKind>,
}

impl EventDispatcher {
    pub fn new(
        registry: SessionRegistry,
        store: SessionStore,
        sender: WebhookSender,
        assets: Option<AssetStore>,
        settings: WebhookSettings,
    ) -> Self {
        Self {
            registry,
            store,
            sender,
            assets,
            settings,
        }
    }

    /// Event kinds forwarded to webhooks. `qr` is never forwarded.
    pub fn enabled_events(&self) -> HashSet<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|kind| *kind != EventKind::Qr && !self.settings.disabled_events.contains(kind))
            .collect()
    }

    /// Starts the dispatcher task for one client generation.
    ///
    /// The task ends when the client drops its event sender or the task is
    /// aborted.
    pub fn spawn(
        &self,
        session_id: &str,
        generation: u64,
        client: Arc<dyn AutomationClient>,
        mut events: mpsc::UnboundedReceiver<ClientEvent>,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();
        let target = Target {
            session_id: session_id.to_string(),
            generation,
            client,
            enabled: self.enabled_events(),
        };
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                dispatcher.handle(&target, event).await;
            }
            tracing::debug!(session_id = %target.session_id, "event stream closed");
        })
    }

    async fn handle(&self, target: &Target, event: ClientEvent) {
        let session_id = target.session_id.as_str();
        tracing::trace!(session_id, event = %event.kind, "client event");

        self.apply_lifecycle(target, &event).await;

        if event.kind == EventKind::Qr || !target.enabled.contains(&event.kind) {
            return;
        }
        if event.is_participant_scoped() {
            tracing::debug!(session_id, event = %event.kind, "dropping group event");
            return;
        }

        let mut data = event.data;
        if event.kind.is_message() && self.settings.enrich_messages {
            self.enrich(target, &mut data).await;
        }

        let Some(url) = self.resolve_webhook(session_id).await else {
            tracing::trace!(session_id, event = %event.kind, "no webhook configured");
            return;
        };
        self.sender.send(&url, session_id, event.kind, &data).await;
    }

    async fn apply_lifecycle(&self, target: &Target, event: &ClientEvent) {
        let (id, generation) = (target.session_id.as_str(), target.generation);
        let next = match event.kind {
            EventKind::Qr => {
                if let Some(qr) = event.qr_code() {
                    self.registry.set_qr(id, generation, qr.to_string()).await;
                }
                LifecycleState::AwaitingAuth
            }
            EventKind::Authenticated => LifecycleState::AwaitingAuth,
            EventKind::Ready => LifecycleState::Connected,
            _ => return,
        };
        self.registry.advance(id, generation, next).await;
    }

    /// Current webhook of the session, falling back to the base URL.
    async fn resolve_webhook(&self, session_id: &str) -> Option<String> {
        let own = match self.store.find(session_id).await {
            Ok(record) => record.and_then(|r| r.webhook_url),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "failed to read session records");
                None
            }
        };
        own.filter(|url| !url.trim().is_empty())
            .or_else(|| self.settings.base_url.clone())
    }

    /// Adds `contact`, `profilePicUrl` and `file` to the message in `data`.
    async fn enrich(&self, target: &Target, data: &mut Value) {
        let session_id = target.session_id.as_str();
        let Some(message) = data.get_mut("message").and_then(Value::as_object_mut) else {
            return;
        };

        let from_me = message
            .get("fromMe")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let peer_key = if from_me { "to" } else { "from" };
        let peer = message
            .get("_data")
            .and_then(|d| d.get(peer_key))
            .or_else(|| message.get(peer_key))
            .and_then(chat_id)
            .map(str::to_string);

        if let Some(peer) = peer {
            match target.client.contact(&peer).await {
                Ok(contact) => {
                    message.insert("contact".to_string(), contact);
                }
                Err(e) => tracing::warn!(session_id, peer = %peer, error = %e, "contact lookup failed"),
            }
            match target.client.profile_pic_url(&peer).await {
                Ok(url) => {
                    message.insert(
                        "profilePicUrl".to_string(),
                        url.map(Value::String).unwrap_or(Value::Null),
                    );
                }
                Err(e) => tracing::warn!(session_id, peer = %peer, error = %e, "profile picture lookup failed"),
            }
        }

        let has_media = message
            .get("hasMedia")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let Some(assets) = self.assets.as_ref().filter(|_| has_media) else {
            return;
        };
        let snapshot = Value::Object(message.clone());
        let media = match target.client.download_media(&snapshot).await {
            Ok(Some(media)) => media,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "media download failed");
                return;
            }
        };
        match assets.store(&media).await {
            Ok(stored) => match serde_json::to_value(&stored) {
                Ok(file) => {
                    message.insert("file".to_string(), file);
                }
                Err(e) => tracing::warn!(session_id, error = %e, "failed to encode media reference"),
            },
            Err(e) => tracing::warn!(session_id, error = %e, "failed to persist media"),
        }
    }
}

/// Chat id from either a plain string or a `{"_serialized": ...}` object.
fn chat_id(value: &Value) -> Option<&str> {
    value
        .as_str()
        .or_else(|| value.get("_serialized").and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests;

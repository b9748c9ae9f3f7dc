//! Session lifecycle controller.
//!
//! Orchestrates creation, restore on boot, crash restarts, deletion and flush.
//! Every mutating operation on one identifier runs under that identifier's
//! [`KeyedLocks`] entry, so a crash restart can never interleave with an
//! explicit delete of the same session.
//!
//! ```text
//! Absent --create--> Initializing --(qr/authenticated)--> AwaitingAuth --(ready)--> Connected
//! Initializing|AwaitingAuth|Connected --(page closed/error)--> Crashed
//! Crashed --(auto_restart)--> Initializing
//! Crashed --(no auto_restart)--> NotConnected
//! any --delete--> Destroyed --> Absent
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::{
    AutomationClient, ClientFactory, ClientOptions, PageSignal, WebVersionCache,
};
use crate::config::schema::WebVersionCacheType;
use crate::config::settings::Settings;
use crate::sessions::dispatch::EventDispatcher;
use crate::sessions::fingerprint::desktop_user_agent;
use crate::sessions::locks::KeyedLocks;
use crate::sessions::media::AssetStore;
use crate::sessions::paths::CredentialStore;
use crate::sessions::records::SessionStore;
use crate::sessions::registry::{SessionHandle, SessionRegistry, SessionTasks, SessionUpdate};
use crate::sessions::validator::{HealthValidator, Validation};
use crate::sessions::webhook::{DeliveryError, WebhookSender};
use crate::{LifecycleState, SessionError};

/// Result of [`LifecycleController::create`].
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// A new client was built and registered.
    Created(SessionHandle),
    /// The session was already registered; nothing changed.
    Existing(SessionHandle),
}

impl CreateOutcome {
    pub fn handle(&self) -> &SessionHandle {
        match self {
            CreateOutcome::Created(handle) | CreateOutcome::Existing(handle) => handle,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Sessions handled by a flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub deleted: Vec<String>,
    pub kept: Vec<String>,
}

/// Sessions handled by a restore scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    /// Already registered in this process.
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub state: Option<LifecycleState>,
    pub validation: Validation,
    pub webhook_url: Option<String>,
}

/// One row of the session listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    /// `None` when the session is persisted but not running here.
    pub state: Option<LifecycleState>,
    pub webhook_url: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

struct Inner {
    registry: SessionRegistry,
    store: SessionStore,
    credentials: CredentialStore,
    validator: HealthValidator,
    dispatcher: EventDispatcher,
    factory: Arc<dyn ClientFactory>,
    locks: KeyedLocks,
    settings: Settings,
}

/// Owns the registry and every session transition.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("registry", &self.inner.registry)
            .field("records", &self.inner.store.path())
            .field("sessions_dir", &self.inner.credentials.root())
            .finish()
    }
}

impl LifecycleController {
    /// Wires the controller and its collaborators from `settings`.
    pub fn new(settings: Settings, factory: Arc<dyn ClientFactory>) -> Result<Self, DeliveryError> {
        let registry = SessionRegistry::new();
        let store = SessionStore::new(&settings.paths.records_file);
        let credentials = CredentialStore::new(&settings.paths.sessions_dir);
        let validator = HealthValidator::new(registry.clone(), settings.probe.clone());
        let assets = settings
            .media
            .enabled
            .then(|| AssetStore::from_settings(&settings.media));
        let dispatcher = EventDispatcher::new(
            registry.clone(),
            store.clone(),
            WebhookSender::new(settings.webhook.timeout)?,
            assets,
            settings.webhook.clone(),
        );
        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                store,
                credentials,
                validator,
                dispatcher,
                factory,
                locks: KeyedLocks::new(),
                settings,
            }),
        })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.inner.registry.subscribe()
    }

    /// Starts a session, or returns the registered one unchanged.
    ///
    /// Returns as soon as the client is registered; initialization continues
    /// in the background and its failures are only logged.
    pub async fn create(
        &self,
        session_id: &str,
        webhook_url: Option<&str>,
    ) -> Result<CreateOutcome, SessionError> {
        let id = normalize_id(session_id)?;
        let webhook_url = webhook_url.map(str::trim).filter(|u| !u.is_empty());
        if let Some(url) = webhook_url {
            check_webhook_url(url)?;
        }
        self.inner.credentials.check_identifier(id)?;

        let _guard = self.inner.locks.lock(id).await;
        self.create_locked(id, webhook_url).await
    }

    async fn create_locked(
        &self,
        id: &str,
        webhook_url: Option<&str>,
    ) -> Result<CreateOutcome, SessionError> {
        let inner = &self.inner;
        if let Some(existing) = inner.registry.get(id).await {
            return Ok(CreateOutcome::Existing(existing));
        }

        let record = inner.store.find(id).await?;
        let saved_webhook = record.as_ref().and_then(|r| r.webhook_url.clone());
        let saved_fingerprint = record.as_ref().and_then(|r| r.client_fingerprint.clone());
        let fingerprint = saved_fingerprint
            .clone()
            .unwrap_or_else(desktop_user_agent);

        let webhook_changed = webhook_url.is_some_and(|url| saved_webhook.as_deref() != Some(url));
        if webhook_changed || saved_fingerprint.is_none() {
            let webhook = webhook_url.map(str::to_string).or(saved_webhook);
            inner
                .store
                .upsert(id, webhook, Some(fingerprint.clone()))
                .await?;
        }

        let parts = inner.factory.build(self.client_options(id, fingerprint))?;
        let client = parts.client;
        let generation = inner.registry.next_generation();
        inner
            .registry
            .put(id, Arc::clone(&client), generation)
            .await;

        let dispatcher = inner
            .dispatcher
            .spawn(id, generation, Arc::clone(&client), parts.events);
        let watcher = self.spawn_crash_watch(id, generation, Arc::clone(&client));
        inner
            .registry
            .attach_tasks(
                id,
                generation,
                SessionTasks::new(dispatcher.abort_handle(), watcher.abort_handle()),
            )
            .await;
        self.spawn_initialize(id, generation, Arc::clone(&client));

        tracing::info!(session_id = id, generation, "session created");
        let handle = inner
            .registry
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound {
                session_id: id.to_string(),
            })?;
        Ok(CreateOutcome::Created(handle))
    }

    fn client_options(&self, id: &str, user_agent: String) -> ClientOptions {
        let client = &self.inner.settings.client;
        let web_version_cache = match (&client.web_version, client.web_version_cache) {
            (Some(version), WebVersionCacheType::Remote) => WebVersionCache::remote(version),
            (Some(_), WebVersionCacheType::Local) => WebVersionCache::Local,
            _ => WebVersionCache::None,
        };
        ClientOptions {
            session_id: id.to_string(),
            data_path: self.inner.credentials.root().to_path_buf(),
            user_agent,
            chrome_bin: client.chrome_bin.clone(),
            web_version: client.web_version.clone(),
            web_version_cache,
        }
    }

    fn spawn_initialize(&self, id: &str, generation: u64, client: Arc<dyn AutomationClient>) {
        let registry = self.inner.registry.clone();
        let fail_on_init_error = self.inner.settings.lifecycle.fail_on_init_error;
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = client.initialize().await {
                tracing::warn!(session_id = %id, error = %e, "client initialization failed");
                if fail_on_init_error {
                    registry
                        .advance(&id, generation, LifecycleState::NotConnected)
                        .await;
                }
            }
        });
    }

    /// Waits for the client's page, then for its first close or error signal.
    fn spawn_crash_watch(
        &self,
        id: &str,
        generation: u64,
        client: Arc<dyn AutomationClient>,
    ) -> JoinHandle<()> {
        let controller = self.clone();
        let poll = self.inner.settings.lifecycle.poll_interval;
        let id = id.to_string();
        tokio::spawn(async move {
            let page = loop {
                if let Some(page) = client.page() {
                    break page;
                }
                tokio::time::sleep(poll).await;
            };
            let mut signals = page.signals();
            let reason = if page.is_closed() {
                "closed".to_string()
            } else {
                match signals.recv().await {
                    Ok(PageSignal::Error(message)) => format!("error: {message}"),
                    Ok(PageSignal::Closed) | Err(_) => "closed".to_string(),
                }
            };
            tracing::warn!(session_id = %id, generation, reason = %reason, "browser page lost");
            // Runs detached: this task is aborted when the entry goes away.
            tokio::spawn(async move { controller.handle_crash(&id, generation).await });
        })
    }

    async fn handle_crash(&self, id: &str, generation: u64) {
        let inner = &self.inner;
        let _guard = inner.locks.lock(id).await;

        let Some(handle) = inner.registry.get(id).await else {
            return;
        };
        if handle.generation != generation || !handle.state.is_running() {
            tracing::debug!(session_id = id, generation, "ignoring stale crash signal");
            return;
        }
        inner
            .registry
            .set_state(id, generation, LifecycleState::Crashed)
            .await;

        if !inner.settings.lifecycle.auto_restart {
            inner
                .registry
                .set_state(id, generation, LifecycleState::NotConnected)
                .await;
            return;
        }

        inner.registry.remove(id).await;
        if let Err(e) = handle.client.destroy().await {
            tracing::debug!(session_id = id, error = %e, "ignoring destroy failure of crashed client");
        }
        match self.create_locked(id, None).await {
            Ok(outcome) => {
                tracing::info!(session_id = id, generation = outcome.handle().generation, "session restarted");
            }
            Err(e) => tracing::error!(session_id = id, error = %e, "failed to restart session"),
        }
    }

    /// Starts every on-disk session that is not registered yet.
    pub async fn restore(&self) -> Result<RestoreReport, SessionError> {
        let mut report = RestoreReport::default();
        for id in self.inner.credentials.list_session_ids().await? {
            if self.inner.registry.has(&id).await {
                report.skipped.push(id);
                continue;
            }
            match self.create(&id, None).await {
                Ok(_) => {
                    tracing::info!(session_id = %id, "restored session");
                    report.restored.push(id);
                }
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "failed to restore session");
                    report.failed.push(id);
                }
            }
        }
        Ok(report)
    }

    /// Probes a session. Never fails.
    pub async fn validate(&self, session_id: &str) -> Validation {
        self.inner.validator.validate(session_id.trim()).await
    }

    /// Tears a session down according to a prior [`validate`](Self::validate)
    /// result.
    ///
    /// Logs out connected clients and destroys `session_not_connected` ones;
    /// any other outcome discards the client without either call. Then waits
    /// for the browser to disconnect and removes the credential directory,
    /// the record and finally the registry entry. The directory is never
    /// removed while the browser is still connected. Each step checks its
    /// resource first, so a failed delete can simply be retried.
    ///
    /// Returns `false` when the session was not registered.
    pub async fn delete(&self, session_id: &str, validation: &Validation) -> Result<bool, SessionError> {
        let id = normalize_id(session_id)?;
        self.inner.credentials.check_identifier(id)?;

        let _guard = self.inner.locks.lock(id).await;
        self.delete_locked(id, validation).await
    }

    async fn delete_locked(&self, id: &str, validation: &Validation) -> Result<bool, SessionError> {
        let inner = &self.inner;
        let Some(handle) = inner.registry.get(id).await else {
            return Ok(false);
        };
        inner.registry.detach_crash_watch(id).await;

        if handle.state != LifecycleState::Destroyed {
            if validation.success {
                tracing::info!(session_id = id, "logging out session");
                handle.client.logout().await?;
            } else if validation.is_not_connected() {
                tracing::info!(session_id = id, "destroying session");
                handle.client.destroy().await?;
            } else {
                tracing::info!(session_id = id, reason = %validation.reason, "discarding client");
            }
            inner
                .registry
                .set_state(id, handle.generation, LifecycleState::Destroyed)
                .await;
        }
        self.wait_for_disconnect(handle.client.as_ref()).await?;

        inner.credentials.remove_session_dir(id).await?;
        inner.store.remove(id).await?;
        inner.registry.remove(id).await;
        tracing::info!(session_id = id, "session deleted");
        Ok(true)
    }

    async fn wait_for_disconnect(&self, client: &dyn AutomationClient) -> Result<(), SessionError> {
        let lifecycle = &self.inner.settings.lifecycle;
        let deadline = Instant::now() + lifecycle.disconnect_timeout;
        while client.browser_connected() {
            if Instant::now() >= deadline {
                return Err(SessionError::Timeout {
                    operation: "browser disconnect",
                    after: lifecycle.disconnect_timeout,
                });
            }
            tokio::time::sleep(lifecycle.poll_interval).await;
        }
        Ok(())
    }

    /// Validates, then deletes. Returns the validation that drove teardown.
    ///
    /// Both steps run under the session lock, so a crash restart cannot
    /// swap the client between probe and teardown.
    pub async fn validate_and_delete(&self, session_id: &str) -> Result<Validation, SessionError> {
        let id = normalize_id(session_id)?;
        self.inner.credentials.check_identifier(id)?;

        let _guard = self.inner.locks.lock(id).await;
        let validation = self.inner.validator.validate(id).await;
        self.delete_locked(id, &validation).await?;
        Ok(validation)
    }

    /// Deletes on-disk sessions one after another; with `only_inactive`, only
    /// those whose validation failed. Stops at the first error.
    pub async fn flush(&self, only_inactive: bool) -> Result<FlushReport, SessionError> {
        let mut report = FlushReport::default();
        for id in self.inner.credentials.list_session_ids().await? {
            self.inner.credentials.check_identifier(&id)?;
            let _guard = self.inner.locks.lock(&id).await;
            let validation = self.inner.validator.validate(&id).await;
            if only_inactive && validation.success {
                report.kept.push(id);
                continue;
            }
            if self.delete_locked(&id, &validation).await? {
                report.deleted.push(id);
            } else {
                report.kept.push(id);
            }
        }
        tracing::info!(
            deleted = report.deleted.len(),
            kept = report.kept.len(),
            only_inactive,
            "flush finished"
        );
        Ok(report)
    }

    /// Replaces a session's webhook; `None` clears it.
    pub async fn change_webhook(
        &self,
        session_id: &str,
        webhook_url: Option<&str>,
    ) -> Result<(), SessionError> {
        let id = normalize_id(session_id)?;
        let webhook_url = webhook_url.map(str::trim).filter(|u| !u.is_empty());
        if let Some(url) = webhook_url {
            check_webhook_url(url)?;
        }

        let _guard = self.inner.locks.lock(id).await;
        let url = webhook_url.map(str::to_string);
        if self.inner.store.change_webhook(id, url.clone()).await? {
            return Ok(());
        }
        if self.inner.registry.has(id).await {
            self.inner.store.upsert(id, url, None).await?;
            return Ok(());
        }
        Err(SessionError::NotFound {
            session_id: id.to_string(),
        })
    }

    pub async fn status(&self, session_id: &str) -> SessionStatus {
        let id = session_id.trim();
        let validation = self.inner.validator.validate(id).await;
        let state = self.inner.registry.get(id).await.map(|h| h.state);
        let webhook_url = if id.is_empty() {
            None
        } else {
            match self.inner.store.find(id).await {
                Ok(record) => record.and_then(|r| r.webhook_url),
                Err(e) => {
                    tracing::warn!(session_id = id, error = %e, "failed to read session records");
                    None
                }
            }
        };
        SessionStatus {
            session_id: id.to_string(),
            state,
            validation,
            webhook_url,
        }
    }

    /// Last QR code issued for a registered session.
    pub async fn qr(&self, session_id: &str) -> Result<Option<String>, SessionError> {
        let id = normalize_id(session_id)?;
        self.inner
            .registry
            .get(id)
            .await
            .map(|h| h.qr)
            .ok_or_else(|| SessionError::NotFound {
                session_id: id.to_string(),
            })
    }

    /// Persisted and running sessions, merged and sorted by identifier.
    pub async fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let mut rows: BTreeMap<String, SessionSummary> = BTreeMap::new();
        for record in self.inner.store.list().await? {
            let id = record.session_id.trim().to_string();
            rows.insert(
                id.clone(),
                SessionSummary {
                    session_id: id,
                    state: None,
                    webhook_url: record.webhook_url,
                    since: None,
                },
            );
        }
        for handle in self.inner.registry.list().await {
            let row = rows
                .entry(handle.session_id.clone())
                .or_insert_with(|| SessionSummary {
                    session_id: handle.session_id.clone(),
                    state: None,
                    webhook_url: None,
                    since: None,
                });
            row.state = Some(handle.state);
            row.since = Some(handle.since);
        }
        Ok(rows.into_values().collect())
    }

    /// Stops every running client without touching credentials or records.
    pub async fn shutdown(&self) {
        let handles = self.inner.registry.list().await;
        let count = handles.len();
        let teardowns = handles.into_iter().map(|handle| async move {
            let id = handle.session_id.as_str();
            let _guard = self.inner.locks.lock(id).await;
            let Some(current) = self.inner.registry.remove(id).await else {
                return;
            };
            if let Err(e) = current.client.destroy().await {
                tracing::warn!(session_id = id, error = %e, "failed to stop client during shutdown");
            }
        });
        futures::future::join_all(teardowns).await;
        tracing::info!(sessions = count, "all sessions stopped");
    }
}

fn normalize_id(session_id: &str) -> Result<&str, SessionError> {
    let id = session_id.trim();
    if id.is_empty() {
        return Err(SessionError::MissingSessionId);
    }
    Ok(id)
}

fn check_webhook_url(url: &str) -> Result<(), SessionError> {
    let invalid = || SessionError::InvalidWebhookUrl {
        url: url.to_string(),
    };
    let parsed = reqwest::Url::parse(url).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests;

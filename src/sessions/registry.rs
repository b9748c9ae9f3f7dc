//! In-memory registry of running sessions.
//!
//! The registry is the only place a client handle can be looked up by
//! identifier. It holds one entry per session, stamped with the generation of
//! the client that currently backs it, so background work armed for an older
//! client can tell that it has been superseded. Lifecycle state changes are
//! broadcast to subscribers.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tokio::task::AbortHandle;

use crate::client::AutomationClient;
use crate::LifecycleState;

/// Default capacity for the update notification channel.
const DEFAULT_SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle change of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUpdate {
    pub session_id: String,
    pub state: LifecycleState,
    pub generation: u64,
}

/// Background tasks bound to one registered client. Dropping aborts them.
#[derive(Default)]
pub struct SessionTasks {
    dispatcher: Option<AbortHandle>,
    crash_watch: Option<AbortHandle>,
}

impl SessionTasks {
    pub fn new(dispatcher: AbortHandle, crash_watch: AbortHandle) -> Self {
        Self {
            dispatcher: Some(dispatcher),
            crash_watch: Some(crash_watch),
        }
    }

    fn detach_crash_watch(&mut self) -> bool {
        match self.crash_watch.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for SessionTasks {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.take() {
            handle.abort();
        }
        self.detach_crash_watch();
    }
}

struct RegisteredSession {
    client: Arc<dyn AutomationClient>,
    state: LifecycleState,
    generation: u64,
    qr: Option<String>,
    since: DateTime<Utc>,
    tasks: SessionTasks,
}

/// Read-only view of a registered session.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub client: Arc<dyn AutomationClient>,
    pub state: LifecycleState,
    pub generation: u64,
    /// Whether the event dispatcher is attached to this client.
    pub events_active: bool,
    /// Last QR code issued by the client.
    pub qr: Option<String>,
    /// When the session entered its current state.
    pub since: DateTime<Utc>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("events_active", &self.events_active)
            .field("qr", &self.qr.is_some())
            .field("since", &self.since)
            .finish()
    }
}

impl SessionHandle {
    /// Returns `true` when both handles refer to the same client instance.
    pub fn same_client(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.client, &other.client)
    }
}

#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, RegisteredSession>>>,
    generations: Arc<AtomicU64>,
    update_tx: broadcast::Sender<SessionUpdate>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("generations", &self.generations)
            .field("subscriber_count", &self.update_tx.receiver_count())
            .finish()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (update_tx, _rx) = broadcast::channel(DEFAULT_SUBSCRIBER_CHANNEL_CAPACITY);
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(1)),
            update_tx,
        }
    }

    /// Allocates a generation number for a newly built client.
    pub fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.update_tx.subscribe()
    }

    fn broadcast(&self, session_id: &str, state: LifecycleState, generation: u64) {
        let update = SessionUpdate {
            session_id: session_id.to_string(),
            state,
            generation,
        };
        match self.update_tx.send(update) {
            Ok(count) => tracing::trace!("Broadcast update sent to {} subscribers", count),
            Err(_) => tracing::trace!("No subscribers for session update broadcast"),
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map(|s| view(session_id, s))
    }

    pub async fn has(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Registers `client` in the `Initializing` state, replacing any entry.
    pub async fn put(
        &self,
        session_id: &str,
        client: Arc<dyn AutomationClient>,
        generation: u64,
    ) -> SessionHandle {
        let entry = RegisteredSession {
            client,
            state: LifecycleState::Initializing,
            generation,
            qr: None,
            since: Utc::now(),
            tasks: SessionTasks::default(),
        };
        let handle = view(session_id, &entry);
        let replaced = self
            .sessions
            .write()
            .await
            .insert(session_id.to_string(), entry);
        if replaced.is_some() {
            tracing::debug!(session_id, "replaced registry entry");
        }
        self.broadcast(session_id, LifecycleState::Initializing, generation);
        handle
    }

    /// Binds background tasks to the entry of `generation`.
    ///
    /// Returns `false` (and aborts the tasks) when that generation is no
    /// longer registered.
    pub async fn attach_tasks(&self, session_id: &str, generation: u64, tasks: SessionTasks) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(entry) if entry.generation == generation => {
                entry.tasks = tasks;
                true
            }
            _ => false,
        }
    }

    /// Stops the crash watcher so teardown cannot trigger a restart.
    pub async fn detach_crash_watch(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions
            .get_mut(session_id)
            .is_some_and(|entry| entry.tasks.detach_crash_watch())
    }

    /// Moves the entry of `generation` to `state`. Stale generations are
    /// ignored and yield `false`.
    pub async fn set_state(&self, session_id: &str, generation: u64, state: LifecycleState) -> bool {
        self.transition(session_id, generation, state, false).await
    }

    /// Like [`set_state`](Self::set_state), but leaves sessions that are no
    /// longer running untouched. Used for transitions driven by client
    /// events, which may arrive after a crash or teardown.
    pub async fn advance(&self, session_id: &str, generation: u64, state: LifecycleState) -> bool {
        self.transition(session_id, generation, state, true).await
    }

    async fn transition(
        &self,
        session_id: &str,
        generation: u64,
        state: LifecycleState,
        only_running: bool,
    ) -> bool {
        {
            let mut sessions = self.sessions.write().await;
            let Some(entry) = sessions.get_mut(session_id) else {
                return false;
            };
            if entry.generation != generation || (only_running && !entry.state.is_running()) {
                return false;
            }
            if entry.state == state {
                return true;
            }
            entry.state = state;
            entry.since = Utc::now();
        }
        tracing::debug!(session_id, %state, "session state changed");
        self.broadcast(session_id, state, generation);
        true
    }

    pub async fn set_qr(&self, session_id: &str, generation: u64, qr: String) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(entry) if entry.generation == generation => {
                entry.qr = Some(qr);
                true
            }
            _ => false,
        }
    }

    /// Removes the entry, aborting its background tasks.
    pub async fn remove(&self, session_id: &str) -> Option<SessionHandle> {
        let removed = self.sessions.write().await.remove(session_id)?;
        let handle = view(session_id, &removed);
        drop(removed);
        self.broadcast(session_id, LifecycleState::Destroyed, handle.generation);
        Some(handle)
    }

    /// All registered sessions, sorted by identifier.
    pub async fn list(&self) -> Vec<SessionHandle> {
        let sessions = self.sessions.read().await;
        let mut handles: Vec<_> = sessions.iter().map(|(id, s)| view(id, s)).collect();
        handles.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        handles
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

fn view(session_id: &str, entry: &RegisteredSession) -> SessionHandle {
    SessionHandle {
        session_id: session_id.to_string(),
        client: Arc::clone(&entry.client),
        state: entry.state,
        generation: entry.generation,
        events_active: entry.tasks.dispatcher.is_some(),
        qr: entry.qr.clone(),
        since: entry.since,
    }
}

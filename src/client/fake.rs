//! In-memory automation client for tests and dry runs.
//!
//! [`FakeClientFactory`] records every client it builds so tests can reach
//! into a session's client, emit events, close its page or inspect how many
//! times `logout`/`destroy` were called.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use super::{
    AutomationClient, ClientError, ClientEvent, ClientFactory, ClientOptions, ClientParts,
    ConnectionState, EventKind, MediaPayload, PageHandle, PageSignal,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a fake client behaves.
#[derive(Debug, Clone)]
pub struct FakeBehavior {
    /// State reported once initialized.
    pub state: ConnectionState,
    /// Make `initialize` fail.
    pub fail_initialize: bool,
    /// Make `destroy` fail (the browser still goes away).
    pub fail_destroy: bool,
    /// Open a page during `initialize`.
    pub page_on_initialize: bool,
    /// Disconnect the browser on `logout`/`destroy`.
    pub disconnect_on_teardown: bool,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            state: ConnectionState::Connected,
            fail_initialize: false,
            fail_destroy: false,
            page_on_initialize: true,
            disconnect_on_teardown: true,
        }
    }
}

/// Factory that builds [`FakeClient`]s and keeps them for inspection.
#[derive(Clone, Default)]
pub struct FakeClientFactory {
    inner: Arc<FactoryInner>,
}

#[derive(Default)]
struct FactoryInner {
    default_behavior: Mutex<FakeBehavior>,
    per_session: Mutex<HashMap<String, FakeBehavior>>,
    built: Mutex<Vec<Arc<FakeClient>>>,
}

impl FakeClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behavior for sessions without a specific override.
    pub fn set_default_behavior(&self, behavior: FakeBehavior) {
        *lock(&self.inner.default_behavior) = behavior;
    }

    /// Behavior for every future client of `session_id`.
    pub fn set_behavior(&self, session_id: &str, behavior: FakeBehavior) {
        lock(&self.inner.per_session).insert(session_id.to_string(), behavior);
    }

    /// All clients built for `session_id`, oldest first.
    pub fn clients(&self, session_id: &str) -> Vec<Arc<FakeClient>> {
        lock(&self.inner.built)
            .iter()
            .filter(|c| c.options.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Most recently built client for `session_id`.
    pub fn latest(&self, session_id: &str) -> Option<Arc<FakeClient>> {
        self.clients(session_id).pop()
    }

    /// Number of clients built across all sessions.
    pub fn build_count(&self) -> usize {
        lock(&self.inner.built).len()
    }
}

impl ClientFactory for FakeClientFactory {
    fn build(&self, options: ClientOptions) -> Result<ClientParts, ClientError> {
        let behavior = lock(&self.inner.per_session)
            .get(&options.session_id)
            .cloned()
            .unwrap_or_else(|| lock(&self.inner.default_behavior).clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(FakeClient::new(options, behavior, tx));
        lock(&self.inner.built).push(Arc::clone(&client));
        Ok(ClientParts {
            client,
            events: rx,
        })
    }
}

/// Scriptable automation client.
pub struct FakeClient {
    options: ClientOptions,
    behavior: FakeBehavior,
    state: Mutex<ConnectionState>,
    page: Mutex<Option<Arc<FakePage>>>,
    browser_connected: AtomicBool,
    events: mpsc::UnboundedSender<ClientEvent>,
    initialize_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
    contacts: Mutex<HashMap<String, Value>>,
    profile_pics: Mutex<HashMap<String, String>>,
    media: Mutex<Option<MediaPayload>>,
}

impl FakeClient {
    fn new(
        options: ClientOptions,
        behavior: FakeBehavior,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        Self {
            options,
            behavior,
            state: Mutex::new(ConnectionState::Unlaunched),
            page: Mutex::new(None),
            browser_connected: AtomicBool::new(false),
            events,
            initialize_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            contacts: Mutex::new(HashMap::new()),
            profile_pics: Mutex::new(HashMap::new()),
            media: Mutex::new(None),
        }
    }

    /// Options the client was built with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Emits an event on the session's event stream.
    ///
    /// Returns `false` once nobody listens anymore.
    pub fn emit(&self, kind: EventKind, data: Value) -> bool {
        self.events.send(ClientEvent::new(kind, data)).is_ok()
    }

    pub fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    /// Opens a page if none is open and returns it.
    pub fn open_page(&self) -> Arc<FakePage> {
        let mut page = lock(&self.page);
        match page.as_ref() {
            Some(p) if !p.is_closed() => Arc::clone(p),
            _ => {
                let fresh = Arc::new(FakePage::new());
                *page = Some(Arc::clone(&fresh));
                fresh
            }
        }
    }

    /// Current page, typed for test control.
    pub fn fake_page(&self) -> Option<Arc<FakePage>> {
        lock(&self.page).clone()
    }

    /// Closes the page as if the browser tab went away.
    pub fn close_page(&self) {
        if let Some(page) = self.fake_page() {
            page.close();
        }
    }

    /// Reports a page crash.
    pub fn crash_page(&self, message: &str) {
        if let Some(page) = self.fake_page() {
            page.crash(message);
        }
    }

    pub fn set_browser_connected(&self, connected: bool) {
        self.browser_connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_contact(&self, contact_id: &str, contact: Value) {
        lock(&self.contacts).insert(contact_id.to_string(), contact);
    }

    pub fn set_profile_pic(&self, contact_id: &str, url: &str) {
        lock(&self.profile_pics).insert(contact_id.to_string(), url.to_string());
    }

    /// Attachment returned by every `download_media` call.
    pub fn set_media(&self, media: Option<MediaPayload>) {
        *lock(&self.media) = media;
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    fn shut_browser(&self) {
        if self.behavior.disconnect_on_teardown {
            self.browser_connected.store(false, Ordering::SeqCst);
            self.close_page();
        }
    }
}

#[async_trait]
impl AutomationClient for FakeClient {
    async fn initialize(&self) -> Result<(), ClientError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_initialize {
            return Err(ClientError::Other("browser failed to launch".to_string()));
        }
        self.browser_connected.store(true, Ordering::SeqCst);
        if self.behavior.page_on_initialize {
            self.open_page();
        }
        self.set_state(self.behavior.state);
        Ok(())
    }

    async fn state(&self) -> Result<ConnectionState, ClientError> {
        Ok(*lock(&self.state))
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Unpaired);
        self.shut_browser();
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.shut_browser();
        if self.behavior.fail_destroy {
            return Err(ClientError::Other("destroy failed".to_string()));
        }
        Ok(())
    }

    fn page(&self) -> Option<Arc<dyn PageHandle>> {
        self.fake_page().map(|p| p as Arc<dyn PageHandle>)
    }

    fn browser_connected(&self) -> bool {
        self.browser_connected.load(Ordering::SeqCst)
    }

    async fn contact(&self, contact_id: &str) -> Result<Value, ClientError> {
        Ok(lock(&self.contacts)
            .get(contact_id)
            .cloned()
            .unwrap_or_else(|| json!({ "id": { "_serialized": contact_id } })))
    }

    async fn profile_pic_url(&self, contact_id: &str) -> Result<Option<String>, ClientError> {
        Ok(lock(&self.profile_pics).get(contact_id).cloned())
    }

    async fn download_media(&self, _message: &Value) -> Result<Option<MediaPayload>, ClientError> {
        Ok(lock(&self.media).clone())
    }
}

/// Scriptable browser page.
pub struct FakePage {
    closed: AtomicBool,
    responsive: AtomicBool,
    signals: broadcast::Sender<PageSignal>,
}

impl FakePage {
    fn new() -> Self {
        let (signals, _) = broadcast::channel(8);
        Self {
            closed: AtomicBool::new(false),
            responsive: AtomicBool::new(true),
            signals,
        }
    }

    /// Makes `evaluate` fail until set back, as a wedged page would.
    pub fn set_responsive(&self, responsive: bool) {
        self.responsive.store(responsive, Ordering::SeqCst);
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.signals.send(PageSignal::Closed);
        }
    }

    pub fn crash(&self, message: &str) {
        let _ = self.signals.send(PageSignal::Error(message.to_string()));
    }
}

#[async_trait]
impl PageHandle for FakePage {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn evaluate(&self, _expression: &str) -> Result<Value, ClientError> {
        if self.is_closed() {
            return Err(ClientError::PageClosed);
        }
        if !self.responsive.load(Ordering::SeqCst) {
            return Err(ClientError::Other(
                "execution context was destroyed".to_string(),
            ));
        }
        Ok(json!(1))
    }

    fn signals(&self) -> broadcast::Receiver<PageSignal> {
        self.signals.subscribe()
    }
}

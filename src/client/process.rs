//! Automation client backed by a driver process.
//!
//! One driver process is spawned per session. The hub writes requests to its
//! stdin and reads responses and events from its stdout, one JSON object per
//! line:
//!
//! ```text
//! -> {"id": 3, "method": "getState", "params": {}}
//! <- {"id": 3, "result": "CONNECTED"}
//! <- {"id": 4, "error": {"message": "not logged in"}}
//! <- {"event": "message_create", "data": {"message": {...}}}
//! ```
//!
//! Besides protocol events the driver reports its browser lifecycle with the
//! `page_created`, `page_closed`, `page_error` and `browser_disconnected`
//! events. When the process exits the browser counts as disconnected and the
//! page as closed.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, mpsc, oneshot};

use super::{
    AutomationClient, ClientError, ClientEvent, ClientFactory, ClientOptions, ClientParts,
    ConnectionState, MediaPayload, PageHandle, PageSignal,
};
use crate::config::settings::ClientSettings;

/// How long `destroy` waits for the driver to exit before killing it.
const EXIT_GRACE: Duration = Duration::from_secs(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds [`ProcessClient`]s that spawn `command args...` per session.
#[derive(Debug, Clone)]
pub struct ProcessClientFactory {
    command: String,
    args: Vec<String>,
}

impl ProcessClientFactory {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::new(settings.command.clone(), settings.args.clone())
    }
}

impl ClientFactory for ProcessClientFactory {
    fn build(&self, options: ClientOptions) -> Result<ClientParts, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = ProcessClient {
            command: self.command.clone(),
            args: self.args.clone(),
            options,
            connection: Arc::new(Connection::new(tx)),
            child: tokio::sync::Mutex::new(None),
        };
        Ok(ClientParts {
            client: Arc::new(client),
            events: rx,
        })
    }
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Event {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Responses carry an `id`, events do not.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DriverMessage {
    Response(Response),
    Event(Event),
}

type Callback = oneshot::Sender<Result<Value, ClientError>>;

/// Request correlation and browser state shared with the stdout reader.
struct Connection {
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    callbacks: Mutex<HashMap<u64, (String, Callback)>>,
    next_id: AtomicU64,
    page: Mutex<Option<Arc<ProcessPage>>>,
    browser_connected: AtomicBool,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Connection {
    fn new(events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            stdin: tokio::sync::Mutex::new(None),
            callbacks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            page: Mutex::new(None),
            browser_connected: AtomicBool::new(false),
            events,
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.callbacks).insert(id, (method.to_string(), tx));

        let mut line = serde_json::to_string(&Request { id, method, params })
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        line.push('\n');

        {
            let mut stdin = self.stdin.lock().await;
            let Some(stdin) = stdin.as_mut() else {
                lock(&self.callbacks).remove(&id);
                return Err(ClientError::NotInitialized);
            };
            let written = match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                tracing::debug!(method, error = %e, "driver stdin closed");
                lock(&self.callbacks).remove(&id);
                return Err(ClientError::Exited);
            }
        }

        rx.await.unwrap_or(Err(ClientError::Exited))
    }

    fn dispatch_line(self: &Arc<Self>, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<DriverMessage>(line) {
            Ok(DriverMessage::Response(response)) => self.resolve(response),
            Ok(DriverMessage::Event(event)) => self.handle_event(event),
            Err(e) => tracing::warn!(error = %e, "ignoring malformed driver line"),
        }
    }

    fn resolve(&self, response: Response) {
        let Some((method, callback)) = lock(&self.callbacks).remove(&response.id) else {
            tracing::warn!(id = response.id, "driver response for unknown request");
            return;
        };
        let result = match response.error {
            Some(error) => Err(ClientError::Request {
                method,
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = callback.send(result);
    }

    fn handle_event(self: &Arc<Self>, event: Event) {
        match event.event.as_str() {
            "page_created" => {
                let page = Arc::new(ProcessPage::new(Arc::downgrade(self)));
                *lock(&self.page) = Some(page);
                self.browser_connected.store(true, Ordering::SeqCst);
            }
            "page_closed" => {
                if let Some(page) = lock(&self.page).clone() {
                    page.mark_closed();
                }
            }
            "page_error" => {
                let message = event
                    .data
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| event.data.to_string());
                if let Some(page) = lock(&self.page).clone() {
                    let _ = page.signals.send(PageSignal::Error(message));
                }
            }
            "browser_disconnected" => {
                self.browser_connected.store(false, Ordering::SeqCst);
            }
            name => match ClientEvent::from_wire(name, event.data) {
                Some(client_event) => {
                    let _ = self.events.send(client_event);
                }
                None => tracing::debug!(event = name, "ignoring unknown driver event"),
            },
        }
    }

    /// Called once the driver's stdout reaches EOF.
    fn close(&self) {
        self.browser_connected.store(false, Ordering::SeqCst);
        if let Some(page) = lock(&self.page).clone() {
            page.mark_closed();
        }
        for (_, (_, callback)) in lock(&self.callbacks).drain() {
            let _ = callback.send(Err(ClientError::Exited));
        }
    }
}

/// Client that drives one session through a spawned driver process.
pub struct ProcessClient {
    command: String,
    args: Vec<String>,
    options: ClientOptions,
    connection: Arc<Connection>,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl ProcessClient {
    fn spawn(&self) -> Result<Child, ClientError> {
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(chrome_bin) = &self.options.chrome_bin {
            command.env("CHROME_BIN", chrome_bin);
        }
        command.spawn().map_err(|source| ClientError::Spawn {
            command: self.command.clone(),
            source,
        })
    }

    async fn wait_for_exit(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(session_id = %self.options.session_id, %status, "driver exited"),
            Ok(Err(e)) => tracing::warn!(session_id = %self.options.session_id, error = %e, "failed waiting for driver"),
            Err(_) => {
                tracing::warn!(session_id = %self.options.session_id, "driver did not exit, killing it");
                let _ = child.kill().await;
            }
        }
    }
}

#[async_trait]
impl AutomationClient for ProcessClient {
    async fn initialize(&self) -> Result<(), ClientError> {
        let mut child = self.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Protocol("driver stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Protocol("driver stdout unavailable".to_string()))?;
        *self.connection.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);

        let connection = Arc::clone(&self.connection);
        let session_id = self.options.session_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => connection.dispatch_line(&line),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "driver stdout read failed");
                        break;
                    }
                }
            }
            connection.close();
        });

        let params = serde_json::to_value(&self.options)
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        self.connection.request("initialize", params).await?;
        Ok(())
    }

    async fn state(&self) -> Result<ConnectionState, ClientError> {
        match self.connection.request("getState", json!({})).await? {
            Value::Null => Ok(ConnectionState::Unknown),
            value => {
                serde_json::from_value(value).map_err(|e| ClientError::Protocol(e.to_string()))
            }
        }
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.connection.request("logout", json!({})).await?;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        match self.connection.request("destroy", json!({})).await {
            Ok(_) | Err(ClientError::Exited) => {}
            Err(e) => return Err(e),
        }
        self.wait_for_exit().await;
        Ok(())
    }

    fn page(&self) -> Option<Arc<dyn PageHandle>> {
        lock(&self.connection.page)
            .clone()
            .map(|p| p as Arc<dyn PageHandle>)
    }

    fn browser_connected(&self) -> bool {
        self.connection.browser_connected.load(Ordering::SeqCst)
    }

    async fn contact(&self, contact_id: &str) -> Result<Value, ClientError> {
        self.connection
            .request("getContactById", json!({ "contactId": contact_id }))
            .await
    }

    async fn profile_pic_url(&self, contact_id: &str) -> Result<Option<String>, ClientError> {
        let value = self
            .connection
            .request("getProfilePicUrl", json!({ "contactId": contact_id }))
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn download_media(&self, message: &Value) -> Result<Option<MediaPayload>, ClientError> {
        match self
            .connection
            .request("downloadMedia", json!({ "message": message }))
            .await?
        {
            Value::Null => Ok(None),
            value => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| ClientError::Protocol(e.to_string())),
        }
    }
}

/// Browser page owned by a driver process.
struct ProcessPage {
    connection: Weak<Connection>,
    closed: AtomicBool,
    signals: broadcast::Sender<PageSignal>,
}

impl ProcessPage {
    fn new(connection: Weak<Connection>) -> Self {
        let (signals, _) = broadcast::channel(8);
        Self {
            connection,
            closed: AtomicBool::new(false),
            signals,
        }
    }

    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.signals.send(PageSignal::Closed);
        }
    }
}

#[async_trait]
impl PageHandle for ProcessPage {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, ClientError> {
        if self.is_closed() {
            return Err(ClientError::PageClosed);
        }
        let connection = self.connection.upgrade().ok_or(ClientError::Exited)?;
        connection
            .request("page.evaluate", json!({ "expression": expression }))
            .await
    }

    fn signals(&self) -> broadcast::Receiver<PageSignal> {
        self.signals.subscribe()
    }
}

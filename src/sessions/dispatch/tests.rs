use super::*;
use crate::client::fake::{FakeClient, FakeClientFactory};
use crate::client::{ClientFactory, ClientOptions, MediaPayload, WebVersionCache};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

type Hit = (String, Value);

struct Harness {
    registry: SessionRegistry,
    store: SessionStore,
    factory: FakeClientFactory,
    dispatcher: EventDispatcher,
    base: String,
    hits: mpsc::UnboundedReceiver<Hit>,
    dir: TempDir,
}

async fn capture_server() -> (String, mpsc::UnboundedReceiver<Hit>) {
    async fn record(
        State(tx): State<mpsc::UnboundedSender<Hit>>,
        Path(name): Path<String>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        let _ = tx.send((name, body));
        StatusCode::OK
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let router = Router::new().route("/{name}", post(record)).with_state(tx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), rx)
}

fn webhook_settings() -> WebhookSettings {
    WebhookSettings {
        base_url: None,
        disabled_events: HashSet::new(),
        timeout: Duration::from_secs(5),
        enrich_messages: true,
    }
}

async fn harness_with(settings: WebhookSettings) -> Harness {
    let dir = TempDir::new().unwrap();
    let (base, hits) = capture_server().await;
    let registry = SessionRegistry::new();
    let store = SessionStore::new(dir.path().join("sessions.json"));
    let assets = AssetStore::new(dir.path().join("assets"), "https://cdn.example.com", 1024);
    let dispatcher = EventDispatcher::new(
        registry.clone(),
        store.clone(),
        WebhookSender::new(settings.timeout).unwrap(),
        Some(assets),
        settings,
    );
    Harness {
        registry,
        store,
        factory: FakeClientFactory::new(),
        dispatcher,
        base,
        hits,
        dir,
    }
}

async fn harness() -> Harness {
    harness_with(webhook_settings()).await
}

impl Harness {
    async fn start(&self, id: &str) -> Arc<FakeClient> {
        let parts = self
            .factory
            .build(ClientOptions {
                session_id: id.to_string(),
                data_path: PathBuf::from("/tmp"),
                user_agent: "UA".to_string(),
                chrome_bin: None,
                web_version: None,
                web_version_cache: WebVersionCache::None,
            })
            .unwrap();
        let generation = self.registry.next_generation();
        self.registry
            .put(id, Arc::clone(&parts.client), generation)
            .await;
        self.dispatcher
            .spawn(id, generation, parts.client, parts.events);
        self.factory.latest(id).unwrap()
    }

    async fn hook(&self, id: &str, name: &str) {
        self.store
            .upsert(id, Some(format!("{}/{name}", self.base)), None)
            .await
            .unwrap();
    }

    async fn next_hit(&mut self) -> Hit {
        tokio::time::timeout(Duration::from_secs(5), self.hits.recv())
            .await
            .expect("webhook within timeout")
            .expect("capture server alive")
    }
}

#[tokio::test]
async fn test_ready_is_forwarded_and_connects() {
    let mut h = harness().await;
    h.hook("alice", "hook").await;
    let client = h.start("alice").await;

    client.emit(EventKind::Ready, Value::Null);
    let (path, body) = h.next_hit().await;
    assert_eq!(path, "hook");
    assert_eq!(body, json!({"event": "ready", "sessionId": "alice"}));
    assert_eq!(
        h.registry.get("alice").await.unwrap().state,
        LifecycleState::Connected
    );
}

#[tokio::test]
async fn test_disconnected_is_forwarded_without_state_change() {
    let mut h = harness().await;
    h.hook("alice", "hook").await;
    let client = h.start("alice").await;

    client.emit(EventKind::Ready, Value::Null);
    h.next_hit().await;
    client.emit(EventKind::Disconnected, json!({"reason": "NAVIGATION"}));
    let (_, body) = h.next_hit().await;
    assert_eq!(body["event"], "disconnected");
    assert_eq!(
        h.registry.get("alice").await.unwrap().state,
        LifecycleState::Connected
    );
}

#[tokio::test]
async fn test_qr_is_captured_not_forwarded() {
    let mut h = harness().await;
    h.hook("alice", "hook").await;
    let client = h.start("alice").await;

    client.emit(EventKind::Qr, json!({"qr": "2@code"}));
    client.emit(EventKind::ChangeState, json!({"state": "PAIRING"}));

    let (_, body) = h.next_hit().await;
    assert_eq!(body["event"], "change_state");
    let handle = h.registry.get("alice").await.unwrap();
    assert_eq!(handle.qr.as_deref(), Some("2@code"));
    assert_eq!(handle.state, LifecycleState::AwaitingAuth);
}

#[tokio::test]
async fn test_disabled_event_is_skipped() {
    let mut settings = webhook_settings();
    settings.disabled_events.insert(EventKind::MessageAck);
    let mut h = harness_with(settings).await;
    h.hook("alice", "hook").await;
    let client = h.start("alice").await;

    client.emit(EventKind::MessageAck, json!({"message": {}, "ack": 3}));
    client.emit(EventKind::Call, json!({"call": {"id": "c1"}}));

    let (_, body) = h.next_hit().await;
    assert_eq!(body["event"], "call");
}

#[tokio::test]
async fn test_group_message_is_dropped() {
    let mut h = harness().await;
    h.hook("alice", "hook").await;
    let client = h.start("alice").await;

    client.emit(
        EventKind::MessageCreate,
        json!({"message": {"id": {"participant": "551199@c.us"}, "body": "hi"}}),
    );
    client.emit(EventKind::Ready, Value::Null);

    let (_, body) = h.next_hit().await;
    assert_eq!(body["event"], "ready");
}

#[tokio::test]
async fn test_auth_failure_is_reported_as_status() {
    let mut h = harness().await;
    h.hook("alice", "hook").await;
    let client = h.start("alice").await;

    client.emit(EventKind::AuthFailure, json!({"msg": "restore failed"}));
    let (_, body) = h.next_hit().await;
    assert_eq!(body["event"], "status");
    assert_eq!(body["data"]["msg"], "restore failed");
}

#[tokio::test]
async fn test_webhook_change_applies_to_next_event() {
    let mut h = harness().await;
    h.hook("alice", "old").await;
    let client = h.start("alice").await;

    client.emit(EventKind::Ready, Value::Null);
    assert_eq!(h.next_hit().await.0, "old");

    h.store
        .change_webhook("alice", Some(format!("{}/new", h.base)))
        .await
        .unwrap();
    client.emit(EventKind::ChangeState, json!({"state": "CONNECTED"}));
    assert_eq!(h.next_hit().await.0, "new");
}

#[tokio::test]
async fn test_base_url_used_without_own_webhook() {
    let (base, hits) = capture_server().await;
    let mut settings = webhook_settings();
    settings.base_url = Some(format!("{base}/fallback"));
    let mut h = harness_with(settings).await;
    h.hits = hits;
    let client = h.start("alice").await;

    client.emit(EventKind::Ready, Value::Null);
    assert_eq!(h.next_hit().await.0, "fallback");
}

#[tokio::test]
async fn test_events_keep_emission_order() {
    let mut h = harness().await;
    h.hook("alice", "hook").await;
    let client = h.start("alice").await;

    for percent in 0..20 {
        client.emit(
            EventKind::LoadingScreen,
            json!({"percent": percent, "message": "WhatsApp"}),
        );
    }
    for expected in 0..20 {
        let (_, body) = h.next_hit().await;
        assert_eq!(body["data"]["percent"], expected);
    }
}

#[tokio::test]
async fn test_message_is_enriched_with_contact_and_media() {
    let mut h = harness().await;
    h.hook("alice", "hook").await;
    let client = h.start("alice").await;
    client.set_contact("551188@c.us", json!({"pushname": "Bob"}));
    client.set_profile_pic("551188@c.us", "https://pics.example.com/bob.jpg");
    client.set_media(Some(MediaPayload {
        mimetype: "image/jpeg".to_string(),
        data: STANDARD.encode(b"jpeg bytes"),
        filename: None,
        filesize: None,
    }));

    client.emit(
        EventKind::MessageCreate,
        json!({"message": {
            "fromMe": false,
            "hasMedia": true,
            "_data": {"from": "551188@c.us", "to": "551100@c.us"}
        }}),
    );

    let (_, body) = h.next_hit().await;
    let message = &body["data"]["message"];
    assert_eq!(message["contact"]["pushname"], "Bob");
    assert_eq!(message["profilePicUrl"], "https://pics.example.com/bob.jpg");
    assert_eq!(message["file"]["mimetype"], "image/jpeg");
    assert_eq!(message["file"]["extension"], "jpg");

    let url = message["file"]["url"].as_str().unwrap();
    let filename = url.strip_prefix("https://cdn.example.com/assets/").unwrap();
    let stored = std::fs::read(h.dir.path().join("assets").join(filename)).unwrap();
    assert_eq!(stored, b"jpeg bytes");
}

#[tokio::test]
async fn test_own_message_uses_recipient_as_peer() {
    let mut h = harness().await;
    h.hook("alice", "hook").await;
    let client = h.start("alice").await;
    client.set_contact("551100@c.us", json!({"pushname": "Carol"}));

    client.emit(
        EventKind::Message,
        json!({"message": {
            "fromMe": true,
            "hasMedia": false,
            "_data": {"from": "551188@c.us", "to": "551100@c.us"}
        }}),
    );

    let (_, body) = h.next_hit().await;
    let message = &body["data"]["message"];
    assert_eq!(message["contact"]["pushname"], "Carol");
    assert!(message["profilePicUrl"].is_null());
    assert!(message.get("file").is_none());
}

#[tokio::test]
async fn test_media_failure_still_forwards() {
    let mut h = harness().await;
    h.hook("alice", "hook").await;
    let client = h.start("alice").await;
    client.set_media(Some(MediaPayload {
        mimetype: "image/jpeg".to_string(),
        data: "%%% not base64 %%%".to_string(),
        filename: None,
        filesize: None,
    }));

    client.emit(
        EventKind::MessageCreate,
        json!({"message": {"hasMedia": true, "_data": {"from": "551188@c.us"}}}),
    );

    let (_, body) = h.next_hit().await;
    assert_eq!(body["event"], "message_create");
    assert!(body["data"]["message"].get("file").is_none());
}

#[tokio::test]
async fn test_events_of_replaced_generation_do_not_move_state() {
    let mut h = harness().await;
    h.hook("alice", "hook").await;
    let old = h.start("alice").await;
    let _new = h.start("alice").await;

    old.emit(EventKind::Ready, Value::Null);
    h.next_hit().await;
    assert_eq!(
        h.registry.get("alice").await.unwrap().state,
        LifecycleState::Initializing
    );
}

#[test]
fn test_chat_id_accepts_serialized_objects() {
    assert_eq!(chat_id(&json!("1@c.us")), Some("1@c.us"));
    assert_eq!(chat_id(&json!({"_serialized": "2@c.us"})), Some("2@c.us"));
    assert_eq!(chat_id(&json!("")), None);
    assert_eq!(chat_id(&json!(7)), None);
}

#[tokio::test]
async fn test_enabled_events_exclude_qr() {
    let h = harness().await;
    let enabled = h.dispatcher.enabled_events();
    assert!(!enabled.contains(&EventKind::Qr));
    assert_eq!(enabled.len(), EventKind::ALL.len() - 1);
}

use super::*;
use crate::client::fake::{FakeBehavior, FakeClient, FakeClientFactory};
use crate::client::{ConnectionState, EventKind};
use crate::config::schema::Config;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    controller: LifecycleController,
    factory: FakeClientFactory,
    _dir: TempDir,
}

fn test_settings(dir: &TempDir) -> Settings {
    let mut settings = Settings::from_config(&Config::default()).unwrap();
    settings.paths.sessions_dir = dir.path().join("sessions");
    settings.paths.records_file = dir.path().join("sessions.json");
    settings.media.assets_dir = dir.path().join("assets");
    settings.probe.page_wait_timeout = Duration::from_millis(500);
    settings.probe.probe_timeout = Duration::from_millis(500);
    settings.lifecycle.disconnect_timeout = Duration::from_millis(500);
    settings
}

fn harness_with(configure: impl FnOnce(&mut Settings)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut settings = test_settings(&dir);
    configure(&mut settings);
    let factory = FakeClientFactory::new();
    let controller = LifecycleController::new(settings, Arc::new(factory.clone())).unwrap();
    Harness {
        controller,
        factory,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met: {what}");
}

impl Harness {
    /// Creates a session with an on-disk credential directory and waits until
    /// its client has a page.
    async fn running(&self, id: &str) -> Arc<FakeClient> {
        std::fs::create_dir_all(self.controller.credentials().session_dir(id)).unwrap();
        self.controller.create(id, None).await.unwrap();
        let client = self.factory.latest(id).unwrap();
        let probe = Arc::clone(&client);
        eventually("client initialized", move || {
            let probe = Arc::clone(&probe);
            async move { probe.fake_page().is_some() }
        })
        .await;
        client
    }

    async fn state(&self, id: &str) -> Option<LifecycleState> {
        self.controller.registry().get(id).await.map(|h| h.state)
    }
}

fn unpaired() -> FakeBehavior {
    FakeBehavior {
        state: ConnectionState::Unpaired,
        ..FakeBehavior::default()
    }
}

// -- create ------------------------------------------------------------------

#[tokio::test]
async fn test_create_registers_and_persists_fingerprint() {
    let h = harness();
    let outcome = h.controller.create("alice", None).await.unwrap();
    assert!(outcome.is_created());
    assert_eq!(outcome.handle().state, LifecycleState::Initializing);
    assert!(outcome.handle().events_active);

    let record = h.controller.store().find("alice").await.unwrap().unwrap();
    assert!(record.webhook_url.is_none());
    let fingerprint = record.client_fingerprint.unwrap();
    assert!(fingerprint.contains("Chrome/"));
    assert_eq!(
        h.factory.latest("alice").unwrap().options().user_agent,
        fingerprint
    );
}

#[tokio::test]
async fn test_create_is_idempotent() {
    let h = harness();
    let first = h
        .controller
        .create("alice", Some("https://example.com/hook"))
        .await
        .unwrap();
    let second = h
        .controller
        .create("alice", Some("https://example.com/hook"))
        .await
        .unwrap();

    assert!(!second.is_created());
    assert!(first.handle().same_client(second.handle()));
    assert_eq!(h.factory.build_count(), 1);
    assert_eq!(h.controller.store().list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_trims_identifier() {
    let h = harness();
    h.controller.create("  alice ", None).await.unwrap();
    assert!(h.controller.registry().has("alice").await);
    let existing = h.controller.create("alice", None).await.unwrap();
    assert!(!existing.is_created());
}

#[tokio::test]
async fn test_create_rejects_invalid_input() {
    let h = harness();
    assert!(matches!(
        h.controller.create("   ", None).await,
        Err(SessionError::MissingSessionId)
    ));
    assert!(matches!(
        h.controller.create("alice", Some("ftp://example.com")).await,
        Err(SessionError::InvalidWebhookUrl { .. })
    ));
    assert!(matches!(
        h.controller.create("alice", Some("not a url")).await,
        Err(SessionError::InvalidWebhookUrl { .. })
    ));
    assert!(matches!(
        h.controller.create("../../etc", None).await,
        Err(SessionError::PathTraversal { .. })
    ));
    assert_eq!(h.factory.build_count(), 0);
    assert!(h.controller.store().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_reuses_saved_fingerprint_and_webhook() {
    let h = harness();
    h.controller
        .store()
        .upsert("alice", Some("https://example.com/hook".into()), Some("UA-saved".into()))
        .await
        .unwrap();

    h.controller.create("alice", None).await.unwrap();
    assert_eq!(
        h.factory.latest("alice").unwrap().options().user_agent,
        "UA-saved"
    );
    let record = h.controller.store().find("alice").await.unwrap().unwrap();
    assert_eq!(record.webhook_url.as_deref(), Some("https://example.com/hook"));
}

#[tokio::test]
async fn test_create_scenario_then_change_webhook() {
    let h = harness();
    h.controller
        .create("alice", Some("https://example.com/hook"))
        .await
        .unwrap();

    let records = h.controller.store().list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].session_id, "alice");
    assert_eq!(records[0].webhook_url.as_deref(), Some("https://example.com/hook"));
    let fingerprint = records[0].client_fingerprint.clone();

    h.controller
        .change_webhook("alice", Some("https://new"))
        .await
        .unwrap();
    let record = h.controller.store().find("alice").await.unwrap().unwrap();
    assert_eq!(record.webhook_url.as_deref(), Some("https://new"));
    assert_eq!(record.client_fingerprint, fingerprint);
}

#[tokio::test]
async fn test_change_webhook_unknown_session() {
    let h = harness();
    assert!(matches!(
        h.controller.change_webhook("ghost", Some("https://new")).await,
        Err(SessionError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_client_options_follow_settings() {
    let h = harness_with(|s| {
        s.client.web_version = Some("2.2412.54".to_string());
        s.client.web_version_cache = WebVersionCacheType::Remote;
        s.client.chrome_bin = Some("/usr/bin/chromium".into());
    });
    h.controller.create("alice", None).await.unwrap();

    let client = h.factory.latest("alice").unwrap();
    let options = client.options();
    assert_eq!(options.data_path, h.controller.credentials().root());
    assert_eq!(options.web_version.as_deref(), Some("2.2412.54"));
    assert_eq!(options.web_version_cache, WebVersionCache::remote("2.2412.54"));
    assert_eq!(options.chrome_bin, Some("/usr/bin/chromium".into()));
}

#[tokio::test]
async fn test_init_failure_keeps_initializing_by_default() {
    let h = harness();
    h.factory.set_behavior(
        "alice",
        FakeBehavior {
            fail_initialize: true,
            ..FakeBehavior::default()
        },
    );
    h.controller.create("alice", None).await.unwrap();
    let client = h.factory.latest("alice").unwrap();
    eventually("initialize attempted", || {
        let client = Arc::clone(&client);
        async move { client.initialize_calls() == 1 }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.state("alice").await, Some(LifecycleState::Initializing));
}

#[tokio::test]
async fn test_init_failure_can_be_terminal() {
    let h = harness_with(|s| s.lifecycle.fail_on_init_error = true);
    h.factory.set_behavior(
        "alice",
        FakeBehavior {
            fail_initialize: true,
            ..FakeBehavior::default()
        },
    );
    h.controller.create("alice", None).await.unwrap();
    let registry = h.controller.registry().clone();
    eventually("session not connected", move || {
        let registry = registry.clone();
        async move {
            registry.get("alice").await.map(|h| h.state) == Some(LifecycleState::NotConnected)
        }
    })
    .await;
}

// -- restore -------------------------------------------------------------------

#[tokio::test]
async fn test_restore_registers_on_disk_sessions() {
    let h = harness();
    let root = h.controller.credentials().root().to_path_buf();
    for name in ["session-alice", "session-bob", "cache"] {
        std::fs::create_dir_all(root.join(name)).unwrap();
    }
    h.controller.create("alice", None).await.unwrap();

    let report = h.controller.restore().await.unwrap();
    assert_eq!(report.restored, vec!["bob"]);
    assert_eq!(report.skipped, vec!["alice"]);
    assert!(report.failed.is_empty());
    assert!(h.controller.registry().has("bob").await);
    assert_eq!(h.controller.registry().len().await, 2);
    assert_eq!(h.factory.clients("alice").len(), 1);
}

#[tokio::test]
async fn test_restore_creates_missing_root() {
    let h = harness();
    let report = h.controller.restore().await.unwrap();
    assert_eq!(report, RestoreReport::default());
    assert!(h.controller.credentials().root().is_dir());
}

// -- crash handling --------------------------------------------------------------

#[tokio::test]
async fn test_page_close_restarts_session() {
    let h = harness();
    let old = h.running("alice").await;
    let old_generation = h.controller.registry().get("alice").await.unwrap().generation;

    old.close_page();

    let registry = h.controller.registry().clone();
    eventually("session restarted", move || {
        let registry = registry.clone();
        async move {
            registry
                .get("alice")
                .await
                .is_some_and(|h| h.generation != old_generation)
        }
    })
    .await;

    let handle = h.controller.registry().get("alice").await.unwrap();
    assert_eq!(handle.state, LifecycleState::Initializing);
    assert_eq!(old.destroy_calls(), 1);
    assert_eq!(h.factory.clients("alice").len(), 2);
    // Same fingerprint across the restart.
    let clients = h.factory.clients("alice");
    assert_eq!(clients[0].options().user_agent, clients[1].options().user_agent);
}

#[tokio::test]
async fn test_page_error_restarts_even_if_destroy_fails() {
    let h = harness();
    h.factory.set_behavior(
        "alice",
        FakeBehavior {
            fail_destroy: true,
            ..FakeBehavior::default()
        },
    );
    let old = h.running("alice").await;
    old.crash_page("renderer gone");

    let factory = h.factory.clone();
    eventually("replacement client built", move || {
        let factory = factory.clone();
        async move { factory.clients("alice").len() == 2 }
    })
    .await;
    assert_eq!(old.destroy_calls(), 1);
    assert!(h.controller.registry().has("alice").await);
}

#[tokio::test]
async fn test_page_close_without_auto_restart_is_terminal() {
    let h = harness_with(|s| s.lifecycle.auto_restart = false);
    let client = h.running("alice").await;
    client.close_page();

    let registry = h.controller.registry().clone();
    eventually("session not connected", move || {
        let registry = registry.clone();
        async move {
            registry.get("alice").await.map(|h| h.state) == Some(LifecycleState::NotConnected)
        }
    })
    .await;
    assert_eq!(h.factory.clients("alice").len(), 1);
    assert_eq!(client.destroy_calls(), 0);
}

#[tokio::test]
async fn test_page_close_after_disconnected_event_restarts() {
    let h = harness();
    let client = h.running("alice").await;

    client.emit(EventKind::Ready, Value::Null);
    let registry = h.controller.registry().clone();
    eventually("session connected", move || {
        let registry = registry.clone();
        async move { registry.get("alice").await.map(|h| h.state) == Some(LifecycleState::Connected) }
    })
    .await;

    client.emit(EventKind::Disconnected, json!({"reason": "NAVIGATION"}));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.state("alice").await, Some(LifecycleState::Connected));

    client.close_page();
    let factory = h.factory.clone();
    eventually("replacement client built", move || {
        let factory = factory.clone();
        async move { factory.clients("alice").len() == 2 }
    })
    .await;
    assert_eq!(client.destroy_calls(), 1);
}

#[tokio::test]
async fn test_restarted_session_can_crash_again() {
    let h = harness();
    let first = h.running("alice").await;
    first.close_page();

    let factory = h.factory.clone();
    eventually("second client has a page", move || {
        let factory = factory.clone();
        async move {
            factory.clients("alice").len() == 2
                && factory.latest("alice").is_some_and(|c| c.fake_page().is_some())
        }
    })
    .await;

    h.factory.latest("alice").unwrap().close_page();
    let factory = h.factory.clone();
    eventually("third client built", move || {
        let factory = factory.clone();
        async move { factory.clients("alice").len() == 3 }
    })
    .await;
}

// -- delete --------------------------------------------------------------------

#[tokio::test]
async fn test_delete_connected_session_logs_out() {
    let h = harness();
    let client = h.running("alice").await;
    let dir = h.controller.credentials().session_dir("alice");

    let validation = h.controller.validate("alice").await;
    assert!(validation.success);
    assert!(h.controller.delete("alice", &validation).await.unwrap());

    assert_eq!(client.logout_calls(), 1);
    assert_eq!(client.destroy_calls(), 0);
    assert!(!dir.exists());
    assert!(h.controller.store().find("alice").await.unwrap().is_none());
    assert!(!h.controller.registry().has("alice").await);
    // Logout closed the page; no restart may follow.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.factory.clients("alice").len(), 1);
    assert!(!h.controller.registry().has("alice").await);
}

#[tokio::test]
async fn test_delete_not_connected_session_destroys() {
    let h = harness();
    h.factory.set_behavior("alice", unpaired());
    let client = h.running("alice").await;

    let validation = h.controller.validate("alice").await;
    assert!(validation.is_not_connected());
    h.controller.delete("alice", &validation).await.unwrap();

    assert_eq!(client.destroy_calls(), 1);
    assert_eq!(client.logout_calls(), 0);
    assert!(!h.controller.registry().has("alice").await);
}

#[tokio::test]
async fn test_delete_other_reason_skips_teardown() {
    let h = harness();
    let client = h.running("alice").await;
    let dir = h.controller.credentials().session_dir("alice");

    let validation = Validation::failure("browser tab closed");
    let err = h.controller.delete("alice", &validation).await.unwrap_err();
    assert!(matches!(err, SessionError::Timeout { operation: "browser disconnect", .. }));
    assert_eq!(client.logout_calls(), 0);
    assert_eq!(client.destroy_calls(), 0);
    // The browser still holds the directory.
    assert!(dir.exists());
    assert_eq!(h.state("alice").await, Some(LifecycleState::Destroyed));

    client.set_browser_connected(false);
    assert!(h.controller.delete("alice", &validation).await.unwrap());
    assert_eq!(client.logout_calls() + client.destroy_calls(), 0);
    assert!(!dir.exists());
    assert!(!h.controller.registry().has("alice").await);
}

#[tokio::test]
async fn test_delete_unregistered_is_noop() {
    let h = harness();
    let dir = h.controller.credentials().session_dir("ghost");
    std::fs::create_dir_all(&dir).unwrap();
    h.controller.store().upsert("ghost", None, None).await.unwrap();

    let validation = h.controller.validate("ghost").await;
    assert_eq!(validation, Validation::not_found());
    assert!(!h.controller.delete("ghost", &validation).await.unwrap());
    assert!(dir.exists());
    assert!(h.controller.store().find("ghost").await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_traversal_touches_nothing() {
    let h = harness();
    let err = h
        .controller
        .delete("../../etc", &Validation::not_found())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::PathTraversal { .. }));
}

#[tokio::test]
async fn test_delete_times_out_then_retry_completes() {
    let h = harness();
    h.factory.set_behavior(
        "alice",
        FakeBehavior {
            disconnect_on_teardown: false,
            ..FakeBehavior::default()
        },
    );
    let client = h.running("alice").await;
    let validation = h.controller.validate("alice").await;

    let err = h.controller.delete("alice", &validation).await.unwrap_err();
    assert!(matches!(err, SessionError::Timeout { operation: "browser disconnect", .. }));
    assert_eq!(h.state("alice").await, Some(LifecycleState::Destroyed));
    assert!(h.controller.credentials().session_dir("alice").exists());

    client.set_browser_connected(false);
    assert!(h.controller.delete("alice", &validation).await.unwrap());
    assert_eq!(client.logout_calls(), 1);
    assert!(!h.controller.credentials().session_dir("alice").exists());
    assert!(!h.controller.registry().has("alice").await);
}

#[tokio::test]
async fn test_validate_and_delete() {
    let h = harness();
    let client = h.running("alice").await;
    let validation = h.controller.validate_and_delete("alice").await.unwrap();
    assert!(validation.success);
    assert_eq!(client.logout_calls(), 1);
    assert!(!h.controller.registry().has("alice").await);
}

#[tokio::test]
async fn test_validate_and_delete_probes_under_session_lock() {
    let h = harness();
    let client = h.running("alice").await;

    let guard = h.controller.inner.locks.lock("alice").await;
    let controller = h.controller.clone();
    let task = tokio::spawn(async move { controller.validate_and_delete("alice").await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    // Seen only if the probe waited for the lock holder.
    client.set_state(ConnectionState::Unpaired);
    drop(guard);

    let validation = task.await.unwrap().unwrap();
    assert!(validation.is_not_connected());
    assert_eq!(client.destroy_calls(), 1);
    assert_eq!(client.logout_calls(), 0);
    assert!(!h.controller.registry().has("alice").await);
}

// -- flush ---------------------------------------------------------------------

#[tokio::test]
async fn test_flush_only_inactive_keeps_connected() {
    let h = harness();
    h.factory.set_behavior("bob", unpaired());
    h.factory.set_behavior("carol", unpaired());
    let alice = h.running("alice").await;
    let bob = h.running("bob").await;
    let carol = h.running("carol").await;

    let report = h.controller.flush(true).await.unwrap();
    assert_eq!(report.deleted, vec!["bob", "carol"]);
    assert_eq!(report.kept, vec!["alice"]);

    assert!(h.controller.registry().has("alice").await);
    assert!(h.controller.store().find("alice").await.unwrap().is_some());
    assert!(h.controller.credentials().session_dir("alice").exists());
    assert_eq!(alice.logout_calls() + alice.destroy_calls(), 0);
    assert_eq!(bob.destroy_calls(), 1);
    assert_eq!(carol.destroy_calls(), 1);
    assert!(!h.controller.registry().has("bob").await);
    assert!(!h.controller.registry().has("carol").await);
}

#[tokio::test]
async fn test_flush_all() {
    let h = harness();
    h.factory.set_behavior("bob", unpaired());
    let alice = h.running("alice").await;
    h.running("bob").await;

    let report = h.controller.flush(false).await.unwrap();
    assert_eq!(report.deleted, vec!["alice", "bob"]);
    assert!(report.kept.is_empty());
    assert_eq!(alice.logout_calls(), 1);
    assert!(h.controller.registry().is_empty().await);
    assert!(h.controller.store().list().await.unwrap().is_empty());
}

// -- queries and shutdown --------------------------------------------------------

#[tokio::test]
async fn test_status_of_unknown_session() {
    let h = harness();
    let status = h.controller.status("ghost").await;
    assert_eq!(status.state, None);
    assert_eq!(status.validation.reason, "session_not_found");
}

#[tokio::test]
async fn test_status_of_connected_session() {
    let h = harness();
    h.running("alice").await;
    h.controller
        .change_webhook("alice", Some("https://example.com/hook"))
        .await
        .unwrap();

    let status = h.controller.status("alice").await;
    assert!(status.validation.success);
    assert_eq!(status.state, Some(LifecycleState::Initializing));
    assert_eq!(status.webhook_url.as_deref(), Some("https://example.com/hook"));
}

#[tokio::test]
async fn test_qr_requires_registered_session() {
    let h = harness();
    assert!(matches!(
        h.controller.qr("ghost").await,
        Err(SessionError::NotFound { .. })
    ));
    h.controller.create("alice", None).await.unwrap();
    assert_eq!(h.controller.qr("alice").await.unwrap(), None);
}

#[tokio::test]
async fn test_list_merges_records_and_registry() {
    let h = harness();
    h.controller
        .store()
        .upsert("zed", Some("https://example.com/z".into()), None)
        .await
        .unwrap();
    h.controller.create("alice", None).await.unwrap();

    let rows = h.controller.list().await.unwrap();
    let ids: Vec<_> = rows.iter().map(|r| r.session_id.as_str()).collect();
    assert_eq!(ids, vec!["alice", "zed"]);
    assert_eq!(rows[0].state, Some(LifecycleState::Initializing));
    assert!(rows[0].since.is_some());
    assert_eq!(rows[1].state, None);
    assert_eq!(rows[1].webhook_url.as_deref(), Some("https://example.com/z"));
}

#[tokio::test]
async fn test_shutdown_stops_clients_and_keeps_credentials() {
    let h = harness();
    let alice = h.running("alice").await;
    let bob = h.running("bob").await;

    h.controller.shutdown().await;

    assert!(h.controller.registry().is_empty().await);
    assert_eq!(alice.destroy_calls(), 1);
    assert_eq!(bob.destroy_calls(), 1);
    assert!(h.controller.credentials().session_dir("alice").exists());
    assert_eq!(h.controller.store().list().await.unwrap().len(), 2);
    // Closing pages during shutdown must not restart anything.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.factory.build_count(), 2);
}

#[tokio::test]
async fn test_subscribers_see_transitions() {
    let h = harness();
    let mut updates = h.controller.subscribe();
    h.controller.create("alice", None).await.unwrap();
    let update = updates.recv().await.unwrap();
    assert_eq!(update.session_id, "alice");
    assert_eq!(update.state, LifecycleState::Initializing);
}

#[test]
fn test_webhook_url_check() {
    assert!(check_webhook_url("https://example.com/hook").is_ok());
    assert!(check_webhook_url("http://127.0.0.1:8080/x").is_ok());
    assert!(check_webhook_url("mailto:someone@example.com").is_err());
    assert!(check_webhook_url("example.com/hook").is_err());
}

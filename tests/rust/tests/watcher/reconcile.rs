//! Reconcile against the in-memory Profile Store

use std::time::Duration;

use mcprouter_core::TransportConfig;
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::events::wait_for_event;
use tests::fake_backend::FAKE_KIND;
use tests::{wait_until, DomainEvent, FakeBackend, TestRouter};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_reconcile_adds_updates_and_removes() {
    let router = TestRouter::new();
    let fs = router.add_backend("fs", &["list"]);
    router.add_backend("git", &["log"]);
    router.set_profile("default", &["fs", "git"]);

    let report = router.reconcile().await;
    assert_eq!(report.started, vec!["fs".to_string(), "git".to_string()]);
    assert!(report.profiles_changed);
    assert!(router.wait_ready("fs").await);
    assert!(router.wait_ready("git").await);

    // Nothing changed
    let report = router.reconcile().await;
    assert!(!report.has_changes(), "unexpected changes: {report:?}");
    assert_eq!(fs.connects(), 1);

    // Update fs, drop git from the profile
    let mut changed = fs.definition();
    changed.transport = TransportConfig::custom(FAKE_KIND, json!({"generation": 2}));
    router.define(changed);
    router.set_profile("default", &["fs"]);
    let report = router.reconcile().await;
    assert_eq!(report.updated, vec!["fs".to_string()]);
    assert_eq!(report.stopped, vec!["git".to_string()]);
    assert!(router.wait_ready("fs").await);
    assert_eq!(fs.connects(), 2);
    assert_eq!(router.sessions().state("git"), None);

    router.shutdown().await;
}

#[tokio::test]
async fn test_unreferenced_and_disabled_servers_are_not_started() {
    let router = TestRouter::new();
    let fs = router.add_backend("fs", &["list"]);
    let idle = router.add_backend("idle", &["list"]);
    let off = router.connector.add(FakeBackend::new("off", &["list"]));
    let mut disabled = off.definition();
    disabled.disabled = true;
    router.define(disabled);
    router.set_profile("default", &["fs", "off"]);

    router.reconcile().await;
    assert!(router.wait_ready("fs").await);
    assert_eq!(router.sessions().names(), vec!["fs".to_string()]);
    assert_eq!(idle.connects(), 0);
    assert_eq!(off.connects(), 0);

    // Disabling a running backend stops it
    let mut fs_off = fs.definition();
    fs_off.disabled = true;
    router.define(fs_off);
    router.reconcile().await;
    assert!(router.sessions().names().is_empty());

    router.shutdown().await;
}

#[tokio::test]
async fn test_alias_conflict_rejects_second_backend_once() {
    let router = TestRouter::new();
    let first = router.connector.add(FakeBackend::new("alpha", &["list"]));
    let second = router.connector.add(FakeBackend::new("beta", &["list"]));
    router.define(first.definition().with_alias("x"));
    router.define(second.definition().with_alias("x"));
    router.set_profile("default", &["alpha", "beta"]);

    let report = router.reconcile().await;
    assert_eq!(report.started, vec!["alpha".to_string()]);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].0, "beta");
    assert!(router.wait_ready("alpha").await);
    assert_eq!(router.sessions().state("beta"), None);

    // Same rejected definition is not reported again
    let report = router.reconcile().await;
    assert!(report.rejected.is_empty());

    // A fixed alias is picked up
    router.define(second.definition().with_alias("y"));
    let report = router.reconcile().await;
    assert_eq!(report.started, vec!["beta".to_string()]);
    assert!(router.wait_ready("beta").await);

    let caller = router.caller("c1", "default");
    assert!(wait_until(Duration::from_secs(5), || router.tool_names(&caller).len() == 2).await);
    assert_eq!(
        router.tool_names(&caller),
        vec!["x:list".to_string(), "y:list".to_string()]
    );

    router.shutdown().await;
}

#[tokio::test]
async fn test_rejected_backend_takes_alias_once_freed() {
    let router = TestRouter::new();
    let first = router.connector.add(FakeBackend::new("alpha", &["list"]));
    let second = router.connector.add(FakeBackend::new("beta", &["list"]));
    router.define(first.definition().with_alias("x"));
    router.define(second.definition().with_alias("x"));
    router.set_profile("default", &["alpha", "beta"]);

    let report = router.reconcile().await;
    assert_eq!(report.started, vec!["alpha".to_string()]);
    assert_eq!(report.rejected[0].0, "beta");
    assert!(router.wait_ready("alpha").await);

    // Dropping the winner frees "x" for the unchanged loser
    router.set_profile("default", &["beta"]);
    let report = router.reconcile().await;
    assert_eq!(report.stopped, vec!["alpha".to_string()]);
    assert_eq!(report.started, vec!["beta".to_string()]);
    assert!(report.rejected.is_empty());
    assert!(router.wait_ready("beta").await);

    let caller = router.caller("c1", "default");
    assert!(wait_until(Duration::from_secs(5), || router.tool_names(&caller).len() == 1).await);
    assert_eq!(router.tool_names(&caller), vec!["x:list".to_string()]);

    router.shutdown().await;
}

#[tokio::test]
async fn test_renamed_winner_frees_alias_for_rejected_backend() {
    let router = TestRouter::new();
    let first = router.connector.add(FakeBackend::new("alpha", &["list"]));
    let second = router.connector.add(FakeBackend::new("beta", &["list"]));
    router.define(first.definition().with_alias("x"));
    router.define(second.definition().with_alias("x"));
    router.set_profile("default", &["alpha", "beta"]);

    let report = router.reconcile().await;
    assert_eq!(report.rejected.len(), 1);
    assert!(router.wait_ready("alpha").await);

    router.define(first.definition().with_alias("a"));
    let report = router.reconcile().await;
    assert_eq!(report.updated, vec!["alpha".to_string()]);
    assert_eq!(report.started, vec!["beta".to_string()]);
    assert!(router.wait_ready("beta").await);

    let caller = router.caller("c1", "default");
    assert!(wait_until(Duration::from_secs(5), || router.tool_names(&caller).len() == 2).await);
    assert_eq!(
        router.tool_names(&caller),
        vec!["a:list".to_string(), "x:list".to_string()]
    );

    router.shutdown().await;
}

#[tokio::test]
async fn test_reconcile_emits_profiles_reloaded() {
    let router = TestRouter::new();
    router.add_backend("fs", &["list"]);
    router.set_profile("default", &["fs"]);
    let mut events = router.subscribe();

    router.reconcile().await;
    let event = wait_for_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e, DomainEvent::ProfilesReloaded { .. })
    })
    .await
    .expect("ProfilesReloaded");
    match event {
        DomainEvent::ProfilesReloaded { profiles, started, .. } => {
            assert_eq!(profiles, vec!["default".to_string()]);
            assert_eq!(started, vec!["fs".to_string()]);
        }
        other => panic!("unexpected {other:?}"),
    }

    router.shutdown().await;
}

#[tokio::test]
async fn test_reload_handle_triggers_reconcile() {
    let router = TestRouter::new();
    let cancel = CancellationToken::new();
    let handle = router
        .server
        .watcher()
        .clone()
        .spawn(cancel.clone())
        .expect("spawn watcher");

    router.add_backend("fs", &["list"]);
    router.set_profile("default", &["fs"]);
    handle.reload();
    assert!(router.wait_ready("fs").await);

    router.store.remove_server("fs");
    handle.reload();
    assert!(wait_until(Duration::from_secs(5), || router.sessions().names().is_empty()).await);

    cancel.cancel();
    handle.join().await;
    router.shutdown().await;
}

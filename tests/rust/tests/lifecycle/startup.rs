//! Startup, retry and persistent error

use std::time::Duration;

use mcprouter_core::{BackendDefinition, RouterConfig, SessionState, TransportConfig};
use mcprouter_gateway::RouterError;
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::events::wait_for_event;
use tests::{fast_config, wait_until, DomainEvent, FakeBackend, TestRouter};

const MISSING_COMMAND: &str = "mcprouter-test-command-that-does-not-exist";

#[tokio::test]
async fn test_missing_command_becomes_persistent_error_then_recovers() {
    let router = TestRouter::new();
    let mut events = router.subscribe();
    router.define(BackendDefinition::new(
        "broken",
        TransportConfig::stdio(MISSING_COMMAND, vec![]),
    ));
    router.set_profile("default", &["broken"]);

    let report = router.reconcile().await;
    assert_eq!(report.started, vec!["broken".to_string()]);

    let failed = wait_for_event(&mut events, Duration::from_secs(10), |e| {
        matches!(e, DomainEvent::BackendFailed { server, .. } if server == "broken")
    })
    .await
    .expect("BackendFailed should be emitted");
    match failed {
        DomainEvent::BackendFailed { attempts, .. } => assert_eq!(attempts, 5),
        other => panic!("unexpected event {other:?}"),
    }

    assert_eq!(router.sessions().state("broken"), Some(SessionState::Disconnected));
    let status = router.sessions().status("broken").unwrap();
    assert!(status.persistent_error.is_some());
    assert_eq!(status.attempts, 5);
    assert_eq!(router.sessions().live_session_count("broken"), 0);

    let caller = router.caller("c1", "default");
    let err = router
        .call_tool(&caller, "broken:anything", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::NameNotFound { .. }), "got {err:?}");

    // Unchanged definition: the watcher leaves it alone
    let report = router.reconcile().await;
    assert!(report.updated.is_empty() && report.started.is_empty());

    // Fix the definition: a fresh session comes up
    let fixed = router.connector.add(FakeBackend::new("broken", &["anything"]));
    router.define(fixed.definition());
    let report = router.reconcile().await;
    assert_eq!(report.updated, vec!["broken".to_string()]);
    assert!(router.wait_ready("broken").await);
    assert!(wait_until(Duration::from_secs(5), || router.tool_names(&caller).len() == 1).await);

    let result = router
        .call_tool(&caller, "broken:anything", json!({}))
        .await
        .expect("fixed backend should answer");
    assert_eq!(result["content"][0]["text"], "broken:anything");
    assert!(router.sessions().status("broken").unwrap().persistent_error.is_none());

    router.shutdown().await;
}

#[tokio::test]
async fn test_transient_connect_failures_are_retried() {
    let config = RouterConfig {
        backoff_base_ms: 100,
        backoff_max_ms: 400,
        ..fast_config()
    };
    let router = TestRouter::with_config(config);
    let fs = router.add_backend("fs", &["list"]);
    fs.set_behavior(|b| b.fail_connect = true);
    router.set_profile("default", &["fs"]);
    router.reconcile().await;

    assert!(
        wait_until(Duration::from_secs(2), || {
            router.sessions().status("fs").map(|s| s.attempts) >= Some(1)
        })
        .await
    );
    fs.set_behavior(|b| b.fail_connect = false);

    assert!(router.wait_ready("fs").await);
    let status = router.sessions().status("fs").unwrap();
    assert_eq!(status.attempts, 0);
    assert!(status.persistent_error.is_none());

    router.shutdown().await;
}

#[tokio::test]
async fn test_stale_ids_from_previous_session_are_rejected() {
    let router = TestRouter::new();
    let fs = router.add_backend("fs", &["list"]);
    router.set_profile("default", &["fs"]);
    router.reconcile().await;
    assert!(router.wait_ready("fs").await);
    let caller = router.caller("c1", "default");
    assert!(wait_until(Duration::from_secs(5), || router.tool_names(&caller).len() == 1).await);

    router.call_tool(&caller, "fs:list", json!({})).await.unwrap();
    let old_id = *fs.request_ids().last().unwrap();
    let old_epoch = router.sessions().status("fs").unwrap().epoch;

    // Any definition change replaces the session
    let mut updated = fs.definition();
    updated.transport = TransportConfig::custom(tests::fake_backend::FAKE_KIND, json!({"generation": 2}));
    router.define(updated);
    let report = router.reconcile().await;
    assert_eq!(report.updated, vec!["fs".to_string()]);
    assert!(router.wait_ready("fs").await);
    assert!(router.sessions().status("fs").unwrap().epoch > old_epoch);

    // The old session's reply arrives on the new connection
    assert!(
        fs.inject(json!({"jsonrpc": "2.0", "id": old_id, "result": {"content": []}}))
            .await
    );
    assert!(
        wait_until(Duration::from_secs(2), || {
            router.sessions().status("fs").unwrap().rejected_responses == 1
        })
        .await
    );

    // The new session keeps working
    assert!(wait_until(Duration::from_secs(5), || router.tool_names(&caller).len() == 1).await);
    router.call_tool(&caller, "fs:list", json!({})).await.unwrap();
    assert_eq!(router.sessions().peak_live_sessions("fs"), 1);

    router.shutdown().await;
}

//! Liveness probes and protocol faults

use std::time::Duration;

use mcprouter_core::RouterConfig;
use serde_json::json;
use tests::events::wait_for_event;
use tests::{fast_config, wait_until, DomainEvent, SessionState, TestRouter};

fn degraded(server: &'static str) -> impl Fn(&DomainEvent) -> bool {
    move |event| {
        matches!(
            event,
            DomainEvent::BackendStateChanged { server: s, state: SessionState::Degraded, .. } if s == server
        )
    }
}

#[tokio::test]
async fn test_failed_probes_demote_and_reconnect() {
    let config = RouterConfig {
        probe_interval_ms: 50,
        probe_timeout_ms: 30,
        probe_failure_threshold: 2,
        ..fast_config()
    };
    let router = TestRouter::with_config(config);
    let fs = router.add_backend("fs", &["list"]);
    router.set_profile("default", &["fs"]);
    let mut events = router.subscribe();
    router.reconcile().await;
    assert!(router.wait_ready("fs").await);
    assert_eq!(fs.connects(), 1);

    fs.set_behavior(|b| b.ignore_ping = true);
    assert!(
        wait_for_event(&mut events, Duration::from_secs(5), degraded("fs"))
            .await
            .is_some(),
        "unanswered probes should demote the session"
    );

    fs.set_behavior(|b| b.ignore_ping = false);
    assert!(router.wait_ready("fs").await);
    assert!(fs.connects() >= 2);

    let caller = router.caller("c1", "default");
    assert!(wait_until(Duration::from_secs(5), || router.tool_names(&caller).len() == 1).await);
    router.call_tool(&caller, "fs:list", json!({})).await.unwrap();

    router.shutdown().await;
}

#[tokio::test]
async fn test_malformed_reply_demotes_and_recovers() {
    let router = TestRouter::new();
    let fs = router.add_backend("fs", &["list"]);
    router.set_profile("default", &["fs"]);
    let mut events = router.subscribe();
    router.reconcile().await;
    assert!(router.wait_ready("fs").await);
    let caller = router.caller("c1", "default");
    assert!(wait_until(Duration::from_secs(5), || router.tool_names(&caller).len() == 1).await);
    let epoch = router.sessions().status("fs").unwrap().epoch;

    fs.set_behavior(|b| b.malformed_next_call = true);
    assert!(router.call_tool(&caller, "fs:list", json!({})).await.is_err());
    assert!(wait_for_event(&mut events, Duration::from_secs(5), degraded("fs"))
        .await
        .is_some());

    assert!(router.wait_ready("fs").await);
    assert!(router.sessions().status("fs").unwrap().epoch > epoch);
    assert!(wait_until(Duration::from_secs(5), || router.tool_names(&caller).len() == 1).await);
    let result = router.call_tool(&caller, "fs:list", json!({})).await.unwrap();
    assert_eq!(result["content"][0]["text"], "fs:list");
    assert_eq!(router.sessions().peak_live_sessions("fs"), 1);

    router.shutdown().await;
}

//! Graceful removal and router shutdown

use std::sync::Arc;
use std::time::{Duration, Instant};

use mcprouter_core::RouterConfig;
use mcprouter_gateway::RouterError;
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::{fast_config, wait_until, TestRouter};

async fn ready(config: RouterConfig, backends: &[&str]) -> Arc<TestRouter> {
    let router = Arc::new(TestRouter::with_config(config));
    for name in backends {
        router.add_backend(name, &["work"]);
    }
    router.set_profile("default", backends);
    router.reconcile().await;
    let caller = router.caller("probe", "default");
    for name in backends {
        assert!(router.wait_ready(name).await);
    }
    let expected = backends.len();
    assert!(wait_until(Duration::from_secs(5), || router.tool_names(&caller).len() == expected).await);
    router
}

#[tokio::test]
async fn test_removal_drains_in_flight_requests() {
    let router = ready(fast_config(), &["fs"]).await;
    let fs = router.connector.get("fs").unwrap();
    fs.set_behavior(|b| b.call_delay = Duration::from_millis(300));
    let caller = router.caller("c1", "default");

    let calls: Vec<_> = (0..5)
        .map(|i| {
            let router = router.clone();
            let caller = caller.clone();
            tokio::spawn(async move { router.call_tool(&caller, "fs:work", json!({"i": i})).await })
        })
        .collect();
    assert!(wait_until(Duration::from_secs(2), || fs.active_calls() == 5).await);

    router.store.remove_server("fs");
    let report = router.reconcile().await;
    assert_eq!(report.stopped, vec!["fs".to_string()]);

    for call in calls {
        call.await.unwrap().expect("in-flight call should complete during drain");
    }
    assert_eq!(router.sessions().state("fs"), None);
    assert_eq!(router.sessions().live_session_count("fs"), 0);
    assert!(router.tool_names(&caller).is_empty());

    // Gone for new requests
    let err = router.call_tool(&caller, "fs:work", json!({})).await.unwrap_err();
    assert!(matches!(err, RouterError::NameNotFound { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_removal_waits_for_requests_to_time_out() {
    let config = RouterConfig {
        request_timeout_ms: 300,
        drain_timeout_ms: 5_000,
        ..fast_config()
    };
    let router = ready(config, &["fs"]).await;
    let fs = router.connector.get("fs").unwrap();
    fs.set_behavior(|b| b.hang_calls = true);
    let caller = router.caller("c1", "default");

    let calls: Vec<_> = (0..3)
        .map(|_| {
            let router = router.clone();
            let caller = caller.clone();
            tokio::spawn(async move { router.call_tool(&caller, "fs:work", json!({})).await })
        })
        .collect();
    assert!(wait_until(Duration::from_secs(2), || fs.active_calls() == 3).await);

    let started = Instant::now();
    assert!(router.sessions().stop("fs").await);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "drain should end once requests time out, took {:?}",
        started.elapsed()
    );

    for call in calls {
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RouterError::Timeout { .. }), "got {err:?}");
    }
    assert!(router.dispatcher().correlations().is_empty());
    assert_eq!(router.sessions().live_session_count("fs"), 0);
}

#[tokio::test]
async fn test_shutdown_closes_everything_and_refuses_new_backends() {
    let router = ready(fast_config(), &["fs", "git"]).await;
    assert_eq!(router.sessions().names(), vec!["fs".to_string(), "git".to_string()]);

    router.shutdown().await;

    assert!(router.sessions().names().is_empty());
    assert_eq!(router.sessions().live_session_count("fs"), 0);
    assert_eq!(router.sessions().live_session_count("git"), 0);

    let definition = router.connector.get("fs").unwrap().definition();
    let err = router.sessions().start(definition).await.unwrap_err();
    assert!(matches!(err, RouterError::BackendUnavailable { .. }), "got {err:?}");
}

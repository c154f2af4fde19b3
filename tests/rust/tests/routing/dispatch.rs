//! Dispatch: correlation, isolation, timeout and cancellation

use std::sync::Arc;
use std::time::{Duration, Instant};

use mcprouter_core::RouterConfig;
use mcprouter_gateway::RouterError;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tests::{fast_config, wait_until, TestRouter};

async fn ready_router(config: RouterConfig, backends: &[&str]) -> Arc<TestRouter> {
    let router = Arc::new(TestRouter::with_config(config));
    for name in backends {
        router.add_backend(name, &["work"]);
    }
    router.set_profile("default", backends);
    router.reconcile().await;
    for name in backends {
        assert!(router.wait_ready(name).await, "{name} should become ready");
    }
    let caller = router.caller("probe", "default");
    let expected = backends.len();
    assert!(wait_until(Duration::from_secs(5), || router.tool_names(&caller).len() == expected).await);
    router
}

#[tokio::test]
async fn test_replies_are_matched_by_id_not_arrival_order() {
    let router = ready_router(fast_config(), &["fs"]).await;
    let fs = router.connector.get("fs").unwrap();
    let caller = router.caller("c1", "default");

    fs.set_behavior(|b| b.call_delay = Duration::from_millis(400));
    let slow = {
        let router = router.clone();
        let caller = caller.clone();
        tokio::spawn(async move { router.call_tool(&caller, "fs:work", json!({"n": 1})).await })
    };
    assert!(wait_until(Duration::from_secs(2), || fs.active_calls() == 1).await);

    fs.set_behavior(|b| b.call_delay = Duration::ZERO);
    let fast = router
        .call_tool(&caller, "fs:work", json!({"n": 2}))
        .await
        .expect("second call");
    assert!(!slow.is_finished(), "first call should still be outstanding");

    let slow = slow.await.unwrap().expect("first call");
    assert_eq!(fast["structuredContent"]["arguments"], json!({"n": 2}));
    assert_eq!(slow["structuredContent"]["arguments"], json!({"n": 1}));

    router.shutdown().await;
}

#[tokio::test]
async fn test_unresponsive_backend_does_not_delay_others() {
    let router = ready_router(fast_config(), &["slow", "fast"]).await;
    let slow = router.connector.get("slow").unwrap();
    slow.set_behavior(|b| b.hang_calls = true);
    let caller = router.caller("c1", "default");

    let mut stuck = Vec::new();
    for _ in 0..5 {
        let router = router.clone();
        let caller = caller.clone();
        stuck.push(tokio::spawn(async move {
            router.call_tool(&caller, "slow:work", json!({})).await
        }));
    }
    assert!(wait_until(Duration::from_secs(2), || slow.active_calls() == 5).await);

    let started = Instant::now();
    let calls = (0..10).map(|i| router.call_tool(&caller, "fast:work", json!({"i": i})));
    for result in futures::future::join_all(calls).await {
        result.expect("fast backend should answer");
    }
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "fast backend took {:?}",
        started.elapsed()
    );

    for handle in stuck {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, RouterError::Timeout { .. }), "got {err:?}");
    }

    router.shutdown().await;
}

#[tokio::test]
async fn test_timeout_sends_cancellation_upstream() {
    let config = RouterConfig {
        request_timeout_ms: 200,
        ..fast_config()
    };
    let router = ready_router(config, &["fs"]).await;
    let fs = router.connector.get("fs").unwrap();
    fs.set_behavior(|b| b.hang_calls = true);
    let caller = router.caller("c1", "default");

    let err = router
        .call_tool(&caller, "fs:work", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Timeout { .. }), "got {err:?}");
    assert!(err.is_retryable());

    let call_id = *fs.request_ids().last().unwrap();
    assert!(wait_until(Duration::from_secs(2), || !fs.cancelled().is_empty()).await);
    assert_eq!(fs.cancelled(), vec![json!(call_id)]);
    assert!(router.dispatcher().correlations().is_empty());

    router.shutdown().await;
}

#[tokio::test]
async fn test_client_cancellation_is_forwarded() {
    let router = ready_router(fast_config(), &["fs"]).await;
    let fs = router.connector.get("fs").unwrap();
    fs.set_behavior(|b| b.hang_calls = true);
    let caller = router.caller("c1", "default");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = router
        .call_tool_with(&caller, "fs:work", json!({}), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Cancelled { .. }), "got {err:?}");
    assert!(wait_until(Duration::from_secs(2), || fs.cancelled().len() == 1).await);
    assert!(router.dispatcher().correlations().is_empty());

    router.shutdown().await;
}

#[tokio::test]
async fn test_departing_client_cancels_only_its_requests() {
    let router = ready_router(fast_config(), &["fs"]).await;
    let fs = router.connector.get("fs").unwrap();
    fs.set_behavior(|b| b.hang_calls = true);

    let spawn_call = |client: &str| {
        let router = router.clone();
        let caller = router.caller(client, "default");
        tokio::spawn(async move { router.call_tool(&caller, "fs:work", json!({})).await })
    };
    let a1 = spawn_call("a");
    let a2 = spawn_call("a");
    let b1 = spawn_call("b");
    assert!(wait_until(Duration::from_secs(2), || fs.active_calls() == 3).await);

    assert_eq!(router.dispatcher().cancel_client("a"), 2);

    for handle in [a1, a2] {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, RouterError::Cancelled { .. }), "got {err:?}");
    }
    assert!(!b1.is_finished());
    assert!(wait_until(Duration::from_secs(2), || fs.cancelled().len() == 2).await);

    b1.abort();
    router.shutdown().await;
}

#[tokio::test]
async fn test_backend_error_is_passed_through() {
    let router = ready_router(fast_config(), &["fs"]).await;
    let fs = router.connector.get("fs").unwrap();
    fs.set_behavior(|b| b.call_error = Some((-32042, "disk on fire".to_string())));
    let caller = router.caller("c1", "default");

    let err = router
        .call_tool(&caller, "fs:work", json!({}))
        .await
        .unwrap_err();
    match err {
        RouterError::BackendError {
            server,
            code,
            message,
            data,
        } => {
            assert_eq!(server, "fs");
            assert_eq!(code, -32042);
            assert_eq!(message, "disk on fire");
            assert_eq!(data, Some(json!({"tool": "work"})));
        }
        other => panic!("expected BackendError, got {other:?}"),
    }
    // A JSON-RPC error reply is not a protocol fault
    assert_eq!(router.sessions().state("fs"), Some(tests::SessionState::Ready));

    router.shutdown().await;
}

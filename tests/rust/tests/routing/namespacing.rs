//! Exposed-name construction and resolution

use std::time::Duration;

use mcprouter_gateway::RouterError;
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::{wait_until, TestRouter};

async fn two_backends_with_list() -> TestRouter {
    let router = TestRouter::new();
    router.add_backend("fs", &["list", "read"]);
    router.add_backend("git", &["list"]);
    router.set_profile("default", &["fs", "git"]);
    router.set_profile("files", &["fs"]);
    router.reconcile().await;
    assert!(router.wait_ready("fs").await);
    assert!(router.wait_ready("git").await);
    let caller = router.caller("c1", "default");
    assert!(wait_until(Duration::from_secs(5), || router.tool_names(&caller).len() == 3).await);
    router
}

#[tokio::test]
async fn test_same_tool_name_is_exposed_once_per_backend() {
    let router = two_backends_with_list().await;
    let caller = router.caller("c1", "default");

    assert_eq!(
        router.tool_names(&caller),
        vec!["fs:list".to_string(), "fs:read".to_string(), "git:list".to_string()]
    );

    router.shutdown().await;
}

#[tokio::test]
async fn test_call_dispatches_only_to_owning_backend() {
    let router = two_backends_with_list().await;
    let caller = router.caller("c1", "default");
    let fs = router.connector.get("fs").unwrap();
    let git = router.connector.get("git").unwrap();

    let result = router
        .call_tool(&caller, "fs:list", json!({"path": "/tmp"}))
        .await
        .expect("fs:list should succeed");

    assert_eq!(result["content"][0]["text"], "fs:list");
    // The backend sees its own name, not the namespaced one
    assert_eq!(fs.calls(), vec![("list".to_string(), json!({"path": "/tmp"}))]);
    assert!(git.calls().is_empty());

    router.shutdown().await;
}

#[tokio::test]
async fn test_profile_limits_visible_and_callable_names() {
    let router = two_backends_with_list().await;
    let caller = router.caller("c2", "files");

    assert_eq!(
        router.tool_names(&caller),
        vec!["fs:list".to_string(), "fs:read".to_string()]
    );

    let err = router
        .call_tool(&caller, "git:list", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::NameNotFound { .. }), "got {err:?}");
    assert!(router.connector.get("git").unwrap().calls().is_empty());

    router.shutdown().await;
}

#[tokio::test]
async fn test_unresolvable_names_are_not_found() {
    let router = two_backends_with_list().await;
    let caller = router.caller("c1", "default");

    for name in ["nope:list", "list", "fs:missing", ":list", "fs:"] {
        let err = router.call_tool(&caller, name, json!({})).await.unwrap_err();
        assert!(
            matches!(err, RouterError::NameNotFound { .. }),
            "{name} should be NameNotFound, got {err:?}"
        );
    }

    router.shutdown().await;
}

#[tokio::test]
async fn test_alias_replaces_server_name_in_exposed_keys() {
    let router = TestRouter::new();
    let backend = router.connector.add(tests::FakeBackend::new("filesystem", &["read"]));
    router.define(backend.definition().with_alias("files"));
    router.set_profile("default", &["filesystem"]);
    router.reconcile().await;
    assert!(router.wait_ready("filesystem").await);

    let caller = router.caller("c1", "default");
    assert!(wait_until(Duration::from_secs(5), || !router.tool_names(&caller).is_empty()).await);
    assert_eq!(router.tool_names(&caller), vec!["files:read".to_string()]);

    let result = router.call_tool(&caller, "files:read", json!({})).await.unwrap();
    assert_eq!(result["content"][0]["text"], "filesystem:read");

    router.shutdown().await;
}

#[tokio::test]
async fn test_list_changed_refreshes_catalog() {
    let router = TestRouter::new();
    let fs = router.add_backend("fs", &["list"]);
    router.set_profile("default", &["fs"]);
    router.reconcile().await;
    assert!(router.wait_ready("fs").await);
    let caller = router.caller("c1", "default");
    assert!(wait_until(Duration::from_secs(5), || router.tool_names(&caller).len() == 1).await);

    fs.change_tools(&["list", "stat"]).await;

    assert!(
        wait_until(Duration::from_secs(5), || {
            router.tool_names(&caller) == vec!["fs:list".to_string(), "fs:stat".to_string()]
        })
        .await
    );

    router.shutdown().await;
}

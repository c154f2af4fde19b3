//! Reconcile against a JSON profiles file on disk

use std::path::Path;
use std::sync::Arc;

use mcprouter_core::JsonFileProfileStore;
use mcprouter_gateway::{ConnectorRegistry, RouterServer};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tests::fake_backend::FAKE_KIND;
use tests::{fast_config, wait_until, FakeBackend, FakeConnector, SessionState};

fn write_profiles(path: &Path, body: &str) {
    std::fs::write(path, body).expect("write profiles file");
}

fn router_over(path: &Path, connector: Arc<FakeConnector>) -> RouterServer {
    let registry = Arc::new(ConnectorRegistry::new());
    registry.register(FAKE_KIND, connector);
    RouterServer::new(
        fast_config(),
        Arc::new(JsonFileProfileStore::new(path.to_path_buf())),
        registry,
    )
}

async fn wait_ready(server: &RouterServer, name: &str) -> bool {
    wait_until(std::time::Duration::from_secs(5), || {
        server.state().sessions().state(name) == Some(SessionState::Ready)
    })
    .await
}

#[tokio::test]
async fn test_file_rewrite_updates_backend() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("profiles.json");
    let connector = FakeConnector::new();
    let fs = connector.add(FakeBackend::new("fs", &["list"]));
    write_profiles(
        &path,
        r#"{
            "mcpServers": {"fs": {"type": "custom", "kind": "fake"}},
            "profiles": {"default": ["fs"]}
        }"#,
    );

    let server = router_over(&path, connector);
    let report = server.watcher().reconcile().await.unwrap();
    assert_eq!(report.started, vec!["fs".to_string()]);
    assert!(wait_ready(&server, "fs").await);

    write_profiles(
        &path,
        r#"{
            "mcpServers": {"fs": {"type": "custom", "kind": "fake", "alias": "files"}},
            "profiles": {"default": {"servers": ["fs"]}}
        }"#,
    );
    let report = server.watcher().reconcile().await.unwrap();
    assert_eq!(report.updated, vec!["fs".to_string()]);
    assert!(wait_ready(&server, "fs").await);
    assert_eq!(fs.connects(), 2);
    assert_eq!(server.state().sessions().status("fs").unwrap().alias, "files");

    server.state().sessions().shutdown(std::time::Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_invalid_file_keeps_previous_state() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("profiles.json");
    let connector = FakeConnector::new();
    connector.add(FakeBackend::new("fs", &["list"]));
    write_profiles(
        &path,
        r#"{"mcpServers": {"fs": {"type": "custom", "kind": "fake"}}, "profiles": {"default": ["fs"]}}"#,
    );

    let server = router_over(&path, connector);
    server.watcher().reconcile().await.unwrap();
    assert!(wait_ready(&server, "fs").await);

    write_profiles(&path, "{ this is not json");
    assert!(server.watcher().reconcile().await.is_err());
    assert_eq!(server.state().sessions().state("fs"), Some(SessionState::Ready));
    assert_eq!(server.state().profiles.servers("default").len(), 1);

    server.state().sessions().shutdown(std::time::Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_missing_file_is_an_empty_store() {
    let dir = TempDir::new().unwrap();
    let server = router_over(&dir.path().join("absent.json"), FakeConnector::new());
    let report = server.watcher().reconcile().await.unwrap();
    assert!(report.started.is_empty());
    assert!(server.state().sessions().names().is_empty());
}

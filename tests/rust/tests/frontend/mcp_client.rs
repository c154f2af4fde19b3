//! End to end over Streamable HTTP

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use pretty_assertions::assert_eq;
use rmcp::{
    model::*,
    service::NotificationContext,
    transport::StreamableHttpClientTransport,
    RoleClient, ServiceExt,
};
use serde_json::json;
use tests::{wait_until, RunningRouter, TestRouter};
use tokio::sync::Notify;
use tracing_subscriber::fmt::MakeWriter;

fn client_info(name: &str) -> ClientInfo {
    ClientInfo {
        protocol_version: Default::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn running_with(backends: &[(&str, &[&str])]) -> RunningRouter {
    let router = TestRouter::new();
    let names: Vec<&str> = backends.iter().map(|(name, _)| *name).collect();
    for (name, tools) in backends {
        router.add_backend(name, tools);
    }
    router.set_profile("default", &names);
    router.set_profile("fs-only", &["fs"]);
    let running = router.serve_http().await;
    for name in names {
        assert!(running.wait_ready(name).await, "{name} should become ready");
    }
    running
}

fn tool_names(result: &ListToolsResult) -> Vec<String> {
    let mut names: Vec<String> = result.tools.iter().map(|t| t.name.to_string()).collect();
    names.sort();
    names
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_lists_and_calls_namespaced_tools() {
    let running = running_with(&[("fs", &["list"]), ("git", &["list", "log"])]).await;

    let transport = StreamableHttpClientTransport::from_uri(running.mcp_url(None).as_str());
    let client = client_info("e2e").serve(transport).await.expect("connect");

    let server = client.peer_info().expect("server info");
    assert!(server.capabilities.tools.is_some());

    let tools = client.list_tools(Default::default()).await.expect("list_tools");
    assert_eq!(tool_names(&tools), vec!["fs:list", "git:list", "git:log"]);

    let result = client
        .call_tool(CallToolRequestParams {
            name: "git:log".into(),
            arguments: json!({"limit": 3}).as_object().cloned(),
            task: None,
            meta: None,
        })
        .await
        .expect("call_tool");
    let structured = result.structured_content.expect("structured content");
    assert_eq!(structured["server"], "git");
    assert_eq!(structured["tool"], "log");
    assert_eq!(structured["arguments"], json!({"limit": 3}));
    assert!(wait_until(Duration::from_secs(2), || running.state.notifier.client_count() == 1).await);

    let err = client
        .call_tool(CallToolRequestParams {
            name: "svn:log".into(),
            arguments: None,
            task: None,
            meta: None,
        })
        .await;
    assert!(err.is_err(), "unknown namespace should be an error");

    client.cancel().await.ok();
    running.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_profile_query_param_limits_catalog() {
    let running = running_with(&[("fs", &["list"]), ("git", &["log"])]).await;

    let transport =
        StreamableHttpClientTransport::from_uri(running.mcp_url(Some("fs-only")).as_str());
    let client = client_info("scoped").serve(transport).await.expect("connect");

    let tools = client.list_tools(Default::default()).await.expect("list_tools");
    assert_eq!(tool_names(&tools), vec!["fs:list"]);

    client.cancel().await.ok();
    running.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_profile_is_rejected() {
    let running = running_with(&[("fs", &["list"])]).await;

    let transport = StreamableHttpClientTransport::from_uri(running.mcp_url(Some("nope")).as_str());
    let result = client_info("lost").serve(transport).await;
    assert!(result.is_err(), "initialize with an unknown profile should fail");

    running.stop().await;
}

#[derive(Clone)]
struct ListChangedClient {
    received: Arc<Notify>,
}

impl rmcp::ClientHandler for ListChangedClient {
    fn get_info(&self) -> ClientInfo {
        client_info("list-changed")
    }

    fn on_tool_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        self.received.notify_one();
        async {}
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_backend_list_change_reaches_client() {
    let running = running_with(&[("fs", &["list"]), ("git", &["log"])]).await;
    let fs = running.connector.get("fs").unwrap();

    let received = Arc::new(Notify::new());
    let transport = StreamableHttpClientTransport::from_uri(running.mcp_url(None).as_str());
    let client = ListChangedClient {
        received: received.clone(),
    }
    .serve(transport)
    .await
    .expect("connect");
    assert!(wait_until(Duration::from_secs(2), || running.state.notifier.client_count() == 1).await);
    // Let the SSE stream establish
    tokio::time::sleep(Duration::from_millis(200)).await;

    fs.change_tools(&["list", "stat"]).await;
    tokio::time::timeout(Duration::from_secs(5), received.notified())
        .await
        .expect("tools/list_changed should reach the client");

    let tools = client.list_tools(Default::default()).await.expect("list_tools");
    assert_eq!(tool_names(&tools), vec!["fs:list", "fs:stat", "git:log"]);

    client.cancel().await.ok();
    running.stop().await;
}

/// Formatted log output of the whole test binary
#[derive(Clone, Default)]
struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn install() -> &'static CapturedLogs {
        static LOGS: OnceLock<CapturedLogs> = OnceLock::new();
        LOGS.get_or_init(|| {
            let logs = CapturedLogs::default();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(logs.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::DEBUG)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
            logs
        })
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handler_logs_carry_mcp_prefix() {
    let logs = CapturedLogs::install();
    let running = running_with(&[("fs", &["list"])]).await;

    let transport = StreamableHttpClientTransport::from_uri(running.mcp_url(None).as_str());
    let client = client_info("logged").serve(transport).await.expect("connect");
    client.list_tools(Default::default()).await.expect("list_tools");
    client
        .call_tool(CallToolRequestParams {
            name: "fs:list".into(),
            arguments: None,
            task: None,
            meta: None,
        })
        .await
        .expect("call_tool");
    client.cancel().await.ok();
    running.stop().await;

    let text = logs.text();
    let messages: Vec<&str> = text
        .lines()
        .filter_map(|line| line.split_once("mcprouter_gateway::mcp::handler: "))
        .map(|(_, message)| message)
        .collect();
    assert!(messages.iter().any(|m| m.contains("call_tool")), "{text}");
    for message in messages {
        assert!(message.starts_with("[MCP] "), "unprefixed handler log: {message}");
    }
}

//! Remote transport for MCP servers reached over HTTP
//!
//! Streamable HTTP: each outgoing JSON-RPC message is POSTed to the
//! endpoint. The server answers with either a JSON body or an SSE stream
//! carrying the response (and any notifications emitted while handling it).
//! After the handshake a standalone GET stream is opened for
//! server-initiated notifications when the server supports it.
//!
//! Legacy SSE: a GET stream is opened first and announces, in an `endpoint`
//! event, where messages are to be POSTed. Every reply arrives on that one
//! stream. Servers that reject the initialize POST with a 4xx are retried in
//! this mode unless the protocol is pinned.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mcprouter_core::{RemoteProtocol, TransportType};
use parking_lot::RwLock;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::link::LinkEnds;
use super::sse::SseDecoder;
use super::{BackendLink, LinkEvent, Transport};
use crate::error::{RouterError, RouterResult};
use crate::pool::protocol;

const SESSION_HEADER: &str = "mcp-session-id";
const INITIALIZED: &str = "notifications/initialized";

/// Remote transport for HTTP MCP servers
pub struct HttpTransport {
    server: String,
    url: String,
    headers: BTreeMap<String, String>,
    protocol: RemoteProtocol,
    connect_timeout: Duration,
}

impl HttpTransport {
    pub fn new(
        server: String,
        url: String,
        headers: BTreeMap<String, String>,
        protocol: RemoteProtocol,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            server,
            url,
            headers,
            protocol,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> RouterResult<BackendLink> {
        info!(
            server = %self.server,
            url = %self.url,
            protocol = ?self.protocol,
            "[HttpTransport] Opening remote backend"
        );

        let url = reqwest::Url::parse(&self.url).map_err(|e| {
            RouterError::transport(&self.server, format!("Invalid URL '{}': {}", self.url, e))
        })?;

        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| RouterError::transport(&self.server, format!("HTTP client: {}", e)))?;

        let (link, ends) = BackendLink::channel();
        let LinkEnds {
            outbound,
            inbound,
            shutdown,
        } = ends;

        let shared = Arc::new(HttpShared {
            server: self.server.clone(),
            url,
            headers: self.headers.clone(),
            protocol: self.protocol,
            connect_timeout: self.connect_timeout,
            client,
            session_id: RwLock::new(None),
            endpoint: RwLock::new(None),
            inbound,
            shutdown,
            listening: AtomicBool::new(false),
            handshake_done: AtomicBool::new(false),
        });

        if self.protocol == RemoteProtocol::Sse {
            if let Err(e) = shared.open_legacy().await {
                shared.shutdown.cancel();
                return Err(e);
            }
        }

        tokio::spawn(shared.run(outbound));

        Ok(link)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Remote
    }

    fn description(&self) -> String {
        match self.protocol {
            RemoteProtocol::Sse => format!("sse:{}", self.url),
            _ => format!("remote:{}", self.url),
        }
    }
}

struct HttpShared {
    server: String,
    url: reqwest::Url,
    headers: BTreeMap<String, String>,
    protocol: RemoteProtocol,
    connect_timeout: Duration,
    client: reqwest::Client,
    session_id: RwLock<Option<String>>,
    /// Where messages go once a legacy SSE stream is open
    endpoint: RwLock<Option<reqwest::Url>>,
    inbound: mpsc::Sender<LinkEvent>,
    shutdown: CancellationToken,
    /// Whether the standalone GET stream has been started
    listening: AtomicBool,
    /// Set once `notifications/initialized` has been delivered
    handshake_done: AtomicBool,
}

impl HttpShared {
    async fn run(self: Arc<Self>, mut outbound: mpsc::Receiver<Value>) {
        loop {
            let msg = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                msg = outbound.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            if self.is_ordered(&msg) {
                // The POST completes before the next message is sent; only
                // reading the body happens in the background.
                let is_initialize = method_of(&msg) == Some("initialize");
                if let Some(response) = self.send(&msg).await {
                    tokio::spawn(self.clone().handle_response(response, is_initialize));
                }
                if method_of(&msg) == Some(INITIALIZED) {
                    self.handshake_done.store(true, Ordering::SeqCst);
                }
            } else {
                // Requests after the handshake are independent; a slow call
                // must not hold up the next POST
                let this = self.clone();
                tokio::spawn(async move {
                    if let Some(response) = this.send(&msg).await {
                        this.handle_response(response, false).await;
                    }
                });
            }
        }

        self.terminate_session().await;
        let _ = self
            .inbound
            .send(LinkEvent::Closed("link shut down".to_string()))
            .await;
    }

    /// Handshake traffic, notifications and replies to server requests
    /// keep their order. Legacy SSE posts are cheap and always ordered.
    fn is_ordered(&self, msg: &Value) -> bool {
        request_id(msg).is_none()
            || !self.handshake_done.load(Ordering::SeqCst)
            || self.endpoint.read().is_some()
    }

    fn request_builder(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder;
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(session_id) = self.session_id.read().clone() {
            builder = builder.header(SESSION_HEADER, session_id);
        }
        builder
    }

    /// POST one message and wait for the response head.
    ///
    /// Returns the response only when it has a body left to read.
    async fn send(self: &Arc<Self>, msg: &Value) -> Option<reqwest::Response> {
        let endpoint = self.endpoint.read().clone();
        if let Some(endpoint) = endpoint {
            self.post_legacy(endpoint, msg).await;
            return None;
        }

        let is_initialize = method_of(msg) == Some("initialize");
        let builder = self
            .request_builder(self.client.post(self.url.clone()))
            .header(ACCEPT, "application/json, text/event-stream")
            .json(msg);

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(server = %self.server, error = %e, "[HttpTransport] POST failed");
                self.close(format!("POST failed: {}", e)).await;
                return None;
            }
        };

        let status = response.status();
        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write() = Some(session_id.to_string());
        }

        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return None;
        }
        if status == StatusCode::NOT_FOUND && self.session_id.read().is_some() {
            self.close("remote session expired".to_string()).await;
            return None;
        }
        if is_initialize && self.protocol == RemoteProtocol::Auto && falls_back(status) {
            info!(
                server = %self.server,
                %status,
                "[HttpTransport] Streamable HTTP rejected, trying legacy SSE"
            );
            match self.open_legacy().await {
                Ok(endpoint) => self.post_legacy(endpoint, msg).await,
                Err(e) => {
                    self.close(format!("HTTP {} and legacy SSE failed: {}", status, e))
                        .await
                }
            }
            return None;
        }
        if !status.is_success() {
            warn!(server = %self.server, %status, "[HttpTransport] Backend returned HTTP error");
            self.reply_error(msg, format!("HTTP {}", status)).await;
            return None;
        }

        Some(response)
    }

    async fn handle_response(self: Arc<Self>, response: reqwest::Response, is_initialize: bool) {
        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_sse {
            if is_initialize {
                // The handshake result arrives on this stream; the GET
                // listener can start alongside it.
                self.clone().start_listener();
            }
            self.read_sse(response, None).await;
        } else {
            match response.bytes().await {
                Ok(body) if body.is_empty() => {}
                Ok(body) => match serde_json::from_slice::<Value>(&body) {
                    Ok(value) => self.deliver(value).await,
                    Err(e) => {
                        let _ = self
                            .inbound
                            .send(LinkEvent::Malformed(format!("invalid JSON body: {}", e)))
                            .await;
                    }
                },
                Err(e) => self.close(format!("body read failed: {}", e)).await,
            }
            if is_initialize {
                self.clone().start_listener();
            }
        }
    }

    /// Open the legacy event stream and wait for its `endpoint` event
    async fn open_legacy(self: &Arc<Self>) -> RouterResult<reqwest::Url> {
        let response = self
            .request_builder(self.client.get(self.url.clone()))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                RouterError::transport(&self.server, format!("SSE connect failed: {}", e))
            })?;
        if !response.status().is_success() {
            return Err(RouterError::transport(
                &self.server,
                format!("SSE stream returned HTTP {}", response.status()),
            ));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let this = self.clone();
        tokio::spawn(async move {
            this.read_sse(response, Some(endpoint_tx)).await;
            this.close("SSE stream ended".to_string()).await;
        });

        let path = match tokio::time::timeout(self.connect_timeout, endpoint_rx).await {
            Ok(Ok(path)) => path,
            Ok(Err(_)) => {
                return Err(RouterError::transport(
                    &self.server,
                    "SSE stream ended before announcing an endpoint",
                ))
            }
            Err(_) => {
                return Err(RouterError::transport(
                    &self.server,
                    format!("no endpoint event within {:?}", self.connect_timeout),
                ))
            }
        };

        let endpoint = self.url.join(path.trim()).map_err(|e| {
            RouterError::transport(&self.server, format!("Invalid endpoint '{}': {}", path, e))
        })?;
        debug!(server = %self.server, endpoint = %endpoint, "[HttpTransport] Legacy SSE endpoint ready");
        *self.endpoint.write() = Some(endpoint.clone());
        Ok(endpoint)
    }

    /// Replies to legacy posts come back on the event stream
    async fn post_legacy(&self, endpoint: reqwest::Url, msg: &Value) {
        let builder = self.request_builder(self.client.post(endpoint)).json(msg);
        match builder.send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(
                    server = %self.server,
                    status = %response.status(),
                    "[HttpTransport] Legacy endpoint rejected message"
                );
                self.reply_error(msg, format!("HTTP {}", response.status()))
                    .await;
            }
            Err(e) => {
                warn!(server = %self.server, error = %e, "[HttpTransport] POST failed");
                self.close(format!("POST failed: {}", e)).await;
            }
        }
    }

    /// Answer a request locally when its POST was refused
    async fn reply_error(&self, msg: &Value, message: String) {
        if let Some(id) = request_id(msg) {
            let reply = protocol::error_response(id, protocol::INTERNAL_ERROR, message);
            let _ = self.inbound.send(LinkEvent::Message(reply)).await;
        }
    }

    /// Forward one JSON value (or each element of a batch)
    async fn deliver(&self, value: Value) {
        match value {
            Value::Array(items) => {
                for item in items {
                    let _ = self.inbound.send(LinkEvent::Message(item)).await;
                }
            }
            other => {
                let _ = self.inbound.send(LinkEvent::Message(other)).await;
            }
        }
    }

    /// Pump an event stream into the link.
    ///
    /// With `endpoint` set, the first `endpoint` event is handed over
    /// instead of being parsed as a message.
    async fn read_sse(
        &self,
        response: reqwest::Response,
        mut endpoint: Option<oneshot::Sender<String>>,
    ) {
        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            let chunk = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                chunk = stream.next() => chunk,
            };
            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    debug!(server = %self.server, error = %e, "[HttpTransport] SSE stream error");
                    return;
                }
                None => return,
            };

            for event in decoder.push(&bytes) {
                match event {
                    Ok(event) if event.is("endpoint") => match endpoint.take() {
                        Some(tx) => {
                            let _ = tx.send(event.data);
                        }
                        None => debug!(
                            server = %self.server,
                            "[HttpTransport] Ignoring repeated endpoint event"
                        ),
                    },
                    Ok(event) => match serde_json::from_str::<Value>(&event.data) {
                        Ok(value) => self.deliver(value).await,
                        Err(e) => {
                            let _ = self
                                .inbound
                                .send(LinkEvent::Malformed(format!(
                                    "invalid JSON in SSE event: {}",
                                    e
                                )))
                                .await;
                        }
                    },
                    Err(reason) => {
                        let _ = self.inbound.send(LinkEvent::Malformed(reason)).await;
                    }
                }
            }
        }
    }

    fn start_listener(self: Arc<Self>) {
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(async move {
            let builder = self
                .request_builder(self.client.get(self.url.clone()))
                .header(ACCEPT, "text/event-stream");
            match builder.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(server = %self.server, "[HttpTransport] Listening for server notifications");
                    self.read_sse(response, None).await;
                }
                Ok(response) => {
                    debug!(
                        server = %self.server,
                        status = %response.status(),
                        "[HttpTransport] Server does not offer a notification stream"
                    );
                }
                Err(e) => {
                    debug!(server = %self.server, error = %e, "[HttpTransport] Notification stream failed");
                }
            }
        });
    }

    async fn close(&self, reason: String) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let _ = self.inbound.send(LinkEvent::Closed(reason)).await;
    }

    /// Best-effort DELETE so the server can free the session
    async fn terminate_session(&self) {
        let Some(session_id) = self.session_id.read().clone() else {
            return;
        };
        let mut builder = self
            .client
            .delete(self.url.clone())
            .header(SESSION_HEADER, session_id)
            .timeout(Duration::from_secs(2));
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Err(e) = builder.send().await {
            debug!(server = %self.server, error = %e, "[HttpTransport] Session DELETE failed");
        }
    }
}

fn method_of(msg: &Value) -> Option<&str> {
    msg.get("method").and_then(Value::as_str)
}

/// Id of a request that expects a reply
fn request_id(msg: &Value) -> Option<Value> {
    msg.get("method").and(msg.get("id")).cloned()
}

/// Status codes a pre-streamable server answers the initialize POST with.
/// Auth failures are reported as they are.
fn falls_back(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::UNAUTHORIZED
        && status != StatusCode::FORBIDDEN
}

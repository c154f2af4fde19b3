//! McpRouter MCP Handler
//!
//! Implements the MCP ServerHandler trait to expose the namespaced tools,
//! prompts and resources of every backend in the client's profile.
//!
//! One handler instance exists per client session. It binds the session to
//! a profile during `initialize`, registers the peer with the notifier once
//! the client is initialized, and cancels everything the client still has
//! outstanding when the session goes away.

use std::sync::Arc;

use mcprouter_core::CapabilityKind;
use parking_lot::RwLock;
use rmcp::{
    model::*,
    service::{NotificationContext, RequestContext},
    ErrorData as McpError, RoleServer, ServerHandler,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::context::{progress_token, request_key, requested_profile};
use crate::consumers::{ClientSink, MCPNotifier};
use crate::pool::{CallerContext, DispatchRequest, Dispatcher, ProgressRoute, TargetField};
use crate::server::GatewayState;

/// Per-session binding; dropping the last handler clone releases the client
struct ClientBinding {
    client_id: String,
    profile: RwLock<Option<String>>,
    notifier: Arc<MCPNotifier>,
    dispatcher: Arc<Dispatcher>,
}

impl Drop for ClientBinding {
    fn drop(&mut self) {
        let cancelled = self.dispatcher.cancel_client(&self.client_id);
        if cancelled > 0 {
            info!(
                client_id = %self.client_id,
                cancelled,
                "[MCP] Client gone, cancelled outstanding requests"
            );
        }
        if self.profile.read().is_some() {
            self.notifier.unregister_client(&self.client_id);
        }
    }
}

/// McpRouter Gateway Handler
#[derive(Clone)]
pub struct RouterHandler {
    state: Arc<GatewayState>,
    /// Profile forced by the transport (stdio `--profile`)
    fixed_profile: Option<String>,
    binding: Arc<ClientBinding>,
}

impl RouterHandler {
    pub fn new(state: Arc<GatewayState>, fixed_profile: Option<String>) -> Self {
        let binding = Arc::new(ClientBinding {
            client_id: uuid::Uuid::new_v4().to_string(),
            profile: RwLock::new(None),
            notifier: state.notifier.clone(),
            dispatcher: state.dispatcher.clone(),
        });
        Self {
            state,
            fixed_profile,
            binding,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.binding.client_id
    }

    pub fn profile(&self) -> Option<String> {
        self.binding.profile.read().clone()
    }

    /// Who is calling, with the profile membership as of now
    fn caller(&self) -> Result<CallerContext, McpError> {
        let profile = self.profile().ok_or_else(|| {
            McpError::invalid_request("client has not completed initialize".to_string(), None)
        })?;
        Ok(CallerContext {
            client: self.binding.client_id.clone(),
            allowed: self.state.profiles.servers(&profile),
        })
    }

    fn progress_route(&self, context: &RequestContext<RoleServer>) -> Option<ProgressRoute> {
        let token = progress_token(context)?;
        let sink = self.state.notifier.progress_sink(&self.binding.client_id)?;
        Some(ProgressRoute { token, sink })
    }

    /// Catalog of one kind, decoded into rmcp types
    fn catalog<T: DeserializeOwned>(&self, kind: CapabilityKind) -> Result<Vec<T>, McpError> {
        let caller = self.caller()?;
        let items = self.state.dispatcher.catalog(kind, &caller);
        let total = items.len();
        let decoded: Vec<T> = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(?kind, error = %e, "[MCP] Skipping undecodable catalog entry");
                    None
                }
            })
            .collect();
        debug!(
            client_id = %caller.client,
            ?kind,
            count = decoded.len(),
            skipped = total - decoded.len(),
            "[MCP] Listed catalog"
        );
        Ok(decoded)
    }

    /// Forward one request through the dispatcher
    async fn forward<P: Serialize, R: DeserializeOwned>(
        &self,
        kind: CapabilityKind,
        method: &'static str,
        target: TargetField,
        params: &P,
        context: &RequestContext<RoleServer>,
    ) -> Result<R, McpError> {
        let caller = self.caller()?;
        let params = serde_json::to_value(params)
            .map_err(|e| McpError::invalid_params(format!("invalid params: {}", e), None))?;

        let value = self
            .state
            .dispatcher
            .dispatch(
                DispatchRequest {
                    caller,
                    request_id: request_key(context),
                    kind,
                    method,
                    params,
                    target,
                    progress: self.progress_route(context),
                },
                context.ct.clone(),
            )
            .await?;

        decode_result(method, value)
    }
}

fn decode_result<R: DeserializeOwned>(method: &str, value: Value) -> Result<R, McpError> {
    serde_json::from_value(value).map_err(|e| {
        McpError::internal_error(
            format!("backend returned an invalid {} result: {}", method, e),
            None,
        )
    })
}

impl ServerHandler for RouterHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools_with(ToolsCapability {
                    list_changed: Some(true),
                })
                .enable_prompts_with(PromptsCapability {
                    list_changed: Some(true),
                })
                .enable_resources_with(ResourcesCapability {
                    subscribe: Some(false),
                    list_changed: Some(true),
                })
                .enable_completions()
                .build(),
            server_info: Implementation {
                name: mcprouter_core::branding::APP_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(format!(
                "McpRouter aggregates several MCP servers. Names are exposed as \
                 <server-alias>{}<original-name>.",
                self.state.namespace_separator
            )),
        }
    }

    async fn initialize(
        &self,
        params: InitializeRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        let requested = self
            .fixed_profile
            .clone()
            .or_else(|| requested_profile(&context.extensions));

        let profile = self
            .state
            .profiles
            .resolve(requested.as_deref())
            .map_err(McpError::from)?;

        *self.binding.profile.write() = Some(profile.name.clone());

        info!(
            client_id = %self.binding.client_id,
            client = %params.client_info.name,
            profile = %profile.name,
            servers = ?profile.servers,
            "[MCP] Client initializing"
        );

        if context.peer.peer_info().is_none() {
            context.peer.set_peer_info(params);
        }
        Ok(self.get_info())
    }

    async fn on_initialized(&self, context: NotificationContext<RoleServer>) {
        let Some(profile) = self.profile() else {
            warn!(client_id = %self.binding.client_id, "[MCP] initialized without a profile");
            return;
        };

        let sink: Arc<dyn ClientSink> = Arc::new(context.peer);
        self.state
            .notifier
            .register_client(&self.binding.client_id, &profile, sink);

        debug!(
            client_id = %self.binding.client_id,
            profile = %profile,
            "[MCP] Client initialized - registered for notifications"
        );
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(
            self.catalog(CapabilityKind::Tool)?,
        ))
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        info!(
            tool = %params.name,
            client = %&self.binding.client_id[..self.binding.client_id.len().min(8)],
            "[MCP] call_tool"
        );
        self.forward(
            CapabilityKind::Tool,
            "tools/call",
            TargetField::Name,
            &params,
            &context,
        )
        .await
    }

    async fn list_prompts(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        Ok(ListPromptsResult::with_all_items(
            self.catalog(CapabilityKind::Prompt)?,
        ))
    }

    async fn get_prompt(
        &self,
        params: GetPromptRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        self.forward(
            CapabilityKind::Prompt,
            "prompts/get",
            TargetField::Name,
            &params,
            &context,
        )
        .await
    }

    async fn list_resources(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult::with_all_items(
            self.catalog(CapabilityKind::Resource)?,
        ))
    }

    async fn list_resource_templates(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        Ok(ListResourceTemplatesResult::with_all_items(
            self.catalog(CapabilityKind::ResourceTemplate)?,
        ))
    }

    async fn read_resource(
        &self,
        params: ReadResourceRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        self.forward(
            CapabilityKind::Resource,
            "resources/read",
            TargetField::Uri,
            &params,
            &context,
        )
        .await
    }

    async fn complete(
        &self,
        params: CompleteRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CompleteResult, McpError> {
        let caller = self.caller()?;
        let params = serde_json::to_value(&params)
            .map_err(|e| McpError::invalid_params(format!("invalid params: {}", e), None))?;
        let value = self
            .state
            .dispatcher
            .complete(caller, request_key(&context), params, context.ct.clone())
            .await?;
        decode_result("completion/complete", value)
    }
}

//! Protocol engine: one instance per session.
//!
//! The engine implements the MCP lifecycle:
//!
//! 1. **Initialisation**: Capability negotiation and version agreement
//! 2. **Operation**: Handling tool calls and other requests
//! 3. **Shutdown**: The attached transport closes
//!
//! An engine is attached to exactly one transport. The transport feeds it
//! inbound messages through [`McpEngine::handle`]; the engine pushes
//! server-initiated notifications back through the transport's channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{EngineError, TransportError};
use crate::mcp::protocol::{
    ErrorCode, IncomingMessage, JsonRpcError, JsonRpcErrorData, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, OutgoingMessage, OutgoingNotification, RequestId,
    MCP_PROTOCOL_VERSION, SERVER_NAME, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::mcp::tools::{ToolCallParams, ToolCallResult, ToolRegistry};
use crate::transport::{CloseReason, CloseSignal, NotificationSender, Transport};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Server state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialize request.
    AwaitingInit,
    /// Initialize received, waiting for initialized notification.
    Initialising,
    /// Ready for normal operation.
    Running,
    /// The attached transport has closed.
    ShuttingDown,
}

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
    /// Present when the server can emit log notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(ToolCapabilities::default()),
            logging: Some(json!({})),
        }
    }
}

/// Tool-specific capabilities.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCapabilities {
    /// Whether the tool list can change during the session.
    pub list_changed: bool,
}

/// Server information for initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// Picks the version to answer with: the client's if supported, else ours.
#[must_use]
pub fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == requested)
        .copied()
        .unwrap_or(MCP_PROTOCOL_VERSION)
}

struct Lifecycle {
    state: ServerState,
    protocol_version: Option<&'static str>,
    client: Option<String>,
}

struct Link {
    notifications: NotificationSender,
    closed: CloseSignal,
}

/// JSON-RPC dispatcher bound to a single session.
pub struct McpEngine {
    instance: u64,
    tools: Arc<ToolRegistry>,
    lifecycle: Mutex<Lifecycle>,
    claimed: AtomicBool,
    link: OnceLock<Link>,
    handled: AtomicU64,
}

impl McpEngine {
    /// Creates an unattached engine serving `tools`.
    #[must_use]
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            tools,
            lifecycle: Mutex::new(Lifecycle {
                state: ServerState::AwaitingInit,
                protocol_version: None,
                client: None,
            }),
            claimed: AtomicBool::new(false),
            link: OnceLock::new(),
            handled: AtomicU64::new(0),
        }
    }

    /// Process-unique instance number, for logs.
    #[must_use]
    pub const fn instance(&self) -> u64 {
        self.instance
    }

    /// Returns the current server state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.lifecycle.lock().state
    }

    /// Protocol version agreed during initialisation.
    #[must_use]
    pub fn protocol_version(&self) -> Option<&'static str> {
        self.lifecycle.lock().protocol_version
    }

    /// Number of messages this engine has dispatched.
    #[must_use]
    pub fn handled_messages(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Returns `true` once attached to a transport.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.link.get().is_some()
    }

    /// Binds this engine to `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyAttached`] on a second call, or the
    /// transport's refusal. A refused engine stays unattached.
    pub fn attach(self: &Arc<Self>, transport: &dyn Transport) -> Result<(), EngineError> {
        // Claimed before `bind` so no transport is bound to a losing caller.
        if self.claimed.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyAttached);
        }
        if let Err(e) = transport.bind(Arc::clone(self)) {
            self.claimed.store(false, Ordering::Release);
            return Err(e.into());
        }

        let closed = transport.close_signal().clone();
        self.link
            .set(Link {
                notifications: transport.notifications(),
                closed: closed.clone(),
            })
            .map_err(|_| EngineError::AlreadyAttached)?;

        let engine: Weak<Self> = Arc::downgrade(self);
        closed.on_close(move |reason| {
            if let Some(engine) = engine.upgrade() {
                engine.lifecycle.lock().state = ServerState::ShuttingDown;
                tracing::debug!(engine = engine.instance, %reason, "Protocol engine detached");
            }
        });

        tracing::debug!(
            engine = self.instance,
            session_id = transport.session_id().unwrap_or("stdio"),
            "Protocol engine attached"
        );
        Ok(())
    }

    /// Closes the attached transport. Returns `false` if it was already
    /// closed or never attached.
    pub fn close(&self) -> bool {
        self.link
            .get()
            .is_some_and(|link| link.closed.close(CloseReason::Shutdown))
    }

    /// Sends a server-initiated notification to the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the engine is not attached or
    /// its transport has gone away.
    pub fn notify(&self, notification: OutgoingNotification) -> Result<(), TransportError> {
        let link = self.link.get().ok_or(TransportError::Closed)?;
        if link.closed.is_closed() {
            return Err(TransportError::Closed);
        }
        link.notifications
            .send(notification)
            .map_err(|_| TransportError::Closed)
    }

    /// Dispatches one inbound message. Requests yield a reply; notifications
    /// and client responses do not.
    pub async fn handle(&self, message: IncomingMessage) -> Option<OutgoingMessage> {
        self.handled.fetch_add(1, Ordering::Relaxed);

        match message {
            IncomingMessage::Request(req) => Some(match self.handle_request(&req).await {
                Ok(resp) => resp.into(),
                Err(error) => error.into(),
            }),
            IncomingMessage::Notification(ref notif) => {
                self.handle_notification(notif);
                None
            }
            IncomingMessage::Response(resp) => {
                tracing::debug!(engine = self.instance, id = %resp.id, "Ignoring client response");
                None
            }
        }
    }

    async fn handle_request(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        tracing::debug!(engine = self.instance, id = %req.id, method = %req.method, "Request");

        match req.method.as_str() {
            "initialize" => self.handle_initialize(req),
            "tools/list" => self.handle_tools_list(req),
            "tools/call" => self.handle_tools_call(req).await,
            "ping" => Ok(JsonRpcResponse::success(req.id.clone(), json!({}))),
            "logging/setLevel" => Ok(JsonRpcResponse::success(req.id.clone(), json!({}))),
            _ => Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
        }
    }

    fn handle_notification(&self, notif: &JsonRpcNotification) {
        let mut lifecycle = self.lifecycle.lock();
        if notif.method == "notifications/initialized"
            && lifecycle.state == ServerState::Initialising
        {
            lifecycle.state = ServerState::Running;
            tracing::info!(
                engine = self.instance,
                client = lifecycle.client.as_deref().unwrap_or("unknown"),
                "Client initialised"
            );
        }
    }

    fn handle_initialize(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        let params: InitializeParams = req
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| {
                JsonRpcError::invalid_params(
                    req.id.clone(),
                    format!("Invalid initialize params: {e}"),
                )
            })?
            .ok_or_else(|| {
                JsonRpcError::invalid_params(req.id.clone(), "Missing initialize params")
            })?;

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != ServerState::AwaitingInit {
            return Err(JsonRpcError::new(
                Some(req.id.clone()),
                JsonRpcErrorData::with_message(
                    ErrorCode::InvalidRequest,
                    "Server already initialised",
                ),
            ));
        }

        let version = negotiate_version(&params.protocol_version);
        lifecycle.protocol_version = Some(version);
        lifecycle.client = params.client_info.map(|c| c.name);
        lifecycle.state = ServerState::Initialising;

        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({
                "protocolVersion": version,
                "capabilities": ServerCapabilities::default(),
                "serverInfo": ServerInfo::default(),
            }),
        ))
    }

    fn handle_tools_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;

        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({ "tools": self.tools.definitions() }),
        ))
    }

    async fn handle_tools_call(
        &self,
        req: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;

        let params: ToolCallParams = req
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| {
                JsonRpcError::invalid_params(
                    req.id.clone(),
                    format!("Invalid tool call params: {e}"),
                )
            })?
            .ok_or_else(|| {
                JsonRpcError::invalid_params(req.id.clone(), "Missing tool call params")
            })?;

        let result = match self.tools.get(&params.name) {
            Some(tool) => tool.call(params.arguments).await,
            None => ToolCallResult::error(format!("Unknown tool: {}", params.name)),
        };

        let result_value = serde_json::to_value(&result).map_err(|e| {
            tracing::error!(error = %e, "Failed to serialise tool call result");
            JsonRpcError::internal_error(
                Some(req.id.clone()),
                "Internal error: failed to serialise result",
            )
        })?;

        Ok(JsonRpcResponse::success(req.id.clone(), result_value))
    }

    fn require_running(&self, id: &RequestId) -> Result<(), JsonRpcError> {
        if self.state() != ServerState::Running {
            return Err(JsonRpcError::new(
                Some(id.clone()),
                JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, "Server not initialised"),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for McpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpEngine")
            .field("instance", &self.instance)
            .field("state", &self.state())
            .field("attached", &self.is_attached())
            .finish_non_exhaustive()
    }
}

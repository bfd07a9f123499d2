//! JSON-RPC 2.0 message types for MCP protocol.
//!
//! This module defines the core message types used in the Model Context Protocol.
//! All messages follow the JSON-RPC 2.0 specification with MCP-specific extensions.
//!
//! # Message Types
//!
//! - **Request**: A message expecting a response (has `id`)
//! - **Response**: A reply to a request (success or error)
//! - **Notification**: A one-way message (no `id`, no response expected)
//!
//! The HTTP transport may carry a batch (JSON array) of messages in one body;
//! [`parse_payload`] handles both shapes and [`classify`] tells the session
//! router whether a body opens a new session.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The newest MCP protocol version this implementation supports.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

/// Every protocol version the engine will agree to, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05"];

/// Server name for capability negotiation.
pub const SERVER_NAME: &str = "cloud-backend-mcp";

/// Method name of the session-opening request.
pub const INITIALIZE_METHOD: &str = "initialize";

/// A JSON-RPC 2.0 request ID.
///
/// Per the MCP specification, IDs must be strings or integers, never `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be "2.0".
    pub jsonrpc: String,

    /// Unique request identifier.
    pub id: RequestId,

    /// The method to invoke.
    pub method: String,

    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Validates that this is a well-formed JSON-RPC 2.0 request.
    ///
    /// Returns an error message if validation fails.
    #[must_use]
    pub fn validate(&self) -> Option<&'static str> {
        if self.jsonrpc != "2.0" {
            return Some("jsonrpc field must be \"2.0\"");
        }
        if self.method.is_empty() {
            return Some("method field cannot be empty");
        }
        None
    }
}

/// A JSON-RPC 2.0 notification message (incoming).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    /// Must be "2.0".
    pub jsonrpc: String,

    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    #[serde(default)]
    pub params: Option<Value>,
}

/// A response sent by the client to a server-initiated request.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientResponse {
    /// The request this answers.
    pub id: RequestId,

    /// Result payload, if successful.
    #[serde(default)]
    pub result: Option<Value>,

    /// Error payload, if failed.
    #[serde(default)]
    pub error: Option<Value>,
}

/// An outgoing JSON-RPC 2.0 notification (server to client).
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingNotification {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl OutgoingNotification {
    /// Creates a new outgoing notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }

    /// Creates a log message notification.
    #[must_use]
    pub fn log_message(level: &str, logger: &str, data: Value) -> Self {
        let params = serde_json::json!({
            "level": level,
            "logger": logger,
            "data": data,
        });
        Self::new("notifications/message", Some(params))
    }
}

/// A successful JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The request ID this response corresponds to.
    pub id: RequestId,

    /// The result of the method call.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Creates a new success response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Value is not const-compatible
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result,
        }
    }
}

/// Standard JSON-RPC 2.0 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received by the server.
    ParseError,
    /// The JSON sent is not a valid Request object.
    InvalidRequest,
    /// The method does not exist or is not available.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
    /// Server-defined error.
    ServerError(i32),
}

impl ErrorCode {
    /// Server error used for every session addressing failure.
    pub const SESSION: Self = Self::ServerError(-32000);

    /// Returns the numeric code for this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerError(code) => code,
        }
    }

    /// Returns the default message for this error code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ServerError(_) => "Server error",
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    /// The error code.
    pub code: i32,

    /// A short description of the error.
    pub message: String,

    /// Additional information about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    /// Creates a new error from an error code.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.default_message().to_string(),
            data: None,
        }
    }

    /// Creates a new error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }
}

/// A JSON-RPC 2.0 error response.
///
/// `id` serialises as `null` when the request ID could not be determined.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The error details.
    pub error: JsonRpcErrorData,

    /// The request ID this error corresponds to (if known).
    pub id: Option<RequestId>,
}

impl JsonRpcError {
    /// Creates a new error response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // JsonRpcErrorData contains String
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: "2.0",
            error,
            id,
        }
    }

    /// Creates a parse error response (ID cannot be determined).
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(None, JsonRpcErrorData::from_code(ErrorCode::ParseError))
    }

    /// Creates an invalid request error response.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>) -> Self {
        Self::new(id, JsonRpcErrorData::from_code(ErrorCode::InvalidRequest))
    }

    /// Creates a method not found error response.
    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(
                ErrorCode::MethodNotFound,
                format!("Method not found: {method}"),
            ),
        )
    }

    /// Creates an invalid params error response.
    #[must_use]
    pub fn invalid_params(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InvalidParams, message),
        )
    }

    /// Creates an internal error response.
    #[must_use]
    pub fn internal_error(id: Option<RequestId>, message: impl Into<String>) -> Self {
        Self::new(
            id,
            JsonRpcErrorData::with_message(ErrorCode::InternalError, message),
        )
    }

    /// Creates the session addressing error (`-32000`) with `message`.
    #[must_use]
    pub fn session_error(message: impl Into<String>) -> Self {
        Self::new(
            None,
            JsonRpcErrorData::with_message(ErrorCode::SESSION, message),
        )
    }
}

/// Anything the server writes back on a request's wire.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutgoingMessage {
    /// A successful reply.
    Response(JsonRpcResponse),
    /// An error reply.
    Error(JsonRpcError),
}

impl From<JsonRpcResponse> for OutgoingMessage {
    fn from(value: JsonRpcResponse) -> Self {
        Self::Response(value)
    }
}

impl From<JsonRpcError> for OutgoingMessage {
    fn from(value: JsonRpcError) -> Self {
        Self::Error(value)
    }
}

/// An incoming message: request, notification, or a client reply.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A notification (no response expected).
    Notification(JsonRpcNotification),
    /// A reply to a server-initiated request.
    Response(ClientResponse),
}

impl IncomingMessage {
    /// Returns the method name of this message, if it has one.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(notif) => Some(&notif.method),
            Self::Response(_) => None,
        }
    }

    /// Returns the request ID if this is a request.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Notification(_) | Self::Response(_) => None,
        }
    }

    /// Returns `true` for an `initialize` request.
    #[must_use]
    pub fn is_initialize(&self) -> bool {
        matches!(self, Self::Request(req) if req.method == INITIALIZE_METHOD)
    }
}

/// Parses a JSON string into an incoming message.
///
/// # Errors
///
/// Returns a `JsonRpcError` if the JSON is malformed or not a valid message.
pub fn parse_message(json: &str) -> Result<IncomingMessage, JsonRpcError> {
    let value: Value = serde_json::from_str(json).map_err(|_| JsonRpcError::parse_error())?;
    parse_value(value)
}

/// Interprets an already-decoded JSON value as an incoming message.
///
/// # Errors
///
/// Returns a `JsonRpcError` if the value is not a valid JSON-RPC 2.0 message.
pub fn parse_value(value: Value) -> Result<IncomingMessage, JsonRpcError> {
    let obj = value
        .as_object()
        .ok_or_else(|| JsonRpcError::invalid_request(None))?;

    let jsonrpc = obj
        .get("jsonrpc")
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError::invalid_request(None))?;

    if jsonrpc != "2.0" {
        return Err(JsonRpcError::invalid_request(None));
    }

    let has_method = obj.contains_key("method");

    if !has_method && (obj.contains_key("result") || obj.contains_key("error")) {
        let response: ClientResponse =
            serde_json::from_value(value).map_err(|_| JsonRpcError::invalid_request(None))?;
        return Ok(IncomingMessage::Response(response));
    }

    if obj.contains_key("id") {
        let request: JsonRpcRequest =
            serde_json::from_value(value).map_err(|_| JsonRpcError::invalid_request(None))?;

        if request.validate().is_some() {
            return Err(JsonRpcError::invalid_request(Some(request.id)));
        }

        Ok(IncomingMessage::Request(request))
    } else {
        let notification: JsonRpcNotification =
            serde_json::from_value(value).map_err(|_| JsonRpcError::invalid_request(None))?;

        Ok(IncomingMessage::Notification(notification))
    }
}

/// A decoded HTTP body: one message or a batch.
#[derive(Debug, Clone)]
pub struct Payload {
    /// Each element, decoded independently.
    pub messages: Vec<Result<IncomingMessage, JsonRpcError>>,
    /// Whether the body was a JSON array.
    pub batch: bool,
}

/// Parses a request body that may hold a single message or a batch.
///
/// Invalid elements inside a batch are reported per element so that valid
/// siblings are still dispatched.
///
/// # Errors
///
/// Returns a parse error for non-JSON input and an invalid request error for
/// an empty batch.
pub fn parse_payload(body: &[u8]) -> Result<Payload, JsonRpcError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| JsonRpcError::parse_error())?;

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(JsonRpcError::invalid_request(None));
            }
            Ok(Payload {
                messages: items.into_iter().map(parse_value).collect(),
                batch: true,
            })
        }
        single => Ok(Payload {
            messages: vec![parse_value(single)],
            batch: false,
        }),
    }
}

/// What a session-less request body turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A lone `initialize` request (optionally as a one-element batch).
    Initialize,
    /// Any other well-formed message or batch.
    Ordinary,
    /// Not JSON-RPC, or an `initialize` mixed into a larger batch.
    Malformed,
}

/// Sniffs a request body to decide whether it opens a new session.
#[must_use]
pub fn classify(body: &[u8]) -> MessageKind {
    let Ok(payload) = parse_payload(body) else {
        return MessageKind::Malformed;
    };

    let mut initialize = 0usize;
    for message in &payload.messages {
        match message {
            Ok(msg) if msg.is_initialize() => initialize += 1,
            Ok(_) => {}
            Err(_) => return MessageKind::Malformed,
        }
    }

    match (initialize, payload.messages.len()) {
        (0, _) => MessageKind::Ordinary,
        (1, 1) => MessageKind::Initialize,
        _ => MessageKind::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INIT: &str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26","capabilities":{},"clientInfo":{"name":"t","version":"1"}}}"#;

    #[test]
    fn parse_valid_request() {
        let json = r#"{"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}"#;
        let msg = parse_message(json).unwrap();

        let IncomingMessage::Request(req) = msg else {
            panic!("Expected Request");
        };
        assert_eq!(req.id, RequestId::Number(1));
        assert_eq!(req.method, "initialize");
    }

    #[test]
    fn parse_valid_notification() {
        let json = r#"{"jsonrpc": "2.0", "method": "notifications/initialized"}"#;
        let msg = parse_message(json).unwrap();

        let IncomingMessage::Notification(notif) = msg else {
            panic!("Expected Notification");
        };
        assert_eq!(notif.method, "notifications/initialized");
    }

    #[test]
    fn parse_client_response() {
        let json = r#"{"jsonrpc": "2.0", "id": "srv-1", "result": {}}"#;
        let msg = parse_message(json).unwrap();
        assert!(matches!(msg, IncomingMessage::Response(ref r) if r.id == RequestId::String("srv-1".into())));
        assert!(msg.method().is_none());
    }

    #[test]
    fn parse_invalid_json() {
        let err = parse_message("not valid json").unwrap_err();
        assert_eq!(err.error.code, ErrorCode::ParseError.code());
    }

    #[test]
    fn parse_wrong_jsonrpc_version() {
        let json = r#"{"jsonrpc": "1.0", "id": 1, "method": "test"}"#;
        let err = parse_message(json).unwrap_err();
        assert_eq!(err.error.code, ErrorCode::InvalidRequest.code());
    }

    #[test]
    fn error_without_id_serialises_null_id() {
        let error = JsonRpcError::session_error("Bad Request: No valid session ID provided");
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "jsonrpc": "2.0",
                "error": {"code": -32000, "message": "Bad Request: No valid session ID provided"},
                "id": null
            })
        );
    }

    #[test]
    fn outgoing_message_is_untagged() {
        let msg: OutgoingMessage =
            JsonRpcResponse::success(RequestId::Number(7), serde_json::json!({})).into();
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"jsonrpc":"2.0","id":7,"result":{}}"#);
    }

    #[test]
    fn payload_splits_batches() {
        let body = br#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"bad":true}]"#;
        let payload = parse_payload(body).unwrap();
        assert!(payload.batch);
        assert_eq!(payload.messages.len(), 2);
        assert!(payload.messages[0].is_ok());
        assert!(payload.messages[1].is_err());
    }

    #[test]
    fn empty_batch_is_invalid() {
        let err = parse_payload(b"[]").unwrap_err();
        assert_eq!(err.error.code, ErrorCode::InvalidRequest.code());
    }

    #[test]
    fn classify_initialize() {
        assert_eq!(classify(INIT.as_bytes()), MessageKind::Initialize);
        assert_eq!(classify(format!("[{INIT}]").as_bytes()), MessageKind::Initialize);
    }

    #[test]
    fn classify_ordinary() {
        let body = br#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#;
        assert_eq!(classify(body), MessageKind::Ordinary);
        let note = br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        assert_eq!(classify(note), MessageKind::Ordinary);
    }

    #[test]
    fn classify_malformed() {
        assert_eq!(classify(b"garbage"), MessageKind::Malformed);
        assert_eq!(classify(b"{}"), MessageKind::Malformed);
        let mixed = format!(r#"[{INIT},{{"jsonrpc":"2.0","id":2,"method":"ping"}}]"#);
        assert_eq!(classify(mixed.as_bytes()), MessageKind::Malformed);
    }

    #[test]
    fn initialize_notification_is_not_initialize() {
        let body = br#"{"jsonrpc":"2.0","method":"initialize"}"#;
        assert_eq!(classify(body), MessageKind::Ordinary);
    }
}

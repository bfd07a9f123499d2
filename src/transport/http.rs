//! Streamable HTTP transport adapter, one instance per session.
//!
//! The adapter owns the session identifier, the engine it feeds, and the
//! notification channel drained by the session's server-sent-events stream.
//!
//! - `POST` carries client messages (single or batch) and returns the
//!   replies as JSON, or `202 Accepted` when nothing needs answering.
//! - `GET` opens the notification stream. Only one may be open at a time.
//! - `DELETE` terminates the session.
//!
//! Every response carries the `mcp-session-id` header.

use std::convert::Infallible;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Bytes;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::error::TransportError;
use crate::mcp::engine::McpEngine;
use crate::mcp::protocol::{
    parse_payload, ErrorCode, IncomingMessage, JsonRpcError, JsonRpcErrorData, OutgoingMessage,
    OutgoingNotification,
};
use crate::transport::{CloseReason, CloseSignal, NotificationSender, Transport};

/// Header carrying the session identifier in both directions.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

type NotificationReceiver = mpsc::UnboundedReceiver<OutgoingNotification>;

/// HTTP adapter for one session.
pub struct StreamableHttpTransport {
    session_id: String,
    engine: OnceLock<Arc<McpEngine>>,
    notifications_tx: NotificationSender,
    notifications_rx: Arc<AsyncMutex<NotificationReceiver>>,
    closed: CloseSignal,
}

impl StreamableHttpTransport {
    /// Creates an adapter with a freshly generated session identifier.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            session_id: Uuid::new_v4().to_string(),
            engine: OnceLock::new(),
            notifications_tx: tx,
            notifications_rx: Arc::new(AsyncMutex::new(rx)),
            closed: CloseSignal::new(),
        }
    }

    /// The identifier this adapter generated.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// Handles a client-to-server POST.
    pub async fn handle_post(&self, headers: &HeaderMap, body: Bytes) -> Response {
        if self.closed.is_closed() {
            return self.session_gone();
        }
        if let Err(mut response) = Self::validate_post_headers(headers) {
            self.stamp(&mut response);
            return response;
        }
        let Some(engine) = self.engine.get() else {
            return self.rpc_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                JsonRpcError::internal_error(None, "Session has no protocol engine"),
            );
        };

        let payload = match parse_payload(&body) {
            Ok(payload) => payload,
            Err(error) => return self.rpc_error(StatusCode::BAD_REQUEST, error),
        };

        let mut replies: Vec<OutgoingMessage> = Vec::new();
        for message in payload.messages {
            match message {
                Ok(msg) => {
                    if let Some(reply) = self.dispatch(engine, msg).await {
                        replies.push(reply);
                    }
                }
                Err(error) => replies.push(error.into()),
            }
        }

        let mut response = if replies.is_empty() {
            StatusCode::ACCEPTED.into_response()
        } else if payload.batch {
            (StatusCode::OK, Json(replies)).into_response()
        } else {
            let reply = replies.swap_remove(0);
            (StatusCode::OK, Json(reply)).into_response()
        };
        self.stamp(&mut response);
        response
    }

    /// Checks the `Content-Type` and `Accept` headers of a POST.
    ///
    /// Returns the `415` or `406` rejection, without a session header, when
    /// the request cannot be served.
    pub fn validate_post_headers(headers: &HeaderMap) -> Result<(), Response> {
        if !is_json_content(headers) {
            let error = JsonRpcError::session_error(
                "Unsupported Media Type: Content-Type must be application/json",
            );
            return Err((StatusCode::UNSUPPORTED_MEDIA_TYPE, Json(error)).into_response());
        }
        if !accepts(headers, "application/json") {
            let error =
                JsonRpcError::session_error("Not Acceptable: Client must accept application/json");
            return Err((StatusCode::NOT_ACCEPTABLE, Json(error)).into_response());
        }
        Ok(())
    }

    async fn dispatch(&self, engine: &McpEngine, msg: IncomingMessage) -> Option<OutgoingMessage> {
        tracing::trace!(session_id = %self.session_id, method = ?msg.method(), "Dispatching");
        engine.handle(msg).await
    }

    /// Handles a GET by opening the server-sent-events notification stream.
    ///
    /// The stream ends when the session closes. Dropping the stream leaves
    /// the session open and frees the slot for a later GET; notifications
    /// sent in between stay queued.
    pub fn handle_get(&self, headers: &HeaderMap) -> Response {
        if self.closed.is_closed() {
            return self.session_gone();
        }
        if !accepts(headers, "text/event-stream") {
            return self.rpc_error(
                StatusCode::NOT_ACCEPTABLE,
                JsonRpcError::session_error(
                    "Not Acceptable: Client must accept text/event-stream",
                ),
            );
        }
        let Ok(mut receiver) = Arc::clone(&self.notifications_rx).try_lock_owned() else {
            return self.rpc_error(
                StatusCode::CONFLICT,
                JsonRpcError::session_error(
                    "Conflict: Only one SSE stream is allowed per session",
                ),
            );
        };

        let token = self.closed.token();
        let detach = StreamDetach {
            session_id: self.session_id.clone(),
        };

        let stream = async_stream::stream! {
            let _detach = detach;
            loop {
                // Queued notifications drain before the close is observed.
                let next = tokio::select! {
                    biased;
                    next = receiver.recv() => next,
                    () = token.cancelled() => None,
                };
                let Some(notification) = next else { break };
                match Event::default().event("message").json_data(&notification) {
                    Ok(event) => yield Ok::<Event, Infallible>(event),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode notification"),
                }
            }
        };

        tracing::debug!(session_id = %self.session_id, "Notification stream opened");
        let mut response = Sse::new(stream)
            .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE))
            .into_response();
        self.stamp(&mut response);
        response
    }

    /// Handles a DELETE by firing the close signal.
    pub fn handle_delete(&self) -> Response {
        if !self.closed.close(CloseReason::ClientTerminated) {
            return self.session_gone();
        }
        let mut response = StatusCode::OK.into_response();
        self.stamp(&mut response);
        response
    }

    fn stamp(&self, response: &mut Response) {
        if let Ok(value) = HeaderValue::from_str(&self.session_id) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(SESSION_ID_HEADER), value);
        }
    }

    fn rpc_error(&self, status: StatusCode, error: JsonRpcError) -> Response {
        let mut response = (status, Json(error)).into_response();
        self.stamp(&mut response);
        response
    }

    fn session_gone(&self) -> Response {
        let error = JsonRpcError::new(
            None,
            JsonRpcErrorData::with_message(ErrorCode::ServerError(-32001), "Session not found"),
        );
        (StatusCode::NOT_FOUND, Json(error)).into_response()
    }
}

impl Default for StreamableHttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for StreamableHttpTransport {
    fn session_id(&self) -> Option<&str> {
        Some(&self.session_id)
    }

    fn bind(&self, engine: Arc<McpEngine>) -> Result<(), TransportError> {
        if self.closed.is_closed() {
            return Err(TransportError::Closed);
        }
        self.engine
            .set(engine)
            .map_err(|_| TransportError::AlreadyBound)
    }

    fn notifications(&self) -> NotificationSender {
        self.notifications_tx.clone()
    }

    fn close_signal(&self) -> &CloseSignal {
        &self.closed
    }
}

impl std::fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("session_id", &self.session_id)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Logs when a notification stream goes away. The receiver lock it held is
/// released with the stream.
struct StreamDetach {
    session_id: String,
}

impl Drop for StreamDetach {
    fn drop(&mut self) {
        tracing::debug!(session_id = %self.session_id, "Notification stream detached");
    }
}

fn is_json_content(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("application/json"))
}

/// `true` when there is no `Accept` header or it admits `media`.
fn accepts(headers: &HeaderMap, media: &str) -> bool {
    let values: Vec<&str> = headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if values.is_empty() {
        return true;
    }

    let family = media.split('/').next().unwrap_or(media);
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(|item| item.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .any(|item| item == media || item == "*/*" || item == format!("{family}/*"))
}

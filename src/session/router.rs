//! HTTP session router.
//!
//! Every request to the MCP endpoint passes through here. The router reads
//! the `mcp-session-id` header, creates a session for a session-less
//! `initialize`, forwards everything else to the addressed session's adapter,
//! and rejects requests that name no live session.

use std::sync::{Arc, Weak};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use tower_http::trace::TraceLayer;

use crate::error::EngineError;
use crate::mcp::engine::{McpEngine, ServerState};
use crate::mcp::protocol::{classify, JsonRpcError, MessageKind};
use crate::session::store::{Session, SessionStore};
use crate::transport::http::SESSION_ID_HEADER;
use crate::transport::{CloseReason, StreamableHttpTransport, Transport};

/// Error message for POSTs that address no live session.
pub const NO_VALID_SESSION: &str = "Bad Request: No valid session ID provided";

/// Plain-text body for GET/DELETE that address no live session.
pub const INVALID_OR_MISSING_SESSION: &str = "Invalid or missing session ID";

type EngineFactory = dyn Fn() -> McpEngine + Send + Sync;

/// Routes HTTP requests to per-session adapters.
pub struct SessionRouter {
    store: Arc<SessionStore>,
    make_engine: Box<EngineFactory>,
}

impl SessionRouter {
    /// Creates a router over `store`, building one engine per new session
    /// with `make_engine`.
    pub fn new<F>(store: Arc<SessionStore>, make_engine: F) -> Self
    where
        F: Fn() -> McpEngine + Send + Sync + 'static,
    {
        Self {
            store,
            make_engine: Box::new(make_engine),
        }
    }

    /// The backing session store.
    #[must_use]
    pub const fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Handles a POST.
    pub async fn handle_post(&self, headers: &HeaderMap, body: Bytes) -> Response {
        if let Some(id) = session_header(headers) {
            // A supplied identifier wins, even over an initialize body.
            return match self.store.get(id) {
                Some(session) => session.transport().handle_post(headers, body).await,
                None => {
                    tracing::debug!(session_id = %id, "POST for unknown session");
                    no_valid_session()
                }
            };
        }

        match classify(&body) {
            MessageKind::Initialize => {
                if let Err(response) = StreamableHttpTransport::validate_post_headers(headers) {
                    return response;
                }
                self.open_session(headers, body).await
            }
            MessageKind::Ordinary | MessageKind::Malformed => no_valid_session(),
        }
    }

    /// Creates a session and hands it the handshake. A session whose engine
    /// did not accept the `initialize` is closed before the response leaves.
    async fn open_session(&self, headers: &HeaderMap, body: Bytes) -> Response {
        let session = match self.create_session() {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create session");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(JsonRpcError::internal_error(None, "Failed to create session")),
                )
                    .into_response();
            }
        };

        let mut response = session.transport().handle_post(headers, body).await;
        if session.engine().state() == ServerState::AwaitingInit {
            tracing::debug!(session_id = %session.id(), "Handshake rejected");
            session
                .transport()
                .close_signal()
                .close(CloseReason::HandshakeFailed);
            response.headers_mut().remove(SESSION_ID_HEADER);
        }
        response
    }

    /// Handles a GET (notification stream).
    #[must_use]
    pub fn handle_get(&self, headers: &HeaderMap) -> Response {
        match self.lookup(headers) {
            Some(session) => session.transport().handle_get(headers),
            None => invalid_or_missing_session(),
        }
    }

    /// Handles a DELETE (explicit termination).
    #[must_use]
    pub fn handle_delete(&self, headers: &HeaderMap) -> Response {
        match self.lookup(headers) {
            Some(session) => session.transport().handle_delete(),
            None => invalid_or_missing_session(),
        }
    }

    /// Closes every live session. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        self.store
            .sessions()
            .iter()
            .filter(|session| session.engine().close())
            .count()
    }

    fn lookup(&self, headers: &HeaderMap) -> Option<Arc<Session>> {
        session_header(headers).and_then(|id| self.store.get(id))
    }

    /// Builds engine and adapter, wires closure to store removal, attaches,
    /// then publishes the session.
    fn create_session(&self) -> Result<Arc<Session>, EngineError> {
        let engine = Arc::new((self.make_engine)());
        let transport = Arc::new(StreamableHttpTransport::new());
        let session_id = transport.id().to_string();

        let store: Weak<SessionStore> = Arc::downgrade(&self.store);
        let id = session_id.clone();
        transport.close_signal().on_close(move |reason| {
            remove_closed(&store, &id, reason);
        });

        engine.attach(transport.as_ref())?;

        let session = Arc::new(Session::new(engine, Arc::clone(&transport)));
        self.store.put(session_id.clone(), Arc::clone(&session));
        tracing::info!(session_id = %session_id, live = self.store.len(), "Session created");

        Ok(session)
    }
}

impl std::fmt::Debug for SessionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRouter")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

fn remove_closed(store: &Weak<SessionStore>, id: &str, reason: CloseReason) {
    let Some(store) = store.upgrade() else {
        return;
    };
    if let Some(session) = store.remove(id) {
        let lifetime = Utc::now() - session.created_at();
        tracing::info!(
            session_id = %id,
            %reason,
            lifetime_ms = lifetime.num_milliseconds(),
            handled = session.engine().handled_messages(),
            "Session closed"
        );
    }
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn no_valid_session() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(JsonRpcError::session_error(NO_VALID_SESSION)),
    )
        .into_response()
}

fn invalid_or_missing_session() -> Response {
    (StatusCode::BAD_REQUEST, INVALID_OR_MISSING_SESSION).into_response()
}

/// Builds the axum router serving POST/GET/DELETE on `path`.
pub fn router(sessions: Arc<SessionRouter>, path: &str) -> Router {
    Router::new()
        .route(
            path,
            post(post_handler).get(get_handler).delete(delete_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(sessions)
}

async fn post_handler(
    State(sessions): State<Arc<SessionRouter>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    sessions.handle_post(&headers, body).await
}

async fn get_handler(State(sessions): State<Arc<SessionRouter>>, headers: HeaderMap) -> Response {
    sessions.handle_get(&headers)
}

async fn delete_handler(
    State(sessions): State<Arc<SessionRouter>>,
    headers: HeaderMap,
) -> Response {
    sessions.handle_delete(&headers)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::mcp::tools::ToolRegistry;

    fn sessions() -> SessionRouter {
        let tools = Arc::new(ToolRegistry::new());
        SessionRouter::new(Arc::new(SessionStore::new()), move || {
            McpEngine::new(Arc::clone(&tools))
        })
    }

    #[test]
    fn blank_session_header_is_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static("  "));
        assert!(session_header(&headers).is_none());
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(session_header(&headers), Some("abc"));
    }

    #[test]
    fn created_session_is_stored_and_removed_on_close() {
        let sessions = sessions();
        let session = sessions.create_session().unwrap();
        let id = session.id().to_string();

        assert!(sessions.store().contains(&id));
        assert!(session.engine().is_attached());

        session.transport().close_signal().close(CloseReason::Disconnected);
        assert!(!sessions.store().contains(&id));
        session.transport().close_signal().close(CloseReason::ClientTerminated);
        assert!(sessions.store().is_empty());
    }

    #[test]
    fn close_all_empties_store() {
        let sessions = sessions();
        for _ in 0..3 {
            sessions.create_session().unwrap();
        }
        assert_eq!(sessions.store().len(), 3);
        assert_eq!(sessions.close_all(), 3);
        assert!(sessions.store().is_empty());
        assert_eq!(sessions.close_all(), 0);
    }

    #[test]
    fn get_and_delete_without_session_are_rejected() {
        let sessions = sessions();
        let headers = HeaderMap::new();
        assert_eq!(sessions.handle_get(&headers).status(), StatusCode::BAD_REQUEST);
        assert_eq!(sessions.handle_delete(&headers).status(), StatusCode::BAD_REQUEST);
    }
}

//! Wire transports a protocol engine can be attached to.
//!
//! Two adapters exist:
//!
//! - [`StdioTransport`]: newline-delimited JSON-RPC on stdin/stdout, one
//!   implicit session for the life of the process.
//! - [`StreamableHttpTransport`]: one instance per HTTP session, driven by the
//!   session router for POST/GET/DELETE requests.
//!
//! Both report their end of life through a [`CloseSignal`].

mod close;
pub mod http;
pub mod stdio;

pub use close::{CloseReason, CloseSignal};
pub use http::StreamableHttpTransport;
pub use stdio::StdioTransport;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::mcp::engine::McpEngine;
use crate::mcp::protocol::OutgoingNotification;

/// Channel half an engine uses to push server-initiated messages.
pub type NotificationSender = mpsc::UnboundedSender<OutgoingNotification>;

/// A wire binding for exactly one protocol engine.
pub trait Transport: Send + Sync {
    /// Session identifier assigned by this adapter, if it has one.
    fn session_id(&self) -> Option<&str>;

    /// Installs the engine that receives this transport's inbound messages.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyBound`] if an engine is already
    /// installed, or [`TransportError::Closed`] if the transport has closed.
    fn bind(&self, engine: Arc<McpEngine>) -> Result<(), TransportError>;

    /// Sender for server-to-client notifications.
    fn notifications(&self) -> NotificationSender;

    /// Fires once when this transport closes.
    fn close_signal(&self) -> &CloseSignal;
}

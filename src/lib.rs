//! cloud-backend-mcp: MCP server exposing cloud backend tools over stdio or
//! Streamable HTTP.
//!
//! The crate is the transport and session layer of the server. Backend tools
//! (document store, file storage, user directory) plug in through
//! [`mcp::ToolHandler`].
//!
//! # Architecture
//!
//! - At startup the [`startup`] module picks a transport. Piped stdio wins
//!   unless HTTP is forced, and stdio refuses to start when an HTTP server
//!   already answers on the configured endpoint.
//! - **stdio**: one [`mcp::McpEngine`] bound to stdin/stdout for the life of
//!   the process.
//! - **HTTP**: the [`session`] router creates one engine and one
//!   [`transport::StreamableHttpTransport`] per client session, keyed by the
//!   `mcp-session-id` header, and removes it when the session closes.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types
//! - [`mcp`]: MCP protocol engine and tool registry
//! - [`session`]: HTTP session store and router
//! - [`startup`]: Transport selection and serving
//! - [`transport`]: stdio and Streamable HTTP adapters

pub mod config;
pub mod error;
pub mod mcp;
pub mod session;
pub mod startup;
pub mod transport;

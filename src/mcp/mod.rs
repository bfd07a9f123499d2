//! Model Context Protocol (MCP) engine.
//!
//! One [`McpEngine`] exists per conversation: a single one for the stdio
//! transport, one per session for HTTP. Engines speak JSON-RPC 2.0 and are
//! unaware of the wire they are attached to.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  messages   ┌─────────────┐    ┌──────────────┐
//! │  Transport   │────────────▶│  McpEngine  │───▶│ ToolRegistry │
//! │ (stdio/HTTP) │◀────────────│ (lifecycle) │    │  (handlers)  │
//! └──────────────┘  replies    └─────────────┘    └──────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2025-03-26 and accepts
//! 2024-11-05 from older clients.

pub mod engine;
pub mod protocol;
pub mod tools;

pub use engine::{McpEngine, ServerState};
pub use protocol::{
    classify, IncomingMessage, JsonRpcError, JsonRpcRequest, JsonRpcResponse, MessageKind,
    MCP_PROTOCOL_VERSION,
};
pub use tools::{ToolCallResult, ToolDefinition, ToolHandler, ToolRegistry};

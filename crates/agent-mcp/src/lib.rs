//! # agent-mcp
//!
//! Model Context Protocol client. Talks JSON-RPC 2.0 to a tool server over
//! the SSE transport and exposes it to the orchestrator as a
//! [`agent_core::ToolSession`].
//!
//! ```text
//! McpSession ──▶ McpClient<T> ──▶ Transport (SseTransport)
//!   connect        initialize        GET  /sse      (event stream)
//!   list_tools     tools/list        POST /messages (requests)
//!   call_tool      tools/call
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use client::{ClientInfo, McpClient, ServerInfo};
pub use error::{McpError, Result};
pub use session::McpSession;
pub use transport::{SseTransport, Transport};

/// MCP protocol version
pub const PROTOCOL_VERSION: &str = "2024-11-05";

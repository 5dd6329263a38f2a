//! MCP (Model Context Protocol) client
//!
//! - `types`      -- JSON-RPC envelope and the tool-related MCP messages
//! - `client`     -- channel-backed JSON-RPC 2.0 client
//! - `protocol`   -- `initialize` handshake, `tools/list`, `tools/call`
//! - `transport`  -- stdio, SSE and in-process transports
//! - `connection` -- one handshaken link over a transport
//! - `server`     -- registered servers, tool translation and invocation

pub mod client;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod types;

pub use connection::Connection;
pub use server::{translate_tool, McpServer, McpServerConfig, McpServerInfo, McpTransportKind};

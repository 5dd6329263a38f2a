//! Error types for AgentSmith
//!
//! This module defines all error types used throughout the engine,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for AgentSmith operations
///
/// This enum encompasses the errors that can occur while streaming
/// completions, talking to MCP servers, running tools, and managing the
/// persisted collections of sessions, providers, roles and MCP servers.
#[derive(Error, Debug)]
pub enum AgentSmithError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider-related errors (HTTP status, malformed responses, etc.)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Tool execution errors
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// The model asked for a tool that is not in the catalog
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A tool call did not carry every parameter the tool requires
    #[error("Tool '{tool}' called without required parameters: {}", missing.join(", "))]
    MissingToolParams {
        /// Name of the tool being called
        tool: String,
        /// Required parameter names absent from the call
        missing: Vec<String>,
    },

    /// Script raised an error or exceeded its time budget
    #[error("Script error: {0}")]
    Script(String),

    /// MCP server could not be reached or the handshake failed
    #[error("MCP connection error: {0}")]
    McpConnection(String),

    /// MCP transport errors (process spawn, broken pipe, HTTP failure)
    #[error("MCP transport error: {0}")]
    McpTransport(String),

    /// An MCP request did not complete within its time budget
    #[error("MCP timeout: server '{server}' did not answer '{method}' in time")]
    McpTimeout {
        /// Server display name
        server: String,
        /// JSON-RPC method that timed out
        method: String,
    },

    /// Protocol-level MCP failure (JSON-RPC error response, bad payload)
    #[error("MCP protocol error: {0}")]
    Mcp(String),

    /// The server answered the handshake with an unsupported protocol revision
    #[error("MCP protocol version mismatch: expected one of {expected:?}, got {got}")]
    McpProtocolVersion {
        /// Revisions this client speaks
        expected: Vec<String>,
        /// Revision the server selected
        got: String,
    },

    /// No text or completion arrived within the idle window
    #[error("Stream timed out after {0} seconds without activity")]
    StreamTimeout(u64),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// The model produced neither an answer nor a recognizable tool call
    #[error("Classification error: {0}")]
    Classification(String),

    /// Agent exceeded the configured bound on tool calls in one turn
    #[error("Agent exceeded maximum iterations: limit={limit}, {message}")]
    MaxIterationsExceeded {
        /// The configured maximum iteration limit
        limit: usize,
        /// Description of what was happening
        message: String,
    },

    /// Unknown model identifier
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Unknown session identifier
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Unknown message identifier within a session
    #[error("Message '{message}' not found in session '{session}'")]
    MessageNotFound {
        /// Session that was searched
        session: String,
        /// Missing message identifier
        message: String,
    },

    /// Unknown provider identifier
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Unknown role identifier
    #[error("Role not found: {0}")]
    RoleNotFound(String),

    /// Unknown MCP server identifier
    #[error("MCP server not found: {0}")]
    McpServerNotFound(String),

    /// Persistence errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AgentSmithError {
    /// Returns true when the error is a timeout of any kind
    ///
    /// Lets callers tell "server slow" apart from "server unreachable" or
    /// "server misbehaving" without matching every variant.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::McpTimeout { .. } | Self::StreamTimeout(_))
    }
}

/// Result type alias for AgentSmith operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

//! MCP transports
//!
//! A [`Transport`] moves serialized JSON-RPC messages between the client and
//! a server. Framing belongs to the implementation:
//!
//! - [`stdio::StdioTransport`] spawns a child process and speaks
//!   newline-delimited JSON over its pipes.
//! - [`sse::SseTransport`] reads `message` events from a long-lived
//!   `text/event-stream` response and POSTs outbound messages to the
//!   endpoint announced by the server.
//! - [`fake::FakeTransport`] is an in-process pair for tests.

use std::pin::Pin;

use futures::Stream;

use crate::error::Result;

pub mod fake;
pub mod sse;
pub mod stdio;

pub use sse::SseTransport;
pub use stdio::StdioTransport;

#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Deliver one serialized message to the server
    ///
    /// # Errors
    ///
    /// Returns `McpTransport` when the underlying channel is gone or the
    /// server rejects the message
    async fn send(&self, message: String) -> Result<()>;

    /// Messages from the server, one item per JSON-RPC message
    ///
    /// The stream ends when the server goes away.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;
}

/// Turn a shared receiver into a stream of its items
pub(crate) fn receiver_stream(
    rx: std::sync::Arc<tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<String>>>,
) -> Pin<Box<dyn Stream<Item = String> + Send + 'static>> {
    Box::pin(futures::stream::unfold(rx, |rx| async move {
        let item = rx.lock().await.recv().await?;
        Some((item, rx))
    }))
}

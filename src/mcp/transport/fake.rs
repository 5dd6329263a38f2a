//! In-process transport for tests
//!
//! ```text
//! client send()        -> handle.outbound_rx
//! handle.inbound_tx    -> client receive()
//! ```

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::error::{AgentSmithError, Result};
use crate::mcp::transport::{receiver_stream, Transport};

#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

/// Test side of a [`FakeTransport`]
#[derive(Debug)]
pub struct FakeTransportHandle {
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    pub inbound_tx: mpsc::UnboundedSender<String>,
}

impl FakeTransport {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound_tx,
                inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            },
            FakeTransportHandle {
                outbound_rx,
                inbound_tx,
            },
        )
    }
}

impl FakeTransportHandle {
    /// Next message the client sent, parsed
    pub async fn next_sent(&mut self) -> Option<serde_json::Value> {
        let raw = self.outbound_rx.recv().await?;
        serde_json::from_str(&raw).ok()
    }

    /// Push a message to the client
    pub fn reply(&self, message: serde_json::Value) {
        let _ = self.inbound_tx.send(message.to_string());
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        self.outbound_tx.send(message).map_err(|_| {
            AgentSmithError::McpTransport("fake transport closed".to_string()).into()
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        receiver_stream(Arc::clone(&self.inbound_rx))
    }
}

//! A live, initialized link to one MCP server
//!
//! [`Connection::open`] pumps the transport through two tasks (writer and
//! reader), starts the JSON-RPC read loop and performs the handshake. All
//! tasks stop and the transport is dropped when the connection is closed or
//! dropped, which terminates a stdio server process.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::mcp::client::{start_read_loop, JsonRpcClient};
use crate::mcp::protocol::{InitializedMcpProtocol, McpProtocol};
use crate::mcp::transport::Transport;
use crate::mcp::types::{CallToolResponse, Implementation, McpTool};

#[derive(Debug)]
pub struct Connection {
    protocol: InitializedMcpProtocol,
    cancel: CancellationToken,
}

impl Connection {
    /// Wire a transport and run the handshake
    ///
    /// # Arguments
    ///
    /// * `transport` - Already connected transport
    /// * `peer` - Server name used in logs and timeout errors
    /// * `client_info` - Sent as `clientInfo`
    /// * `handshake_timeout` - Deadline for the `initialize` response
    ///
    /// # Errors
    ///
    /// Propagates handshake failures; the transport is released before
    /// returning
    pub async fn open(
        transport: Arc<dyn Transport>,
        peer: &str,
        client_info: Implementation,
        handshake_timeout: Duration,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        let writer_transport = Arc::clone(&transport);
        let writer_cancel = cancel.clone();
        let writer_peer = peer.to_string();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    message = out_rx.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                if let Err(e) = writer_transport.send(message).await {
                    tracing::warn!("Failed to send to MCP server '{}': {}", writer_peer, e);
                }
            }
        });

        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut inbound = transport.receive();
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    message = inbound.next() => match message {
                        Some(message) => {
                            if in_tx.send(message).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        let client = JsonRpcClient::new(out_tx).with_peer_name(peer);
        start_read_loop(in_rx, cancel.clone(), Arc::new(client.clone_shared()));

        let protocol = match McpProtocol::new(client)
            .initialize(client_info, handshake_timeout)
            .await
        {
            Ok(protocol) => protocol,
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        };

        tracing::info!(
            "Connected to MCP server '{}' ({} {})",
            peer,
            protocol.server_info().name,
            protocol.protocol_version()
        );
        Ok(Self { protocol, cancel })
    }

    pub async fn list_tools(&self, timeout: Duration) -> Result<Vec<McpTool>> {
        self.protocol.list_tools(timeout).await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<CallToolResponse> {
        self.protocol.call_tool(name, arguments, timeout).await
    }

    /// Stop the pump tasks and release the transport
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

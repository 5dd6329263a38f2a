//! Channel-backed JSON-RPC 2.0 client
//!
//! [`JsonRpcClient`] knows nothing about the transport. Outbound messages are
//! serialized onto an unbounded channel; inbound messages are fed to
//! [`start_read_loop`], which resolves pending requests by id, answers
//! server-initiated requests and logs notifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{AgentSmithError, Result};
use crate::mcp::types::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND,
    METHOD_PING,
};

/// Timeout applied when a request does not name one
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type RpcOutcome = std::result::Result<Value, JsonRpcError>;
type PendingMap = HashMap<u64, oneshot::Sender<RpcOutcome>>;

pub struct JsonRpcClient {
    next_id: Arc<AtomicU64>,
    pending: Arc<Mutex<PendingMap>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    peer: String,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("peer", &self.peer)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a client writing serialized messages to `outbound_tx`
    pub fn new(outbound_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbound_tx,
            peer: "(unknown)".to_string(),
        }
    }

    /// Name the remote side; used in timeout errors
    pub fn with_peer_name(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Second handle sharing the id counter, pending map and channel
    pub fn clone_shared(&self) -> Self {
        Self {
            next_id: Arc::clone(&self.next_id),
            pending: Arc::clone(&self.pending),
            outbound_tx: self.outbound_tx.clone(),
            peer: self.peer.clone(),
        }
    }

    /// Send a request and wait for its response
    ///
    /// # Arguments
    ///
    /// * `method` - JSON-RPC method name
    /// * `params` - Serializable params
    /// * `timeout` - How long to wait; `DEFAULT_REQUEST_TIMEOUT` when `None`
    ///
    /// # Errors
    ///
    /// - `McpTimeout` when no response arrives in time
    /// - `McpTransport` when the outbound channel or read loop is gone
    /// - `Mcp` when the server answers with a JSON-RPC error
    /// - `Serialization` when the result does not match `R`
    pub async fn request<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Registered before sending so a fast response always finds its slot.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = serde_json::to_string(&JsonRpcRequest::new(
            id,
            method,
            Some(serde_json::to_value(params)?),
        ))?;
        if self.outbound_tx.send(message).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(AgentSmithError::McpTransport("outbound channel closed".to_string()).into());
        }

        let deadline = timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let outcome = match tokio::time::timeout(deadline, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(AgentSmithError::McpTimeout {
                    server: self.peer.clone(),
                    method: method.to_string(),
                }
                .into());
            }
        };

        let value = outcome
            .map_err(|_| {
                AgentSmithError::McpTransport(format!(
                    "connection to '{}' closed before '{}' was answered",
                    self.peer, method
                ))
            })?
            .map_err(|e| AgentSmithError::Mcp(e.to_string()))?;

        serde_json::from_value(value).map_err(|e| AgentSmithError::Serialization(e).into())
    }

    /// Send a notification; no response is expected
    ///
    /// # Errors
    ///
    /// Returns `McpTransport` if the outbound channel is closed
    pub fn notify<P: serde::Serialize>(&self, method: &str, params: P) -> Result<()> {
        let message = serde_json::to_string(&JsonRpcNotification::new(
            method,
            Some(serde_json::to_value(params)?),
        ))?;
        self.outbound_tx
            .send(message)
            .map_err(|_| AgentSmithError::McpTransport("outbound channel closed".to_string()))?;
        Ok(())
    }

    async fn fail_pending(&self) {
        // Dropping the senders wakes every waiter with a closed-channel error.
        self.pending.lock().await.clear();
    }
}

/// Spawn the task that routes inbound messages
///
/// The loop ends when `cancellation` fires or `inbound_rx` closes. Either
/// way every pending request is failed.
pub fn start_read_loop(
    mut inbound_rx: mpsc::UnboundedReceiver<String>,
    cancellation: CancellationToken,
    client: Arc<JsonRpcClient>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => break,
                message = inbound_rx.recv() => match message {
                    Some(raw) => dispatch_message(&raw, &client).await,
                    None => {
                        tracing::debug!("MCP inbound channel for '{}' closed", client.peer);
                        break;
                    }
                },
            }
        }
        client.fail_pending().await;
    })
}

async fn dispatch_message(raw: &str, client: &JsonRpcClient) {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Ignoring malformed message from '{}': {}", client.peer, e);
            return;
        }
    };

    let id = value.get("id").filter(|id| !id.is_null()).cloned();
    let method = value
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_string);

    match (id, method) {
        (Some(id), None) => handle_response(id, &value, client).await,
        (Some(id), Some(method)) => handle_server_request(id, &method, client),
        (None, Some(method)) => {
            tracing::debug!("Notification from '{}': {}", client.peer, method);
        }
        (None, None) => {
            tracing::debug!("Unclassifiable message from '{}': {}", client.peer, raw);
        }
    }
}

async fn handle_response(id: Value, value: &Value, client: &JsonRpcClient) {
    let Some(id) = id
        .as_u64()
        .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
    else {
        tracing::warn!("Response from '{}' has a non-integer id: {}", client.peer, id);
        return;
    };

    let Some(tx) = client.pending.lock().await.remove(&id) else {
        tracing::debug!("Response from '{}' for unknown id {}", client.peer, id);
        return;
    };

    let outcome = match value.get("error") {
        Some(error) => Err(
            serde_json::from_value::<JsonRpcError>(error.clone()).unwrap_or_else(|_| {
                JsonRpcError {
                    code: -32603,
                    message: format!("malformed error object: {}", error),
                    data: None,
                }
            }),
        ),
        None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
    };

    // The caller may have timed out already.
    let _ = tx.send(outcome);
}

fn handle_server_request(id: Value, method: &str, client: &JsonRpcClient) {
    let response = if method == METHOD_PING {
        JsonRpcResponse::success(id, serde_json::json!({}))
    } else {
        tracing::debug!("Rejecting server request '{}' from '{}'", method, client.peer);
        JsonRpcResponse::failure(
            id,
            JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: {}", method),
                data: None,
            },
        )
    };

    if let Ok(serialized) = serde_json::to_string(&response) {
        let _ = client.outbound_tx.send(serialized);
    }
}

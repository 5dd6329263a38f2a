//! Legacy HTTP+SSE transport
//!
//! The client opens a `GET` on the server URL with `Accept:
//! text/event-stream`. The first `endpoint` event names the URL (relative to
//! the stream URL) that outbound messages are POSTed to; every `message`
//! event carries one JSON-RPC message from the server.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{AgentSmithError, Result};
use crate::mcp::transport::{receiver_stream, Transport};
use crate::sse::decode_stream;

const POST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct SseTransport {
    http: reqwest::Client,
    endpoint: Url,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    cancel: CancellationToken,
}

impl SseTransport {
    /// Open the event stream and wait for the `endpoint` event
    ///
    /// # Arguments
    ///
    /// * `url` - Event stream URL
    /// * `timeout` - How long to wait for the stream and its endpoint event
    ///
    /// # Errors
    ///
    /// - `McpConnection` for an invalid URL, a refused connection or a
    ///   non-success status
    /// - `McpTimeout` when no endpoint is announced in time
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        Self::connect_until(url, Instant::now() + timeout).await
    }

    /// Like [`SseTransport::connect`], but the `GET` and the endpoint wait
    /// share one `deadline`
    ///
    /// On every failure the event stream is released before returning.
    pub async fn connect_until(url: &str, deadline: Instant) -> Result<Self> {
        let stream_url = Url::parse(url)
            .map_err(|e| AgentSmithError::McpConnection(format!("invalid URL '{}': {}", url, e)))?;

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AgentSmithError::McpConnection(e.to_string()))?;

        let response = tokio::time::timeout_at(
            deadline,
            http.get(stream_url.clone())
                .header(ACCEPT, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache")
                .send(),
        )
        .await
        .map_err(|_| AgentSmithError::McpTimeout {
            server: url.to_string(),
            method: "connect".to_string(),
        })?
        .map_err(|e| AgentSmithError::McpConnection(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(AgentSmithError::McpConnection(format!(
                "{} answered with status {}",
                url,
                response.status()
            ))
            .into());
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let cancel = CancellationToken::new();
        // Stops the reader on any early return below
        let reader_guard = cancel.clone().drop_guard();

        let reader_cancel = cancel.clone();
        let source = url.to_string();
        tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut events = Box::pin(decode_stream(response.bytes_stream()));
            loop {
                let next = tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    next = events.next() => next,
                };
                let event = match next {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        tracing::warn!("Event stream from {} failed: {}", source, e);
                        break;
                    }
                    None => break,
                };
                match event.kind() {
                    "endpoint" => match endpoint_tx.take() {
                        Some(tx) => {
                            let _ = tx.send(event.data.trim().to_string());
                        }
                        None => tracing::debug!("Ignoring repeated endpoint event from {}", source),
                    },
                    "message" => {
                        if inbound_tx.send(event.data).is_err() {
                            break;
                        }
                    }
                    other => tracing::debug!("Ignoring '{}' event from {}", other, source),
                }
            }
            tracing::debug!("Event stream from {} ended", source);
        });

        let announced = match tokio::time::timeout_at(deadline, endpoint_rx).await {
            Ok(Ok(announced)) => announced,
            Ok(Err(_)) => {
                return Err(AgentSmithError::McpConnection(format!(
                    "{} closed the event stream before announcing an endpoint",
                    url
                ))
                .into());
            }
            Err(_) => {
                return Err(AgentSmithError::McpTimeout {
                    server: url.to_string(),
                    method: "endpoint".to_string(),
                }
                .into());
            }
        };

        let endpoint = stream_url.join(&announced).map_err(|e| {
            AgentSmithError::McpConnection(format!("invalid endpoint '{}': {}", announced, e))
        })?;
        tracing::debug!("SSE endpoint for {} is {}", url, endpoint);

        reader_guard.disarm();
        Ok(Self {
            http,
            endpoint,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            cancel,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: String) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .timeout(POST_TIMEOUT)
            .body(message)
            .send()
            .await
            .map_err(|e| AgentSmithError::McpTransport(format!("POST {}: {}", self.endpoint, e)))?;

        if !response.status().is_success() {
            return Err(AgentSmithError::McpTransport(format!(
                "POST {} answered with status {}",
                self.endpoint,
                response.status()
            ))
            .into());
        }
        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        receiver_stream(Arc::clone(&self.inbound_rx))
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

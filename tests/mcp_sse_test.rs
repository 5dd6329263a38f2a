//! MCP SSE transport integration tests
//!
//! Runs an in-process `axum` server speaking the legacy HTTP+SSE flavour of
//! MCP: `GET /sse` announces an endpoint in an `endpoint` event, JSON-RPC
//! requests are POSTed there and every answer comes back as a `message`
//! event on the open stream.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use agentsmith::config::McpConfig;
use agentsmith::mcp::transport::SseTransport;
use agentsmith::mcp::{McpServer, McpServerConfig};
use agentsmith::tools::ToolCallRequest;
use agentsmith::AgentSmithError;
use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

type Outbound = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

/// How the test server behaves
#[derive(Clone)]
struct Behaviour {
    outbound: Outbound,
    endpoint: &'static str,
    endpoint_delay: Duration,
    answer: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            outbound: Arc::new(Mutex::new(None)),
            endpoint: "/message?session=1",
            endpoint_delay: Duration::ZERO,
            answer: true,
        }
    }
}

async fn open_stream(State(behaviour): State<Behaviour>) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    *behaviour.outbound.lock().unwrap() = Some(tx);

    let delay = behaviour.endpoint_delay;
    let announce = format!("event: endpoint\ndata: {}\n\n", behaviour.endpoint);
    let endpoint = futures::stream::once(async move {
        tokio::time::sleep(delay).await;
        announce
    });
    let body = endpoint
        .chain(UnboundedReceiverStream::new(rx))
        .map(Ok::<_, Infallible>);

    Response::builder()
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(body))
        .unwrap()
}

async fn receive_message(
    State(behaviour): State<Behaviour>,
    Json(request): Json<Value>,
) -> StatusCode {
    let Some(id) = request.get("id").cloned() else {
        return StatusCode::ACCEPTED;
    };
    if !behaviour.answer {
        return StatusCode::ACCEPTED;
    }
    let result = match request["method"].as_str().unwrap_or("") {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "sse-test-server", "version": "0.1.0"}
        }),
        "tools/list" => json!({
            "tools": [{
                "name": "shout",
                "description": "Upper-cases text",
                "inputSchema": {
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }
            }]
        }),
        "tools/call" => {
            let text = request["params"]["arguments"]["text"]
                .as_str()
                .unwrap_or("")
                .to_uppercase();
            json!({"content": [{"type": "text", "text": text}]})
        }
        _ => json!({}),
    };

    let message = json!({"jsonrpc": "2.0", "id": id, "result": result});
    if let Some(tx) = behaviour.outbound.lock().unwrap().as_ref() {
        let _ = tx.send(format!("event: message\ndata: {}\n\n", message));
    }
    StatusCode::ACCEPTED
}

async fn start_server_with(behaviour: Behaviour) -> SocketAddr {
    let app = Router::new()
        .route("/sse", get(open_stream))
        .route("/message", post(receive_message))
        .with_state(behaviour);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

async fn start_server() -> SocketAddr {
    start_server_with(Behaviour::default()).await
}

#[tokio::test]
async fn test_endpoint_is_resolved_against_stream_url() {
    let addr = start_server().await;
    let transport = SseTransport::connect(&format!("http://{}/sse", addr), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(
        transport.endpoint().as_str(),
        format!("http://{}/message?session=1", addr)
    );
}

#[tokio::test]
async fn test_discovery_and_call_over_sse() {
    let addr = start_server().await;
    let server = McpServer::new(
        McpServerConfig::sse("remote", format!("http://{}/sse", addr)),
        McpConfig::default(),
    );

    assert_eq!(server.load_tools().await.unwrap(), 1);
    assert_eq!(server.tools()[0].name, "shout");

    let mut params = Map::new();
    params.insert("text".to_string(), json!("quiet please"));
    let result = server
        .call_tool(&ToolCallRequest::new("c1", "shout", params))
        .await
        .unwrap();
    assert_eq!(result, "QUIET PLEASE");
}

#[tokio::test]
async fn test_refused_connection() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = SseTransport::connect(&format!("http://{}/sse", addr), Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AgentSmithError>(),
        Some(AgentSmithError::McpConnection(_))
    ));
}

#[tokio::test]
async fn test_bad_endpoint_releases_stream() {
    let behaviour = Behaviour {
        endpoint: "http://[bad",
        ..Behaviour::default()
    };
    let outbound = Arc::clone(&behaviour.outbound);
    let addr = start_server_with(behaviour).await;

    let err = SseTransport::connect(&format!("http://{}/sse", addr), Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid endpoint"));

    // Comments keep flowing until the client hangs up
    let tx = outbound.lock().unwrap().clone().unwrap();
    let released = tokio::time::timeout(Duration::from_secs(5), async move {
        while tx.send(": ping\n\n".to_string()).is_ok() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "event stream still open after failed connect");
}

#[tokio::test]
async fn test_handshake_shares_one_deadline() {
    let addr = start_server_with(Behaviour {
        endpoint_delay: Duration::from_millis(700),
        answer: false,
        ..Behaviour::default()
    })
    .await;
    let server = McpServer::new(
        McpServerConfig::sse("slow", format!("http://{}/sse", addr)),
        McpConfig {
            handshake_timeout_seconds: 1,
            ..McpConfig::default()
        },
    );

    let started = Instant::now();
    let err = server.connect().await.unwrap_err();
    let elapsed = started.elapsed();
    assert!(matches!(
        err.downcast_ref::<AgentSmithError>(),
        Some(AgentSmithError::McpTimeout { .. })
    ));
    assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);
}

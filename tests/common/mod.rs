use std::path::PathBuf;
use std::sync::Arc;

use agentsmith::agent::Registry;
use agentsmith::config::Config;
use agentsmith::events::EventBus;
use agentsmith::mcp::McpServerConfig;
use agentsmith::storage::{MemoryStore, SqliteStorage};
use tempfile::TempDir;

#[allow(dead_code)]
pub fn create_temp_storage() -> (SqliteStorage, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("agentsmith.db");
    let storage =
        SqliteStorage::new_with_path(db_path).expect("failed to create sqlite storage with path");
    (storage, tmp)
}

/// Registry over an in-memory store
#[allow(dead_code)]
pub fn memory_registry(config: &Config) -> (Arc<MemoryStore>, Arc<Registry>) {
    let store = Arc::new(MemoryStore::new());
    let registry = Registry::new(store.clone(), EventBus::default(), config);
    (store, registry)
}

/// Path of the `mcp_test_server` helper binary
#[allow(dead_code)]
pub fn test_server_exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mcp_test_server"))
}

#[allow(dead_code)]
pub fn test_server_config(name: &str) -> McpServerConfig {
    McpServerConfig::stdio(name, test_server_exe().to_string_lossy(), Vec::new())
}

/// One SSE chunk of an OpenAI-compatible stream
#[allow(dead_code)]
pub fn sse_chunk(payload: serde_json::Value) -> String {
    format!("data: {}\n\n", payload)
}

/// Streamed body that emits `fragments` as text deltas
#[allow(dead_code)]
pub fn text_stream(fragments: &[&str]) -> String {
    let mut body = String::new();
    for fragment in fragments {
        body.push_str(&sse_chunk(serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": fragment}}]
        })));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Streamed body that emits one tool call split over several deltas
#[allow(dead_code)]
pub fn tool_call_stream(id: &str, name: &str, arguments: &str) -> String {
    let (head, tail) = arguments.split_at(arguments.len() / 2);
    let mut body = sse_chunk(serde_json::json!({
        "choices": [{"index": 0, "delta": {"tool_calls": [
            {"index": 0, "id": id, "type": "function", "function": {"name": name, "arguments": head}}
        ]}}]
    }));
    body.push_str(&sse_chunk(serde_json::json!({
        "choices": [{"index": 0, "delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": tail}}
        ]}}]
    })));
    body.push_str(&sse_chunk(serde_json::json!({
        "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]
    })));
    body.push_str("data: [DONE]\n\n");
    body
}

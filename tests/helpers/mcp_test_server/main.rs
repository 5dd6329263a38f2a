//! Minimal stdio MCP server for integration tests
//!
//! Reads newline-delimited JSON-RPC from stdin and answers on stdout.
//!
//! # Handled Methods
//!
//! - `initialize` -- answers with protocol version `2025-11-25` and the
//!   `tools` capability.
//! - `notifications/initialized` -- swallowed.
//! - `tools/list` -- two pages: `echo` first, then `add` and `fail`
//!   behind the cursor `page-2`.
//! - `tools/call` -- `echo` returns its `message`, `add` returns `a + b`,
//!   `fail` returns a result flagged with `isError`.
//! - `ping` -- empty result.
//! - Anything else -- JSON-RPC `-32601`.

use std::io::{self, BufRead, Write};

use serde_json::{json, Value};

fn main() {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(trimmed) {
            Ok(request) => match respond(&request) {
                Some(response) => response,
                None => continue,
            },
            Err(_) => error(&Value::Null, -32700, "Parse error"),
        };

        if writeln!(out, "{}", response).is_err() || out.flush().is_err() {
            break;
        }
    }
}

fn respond(request: &Value) -> Option<Value> {
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");
    let id = request.get("id").cloned()?;
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    Some(match method {
        "initialize" => result(
            &id,
            json!({
                "protocolVersion": "2025-11-25",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "mcp-test-server", "version": "0.1.0"}
            }),
        ),
        "tools/list" => list_tools(&id, &params),
        "tools/call" => call_tool(&id, &params),
        "ping" => result(&id, json!({})),
        other => error(&id, -32601, &format!("Method not found: {}", other)),
    })
}

fn list_tools(id: &Value, params: &Value) -> Value {
    match params.get("cursor").and_then(Value::as_str) {
        None => result(
            id,
            json!({
                "tools": [{
                    "name": "echo",
                    "description": "Echoes input",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"message": {"type": "string", "description": "Text to echo"}},
                        "required": ["message"]
                    }
                }],
                "nextCursor": "page-2"
            }),
        ),
        Some("page-2") => result(
            id,
            json!({
                "tools": [
                    {
                        "name": "add",
                        "description": "Adds two numbers",
                        "inputSchema": {
                            "type": "object",
                            "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                            "required": ["a", "b"]
                        }
                    },
                    {
                        "name": "fail",
                        "description": "Always reports a tool error",
                        "inputSchema": {"type": "object", "properties": {}}
                    }
                ]
            }),
        ),
        Some(other) => error(id, -32602, &format!("Unknown cursor: {}", other)),
    }
}

fn call_tool(id: &Value, params: &Value) -> Value {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    match name {
        "echo" => {
            let message = arguments
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("");
            text_result(id, message, false)
        }
        "add" => {
            let a = arguments.get("a").and_then(Value::as_f64).unwrap_or(0.0);
            let b = arguments.get("b").and_then(Value::as_f64).unwrap_or(0.0);
            text_result(id, &format!("{}", a + b), false)
        }
        "fail" => text_result(id, "the tool failed on purpose", true),
        other => error(id, -32602, &format!("Unknown tool: {}", other)),
    }
}

fn text_result(id: &Value, text: &str, is_error: bool) -> Value {
    result(
        id,
        json!({"content": [{"type": "text", "text": text}], "isError": is_error}),
    )
}

fn result(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error(id: &Value, code: i32, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

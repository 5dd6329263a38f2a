//! Sandboxed Lua script tool
//!
//! Every call gets a fresh interpreter with only the table, string, math
//! and utf8 libraries loaded. `print` is redirected into a buffer and an
//! instruction-count hook enforces a wall-clock deadline. The interpreter
//! is dropped when the call returns, on every path.

use super::{ToolCallRequest, ToolExecutor, SCRIPT_TOOL_NAME};
use crate::error::{AgentSmithError, Result};
use async_trait::async_trait;
use mlua::{Function, HookTriggers, Lua, LuaOptions, MultiValue, StdLib, Value, Variadic};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Deepest table nesting converted to JSON
const MAX_DEPTH: usize = 32;

/// Instructions executed between deadline checks
const HOOK_INTERVAL: u32 = 10_000;

const MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Runs `lua_code_runner` calls
#[derive(Debug, Clone)]
pub struct ScriptToolExecutor {
    timeout: Duration,
}

impl ScriptToolExecutor {
    /// Create a new executor
    ///
    /// # Arguments
    ///
    /// * `timeout` - Wall-clock budget of one script run
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run a script to completion on the current thread
    ///
    /// # Returns
    ///
    /// Returns the printed output followed by a `Last returned value:` line
    /// when the script returned something
    ///
    /// # Errors
    ///
    /// Returns `Script` when the source fails to compile, raises, or runs
    /// past its deadline
    pub fn run(&self, code: &str) -> Result<String> {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
            LuaOptions::default(),
        )
        .map_err(script_error)?;
        lua.set_memory_limit(MEMORY_LIMIT).map_err(script_error)?;

        let deadline = Instant::now() + self.timeout;
        let budget = self.timeout;
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
            move |_lua, _debug| {
                if Instant::now() >= deadline {
                    Err(mlua::Error::RuntimeError(format!(
                        "script exceeded its time budget of {:?}",
                        budget
                    )))
                } else {
                    Ok(())
                }
            },
        );

        let output = Arc::new(Mutex::new(String::new()));
        install_print(&lua, Arc::clone(&output)).map_err(script_error)?;

        let globals = lua.globals();
        for name in ["dofile", "loadfile"] {
            globals.set(name, Value::Nil).map_err(script_error)?;
        }

        let values: MultiValue = lua
            .load(code)
            .set_name(SCRIPT_TOOL_NAME)
            .eval()
            .map_err(script_error)?;
        let last = values
            .into_iter()
            .last()
            .filter(|value| !matches!(value, Value::Nil))
            .map(|value| lua_to_json(&value, 0));

        let printed = output
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default();
        Ok(format_result(&printed, last))
    }
}

#[async_trait]
impl ToolExecutor for ScriptToolExecutor {
    async fn execute(&self, request: &ToolCallRequest) -> Result<String> {
        let code = request
            .str_param("code")
            .ok_or_else(|| AgentSmithError::Tool("'code' must be a string".to_string()))?
            .to_string();

        let executor = self.clone();
        tokio::task::spawn_blocking(move || executor.run(&code))
            .await
            .map_err(|e| AgentSmithError::Script(format!("script task failed: {}", e)))?
    }
}

fn script_error(err: mlua::Error) -> anyhow::Error {
    AgentSmithError::Script(err.to_string()).into()
}

fn install_print(lua: &Lua, sink: Arc<Mutex<String>>) -> mlua::Result<()> {
    let print = lua.create_function(move |lua, args: Variadic<Value>| {
        let tostring: Function = lua.globals().get("tostring")?;
        let mut parts = Vec::with_capacity(args.len());
        for arg in args.iter() {
            parts.push(tostring.call::<_, String>(arg.clone())?);
        }
        if let Ok(mut buffer) = sink.lock() {
            buffer.push_str(&parts.join("\t"));
            buffer.push('\n');
        }
        Ok(())
    })?;
    lua.globals().set("print", print)
}

fn format_result(printed: &str, last: Option<JsonValue>) -> String {
    let mut result = printed.to_string();
    match last {
        Some(value) => {
            result.push_str("Last returned value: ");
            result.push_str(&value.to_string());
        }
        None if result.is_empty() => result.push_str("Script finished without output"),
        None => {}
    }
    result
}

fn lua_to_json(value: &Value<'_>, depth: usize) -> JsonValue {
    if depth > MAX_DEPTH {
        return JsonValue::String("<max depth exceeded>".to_string());
    }
    match value {
        Value::Nil => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::Integer(i) => number_to_json(*i as f64),
        Value::Number(n) => number_to_json(*n),
        Value::String(s) => JsonValue::String(s.to_string_lossy().into_owned()),
        Value::Table(table) => table_to_json(table, depth),
        other => JsonValue::String(format!("<{}>", other.type_name())),
    }
}

/// Integral values render without a fractional part
fn number_to_json(n: f64) -> JsonValue {
    const MAX_SAFE: f64 = 9_007_199_254_740_992.0;
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(n.to_string()))
    }
}

fn table_to_json(table: &mlua::Table<'_>, depth: usize) -> JsonValue {
    let mut entries = Vec::new();
    for pair in table.clone().pairs::<Value, Value>() {
        match pair {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!("Skipping unreadable table entry: {}", e),
        }
    }

    if entries.is_empty() {
        return JsonValue::Array(Vec::new());
    }

    if let Some(mut indexed) = dense_sequence(&entries) {
        indexed.sort_by_key(|(index, _)| *index);
        return JsonValue::Array(
            indexed
                .into_iter()
                .map(|(_, value)| lua_to_json(value, depth + 1))
                .collect(),
        );
    }

    let mut map = serde_json::Map::new();
    for (key, value) in &entries {
        map.insert(key_to_string(key), lua_to_json(value, depth + 1));
    }
    JsonValue::Object(map)
}

/// Keys are exactly 1..=N
fn dense_sequence<'a, 'lua>(entries: &'a [(Value<'lua>, Value<'lua>)]) -> Option<Vec<(i64, &'a Value<'lua>)>> {
    let mut indexed = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let index = match key {
            Value::Integer(i) => *i,
            Value::Number(n) if n.fract() == 0.0 => *n as i64,
            _ => return None,
        };
        indexed.push((index, value));
    }

    let mut seen: Vec<i64> = indexed.iter().map(|(index, _)| *index).collect();
    seen.sort_unstable();
    let len = seen.len() as i64;
    if seen.iter().copied().eq(1..=len) {
        Some(indexed)
    } else {
        None
    }
}

fn key_to_string(key: &Value<'_>) -> String {
    match key {
        Value::String(s) => s.to_string_lossy().into_owned(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => number_to_json(*n).to_string(),
        Value::Boolean(b) => b.to_string(),
        other => format!("<{}>", other.type_name()),
    }
}

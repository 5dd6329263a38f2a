//! Tool-call reconstruction from streamed fragments
//!
//! Providers split one tool call across many chunks, each tagged with the
//! call's index. Fragments for the same index are concatenated in arrival
//! order; indices are independent of each other.

use crate::tools::ToolCallRequest;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One streamed piece of a tool call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
    /// Some servers send the argument text under `params`
    pub params: Option<String>,
    /// or under `args`
    pub args: Option<String>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
    params: String,
    args: String,
}

impl PartialToolCall {
    fn raw_arguments(&self) -> &str {
        [&self.params, &self.arguments, &self.args]
            .into_iter()
            .find(|text| !text.trim().is_empty())
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Collects fragments for the lifetime of one stream
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, PartialToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment to its index
    pub fn push(&mut self, fragment: ToolCallFragment) {
        let call = self.calls.entry(fragment.index).or_default();
        if let Some(id) = fragment.id {
            call.id.push_str(&id);
        }
        if let Some(name) = fragment.name {
            call.name.push_str(&name);
        }
        if let Some(arguments) = fragment.arguments {
            call.arguments.push_str(&arguments);
        }
        if let Some(params) = fragment.params {
            call.params.push_str(&params);
        }
        if let Some(args) = fragment.args {
            call.args.push_str(&args);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Finalize every index, in index order
    ///
    /// Argument text that does not parse as a JSON object is logged and
    /// replaced by an empty parameter map. Missing identifiers are
    /// generated.
    pub fn finish(self) -> Vec<ToolCallRequest> {
        self.calls
            .into_values()
            .map(|call| {
                let params = parse_params(&call.name, call.raw_arguments());
                ToolCallRequest::new(call.id, call.name, params).ensure_id()
            })
            .collect()
    }
}

/// Parse argument text into a parameter map
///
/// Accepts an object, or a JSON string that itself holds an object.
pub fn parse_params(tool: &str, raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(Value::String(inner)) => match serde_json::from_str::<Value>(&inner) {
            Ok(Value::Object(map)) => map,
            _ => {
                tracing::warn!("Tool call '{}' arguments are not an object: {}", tool, raw);
                Map::new()
            }
        },
        Ok(_) => {
            tracing::warn!("Tool call '{}' arguments are not an object: {}", tool, raw);
            Map::new()
        }
        Err(e) => {
            tracing::warn!("Failed to parse tool call '{}' arguments: {}", tool, e);
            Map::new()
        }
    }
}

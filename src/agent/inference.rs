//! Recognising tool calls written as plain text
//!
//! Some models ignore structured tool calling and answer with a JSON object
//! in the message body instead. This is a best-effort fallback: the reply is
//! read as a call only when it parses as one and its name contains a known
//! tool name.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::providers::accumulator::parse_params;
use crate::providers::cut_thinking;
use crate::tools::{Tool, ToolCallRequest};

/// What the model wants after its reply
#[derive(Debug, Clone, PartialEq)]
pub enum InferredAction {
    /// The reply is the answer
    Answer,
    /// The reply is an inline tool call
    ToolCall(ToolCallRequest),
    /// Nothing usable was produced
    Error,
}

#[derive(Debug, Deserialize)]
struct InlineCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    arguments: Option<Value>,
    #[serde(default)]
    args: Option<Value>,
}

impl InlineCall {
    fn into_params(self) -> Map<String, Value> {
        let raw = [self.params, self.arguments, self.args]
            .into_iter()
            .flatten()
            .find(|value| match value {
                Value::Null => false,
                Value::String(s) => !s.trim().is_empty(),
                Value::Object(map) => !map.is_empty(),
                _ => true,
            });
        match raw {
            Some(Value::Object(map)) => map,
            Some(Value::String(text)) => parse_params(&self.name, &text),
            Some(other) => {
                tracing::warn!("Inline call '{}' has non-object params: {}", self.name, other);
                Map::new()
            }
            None => Map::new(),
        }
    }
}

/// Classify a finished assistant reply
///
/// The returned call keeps whatever id the text carried, possibly empty,
/// so that classifying the same text twice gives the same result.
///
/// # Arguments
///
/// * `text` - Final assistant text
/// * `catalog` - Tools advertised for the turn
pub fn infer_next_action(text: &str, catalog: &[Tool]) -> InferredAction {
    let content = cut_thinking(text);
    if content.is_empty() {
        return InferredAction::Error;
    }

    let candidate = if content.starts_with("```") {
        match (content.find('{'), content.rfind('}')) {
            (Some(open), Some(close)) if open < close => &content[open..=close],
            _ => content,
        }
    } else {
        content
    };

    let Ok(call) = serde_json::from_str::<InlineCall>(candidate) else {
        return InferredAction::Answer;
    };

    let Some(tool) = catalog.iter().find(|tool| call.name.contains(&tool.name)) else {
        tracing::debug!("Inline call names unknown tool '{}'", call.name);
        return InferredAction::Answer;
    };

    let name = tool.name.clone();
    let id = call.id.clone().unwrap_or_default();
    InferredAction::ToolCall(ToolCallRequest::new(id, name, call.into_params()))
}

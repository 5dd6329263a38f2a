//! Base provider trait and common types for AgentSmith
//!
//! This module defines the Provider trait that every upstream API family
//! implements, along with the conversation message type, model metadata,
//! and the persisted provider configuration.

use crate::error::Result;
use crate::tools::{Tool, ToolCallRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOrigin {
    User,
    Assistant,
    Tool,
    System,
}

impl MessageOrigin {
    /// Wire role name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message structure for conversation
///
/// A `tool` message carries exactly the request it answers. An
/// `assistant` message carries tool requests only when it triggered a
/// tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Identifier, unique within its session
    pub id: String,
    /// Author of the message
    pub origin: MessageOrigin,
    /// Text; grows while the assistant reply is streaming
    pub text: String,
    /// Tool calls triggered by, or answered by, this message
    #[serde(default)]
    pub tool_requests: Vec<ToolCallRequest>,
}

impl Message {
    /// Creates a message with a fresh identifier
    ///
    /// # Arguments
    ///
    /// * `origin` - Author of the message
    /// * `text` - The message content
    pub fn new(origin: MessageOrigin, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            origin,
            text: text.into(),
            tool_requests: Vec::new(),
        }
    }

    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use agentsmith::providers::{Message, MessageOrigin};
    ///
    /// let msg = Message::user("Hello, assistant!");
    /// assert_eq!(msg.origin, MessageOrigin::User);
    /// ```
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageOrigin::User, text)
    }

    /// Creates a new assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageOrigin::Assistant, text)
    }

    /// Creates a new system message
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageOrigin::System, text)
    }

    /// Creates a tool result message answering `request`
    pub fn tool_result(request: ToolCallRequest, text: impl Into<String>) -> Self {
        Self::new(MessageOrigin::Tool, text).with_tool_requests(vec![request])
    }

    /// Replace the attached tool requests
    pub fn with_tool_requests(mut self, tool_requests: Vec<ToolCallRequest>) -> Self {
        self.tool_requests = tool_requests;
        self
    }
}

/// One model offered by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: String,
    pub name: String,
    /// Owning provider
    pub provider_id: String,
}

impl Model {
    pub fn new(id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider_id: provider_id.into(),
        }
    }
}

/// Upstream API family
///
/// Every family currently speaks the OpenAI-compatible chat-completion
/// wire format; they differ in authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    OpenAi,
    Ollama,
    LmStudio,
    Mistral,
    Google,
    Anthropic,
    #[default]
    OpenAiCompatible,
}

impl ApiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
            Self::LmStudio => "lmstudio",
            Self::Mistral => "mistral",
            Self::Google => "google",
            Self::Anthropic => "anthropic",
            Self::OpenAiCompatible => "openaicompatible",
        }
    }

    /// Local servers ignore or reject bearer tokens
    pub fn sends_bearer_token(&self) -> bool {
        !matches!(self, Self::Ollama | Self::LmStudio)
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiType {
    type Err = crate::error::AgentSmithError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            "lmstudio" => Ok(Self::LmStudio),
            "mistral" => Ok(Self::Mistral),
            "google" => Ok(Self::Google),
            "anthropic" => Ok(Self::Anthropic),
            "openaicompatible" | "openai-compatible" => Ok(Self::OpenAiCompatible),
            other => Err(crate::error::AgentSmithError::Config(format!(
                "Unknown provider type: {}",
                other
            ))),
        }
    }
}

/// Persisted description of one upstream endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    /// Base URL, e.g. `http://localhost:11434/v1`
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_type: ApiType,
    /// Requests per minute, 0 = unlimited
    #[serde(default)]
    pub rate_limit: u32,
}

impl ProviderConfig {
    /// New configuration with a generated identifier
    pub fn new(name: impl Into<String>, url: impl Into<String>, api_type: ApiType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            url: url.into(),
            api_key: String::new(),
            api_type,
            rate_limit: 0,
        }
    }
}

/// Provider view published to event subscribers (no credentials)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    pub url: String,
    pub api_type: ApiType,
    pub rate_limit: u32,
    pub models: Vec<Model>,
}

impl ProviderInfo {
    pub fn new(config: &ProviderConfig, models: Vec<Model>) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            url: config.url.clone(),
            api_type: config.api_type,
            rate_limit: config.rate_limit,
            models,
        }
    }
}

/// Everything needed for one completion call
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Target model identifier
    pub model: String,
    /// Sent as the leading system message
    pub system_prompt: String,
    /// Prior conversation, oldest first
    pub messages: Vec<Message>,
    /// Tools to advertise; empty omits tool advertisement
    pub tools: Vec<Tool>,
}

/// Provider trait for upstream chat-completion endpoints
///
/// Selected at construction time by [`ApiType`]; the agent only ever talks
/// to this interface, which lets tests substitute a scripted provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Persisted configuration of this provider
    fn config(&self) -> &ProviderConfig;

    /// Provider identifier
    fn id(&self) -> &str {
        &self.config().id
    }

    /// Display name
    fn name(&self) -> &str {
        &self.config().name
    }

    /// Models found by the last successful [`Provider::load_models`]
    fn models(&self) -> Vec<Model>;

    /// Refresh the model list from the endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is unreachable or answers with garbage;
    /// the previous model list is kept in that case
    async fn load_models(&self) -> Result<Vec<Model>>;

    /// Run a completion without streaming and return the reply text
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is invalid
    async fn chat_completion(&self, request: CompletionRequest) -> Result<String>;

    /// Stream a completion
    ///
    /// Text fragments are sent on `text_tx` in the order the provider
    /// emitted them. Tool-call fragments are accumulated and returned once
    /// the stream ends.
    ///
    /// # Arguments
    ///
    /// * `request` - History, system prompt, model and tool catalog
    /// * `text_tx` - Receives text deltas; back-pressures the stream
    /// * `cancel` - Aborts the stream
    ///
    /// # Returns
    ///
    /// Returns the finalized tool calls, possibly empty
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when `cancel` fires, an HTTP or provider error on
    /// transport failure. No tool calls are delivered on error.
    async fn chat_completion_stream(
        &self,
        request: CompletionRequest,
        text_tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<Vec<ToolCallRequest>>;

    /// Snapshot for event subscribers
    fn info(&self) -> ProviderInfo {
        ProviderInfo::new(self.config(), self.models())
    }
}

const THINK_TAGS: [&str; 2] = ["think", "thinking"];

/// Strip a leading reasoning block and surrounding whitespace
///
/// Only a block at the very start of the text is removed. An unterminated
/// block is left in place.
///
/// # Examples
///
/// ```
/// use agentsmith::providers::cut_thinking;
///
/// assert_eq!(cut_thinking("<think>hmm</think>\n4."), "4.");
/// assert_eq!(cut_thinking("  plain  "), "plain");
/// ```
pub fn cut_thinking(text: &str) -> &str {
    for tag in THINK_TAGS {
        if text.starts_with(&format!("<{}>", tag)) {
            let closing = format!("</{}>", tag);
            if let Some(pos) = text.find(&closing) {
                return text[pos + closing.len()..].trim();
            }
            break;
        }
    }
    text.trim()
}

/// Drop tool exchanges that would be rejected by chat-completion APIs
///
/// Tool messages whose request was never announced by an assistant
/// message are removed, and assistant tool requests that were never
/// answered are stripped from their message.
pub fn validate_message_sequence(messages: &[Message]) -> Vec<Message> {
    let announced: HashSet<&str> = messages
        .iter()
        .filter(|m| m.origin == MessageOrigin::Assistant)
        .flat_map(|m| m.tool_requests.iter().map(|r| r.id.as_str()))
        .collect();

    let answered: HashSet<&str> = messages
        .iter()
        .filter(|m| m.origin == MessageOrigin::Tool)
        .filter_map(|m| m.tool_requests.first().map(|r| r.id.as_str()))
        .collect();

    messages
        .iter()
        .filter_map(|message| match message.origin {
            MessageOrigin::Tool => match message.tool_requests.first() {
                Some(request) if announced.contains(request.id.as_str()) => Some(message.clone()),
                Some(request) => {
                    tracing::warn!("Dropping orphan tool message with tool_call_id: {}", request.id);
                    None
                }
                None => {
                    tracing::warn!("Dropping tool message without tool_call_id");
                    None
                }
            },
            MessageOrigin::Assistant if !message.tool_requests.is_empty() => {
                let mut message = message.clone();
                message
                    .tool_requests
                    .retain(|r| answered.contains(r.id.as_str()));
                Some(message)
            }
            _ => Some(message.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, "lua_code_runner", Map::new())
    }

    #[test]
    fn test_message_user() {
        let msg = Message::user("Hello");
        assert_eq!(msg.origin, MessageOrigin::User);
        assert_eq!(msg.text, "Hello");
        assert!(msg.tool_requests.is_empty());
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn test_message_ids_are_unique() {
        assert_ne!(Message::user("a").id, Message::user("a").id);
    }

    #[test]
    fn test_message_json_shape() {
        let msg = Message::tool_result(call("c1"), "4");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["origin"], "tool");
        assert_eq!(value["toolRequests"][0]["id"], "c1");
        assert_eq!(value["text"], "4");
    }

    #[test]
    fn test_api_type_parse_and_display() {
        assert_eq!("Ollama".parse::<ApiType>().unwrap(), ApiType::Ollama);
        assert_eq!(ApiType::LmStudio.to_string(), "lmstudio");
        assert!("carrier-pigeon".parse::<ApiType>().is_err());
        assert!(!ApiType::Ollama.sends_bearer_token());
        assert!(ApiType::OpenAi.sends_bearer_token());
    }

    #[test]
    fn test_provider_config_defaults_from_json() {
        let config: ProviderConfig =
            serde_json::from_str(r#"{"id":"p","name":"n","url":"http://x"}"#).unwrap();
        assert_eq!(config.api_type, ApiType::OpenAiCompatible);
        assert_eq!(config.rate_limit, 0);
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn test_cut_thinking_variants() {
        assert_eq!(cut_thinking("<think>plan</think>answer"), "answer");
        assert_eq!(cut_thinking("<thinking>plan</thinking>\n answer "), "answer");
        assert_eq!(cut_thinking("<think>never closed"), "<think>never closed");
        assert_eq!(cut_thinking("before <think>x</think>"), "before <think>x</think>");
    }

    #[test]
    fn test_validate_drops_orphan_tool_message() {
        let messages = vec![Message::user("hi"), Message::tool_result(call("ghost"), "x")];
        let validated = validate_message_sequence(&messages);
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].origin, MessageOrigin::User);
    }

    #[test]
    fn test_validate_keeps_answered_pair() {
        let messages = vec![
            Message::user("hi"),
            Message::assistant("").with_tool_requests(vec![call("c1")]),
            Message::tool_result(call("c1"), "4"),
        ];
        let validated = validate_message_sequence(&messages);
        assert_eq!(validated.len(), 3);
        assert_eq!(validated[1].tool_requests.len(), 1);
    }

    #[test]
    fn test_validate_strips_unanswered_request() {
        let messages = vec![
            Message::user("hi"),
            Message::assistant("calling").with_tool_requests(vec![call("c1")]),
        ];
        let validated = validate_message_sequence(&messages);
        assert_eq!(validated.len(), 2);
        assert!(validated[1].tool_requests.is_empty());
        assert_eq!(validated[1].text, "calling");
    }
}

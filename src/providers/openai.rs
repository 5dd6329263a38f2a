//! OpenAI-compatible chat-completion provider
//!
//! Talks to any endpoint implementing `GET /models` and
//! `POST /chat/completions` (OpenAI, Ollama, LM Studio, Mistral, and the
//! compatibility endpoints of other vendors).

use super::accumulator::{ToolCallAccumulator, ToolCallFragment};
use super::base::{
    cut_thinking, validate_message_sequence, CompletionRequest, Message, MessageOrigin, Model,
    Provider, ProviderConfig,
};
use crate::error::{AgentSmithError, Result};
use crate::rate_limiter::RateLimiter;
use crate::sse::decode_stream;
use crate::tools::{Tool, ToolCallRequest};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DONE_SENTINEL: &str = "[DONE]";
const EMPTY_CONTENT: &str = "<no response>";

/// Provider for OpenAI-compatible endpoints
pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
    models: RwLock<Vec<Model>>,
    rate_limiter: RateLimiter,
    models_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: WireParameters,
}

#[derive(Debug, Serialize)]
struct WireParameters {
    #[serde(rename = "type")]
    schema_type: &'static str,
    properties: BTreeMap<String, WireProperty>,
    required: Vec<String>,
}

#[derive(Debug, Serialize)]
struct WireProperty {
    #[serde(rename = "type")]
    property_type: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<StreamToolCall>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    args: Option<Value>,
}

/// Argument fragments are usually strings; some servers send the object
fn argument_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

impl StreamToolCall {
    fn into_fragment(self, position: usize) -> ToolCallFragment {
        let function = self.function;
        let (name, arguments, params, args) = match function {
            Some(f) => (
                f.name,
                argument_text(f.arguments),
                argument_text(f.params),
                argument_text(f.args),
            ),
            None => (None, None, None, None),
        };
        ToolCallFragment {
            index: self.index.unwrap_or(position),
            id: self.id,
            name,
            arguments,
            params,
            args,
        }
    }
}

impl OpenAiProvider {
    /// Create a new provider
    ///
    /// # Arguments
    ///
    /// * `config` - Endpoint, credentials and rate limit
    /// * `models_timeout` - Timeout of the model listing call
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: ProviderConfig, models_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("agentsmith/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                AgentSmithError::Provider(format!("Failed to create HTTP client: {}", e))
            })?;

        tracing::info!(
            "Initialized {} provider: name={}, url={}, rate_limit={}",
            config.api_type,
            config.name,
            config.url,
            config.rate_limit
        );

        Ok(Self {
            client,
            rate_limiter: RateLimiter::new(config.rate_limit),
            config,
            models: RwLock::new(Vec::new()),
            models_timeout,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if !self.config.api_key.is_empty() && self.config.api_type.sends_bearer_token() {
            request.bearer_auth(&self.config.api_key)
        } else {
            request
        }
    }

    fn build_request(&self, request: CompletionRequest, stream: bool) -> ChatRequest {
        ChatRequest {
            model: request.model,
            messages: convert_messages(&request.messages, &request.system_prompt),
            stream,
            tools: convert_tools(&request.tools),
        }
    }

    async fn post_chat(&self, body: &ChatRequest, streaming: bool) -> Result<reqwest::Response> {
        let mut request = self.authorize(self.client.post(self.endpoint("chat/completions")));
        if streaming {
            request = request
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .header(reqwest::header::CACHE_CONTROL, "no-cache");
        }

        tracing::debug!(
            "Sending chat request to {}: model={}, {} messages, {} tools, stream={}",
            self.config.name,
            body.model,
            body.messages.len(),
            body.tools.len(),
            streaming
        );

        let response = request.json(body).send().await.map_err(|e| {
            tracing::error!("Request to {} failed: {}", self.config.name, e);
            AgentSmithError::Provider(format!("Request to {} failed: {}", self.config.name, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("{} returned error {}: {}", self.config.name, status, error_text);
            return Err(AgentSmithError::Provider(format!(
                "{} returned error {}: {}",
                self.config.name, status, error_text
            ))
            .into());
        }
        Ok(response)
    }

    async fn consume_stream(
        &self,
        response: reqwest::Response,
        text_tx: &mpsc::Sender<String>,
    ) -> Result<Vec<ToolCallRequest>> {
        let mut events = Box::pin(decode_stream(response.bytes_stream()));
        let mut accumulator = ToolCallAccumulator::new();

        while let Some(event) = events.next().await {
            let event = event?;
            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == DONE_SENTINEL {
                break;
            }

            let chunk: StreamChunk = match serde_json::from_str(data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!("Skipping malformed stream chunk: {} ({})", e, data);
                    continue;
                }
            };

            if let Some(error) = chunk.error {
                return Err(AgentSmithError::Provider(format!(
                    "{} reported a stream error: {}",
                    self.config.name, error
                ))
                .into());
            }

            let Some(delta) = chunk.choices.into_iter().next().and_then(|c| c.delta) else {
                continue;
            };

            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                if text_tx.send(content).await.is_err() {
                    return Err(AgentSmithError::Cancelled.into());
                }
            }

            for (position, call) in delta.tool_calls.into_iter().enumerate() {
                accumulator.push(call.into_fragment(position));
            }
        }

        let calls = accumulator.finish();
        tracing::debug!("Finished processing stream, {} tool calls", calls.len());
        Ok(calls)
    }
}

fn convert_messages(messages: &[Message], system_prompt: &str) -> Vec<WireMessage> {
    let validated = validate_message_sequence(messages);
    let mut wire = Vec::with_capacity(validated.len() + 1);
    wire.push(WireMessage {
        role: MessageOrigin::System.as_str(),
        content: system_prompt.to_string(),
        tool_calls: None,
        name: None,
        tool_call_id: None,
    });

    for message in validated {
        let text = cut_thinking(&message.text);
        let mut entry = WireMessage {
            role: message.origin.as_str(),
            content: if text.is_empty() {
                EMPTY_CONTENT.to_string()
            } else {
                text.to_string()
            },
            tool_calls: None,
            name: None,
            tool_call_id: None,
        };

        match (message.origin, message.tool_requests.first()) {
            (MessageOrigin::Assistant, Some(request)) => {
                entry.tool_calls = Some(vec![WireToolCall {
                    id: request.id.clone(),
                    call_type: "function",
                    function: WireFunctionCall {
                        name: request.name.clone(),
                        arguments: Value::Object(request.params.clone()).to_string(),
                    },
                }]);
            }
            (MessageOrigin::Tool, Some(request)) => {
                entry.name = Some(request.name.clone());
                entry.tool_call_id = Some(request.id.clone());
            }
            _ => {}
        }
        wire.push(entry);
    }
    wire
}

fn convert_tools(tools: &[Tool]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|tool| WireTool {
            tool_type: "function",
            function: WireFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: WireParameters {
                    schema_type: "object",
                    properties: tool
                        .params
                        .iter()
                        .map(|param| {
                            (
                                param.name.clone(),
                                WireProperty {
                                    property_type: param.param_type.clone(),
                                    description: param.description.clone(),
                                },
                            )
                        })
                        .collect(),
                    required: tool.required_params.clone(),
                },
            },
        })
        .collect()
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn models(&self) -> Vec<Model> {
        self.models
            .read()
            .map(|models| models.clone())
            .unwrap_or_default()
    }

    async fn load_models(&self) -> Result<Vec<Model>> {
        let url = self.endpoint("models");
        tracing::debug!("Fetching models from {}", url);

        let response = self
            .authorize(self.client.get(&url))
            .timeout(self.models_timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Failed to fetch models from {}: {}", self.config.name, e);
                AgentSmithError::Provider(format!(
                    "Failed to connect to {}: {}",
                    self.config.name, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentSmithError::Provider(format!(
                "{} returned error {}: {}",
                self.config.name, status, error_text
            ))
            .into());
        }

        let listing: ModelListResponse = response.json().await.map_err(|e| {
            AgentSmithError::Provider(format!("Failed to parse model list: {}", e))
        })?;

        let models: Vec<Model> = listing
            .data
            .into_iter()
            .map(|entry| Model::new(entry.id, &self.config.id))
            .collect();

        if let Ok(mut cached) = self.models.write() {
            *cached = models.clone();
        }
        tracing::debug!("Fetched {} models from {}", models.len(), self.config.name);
        Ok(models)
    }

    async fn chat_completion(&self, request: CompletionRequest) -> Result<String> {
        let mut body = self.build_request(request, false);
        body.tools.clear();

        self.rate_limiter.acquire().await;
        let response = self.post_chat(&body, false).await?;
        let reply: ChatResponse = response.json().await.map_err(|e| {
            AgentSmithError::Provider(format!("Failed to parse chat response: {}", e))
        })?;

        reply
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| {
                AgentSmithError::Provider(format!("{} returned no choices", self.config.name))
                    .into()
            })
    }

    async fn chat_completion_stream(
        &self,
        request: CompletionRequest,
        text_tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<Vec<ToolCallRequest>> {
        let body = self.build_request(request, true);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentSmithError::Cancelled.into()),
            _ = self.rate_limiter.acquire() => {}
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Stream from {} cancelled", self.config.name);
                Err(AgentSmithError::Cancelled.into())
            }
            result = async {
                let response = self.post_chat(&body, true).await?;
                self.consume_stream(response, &text_tx).await
            } => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ApiType;
    use crate::tools::{builtin_tools, ToolParam};
    use serde_json::json;

    fn provider(api_type: ApiType, api_key: &str) -> OpenAiProvider {
        let mut config = ProviderConfig::new("test", "http://localhost:1234/v1/", api_type);
        config.api_key = api_key.to_string();
        OpenAiProvider::new(config, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let p = provider(ApiType::OpenAi, "");
        assert_eq!(p.endpoint("models"), "http://localhost:1234/v1/models");
    }

    #[test]
    fn test_convert_messages_prepends_system_and_fills_empty() {
        let wire = convert_messages(
            &[Message::user("<think>x</think>hi"), Message::assistant("  ")],
            "be brief",
        );
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[0].content, "be brief");
        assert_eq!(wire[1].content, "hi");
        assert_eq!(wire[2].content, EMPTY_CONTENT);
    }

    #[test]
    fn test_convert_messages_tool_exchange() {
        let mut params = serde_json::Map::new();
        params.insert("code".to_string(), json!("return 1"));
        let request = ToolCallRequest::new("c1", "lua_code_runner", params);
        let wire = convert_messages(
            &[
                Message::user("q"),
                Message::assistant("").with_tool_requests(vec![request.clone()]),
                Message::tool_result(request, "Last returned value: 1"),
            ],
            "",
        );

        let calls = wire[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].function.arguments, "{\"code\":\"return 1\"}");
        assert_eq!(wire[3].role, "tool");
        assert_eq!(wire[3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(wire[3].name.as_deref(), Some("lua_code_runner"));
    }

    #[test]
    fn test_convert_tools_schema() {
        let tool = Tool::new("get_time", "time")
            .with_param(ToolParam::new("location", "string", "City"), true);
        let value = serde_json::to_value(convert_tools(&[tool])).unwrap();
        assert_eq!(
            value,
            json!([{
                "type": "function",
                "function": {
                    "name": "get_time",
                    "description": "time",
                    "parameters": {
                        "type": "object",
                        "properties": {"location": {"type": "string", "description": "City"}},
                        "required": ["location"]
                    }
                }
            }])
        );
    }

    #[test]
    fn test_request_omits_tools_when_catalog_empty() {
        let p = provider(ApiType::OpenAi, "");
        let body = p.build_request(
            CompletionRequest {
                model: "m".to_string(),
                ..Default::default()
            },
            true,
        );
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("tools").is_none());
        assert_eq!(value["stream"], true);

        let body = p.build_request(
            CompletionRequest {
                model: "m".to_string(),
                tools: builtin_tools(),
                ..Default::default()
            },
            false,
        );
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["tools"].as_array().unwrap().len(), 2);
        assert!(value.get("stream").is_none());
    }

    #[test]
    fn test_stream_tool_call_object_arguments() {
        let call: StreamToolCall = serde_json::from_value(json!({
            "index": 0,
            "function": {"name": "t", "arguments": {"a": 1}}
        }))
        .unwrap();
        let fragment = call.into_fragment(0);
        assert_eq!(fragment.arguments.as_deref(), Some("{\"a\":1}"));
    }
}

//! Registered MCP servers
//!
//! An [`McpServer`] pairs a persisted [`McpServerConfig`] with its discovered
//! tools. Every operation opens its own [`Connection`], runs the handshake,
//! does its work and closes the connection; nothing is pooled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::config::McpConfig;
use crate::error::{AgentSmithError, Result};
use crate::mcp::connection::Connection;
use crate::mcp::transport::{SseTransport, StdioTransport, Transport};
use crate::mcp::types::{CallToolResponse, Implementation, McpTool};
use crate::tools::{Tool, ToolCallRequest, ToolExecutor, ToolParam};

/// How the client reaches a server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportKind {
    #[default]
    Stdio,
    Sse,
}

impl McpTransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            McpTransportKind::Stdio => "stdio",
            McpTransportKind::Sse => "sse",
        }
    }
}

impl std::fmt::Display for McpTransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for McpTransportKind {
    type Err = AgentSmithError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(McpTransportKind::Stdio),
            "sse" => Ok(McpTransportKind::Sse),
            other => Err(AgentSmithError::Config(format!(
                "unknown MCP transport '{}', expected 'stdio' or 'sse'",
                other
            ))),
        }
    }
}

/// Persisted description of an MCP server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub transport: McpTransportKind,
    /// Event stream URL for `sse`
    #[serde(default)]
    pub url: String,
    /// Command line for `stdio`
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl McpServerConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            transport: McpTransportKind::Stdio,
            url: String::new(),
            command: command.into(),
            args,
            active: true,
        }
    }

    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            transport: McpTransportKind::Sse,
            url: url.into(),
            command: String::new(),
            args: Vec::new(),
            active: true,
        }
    }

    /// Check that the connection target matches the transport
    ///
    /// # Errors
    ///
    /// Returns `Config` if the name is empty, a stdio server has no command
    /// or an SSE server has no URL
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AgentSmithError::Config("MCP server name cannot be empty".into()).into());
        }
        match self.transport {
            McpTransportKind::Stdio if self.command.trim().is_empty() => Err(
                AgentSmithError::Config(format!("MCP server '{}' has no command", self.name))
                    .into(),
            ),
            McpTransportKind::Sse if self.url.trim().is_empty() => Err(AgentSmithError::Config(
                format!("MCP server '{}' has no URL", self.name),
            )
            .into()),
            _ => Ok(()),
        }
    }
}

/// Snapshot of a server sent with `mcp_list_update`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerInfo {
    #[serde(flatten)]
    pub config: McpServerConfig,
    pub loaded: bool,
    pub tools: Vec<Tool>,
}

#[derive(Debug)]
pub struct McpServer {
    config: RwLock<McpServerConfig>,
    settings: McpConfig,
    tools: RwLock<Vec<Tool>>,
    loaded: AtomicBool,
}

impl McpServer {
    pub fn new(config: McpServerConfig, settings: McpConfig) -> Self {
        Self {
            config: RwLock::new(config),
            settings,
            tools: RwLock::new(Vec::new()),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> McpServerConfig {
        self.config
            .read()
            .map(|config| config.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn id(&self) -> String {
        self.config().id
    }

    pub fn name(&self) -> String {
        self.config().name
    }

    pub fn is_active(&self) -> bool {
        self.config().active
    }

    pub fn set_active(&self, active: bool) {
        match self.config.write() {
            Ok(mut config) => config.active = active,
            Err(poisoned) => poisoned.into_inner().active = active,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Discovered tools; empty until discovery has completed
    pub fn tools(&self) -> Vec<Tool> {
        if !self.is_loaded() {
            return Vec::new();
        }
        self.tools
            .read()
            .map(|tools| tools.clone())
            .unwrap_or_default()
    }

    /// Replace the tool list wholesale and mark the server loaded
    pub fn set_tools(&self, tools: Vec<Tool>) {
        match self.tools.write() {
            Ok(mut current) => *current = tools,
            Err(poisoned) => *poisoned.into_inner() = tools,
        }
        self.loaded.store(true, Ordering::SeqCst);
    }

    pub fn info(&self) -> McpServerInfo {
        McpServerInfo {
            config: self.config(),
            loaded: self.is_loaded(),
            tools: self.tools(),
        }
    }

    /// Open a fresh connection and complete the handshake
    ///
    /// # Errors
    ///
    /// - `McpTimeout` if the server does not finish the handshake in time
    /// - `McpConnection` for every other connect or handshake failure
    pub async fn connect(&self) -> Result<Connection> {
        let config = self.config();
        // One budget covers the stream, the endpoint event and `initialize`
        let deadline = Instant::now() + self.settings.handshake_timeout();

        let transport: Arc<dyn Transport> = match config.transport {
            McpTransportKind::Stdio => Arc::new(
                StdioTransport::spawn(&config.command, &config.args).map_err(|e| {
                    AgentSmithError::McpConnection(format!("{}: {}", config.name, e))
                })?,
            ),
            McpTransportKind::Sse => {
                Arc::new(SseTransport::connect_until(&config.url, deadline).await?)
            }
        };

        let client_info = Implementation::new(
            self.settings.client_name.clone(),
            self.settings.client_version.clone(),
        );

        let remaining = deadline.saturating_duration_since(Instant::now());
        Connection::open(transport, &config.name, client_info, remaining)
            .await
            .map_err(|e| match e.downcast_ref::<AgentSmithError>() {
                Some(AgentSmithError::McpTimeout { .. })
                | Some(AgentSmithError::McpConnection(_)) => e,
                _ => AgentSmithError::McpConnection(format!(
                    "handshake with '{}' failed: {}",
                    config.name, e
                ))
                .into(),
            })
    }

    /// Fetch and translate the server's tool catalog
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let connection = self.connect().await?;
        let listed = connection
            .list_tools(self.settings.list_tools_timeout())
            .await;
        connection.close();

        let server_id = self.id();
        Ok(listed?
            .iter()
            .map(|tool| translate_tool(tool, &server_id))
            .collect())
    }

    /// Run discovery and store the result
    ///
    /// # Returns
    ///
    /// Returns the number of tools discovered
    pub async fn load_tools(&self) -> Result<usize> {
        let tools = self.list_tools().await?;
        let count = tools.len();
        self.set_tools(tools);
        tracing::info!("MCP server '{}' offers {} tools", self.name(), count);
        Ok(count)
    }

    /// Invoke one tool and flatten its content into text
    ///
    /// # Errors
    ///
    /// Returns `Tool` when the server flags the result as an error, besides
    /// connection, timeout and protocol failures
    pub async fn call_tool(&self, request: &ToolCallRequest) -> Result<String> {
        let connection = self.connect().await?;
        let response = connection
            .call_tool(
                &request.name,
                Some(Value::Object(request.params.clone())),
                self.settings.call_tool_timeout(),
            )
            .await;
        connection.close();

        let response = response?;
        let text = flatten_content(&response);
        if response.is_error == Some(true) {
            return Err(AgentSmithError::Tool(format!("{}: {}", request.name, text)).into());
        }
        Ok(text)
    }

    /// Connectivity check: succeeds when the server lists at least one tool
    pub async fn test(&self) -> bool {
        match self.list_tools().await {
            Ok(tools) => !tools.is_empty(),
            Err(e) => {
                tracing::warn!("MCP server '{}' failed its test: {}", self.name(), e);
                false
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for McpServer {
    async fn execute(&self, request: &ToolCallRequest) -> Result<String> {
        self.call_tool(request).await
    }
}

/// Convert an advertised MCP tool into a catalog entry
pub fn translate_tool(tool: &McpTool, server_id: &str) -> Tool {
    let mut translated = Tool::new(
        tool.name.clone(),
        tool.description.clone().unwrap_or_default(),
    )
    .with_server(server_id);

    if let Some(properties) = tool
        .input_schema
        .get("properties")
        .and_then(Value::as_object)
    {
        for (name, schema) in properties {
            let Some(schema) = schema.as_object() else {
                tracing::warn!("Tool '{}' property '{}' has no schema object", tool.name, name);
                continue;
            };
            let param_type = schema
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("string");
            let description = schema
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("");
            translated
                .params
                .push(ToolParam::new(name.clone(), param_type, description));
        }
    }

    if let Some(required) = tool.input_schema.get("required").and_then(Value::as_array) {
        translated.required_params = required
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }

    translated
}

/// Join content blocks; non-text blocks are kept as JSON
fn flatten_content(response: &CallToolResponse) -> String {
    response
        .content
        .iter()
        .map(|block| match (block.get("type"), block.get("text")) {
            (Some(Value::String(kind)), Some(Value::String(text))) if kind == "text" => {
                text.clone()
            }
            _ => block.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

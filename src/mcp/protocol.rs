//! Typed MCP lifecycle over [`JsonRpcClient`]
//!
//! [`McpProtocol`] is a client that has not shaken hands yet. Its
//! [`McpProtocol::initialize`] performs `initialize` followed by
//! `notifications/initialized` and yields an [`InitializedMcpProtocol`],
//! which exposes the tool methods. `tools/list` pagination is followed
//! internally.

use std::time::Duration;

use crate::error::{AgentSmithError, Result};
use crate::mcp::client::JsonRpcClient;
use crate::mcp::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, Implementation, InitializeParams,
    InitializeResponse, ListToolsParams, ListToolsResponse, McpTool, LATEST_PROTOCOL_VERSION,
    METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    SUPPORTED_PROTOCOL_VERSIONS,
};

#[derive(Debug)]
pub struct McpProtocol {
    client: JsonRpcClient,
}

impl McpProtocol {
    pub fn new(client: JsonRpcClient) -> Self {
        Self { client }
    }

    /// Negotiate the session
    ///
    /// # Arguments
    ///
    /// * `client_info` - Name and version sent as `clientInfo`
    /// * `timeout` - Deadline for the `initialize` response
    ///
    /// # Errors
    ///
    /// - `McpTimeout` if the server does not answer in time
    /// - `McpProtocolVersion` if it picks a revision this client does not speak
    pub async fn initialize(
        self,
        client_info: Implementation,
        timeout: Duration,
    ) -> Result<InitializedMcpProtocol> {
        let response: InitializeResponse = self
            .client
            .request(
                METHOD_INITIALIZE,
                InitializeParams {
                    protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                    capabilities: ClientCapabilities::default(),
                    client_info,
                },
                Some(timeout),
            )
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(AgentSmithError::McpProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|v| v.to_string())
                    .collect(),
                got: response.protocol_version,
            }
            .into());
        }

        if let Err(e) = self.client.notify(METHOD_INITIALIZED, serde_json::json!({})) {
            tracing::warn!("Failed to send initialized notification: {}", e);
        }

        tracing::debug!(
            "MCP server '{}' {} speaks {}",
            response.server_info.name,
            response.server_info.version,
            response.protocol_version
        );

        Ok(InitializedMcpProtocol {
            client: self.client,
            initialize_response: response,
        })
    }
}

#[derive(Debug)]
pub struct InitializedMcpProtocol {
    client: JsonRpcClient,
    initialize_response: InitializeResponse,
}

impl InitializedMcpProtocol {
    pub fn server_info(&self) -> &Implementation {
        &self.initialize_response.server_info
    }

    pub fn protocol_version(&self) -> &str {
        &self.initialize_response.protocol_version
    }

    /// All tools offered by the server, across every page
    ///
    /// `timeout` bounds the whole listing, not each page.
    pub async fn list_tools(&self, timeout: Duration) -> Result<Vec<McpTool>> {
        let listing = async {
            let mut tools = Vec::new();
            let mut cursor: Option<String> = None;

            loop {
                let page: ListToolsResponse = self
                    .client
                    .request(METHOD_TOOLS_LIST, ListToolsParams { cursor }, Some(timeout))
                    .await?;
                tools.extend(page.tools);

                match page.next_cursor {
                    Some(next) if !next.is_empty() => cursor = Some(next),
                    _ => break,
                }
            }
            Ok::<_, anyhow::Error>(tools)
        };

        tokio::time::timeout(timeout, listing)
            .await
            .map_err(|_| AgentSmithError::McpTimeout {
                server: self.client.peer().to_string(),
                method: METHOD_TOOLS_LIST.to_string(),
            })?
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<CallToolResponse> {
        self.client
            .request(
                METHOD_TOOLS_CALL,
                CallToolParams {
                    name: name.to_string(),
                    arguments,
                },
                Some(timeout),
            )
            .await
    }
}

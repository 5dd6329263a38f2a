//! Tools module for AgentSmith
//!
//! This module contains the tool catalog types shared by providers, MCP
//! servers and the agent loop, the executor abstraction every tool backend
//! implements, and the always-available built-in tools.

pub mod script;

use crate::error::{AgentSmithError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use script::ScriptToolExecutor;

/// Name of the built-in sandboxed script tool
pub const SCRIPT_TOOL_NAME: &str = "lua_code_runner";

/// Name of the built-in sub-agent tool
pub const DYNAMIC_AGENT_TOOL_NAME: &str = "builtin_dynamic_ai_agent";

/// One declared tool parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
}

impl ToolParam {
    pub fn new(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
        }
    }
}

/// Tool definition
///
/// Tools come either from an MCP server (`server_id` set) or are built in.
/// Names must be unique across the catalog offered to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub params: Vec<ToolParam>,
    #[serde(default)]
    pub required_params: Vec<String>,
    /// Owning MCP server, `None` for built-ins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

impl Tool {
    /// Create a new tool definition
    ///
    /// # Arguments
    ///
    /// * `name` - Tool name
    /// * `description` - Tool description
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            required_params: Vec::new(),
            server_id: None,
        }
    }

    /// Add a parameter, optionally marking it required
    pub fn with_param(mut self, param: ToolParam, required: bool) -> Self {
        if required {
            self.required_params.push(param.name.clone());
        }
        self.params.push(param);
        self
    }

    /// Attach the owning MCP server
    pub fn with_server(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    /// Check that a call carries every required parameter
    ///
    /// # Errors
    ///
    /// Returns `MissingToolParams` listing every absent name
    pub fn validate_call(&self, request: &ToolCallRequest) -> Result<()> {
        let missing: Vec<String> = self
            .required_params
            .iter()
            .filter(|name| !request.params.contains_key(name.as_str()))
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AgentSmithError::MissingToolParams {
                tool: self.name.clone(),
                missing,
            }
            .into())
        }
    }
}

/// A request from the model to run one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            params,
        }
    }

    /// Assign a generated identifier when the provider supplied none
    pub fn ensure_id(mut self) -> Self {
        if self.id.is_empty() {
            self.id = format!("call_{}", uuid::Uuid::new_v4().simple());
        }
        self
    }

    /// Read a string parameter
    pub fn str_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }
}

/// Anything that can run a tool call and produce a textual result
///
/// Implemented by MCP servers, the script runner and the sub-agent tool.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Executes one call
    ///
    /// # Arguments
    ///
    /// * `request` - The validated tool call
    ///
    /// # Returns
    ///
    /// Returns the text handed back to the model
    ///
    /// # Errors
    ///
    /// Returns error if the tool fails; the caller records the failure as a
    /// tool message and ends the turn
    async fn execute(&self, request: &ToolCallRequest) -> Result<String>;
}

/// Tools that are always offered, regardless of MCP servers
pub fn builtin_tools() -> Vec<Tool> {
    vec![
        Tool::new(
            SCRIPT_TOOL_NAME,
            "Run a Lua 5.4 script in an isolated sandbox and return everything it printed \
             plus the value of its final return statement as JSON. Use it for arithmetic, \
             string manipulation and data transformation. The sandbox has no file system, \
             network or OS access.",
        )
        .with_param(
            ToolParam::new(
                "code",
                "string",
                "Lua source code. End it with a `return` statement to get a value back.",
            ),
            true,
        ),
        Tool::new(
            DYNAMIC_AGENT_TOOL_NAME,
            "Use this tool to dynamically create an AI agent with a custom system prompt. \
             The agent answers the query with the same model you are running on and has no \
             context besides the system prompt and the query. Use it to plan, validate or \
             classify something independently of the current conversation.",
        )
        .with_param(
            ToolParam::new(
                "sysPrompt",
                "string",
                "System prompt given to the agent. Include any context it needs; it sees nothing else.",
            ),
            true,
        )
        .with_param(
            ToolParam::new("query", "string", "Query text sent to the agent."),
            true,
        )
        .with_param(
            ToolParam::new(
                "tools",
                "array",
                "Names of tools the agent may need. Currently informational.",
            ),
            false,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_builtin_catalog() {
        let tools = builtin_tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec![SCRIPT_TOOL_NAME, DYNAMIC_AGENT_TOOL_NAME]);
        assert!(tools.iter().all(|t| t.server_id.is_none()));
        assert_eq!(tools[0].required_params, vec!["code"]);
        assert_eq!(tools[1].required_params, vec!["sysPrompt", "query"]);
        assert_eq!(tools[1].params.len(), 3);
    }

    #[test]
    fn test_validate_call_accepts_complete_params() {
        let tool = builtin_tools().remove(0);
        let call = ToolCallRequest::new("1", SCRIPT_TOOL_NAME, params(json!({"code": "return 1"})));
        assert!(tool.validate_call(&call).is_ok());
    }

    #[test]
    fn test_validate_call_reports_missing_params() {
        let tool = builtin_tools().remove(1);
        let call = ToolCallRequest::new("1", DYNAMIC_AGENT_TOOL_NAME, params(json!({"query": "q"})));
        let err = tool.validate_call(&call).unwrap_err();
        match err.downcast_ref::<AgentSmithError>() {
            Some(AgentSmithError::MissingToolParams { tool, missing }) => {
                assert_eq!(tool, DYNAMIC_AGENT_TOOL_NAME);
                assert_eq!(missing, &vec!["sysPrompt".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_ensure_id_only_fills_empty() {
        let call = ToolCallRequest::new("", "x", Map::new()).ensure_id();
        assert!(call.id.starts_with("call_"));

        let call = ToolCallRequest::new("abc", "x", Map::new()).ensure_id();
        assert_eq!(call.id, "abc");
    }

    #[test]
    fn test_tool_serialization_shape() {
        let tool = Tool::new("get_time", "Current time")
            .with_param(ToolParam::new("location", "string", "City"), true)
            .with_server("srv-1");
        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["requiredParams"], json!(["location"]));
        assert_eq!(value["params"][0]["type"], "string");
        assert_eq!(value["serverId"], "srv-1");
    }
}

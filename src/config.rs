//! Configuration management for AgentSmith
//!
//! This module handles loading configuration from a YAML file,
//! environment variables, and CLI arguments, in that order of precedence.

use crate::error::{AgentSmithError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Persistence settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// MCP client settings
    #[serde(default)]
    pub mcp: McpConfig,

    /// Upstream provider settings
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Event bus settings
    #[serde(default)]
    pub events: EventsConfig,

    /// Script tool settings
    #[serde(default)]
    pub script: ScriptConfig,
}

/// Persistence settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file; the platform data directory is used when unset
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

/// Agent loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of tool calls dispatched within a single turn
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,

    /// Longest silence tolerated while waiting on a completion stream
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_seconds: u64,

    /// Upper bound on a single tool invocation, whatever the executor
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_seconds: u64,
}

fn default_max_tool_iterations() -> usize {
    16
}

fn default_stream_idle_timeout() -> u64 {
    600
}

fn default_tool_timeout() -> u64 {
    120
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            stream_idle_timeout_seconds: default_stream_idle_timeout(),
            tool_timeout_seconds: default_tool_timeout(),
        }
    }
}

impl AgentConfig {
    /// Idle window as a `Duration`
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_seconds)
    }

    /// Tool invocation bound as a `Duration`
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_seconds)
    }
}

/// MCP client configuration
///
/// Every operation against an MCP server opens its own connection; these
/// budgets bound each phase of that connection's life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,

    #[serde(default = "default_list_tools_timeout")]
    pub list_tools_timeout_seconds: u64,

    #[serde(default = "default_call_tool_timeout")]
    pub call_tool_timeout_seconds: u64,

    /// Client name sent in the `initialize` request
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Client version sent in the `initialize` request
    #[serde(default = "default_client_version")]
    pub client_version: String,
}

fn default_handshake_timeout() -> u64 {
    60
}

fn default_list_tools_timeout() -> u64 {
    30
}

fn default_call_tool_timeout() -> u64 {
    60
}

fn default_client_name() -> String {
    "agentsmith".to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_seconds: default_handshake_timeout(),
            list_tools_timeout_seconds: default_list_tools_timeout(),
            call_tool_timeout_seconds: default_call_tool_timeout(),
            client_name: default_client_name(),
            client_version: default_client_version(),
        }
    }
}

impl McpConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }

    pub fn list_tools_timeout(&self) -> Duration {
        Duration::from_secs(self.list_tools_timeout_seconds)
    }

    pub fn call_tool_timeout(&self) -> Duration {
        Duration::from_secs(self.call_tool_timeout_seconds)
    }
}

/// Upstream provider configuration shared by every registered provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Timeout for the model listing call
    #[serde(default = "default_models_timeout")]
    pub models_timeout_seconds: u64,
}

fn default_models_timeout() -> u64 {
    10
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            models_timeout_seconds: default_models_timeout(),
        }
    }
}

impl ProvidersConfig {
    pub fn models_timeout(&self) -> Duration {
        Duration::from_secs(self.models_timeout_seconds)
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Idle interval after which subscribers receive a heartbeat
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u64,

    /// Number of events buffered per subscriber before it starts lagging
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_heartbeat_seconds() -> u64 {
    10
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            heartbeat_seconds: default_heartbeat_seconds(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Script tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Wall-clock budget of one script run
    #[serde(default = "default_script_timeout")]
    pub timeout_seconds: u64,
}

fn default_script_timeout() -> u64 {
    30
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_script_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AgentSmithError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    /// Parse a configuration document
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the YAML does not match the schema
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| AgentSmithError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(db_file) = std::env::var("AGENTSMITH_DB_FILE") {
            self.storage.db_path = Some(PathBuf::from(db_file));
        }

        if let Ok(max_iterations) = std::env::var("AGENTSMITH_MAX_TOOL_ITERATIONS") {
            if let Ok(value) = max_iterations.parse() {
                self.agent.max_tool_iterations = value;
            } else {
                tracing::warn!("Invalid AGENTSMITH_MAX_TOOL_ITERATIONS: {}", max_iterations);
            }
        }

        if let Ok(idle) = std::env::var("AGENTSMITH_STREAM_IDLE_TIMEOUT") {
            if let Ok(value) = idle.parse() {
                self.agent.stream_idle_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid AGENTSMITH_STREAM_IDLE_TIMEOUT: {}", idle);
            }
        }

        if let Ok(heartbeat) = std::env::var("AGENTSMITH_HEARTBEAT_SECONDS") {
            if let Ok(value) = heartbeat.parse() {
                self.events.heartbeat_seconds = value;
            } else {
                tracing::warn!("Invalid AGENTSMITH_HEARTBEAT_SECONDS: {}", heartbeat);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(db) = &cli.db {
            self.storage.db_path = Some(PathBuf::from(db));
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_tool_iterations == 0 {
            return Err(AgentSmithError::Config(
                "agent.max_tool_iterations must be greater than 0".to_string(),
            )
            .into());
        }

        let timeouts = [
            (
                "agent.stream_idle_timeout_seconds",
                self.agent.stream_idle_timeout_seconds,
            ),
            ("agent.tool_timeout_seconds", self.agent.tool_timeout_seconds),
            (
                "mcp.handshake_timeout_seconds",
                self.mcp.handshake_timeout_seconds,
            ),
            (
                "mcp.list_tools_timeout_seconds",
                self.mcp.list_tools_timeout_seconds,
            ),
            (
                "mcp.call_tool_timeout_seconds",
                self.mcp.call_tool_timeout_seconds,
            ),
            (
                "providers.models_timeout_seconds",
                self.providers.models_timeout_seconds,
            ),
            ("events.heartbeat_seconds", self.events.heartbeat_seconds),
            ("script.timeout_seconds", self.script.timeout_seconds),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(
                    AgentSmithError::Config(format!("{} must be greater than 0", name)).into(),
                );
            }
        }

        if self.events.channel_capacity == 0 {
            return Err(AgentSmithError::Config(
                "events.channel_capacity must be greater than 0".to_string(),
            )
            .into());
        }

        if self.mcp.client_name.trim().is_empty() {
            return Err(
                AgentSmithError::Config("mcp.client_name cannot be empty".to_string()).into(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.agent.max_tool_iterations, 16);
        assert_eq!(config.mcp.handshake_timeout_seconds, 60);
        assert_eq!(config.mcp.list_tools_timeout_seconds, 30);
        assert_eq!(config.mcp.call_tool_timeout_seconds, 60);
        assert_eq!(config.events.heartbeat_seconds, 10);
        assert_eq!(config.providers.models_timeout_seconds, 10);
        assert!(config.storage.db_path.is_none());
    }

    #[test]
    fn test_config_validation_success() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_iterations() {
        let mut config = Config::default();
        config.agent.max_tool_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let mut config = Config::default();
        config.mcp.call_tool_timeout_seconds = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("mcp.call_tool_timeout_seconds"));
    }

    #[test]
    fn test_config_validation_zero_capacity() {
        let mut config = Config::default();
        config.events.channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
agent:
  max_tool_iterations: 4
mcp:
  call_tool_timeout_seconds: 5
storage:
  db_path: /tmp/agentsmith-test.db
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.agent.max_tool_iterations, 4);
        assert_eq!(config.agent.tool_timeout_seconds, 120);
        assert_eq!(config.mcp.call_tool_timeout_seconds, 5);
        assert_eq!(config.mcp.handshake_timeout_seconds, 60);
        assert_eq!(
            config.storage.db_path,
            Some(PathBuf::from("/tmp/agentsmith-test.db"))
        );
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = Config::from_yaml("agent: [1, 2").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AgentSmithError>(),
            Some(AgentSmithError::Config(_))
        ));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("AGENTSMITH_MAX_TOOL_ITERATIONS", "3");
        std::env::set_var("AGENTSMITH_HEARTBEAT_SECONDS", "not-a-number");
        let mut config = Config::default();
        config.apply_env_vars();
        std::env::remove_var("AGENTSMITH_MAX_TOOL_ITERATIONS");
        std::env::remove_var("AGENTSMITH_HEARTBEAT_SECONDS");

        assert_eq!(config.agent.max_tool_iterations, 3);
        assert_eq!(config.events.heartbeat_seconds, 10);
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults_and_cli_db() {
        let cli = crate::cli::Cli {
            db: Some("/tmp/override.db".to_string()),
            ..crate::cli::Cli::default()
        };
        let config = Config::load("/nonexistent/agentsmith.yaml", &cli).unwrap();
        assert_eq!(config.storage.db_path, Some(PathBuf::from("/tmp/override.db")));
        assert_eq!(config.agent.max_tool_iterations, 16);
    }
}

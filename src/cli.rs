//! Command-line interface definition for AgentSmith
//!
//! This module defines the CLI structure using clap's derive API. The
//! commands mirror the operations of the engine's front door: running
//! turns, managing providers, roles, MCP servers and sessions, and
//! observing the event bus.

use clap::{Parser, Subcommand};

/// AgentSmith - local tool-calling orchestration engine
///
/// Drives multi-turn conversations against OpenAI-compatible endpoints,
/// dispatching tool calls to MCP servers and a sandboxed script runner.
#[derive(Parser, Debug, Clone)]
#[command(name = "agentsmith")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the database file location
    #[arg(long, env = "AGENTSMITH_DB_FILE")]
    pub db: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for AgentSmith
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Send one message and stream the reply
    Chat {
        /// Model identifier (as listed by `agentsmith models`)
        #[arg(short, long)]
        model: String,

        /// Continue an existing session instead of starting a new one
        #[arg(short, long)]
        session: Option<String>,

        /// Role used to build the system prompt
        #[arg(short, long)]
        role: Option<String>,

        /// Plain chat: no tools are advertised and no tool calls are run
        #[arg(long)]
        direct: bool,

        /// Message text
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// List models across all providers
    Models {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Manage upstream chat-completion providers
    Provider {
        #[command(subcommand)]
        command: ProviderCommand,
    },

    /// Manage MCP tool servers
    Mcp {
        #[command(subcommand)]
        command: McpCommand,
    },

    /// Manage roles
    Role {
        #[command(subcommand)]
        command: RoleCommand,
    },

    /// Manage sessions
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Print every event on the bus as a JSON line
    Events,
}

/// Provider management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ProviderCommand {
    /// List registered providers
    List,

    /// Register a provider (its models are loaded first)
    Add {
        #[arg(short, long)]
        name: String,

        /// Base URL, e.g. http://localhost:11434/v1
        #[arg(short, long)]
        url: String,

        #[arg(short = 'k', long, env = "AGENTSMITH_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// API family: openai, ollama, lmstudio, mistral, google, anthropic, openaicompatible
        #[arg(short = 't', long = "type", default_value = "openaicompatible")]
        api_type: String,

        /// Requests per minute, 0 disables limiting
        #[arg(long, default_value_t = 0)]
        rate_limit: u32,
    },

    /// Remove a provider
    Remove { id: String },

    /// Check that a provider answers the model listing call
    Test { id: String },
}

/// MCP server management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum McpCommand {
    /// List registered MCP servers and their tools
    List,

    /// Register an MCP server (its tools are listed first)
    Add {
        #[arg(short, long)]
        name: String,

        /// Transport: stdio or sse
        #[arg(short, long, default_value = "stdio")]
        transport: String,

        /// Event-stream URL for the sse transport
        #[arg(short, long)]
        url: Option<String>,

        /// Command line for the stdio transport
        #[arg(short, long)]
        command: Option<String>,

        /// Extra arguments appended to the command
        #[arg(short, long, num_args = 1.., allow_hyphen_values = true)]
        args: Vec<String>,

        /// Register without adding its tools to the catalog
        #[arg(long)]
        inactive: bool,
    },

    /// Remove an MCP server
    Remove { id: String },

    /// Include a server's tools in the catalog
    Enable { id: String },

    /// Exclude a server's tools from the catalog
    Disable { id: String },

    /// Check that a server lists at least one tool
    Test { id: String },
}

/// Role management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum RoleCommand {
    /// List roles
    List,

    /// Create a role
    Add {
        #[arg(short, long)]
        name: String,

        #[arg(short, long, default_value = "")]
        instruction: String,

        #[arg(short, long, default_value = "")]
        role: String,

        #[arg(short, long, default_value = "")]
        style: String,
    },

    /// Remove a role
    Remove { id: String },
}

/// Session management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommand {
    /// List sessions, newest first
    List,

    /// Create an empty session
    New,

    /// Print a session's messages
    Show { id: String },

    /// Delete a session
    Delete { id: String },

    /// Drop a message and everything after it
    Truncate { session: String, message: String },

    /// Delete a single message (and, for answers, the tool exchange before it)
    DeleteMessage { session: String, message: String },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            db: None,
            command: Commands::Models { json: false },
        }
    }
}

//! AgentSmith - local tool-calling orchestration engine
//!
//! This library drives multi-turn conversations between a user, a language
//! model served by an OpenAI-compatible endpoint, and a set of tools
//! exposed by MCP servers or built in.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `agent`: Sessions, roles, the registry of owned collections and the agent loop
//! - `providers`: Provider abstraction, streaming client and tool-call accumulation
//! - `mcp`: MCP client, handshake and stdio/SSE transports
//! - `tools`: Tool definitions, validation and the Lua script tool
//! - `events`: Broadcast event bus with idle heartbeats
//! - `storage`: Persistence of sessions, roles, providers and MCP servers
//! - `rate_limiter`: Per-provider sliding-window admission
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use agentsmith::agent::{AgentLoop, Registry, TurnRequest};
//! use agentsmith::events::EventBus;
//! use agentsmith::storage::MemoryStore;
//! use agentsmith::Config;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let registry = Registry::new(Arc::new(MemoryStore::new()), EventBus::default(), &config);
//!     registry.load().await?;
//!
//!     let session = registry.create_session().await?;
//!     let agent = AgentLoop::new(registry);
//!     let outcome = agent
//!         .run(
//!             TurnRequest {
//!                 session_id: session.id,
//!                 model_id: "llama3.2".to_string(),
//!                 role_id: None,
//!                 query: "What's 2+2?".to_string(),
//!             },
//!             CancellationToken::new(),
//!         )
//!         .await?;
//!     println!("{}", outcome.answer);
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod mcp;
pub mod prompts;
pub mod providers;
pub mod rate_limiter;
pub mod sse;
pub mod storage;
pub mod tools;

// Re-export commonly used types
pub use agent::{AgentLoop, Registry, TurnOutcome, TurnRequest};
pub use config::Config;
pub use error::{AgentSmithError, Result};
pub use events::{Event, EventBus};

#[cfg(test)]
pub mod test_utils;

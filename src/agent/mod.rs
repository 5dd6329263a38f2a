//! Agent module for AgentSmith
//!
//! This module contains the conversation model (sessions and roles), the
//! registry that owns every collection, inline tool-call inference and the
//! agent loop that drives a turn.

pub mod core;
pub mod inference;
pub mod registry;
pub mod role;
pub mod session;

pub use core::{AgentLoop, TurnOutcome, TurnRequest};
pub use inference::{infer_next_action, InferredAction};
pub use registry::Registry;
pub use role::{Role, RoleConfig};
pub use session::{Session, SessionHandle, SessionSummary, NEW_SESSION_SUMMARY};

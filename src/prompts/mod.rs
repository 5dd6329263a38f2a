//! System prompts
//!
//! The system prompt of a turn is built from the selected role, followed by
//! the tool-usage instructions whenever tools are advertised.

pub mod tool_usage;

use crate::agent::role::Role;

pub use tool_usage::TOOL_USAGE_PROMPT;

/// Render a role as prompt sections
///
/// # Examples
///
/// ```
/// use agentsmith::agent::role::{Role, RoleConfig};
/// use agentsmith::prompts::role_prompt;
///
/// let role = Role::new(RoleConfig {
///     name: "Tutor".into(),
///     general_instruction: "Explain step by step.".into(),
///     role: "A patient tutor.".into(),
///     style: "Friendly.".into(),
/// });
/// let prompt = role_prompt(&role);
/// assert!(prompt.starts_with("## General instruction: \nExplain"));
/// assert!(prompt.contains("## Text style and tone: \nFriendly."));
/// ```
pub fn role_prompt(role: &Role) -> String {
    format!(
        "## General instruction: \n{}## Role and personality: \n{}## Text style and tone: \n{}",
        role.config.general_instruction, role.config.role, role.config.style
    )
}

/// Build the system prompt for a turn
///
/// # Arguments
///
/// * `role` - Selected role, if any
/// * `with_tools` - Whether a non-empty tool catalog is advertised
pub fn build_system_prompt(role: Option<&Role>, with_tools: bool) -> String {
    let mut prompt = role.map(role_prompt).unwrap_or_default();
    if with_tools {
        prompt.push_str(TOOL_USAGE_PROMPT);
    }
    prompt
}

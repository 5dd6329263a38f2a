//! Roles: reusable persona settings that become the system prompt

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleConfig {
    pub name: String,
    #[serde(default)]
    pub general_instruction: String,
    /// Role and personality
    #[serde(default)]
    pub role: String,
    /// Text style and tone
    #[serde(default)]
    pub style: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub config: RoleConfig,
}

impl Role {
    /// Create a role with a generated identifier
    pub fn new(config: RoleConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
        }
    }
}

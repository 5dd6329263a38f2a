//! In-process store

use super::Store;
use crate::agent::role::Role;
use crate::agent::session::Session;
use crate::error::Result;
use crate::mcp::McpServerConfig;
use crate::providers::ProviderConfig;
use std::collections::HashMap;
use std::sync::Mutex;

/// Keeps every record in memory; nothing survives the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, Session>>,
    roles: Mutex<HashMap<String, Role>>,
    providers: Mutex<HashMap<String, ProviderConfig>>,
    mcp_servers: Mutex<HashMap<String, McpServerConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn values<T: Clone>(map: &Mutex<HashMap<String, T>>) -> Vec<T> {
    map.lock()
        .map(|map| map.values().cloned().collect())
        .unwrap_or_default()
}

fn upsert<T: Clone>(map: &Mutex<HashMap<String, T>>, id: &str, value: &T) {
    if let Ok(mut map) = map.lock() {
        map.insert(id.to_string(), value.clone());
    }
}

fn remove<T>(map: &Mutex<HashMap<String, T>>, id: &str) {
    if let Ok(mut map) = map.lock() {
        map.remove(id);
    }
}

impl Store for MemoryStore {
    fn load_sessions(&self) -> Result<Vec<Session>> {
        let mut sessions = values(&self.sessions);
        sessions.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(sessions)
    }

    fn save_session(&self, session: &Session) -> Result<()> {
        upsert(&self.sessions, &session.id, session);
        Ok(())
    }

    fn delete_session(&self, id: &str) -> Result<()> {
        remove(&self.sessions, id);
        Ok(())
    }

    fn load_roles(&self) -> Result<Vec<Role>> {
        let mut roles = values(&self.roles);
        roles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(roles)
    }

    fn save_role(&self, role: &Role) -> Result<()> {
        upsert(&self.roles, &role.id, role);
        Ok(())
    }

    fn delete_role(&self, id: &str) -> Result<()> {
        remove(&self.roles, id);
        Ok(())
    }

    fn load_providers(&self) -> Result<Vec<ProviderConfig>> {
        let mut providers = values(&self.providers);
        providers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(providers)
    }

    fn save_provider(&self, provider: &ProviderConfig) -> Result<()> {
        upsert(&self.providers, &provider.id, provider);
        Ok(())
    }

    fn delete_provider(&self, id: &str) -> Result<()> {
        remove(&self.providers, id);
        Ok(())
    }

    fn load_mcp_servers(&self) -> Result<Vec<McpServerConfig>> {
        let mut servers = values(&self.mcp_servers);
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(servers)
    }

    fn save_mcp_server(&self, server: &McpServerConfig) -> Result<()> {
        upsert(&self.mcp_servers, &server.id, server);
        Ok(())
    }

    fn delete_mcp_server(&self, id: &str) -> Result<()> {
        remove(&self.mcp_servers, id);
        Ok(())
    }
}

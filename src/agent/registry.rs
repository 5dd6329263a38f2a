//! Owned collections of sessions, providers, roles and MCP servers
//!
//! The [`Registry`] is the single writer for every collection. Each
//! collection sits behind its own lock, mutations persist through the
//! [`Store`] and then announce the new state on the [`EventBus`].
//! Persistence failures are returned to the caller; the in-memory change
//! is not rolled back.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::agent::role::{Role, RoleConfig};
use crate::agent::session::{Session, SessionHandle, SessionSummary};
use crate::config::Config;
use crate::error::{AgentSmithError, Result};
use crate::events::{Event, EventBus};
use crate::mcp::{McpServer, McpServerConfig, McpServerInfo};
use crate::providers::{create_provider, Model, Provider, ProviderConfig, ProviderInfo};
use crate::storage::Store;
use crate::tools::{builtin_tools, Tool};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Registry {
    config: Config,
    store: Arc<dyn Store>,
    events: EventBus,
    sessions: RwLock<Vec<SessionHandle>>,
    providers: RwLock<Vec<Arc<dyn Provider>>>,
    roles: RwLock<Vec<Role>>,
    mcp_servers: RwLock<Vec<Arc<McpServer>>>,
    builtin_tools: Vec<Tool>,
    discovery: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("sessions", &read(&self.sessions).len())
            .field("providers", &read(&self.providers).len())
            .field("roles", &read(&self.roles).len())
            .field("mcp_servers", &read(&self.mcp_servers).len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Create an empty registry
    ///
    /// Nothing is read from the store until [`Registry::load`] runs.
    pub fn new(store: Arc<dyn Store>, events: EventBus, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            config: config.clone(),
            store,
            events,
            sessions: RwLock::new(Vec::new()),
            providers: RwLock::new(Vec::new()),
            roles: RwLock::new(Vec::new()),
            mcp_servers: RwLock::new(Vec::new()),
            builtin_tools: builtin_tools(),
            discovery: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    /// Load every collection from the store
    ///
    /// Sessions, roles, providers and MCP servers load concurrently.
    /// Providers whose models cannot be listed are kept without models.
    /// MCP tool discovery keeps running in the background after this
    /// returns; see [`Registry::wait_for_tool_discovery`].
    ///
    /// # Errors
    ///
    /// Returns `Storage` if any collection cannot be read
    pub async fn load(self: &Arc<Self>) -> Result<()> {
        let (sessions, roles, providers, servers) = tokio::join!(
            self.load_sessions(),
            self.load_roles(),
            self.load_providers(),
            self.load_mcp_servers(),
        );
        let (sessions, roles, providers, servers) = (sessions?, roles?, providers?, servers?);
        tracing::info!(
            "Registry loaded: {} sessions, {} roles, {} providers, {} MCP servers",
            sessions,
            roles,
            providers,
            servers
        );
        Ok(())
    }

    async fn load_sessions(&self) -> Result<usize> {
        let store = self.store();
        let sessions = tokio::task::spawn_blocking(move || store.load_sessions())
            .await
            .map_err(|e| AgentSmithError::Storage(e.to_string()))??;
        let handles: Vec<SessionHandle> = sessions
            .into_iter()
            .map(|session| self.handle(session))
            .collect();
        let count = handles.len();
        *write(&self.sessions) = handles;
        Ok(count)
    }

    async fn load_roles(&self) -> Result<usize> {
        let store = self.store();
        let roles = tokio::task::spawn_blocking(move || store.load_roles())
            .await
            .map_err(|e| AgentSmithError::Storage(e.to_string()))??;
        let count = roles.len();
        *write(&self.roles) = roles;
        Ok(count)
    }

    async fn load_providers(&self) -> Result<usize> {
        let store = self.store();
        let configs = tokio::task::spawn_blocking(move || store.load_providers())
            .await
            .map_err(|e| AgentSmithError::Storage(e.to_string()))??;

        let mut providers = Vec::new();
        for config in configs {
            match create_provider(config.clone(), &self.config.providers) {
                Ok(provider) => providers.push(provider),
                Err(e) => tracing::warn!("Skipping provider '{}': {}", config.name, e),
            }
        }

        let loads = providers.iter().map(|provider| async move {
            if let Err(e) = provider.load_models().await {
                tracing::warn!(
                    "Failed to load models of provider '{}': {}",
                    provider.name(),
                    e
                );
            }
        });
        join_all(loads).await;

        let count = providers.len();
        *write(&self.providers) = providers;
        self.publish_providers();
        Ok(count)
    }

    async fn load_mcp_servers(self: &Arc<Self>) -> Result<usize> {
        let store = self.store();
        let configs = tokio::task::spawn_blocking(move || store.load_mcp_servers())
            .await
            .map_err(|e| AgentSmithError::Storage(e.to_string()))??;

        let servers: Vec<Arc<McpServer>> = configs
            .into_iter()
            .map(|config| Arc::new(McpServer::new(config, self.config.mcp.clone())))
            .collect();
        let count = servers.len();
        *write(&self.mcp_servers) = servers.clone();

        let mut discovery = self.discovery.lock().await;
        for server in servers {
            discovery.push(self.spawn_discovery(server));
        }
        Ok(count)
    }

    fn spawn_discovery(self: &Arc<Self>, server: Arc<McpServer>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            match server.load_tools().await {
                Ok(_) => registry.publish_mcp_servers(),
                Err(e) => {
                    tracing::warn!("Tool discovery failed for '{}': {}", server.name(), e)
                }
            }
        })
    }

    /// Wait for background tool discovery started by [`Registry::load`]
    ///
    /// # Returns
    ///
    /// Returns false if discovery was still running when `timeout` elapsed
    pub async fn wait_for_tool_discovery(&self, timeout: Duration) -> bool {
        let handles: Vec<JoinHandle<()>> = self.discovery.lock().await.drain(..).collect();
        tokio::time::timeout(timeout, join_all(handles))
            .await
            .is_ok()
    }

    // ---- sessions ----

    fn handle(&self, session: Session) -> SessionHandle {
        SessionHandle::new(session, self.events.clone(), self.store())
    }

    /// Summaries of every stored session, most recent first
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let handles = read(&self.sessions).clone();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.snapshot().await.summary());
        }
        summaries.sort_by(|a, b| b.date.cmp(&a.date));
        summaries
    }

    pub fn session(&self, id: &str) -> Option<SessionHandle> {
        read(&self.sessions)
            .iter()
            .find(|handle| handle.id() == id)
            .cloned()
    }

    /// The session with `id`, or a fresh transient one when it is unknown
    pub fn session_or_transient(&self, id: &str) -> SessionHandle {
        self.session(id).unwrap_or_else(|| {
            tracing::debug!("Unknown session '{}', using a transient session", id);
            self.transient_session()
        })
    }

    /// A session that is never stored nor listed
    pub fn transient_session(&self) -> SessionHandle {
        self.handle(Session::transient())
    }

    pub async fn create_session(&self) -> Result<Session> {
        let session = Session::new();
        let handle = self.handle(session.clone());
        write(&self.sessions).insert(0, handle);
        self.store.save_session(&session)?;
        self.publish_sessions().await;
        Ok(session)
    }

    pub async fn delete_session(&self, id: &str) -> Result<()> {
        {
            let mut sessions = write(&self.sessions);
            let index = sessions
                .iter()
                .position(|handle| handle.id() == id)
                .ok_or_else(|| AgentSmithError::SessionNotFound(id.to_string()))?;
            sessions.remove(index);
        }
        self.store.delete_session(id)?;
        self.publish_sessions().await;
        Ok(())
    }

    fn existing_session(&self, id: &str) -> Result<SessionHandle> {
        self.session(id)
            .ok_or_else(|| AgentSmithError::SessionNotFound(id.to_string()).into())
    }

    /// Drop `message_id` and everything after it
    pub async fn truncate_session(&self, session_id: &str, message_id: &str) -> Result<Session> {
        self.existing_session(session_id)?
            .edit(|session| session.truncate_at(message_id))
            .await
    }

    pub async fn delete_message(&self, session_id: &str, message_id: &str) -> Result<Session> {
        self.existing_session(session_id)?
            .edit(|session| session.delete_message(message_id))
            .await
    }

    async fn publish_sessions(&self) {
        let summaries = self.list_sessions().await;
        self.events.publish(Event::SessionListUpdate(summaries));
    }

    // ---- providers ----

    pub fn providers(&self) -> Vec<Arc<dyn Provider>> {
        read(&self.providers).clone()
    }

    pub fn provider(&self, id: &str) -> Option<Arc<dyn Provider>> {
        read(&self.providers)
            .iter()
            .find(|provider| provider.id() == id)
            .cloned()
    }

    pub fn provider_infos(&self) -> Vec<ProviderInfo> {
        read(&self.providers).iter().map(|p| p.info()).collect()
    }

    /// Every model of every provider
    pub fn models(&self) -> Vec<Model> {
        read(&self.providers)
            .iter()
            .flat_map(|provider| provider.models())
            .collect()
    }

    /// Resolve a model id to the model and the provider serving it
    pub fn find_model(&self, model_id: &str) -> Option<(Model, Arc<dyn Provider>)> {
        read(&self.providers).iter().find_map(|provider| {
            provider
                .models()
                .into_iter()
                .find(|model| model.id == model_id)
                .map(|model| (model, Arc::clone(provider)))
        })
    }

    /// Add an already constructed provider without persisting it
    ///
    /// Used to plug in providers that have no stored configuration, such
    /// as test doubles.
    pub fn register_provider(&self, provider: Arc<dyn Provider>) {
        write(&self.providers).push(provider);
        self.publish_providers();
    }

    /// Validate, persist and register a provider
    ///
    /// # Errors
    ///
    /// Returns the model listing error when the endpoint cannot be reached;
    /// nothing is stored in that case
    pub async fn create_provider(&self, config: ProviderConfig) -> Result<ProviderInfo> {
        let provider = create_provider(config, &self.config.providers)?;
        provider.load_models().await?;

        self.store.save_provider(provider.config())?;
        write(&self.providers).push(Arc::clone(&provider));
        self.publish_providers();
        tracing::info!("Registered provider '{}'", provider.name());
        Ok(provider.info())
    }

    /// Replace a provider's configuration and reload its models
    pub async fn update_provider(&self, config: ProviderConfig) -> Result<ProviderInfo> {
        if self.provider(&config.id).is_none() {
            return Err(AgentSmithError::ProviderNotFound(config.id).into());
        }
        let provider = create_provider(config, &self.config.providers)?;
        provider.load_models().await?;

        self.store.save_provider(provider.config())?;
        {
            let mut providers = write(&self.providers);
            if let Some(slot) = providers.iter_mut().find(|p| p.id() == provider.id()) {
                *slot = Arc::clone(&provider);
            }
        }
        self.publish_providers();
        Ok(provider.info())
    }

    pub fn delete_provider(&self, id: &str) -> Result<()> {
        {
            let mut providers = write(&self.providers);
            let index = providers
                .iter()
                .position(|provider| provider.id() == id)
                .ok_or_else(|| AgentSmithError::ProviderNotFound(id.to_string()))?;
            providers.remove(index);
        }
        self.store.delete_provider(id)?;
        self.publish_providers();
        Ok(())
    }

    /// Check that a provider can list its models
    pub async fn test_provider(&self, id: &str) -> Result<bool> {
        let provider = self
            .provider(id)
            .ok_or_else(|| AgentSmithError::ProviderNotFound(id.to_string()))?;
        match provider.load_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Provider '{}' failed its test: {}", provider.name(), e);
                Ok(false)
            }
        }
    }

    fn publish_providers(&self) {
        self.events
            .publish(Event::ProviderListUpdate(self.provider_infos()));
    }

    // ---- roles ----

    pub fn roles(&self) -> Vec<Role> {
        read(&self.roles).clone()
    }

    pub fn role(&self, id: &str) -> Option<Role> {
        read(&self.roles).iter().find(|role| role.id == id).cloned()
    }

    pub fn create_role(&self, config: RoleConfig) -> Result<Role> {
        if config.name.trim().is_empty() {
            return Err(AgentSmithError::Config("role name cannot be empty".into()).into());
        }
        let role = Role::new(config);
        write(&self.roles).push(role.clone());
        self.store.save_role(&role)?;
        self.publish_roles();
        Ok(role)
    }

    pub fn update_role(&self, role: Role) -> Result<Role> {
        {
            let mut roles = write(&self.roles);
            let slot = roles
                .iter_mut()
                .find(|existing| existing.id == role.id)
                .ok_or_else(|| AgentSmithError::RoleNotFound(role.id.clone()))?;
            *slot = role.clone();
        }
        self.store.save_role(&role)?;
        self.publish_roles();
        Ok(role)
    }

    pub fn delete_role(&self, id: &str) -> Result<()> {
        {
            let mut roles = write(&self.roles);
            let index = roles
                .iter()
                .position(|role| role.id == id)
                .ok_or_else(|| AgentSmithError::RoleNotFound(id.to_string()))?;
            roles.remove(index);
        }
        self.store.delete_role(id)?;
        self.publish_roles();
        Ok(())
    }

    fn publish_roles(&self) {
        self.events.publish(Event::RoleListUpdate(self.roles()));
    }

    // ---- MCP servers ----

    pub fn mcp_servers(&self) -> Vec<Arc<McpServer>> {
        read(&self.mcp_servers).clone()
    }

    pub fn mcp_server(&self, id: &str) -> Option<Arc<McpServer>> {
        read(&self.mcp_servers)
            .iter()
            .find(|server| server.id() == id)
            .cloned()
    }

    pub fn mcp_infos(&self) -> Vec<McpServerInfo> {
        read(&self.mcp_servers).iter().map(|s| s.info()).collect()
    }

    fn existing_mcp_server(&self, id: &str) -> Result<Arc<McpServer>> {
        self.mcp_server(id)
            .ok_or_else(|| AgentSmithError::McpServerNotFound(id.to_string()).into())
    }

    /// Validate, persist and register an MCP server
    ///
    /// The server's tools are listed before anything is stored, so a server
    /// that cannot be reached is rejected.
    pub async fn create_mcp_server(&self, config: McpServerConfig) -> Result<McpServerInfo> {
        config.validate()?;
        let server = Arc::new(McpServer::new(config, self.config.mcp.clone()));
        server.load_tools().await?;

        self.store.save_mcp_server(&server.config())?;
        write(&self.mcp_servers).push(Arc::clone(&server));
        self.publish_mcp_servers();
        tracing::info!("Registered MCP server '{}'", server.name());
        Ok(server.info())
    }

    /// Replace a server's configuration and rediscover its tools
    pub async fn update_mcp_server(&self, config: McpServerConfig) -> Result<McpServerInfo> {
        self.existing_mcp_server(&config.id)?;
        config.validate()?;
        let server = Arc::new(McpServer::new(config, self.config.mcp.clone()));
        server.load_tools().await?;

        self.store.save_mcp_server(&server.config())?;
        {
            let mut servers = write(&self.mcp_servers);
            if let Some(slot) = servers.iter_mut().find(|s| s.id() == server.id()) {
                *slot = Arc::clone(&server);
            }
        }
        self.publish_mcp_servers();
        Ok(server.info())
    }

    /// Include or exclude a server's tools from the catalog
    pub fn set_mcp_active(&self, id: &str, active: bool) -> Result<McpServerInfo> {
        let server = self.existing_mcp_server(id)?;
        server.set_active(active);
        self.store.save_mcp_server(&server.config())?;
        self.publish_mcp_servers();
        Ok(server.info())
    }

    pub fn delete_mcp_server(&self, id: &str) -> Result<()> {
        {
            let mut servers = write(&self.mcp_servers);
            let index = servers
                .iter()
                .position(|server| server.id() == id)
                .ok_or_else(|| AgentSmithError::McpServerNotFound(id.to_string()))?;
            servers.remove(index);
        }
        self.store.delete_mcp_server(id)?;
        self.publish_mcp_servers();
        Ok(())
    }

    pub async fn test_mcp_server(&self, id: &str) -> Result<bool> {
        Ok(self.existing_mcp_server(id)?.test().await)
    }

    fn publish_mcp_servers(&self) {
        self.events.publish(Event::McpListUpdate(self.mcp_infos()));
    }

    // ---- tools ----

    /// Tools advertised for a turn
    ///
    /// Built-ins come first, followed by the tools of every active server
    /// whose discovery has completed. A name that is already taken is
    /// skipped with a warning.
    pub fn tool_catalog(&self) -> Vec<Tool> {
        let mut catalog = self.builtin_tools.clone();
        for server in read(&self.mcp_servers).iter() {
            if !server.is_active() {
                continue;
            }
            for tool in server.tools() {
                if catalog.iter().any(|existing| existing.name == tool.name) {
                    tracing::warn!(
                        "Tool '{}' from MCP server '{}' shadows an existing tool, skipping",
                        tool.name,
                        server.name()
                    );
                    continue;
                }
                catalog.push(tool);
            }
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::test_utils::ScriptedProvider;

    fn registry() -> (Arc<MemoryStore>, Arc<Registry>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::new(store.clone(), EventBus::default(), &Config::default());
        (store, registry)
    }

    fn server_with_tools(names: &[&str], active: bool) -> Arc<McpServer> {
        let mut config = McpServerConfig::stdio("srv", "unused", vec![]);
        config.active = active;
        let server = McpServer::new(config, Default::default());
        server.set_tools(
            names
                .iter()
                .map(|name| Tool::new(*name, "d").with_server(server.id()))
                .collect(),
        );
        Arc::new(server)
    }

    #[tokio::test]
    async fn test_create_and_delete_session() {
        let (store, registry) = registry();
        let mut events = registry.events().subscribe();

        let session = registry.create_session().await.unwrap();
        assert!(registry.session(&session.id).is_some());
        assert_eq!(store.load_sessions().unwrap().len(), 1);
        match events.next().await.unwrap() {
            Event::SessionListUpdate(list) => assert_eq!(list[0].id, session.id),
            other => panic!("unexpected {:?}", other),
        }

        registry.delete_session(&session.id).await.unwrap();
        assert!(registry.session(&session.id).is_none());
        assert!(store.load_sessions().unwrap().is_empty());
        assert!(registry.delete_session(&session.id).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_session_falls_back_to_transient() {
        let (_, registry) = registry();
        let handle = registry.session_or_transient("missing");
        assert!(handle.is_transient());
        assert!(registry.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_reads_every_collection() {
        let store = Arc::new(MemoryStore::new());
        store.save_session(&Session::new()).unwrap();
        store
            .save_role(&Role::new(RoleConfig {
                name: "terse".into(),
                ..Default::default()
            }))
            .unwrap();

        let registry = Registry::new(store, EventBus::default(), &Config::default());
        registry.load().await.unwrap();
        assert_eq!(registry.list_sessions().await.len(), 1);
        assert_eq!(registry.roles().len(), 1);
        assert!(registry.wait_for_tool_discovery(Duration::from_secs(1)).await);
    }

    #[test]
    fn test_role_crud() {
        let (store, registry) = registry();
        let role = registry
            .create_role(RoleConfig {
                name: "pirate".into(),
                style: "Arr".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(registry.role(&role.id).unwrap().config.style, "Arr");

        let mut changed = role.clone();
        changed.config.style = "Ahoy".into();
        registry.update_role(changed).unwrap();
        assert_eq!(store.load_roles().unwrap()[0].config.style, "Ahoy");

        registry.delete_role(&role.id).unwrap();
        assert!(registry.roles().is_empty());
        assert!(registry.create_role(RoleConfig::default()).is_err());
    }

    #[test]
    fn test_find_model_across_providers() {
        let (_, registry) = registry();
        registry.register_provider(Arc::new(ScriptedProvider::new("alpha", &["a-1"])));
        registry.register_provider(Arc::new(ScriptedProvider::new("beta", &["b-1", "b-2"])));

        let (model, provider) = registry.find_model("b-2").unwrap();
        assert_eq!(model.id, "b-2");
        assert_eq!(provider.name(), "beta");
        assert!(registry.find_model("c-1").is_none());
        assert_eq!(registry.models().len(), 3);
    }

    #[test]
    fn test_catalog_skips_inactive_and_duplicate_tools() {
        let (_, registry) = registry();
        write(&registry.mcp_servers).push(server_with_tools(&["get_time", "lua_code_runner"], true));
        write(&registry.mcp_servers).push(server_with_tools(&["hidden"], false));
        write(&registry.mcp_servers).push(server_with_tools(&["get_time"], true));

        let names: Vec<String> = registry
            .tool_catalog()
            .into_iter()
            .map(|tool| tool.name)
            .collect();
        assert_eq!(
            names,
            vec!["lua_code_runner", "builtin_dynamic_ai_agent", "get_time"]
        );
    }

    #[test]
    fn test_set_mcp_active_persists() {
        let (store, registry) = registry();
        let server = server_with_tools(&["t"], true);
        let id = server.id();
        write(&registry.mcp_servers).push(server);

        let info = registry.set_mcp_active(&id, false).unwrap();
        assert!(!info.config.active);
        assert!(!store.load_mcp_servers().unwrap()[0].active);
        assert_eq!(registry.tool_catalog().len(), 2);
        assert!(registry.set_mcp_active("nope", true).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_mcp_server_is_not_saved() {
        let (store, registry) = registry();
        let config = McpServerConfig::stdio("broken", "/nonexistent/agentsmith-mcp", vec![]);
        assert!(registry.create_mcp_server(config).await.is_err());
        assert!(store.load_mcp_servers().unwrap().is_empty());
        assert!(registry.mcp_servers().is_empty());
    }
}

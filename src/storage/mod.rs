//! Persistence for sessions, roles, providers and MCP servers
//!
//! [`Store`] is the contract the registry and the agent loop depend on.
//! [`SqliteStorage`] is the on-disk implementation; [`MemoryStore`] keeps
//! everything in process for tests and throwaway runs.

use crate::agent::role::Role;
use crate::agent::session::Session;
use crate::config::StorageConfig;
use crate::error::{AgentSmithError, Result};
use crate::mcp::{McpServerConfig, McpTransportKind};
use crate::providers::{ApiType, ProviderConfig};
use anyhow::Context;
use directories::ProjectDirs;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

pub mod memory;
pub use memory::MemoryStore;

/// Storage contract
///
/// Saves are upserts keyed by id. Deleting an unknown id is not an error.
pub trait Store: Send + Sync {
    /// All sessions, most recent first
    fn load_sessions(&self) -> Result<Vec<Session>>;
    fn save_session(&self, session: &Session) -> Result<()>;
    fn delete_session(&self, id: &str) -> Result<()>;

    fn load_roles(&self) -> Result<Vec<Role>>;
    fn save_role(&self, role: &Role) -> Result<()>;
    fn delete_role(&self, id: &str) -> Result<()>;

    fn load_providers(&self) -> Result<Vec<ProviderConfig>>;
    fn save_provider(&self, provider: &ProviderConfig) -> Result<()>;
    fn delete_provider(&self, id: &str) -> Result<()>;

    fn load_mcp_servers(&self) -> Result<Vec<McpServerConfig>>;
    fn save_mcp_server(&self, server: &McpServerConfig) -> Result<()>;
    fn delete_mcp_server(&self, id: &str) -> Result<()>;
}

fn storage_error<E: std::fmt::Display>(e: E) -> anyhow::Error {
    AgentSmithError::Storage(e.to_string()).into()
}

/// SQLite-backed store
///
/// Every call opens its own connection, so the store can be shared across
/// threads without further locking.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    db_path: PathBuf,
}

impl SqliteStorage {
    /// Open the database named by the configuration
    ///
    /// Falls back to `agentsmith.db` in the platform data directory when no
    /// path is configured.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the directory or schema cannot be created
    pub fn new(config: &StorageConfig) -> Result<Self> {
        if let Some(path) = &config.db_path {
            return Self::new_with_path(path);
        }

        let proj_dirs = ProjectDirs::from("com", "agentsmith", "agentsmith")
            .ok_or_else(|| AgentSmithError::Storage("Could not determine data directory".into()))?;
        Self::new_with_path(proj_dirs.data_dir().join("agentsmith.db"))
    }

    /// Open (and create if needed) the database at `db_path`
    ///
    /// # Examples
    ///
    /// ```
    /// use agentsmith::storage::{SqliteStorage, Store};
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let storage = SqliteStorage::new_with_path(dir.path().join("test.db")).unwrap();
    /// assert!(storage.load_sessions().unwrap().is_empty());
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(storage_error)?;
        }

        let storage = Self { db_path };
        storage.init()?;
        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(storage_error)
    }

    fn init(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                date TEXT NOT NULL,
                summary TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS roles (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS providers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                api_url TEXT NOT NULL,
                api_key TEXT NOT NULL,
                provider_type TEXT NOT NULL,
                rate_limit INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS mcp_servers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                transport TEXT NOT NULL,
                url TEXT NOT NULL,
                command TEXT NOT NULL,
                args TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );",
        )
        .context("Failed to create tables")
        .map_err(storage_error)?;
        Ok(())
    }

    fn delete_by_id(&self, table: &str, column: &str, id: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            &format!("DELETE FROM {} WHERE {} = ?1", table, column),
            params![id],
        )
        .with_context(|| format!("Failed to delete from {}", table))
        .map_err(storage_error)?;
        Ok(())
    }
}

impl Store for SqliteStorage {
    fn load_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT session_id, data FROM sessions ORDER BY date DESC")
            .map_err(storage_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(storage_error)?;

        let mut sessions = Vec::new();
        for row in rows {
            let (id, data) = row.map_err(storage_error)?;
            match serde_json::from_str::<Session>(&data) {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!("Skipping unreadable session {}: {}", id, e),
            }
        }
        Ok(sessions)
    }

    fn save_session(&self, session: &Session) -> Result<()> {
        let data = serde_json::to_string(session)
            .context("Failed to serialize session")
            .map_err(storage_error)?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO sessions (session_id, date, summary, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                date = excluded.date, summary = excluded.summary, data = excluded.data",
            params![session.id, session.date.to_rfc3339(), session.summary, data],
        )
        .context("Failed to save session")
        .map_err(storage_error)?;
        Ok(())
    }

    fn delete_session(&self, id: &str) -> Result<()> {
        self.delete_by_id("sessions", "session_id", id)
    }

    fn load_roles(&self) -> Result<Vec<Role>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT id, data FROM roles ORDER BY id")
            .map_err(storage_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(storage_error)?;

        let mut roles = Vec::new();
        for row in rows {
            let (id, data) = row.map_err(storage_error)?;
            match serde_json::from_str::<Role>(&data) {
                Ok(role) => roles.push(role),
                Err(e) => tracing::warn!("Skipping unreadable role {}: {}", id, e),
            }
        }
        Ok(roles)
    }

    fn save_role(&self, role: &Role) -> Result<()> {
        let data = serde_json::to_string(role)
            .context("Failed to serialize role")
            .map_err(storage_error)?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO roles (id, data) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![role.id, data],
        )
        .context("Failed to save role")
        .map_err(storage_error)?;
        Ok(())
    }

    fn delete_role(&self, id: &str) -> Result<()> {
        self.delete_by_id("roles", "id", id)
    }

    fn load_providers(&self) -> Result<Vec<ProviderConfig>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, api_url, api_key, provider_type, rate_limit
                 FROM providers ORDER BY name",
            )
            .map_err(storage_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .map_err(storage_error)?;

        let mut providers = Vec::new();
        for row in rows {
            let (id, name, url, api_key, provider_type, rate_limit) =
                row.map_err(storage_error)?;
            let api_type = provider_type.parse::<ApiType>().unwrap_or_else(|e| {
                tracing::warn!("Provider {} has {}; assuming OpenAI-compatible", id, e);
                ApiType::default()
            });
            providers.push(ProviderConfig {
                id,
                name,
                url,
                api_key,
                api_type,
                rate_limit: u32::try_from(rate_limit).unwrap_or(0),
            });
        }
        Ok(providers)
    }

    fn save_provider(&self, provider: &ProviderConfig) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO providers (id, name, api_url, api_key, provider_type, rate_limit)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, api_url = excluded.api_url, api_key = excluded.api_key,
                provider_type = excluded.provider_type, rate_limit = excluded.rate_limit",
            params![
                provider.id,
                provider.name,
                provider.url,
                provider.api_key,
                provider.api_type.as_str(),
                provider.rate_limit
            ],
        )
        .context("Failed to save provider")
        .map_err(storage_error)?;
        Ok(())
    }

    fn delete_provider(&self, id: &str) -> Result<()> {
        self.delete_by_id("providers", "id", id)
    }

    fn load_mcp_servers(&self) -> Result<Vec<McpServerConfig>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, transport, url, command, args, active
                 FROM mcp_servers ORDER BY name",
            )
            .map_err(storage_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, bool>(6)?,
                ))
            })
            .map_err(storage_error)?;

        let mut servers = Vec::new();
        for row in rows {
            let (id, name, transport, url, command, args, active) = row.map_err(storage_error)?;
            let transport = match transport.parse::<McpTransportKind>() {
                Ok(transport) => transport,
                Err(e) => {
                    tracing::warn!("Skipping MCP server {}: {}", id, e);
                    continue;
                }
            };
            let args: Vec<String> = serde_json::from_str(&args).unwrap_or_else(|e| {
                tracing::warn!("MCP server {} has unreadable args: {}", id, e);
                Vec::new()
            });
            servers.push(McpServerConfig {
                id,
                name,
                transport,
                url,
                command,
                args,
                active,
            });
        }
        Ok(servers)
    }

    fn save_mcp_server(&self, server: &McpServerConfig) -> Result<()> {
        let args = serde_json::to_string(&server.args)
            .context("Failed to serialize MCP server args")
            .map_err(storage_error)?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO mcp_servers (id, name, transport, url, command, args, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, transport = excluded.transport, url = excluded.url,
                command = excluded.command, args = excluded.args, active = excluded.active",
            params![
                server.id,
                server.name,
                server.transport.as_str(),
                server.url,
                server.command,
                args,
                server.active
            ],
        )
        .context("Failed to save MCP server")
        .map_err(storage_error)?;
        Ok(())
    }

    fn delete_mcp_server(&self, id: &str) -> Result<()> {
        self.delete_by_id("mcp_servers", "id", id)
    }
}

//! Test utilities for AgentSmith
//!
//! This module provides a scripted provider that replays canned replies,
//! plus small helpers for temporary storage and assertions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::registry::Registry;
use crate::config::Config;
use crate::error::{AgentSmithError, Result};
use crate::events::EventBus;
use crate::providers::{ApiType, CompletionRequest, Model, Provider, ProviderConfig};
use crate::storage::{MemoryStore, SqliteStorage};
use crate::tools::ToolCallRequest;

/// One canned provider reply
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Stream these text fragments, no tool calls
    Text(Vec<String>),
    /// Stream optional text, then finalize these calls
    ToolCalls(Vec<ToolCallRequest>),
    /// Fail with a provider error
    Fail(String),
    /// Stream the fragments, then fail with a provider error
    TextThenFail(Vec<String>, String),
    /// Stream the fragments, then never finish
    Hang(Vec<String>),
}

impl ScriptedReply {
    pub fn text(fragments: &[&str]) -> Self {
        Self::Text(fragments.iter().map(|f| f.to_string()).collect())
    }
}

/// Provider that answers from a queue of [`ScriptedReply`]s
pub struct ScriptedProvider {
    config: ProviderConfig,
    models: Vec<Model>,
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(name: &str, models: &[&str]) -> Self {
        let config = ProviderConfig::new(name, "http://scripted.invalid/v1", ApiType::OpenAi);
        let models = models
            .iter()
            .map(|id| Model::new(*id, config.id.clone()))
            .collect();
        Self {
            config,
            models,
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(self, reply: ScriptedReply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, request: CompletionRequest) -> Result<ScriptedReply> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentSmithError::Provider("no scripted reply left".into()).into())
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn models(&self) -> Vec<Model> {
        self.models.clone()
    }

    async fn load_models(&self) -> Result<Vec<Model>> {
        Ok(self.models.clone())
    }

    async fn chat_completion(&self, request: CompletionRequest) -> Result<String> {
        match self.next_reply(request)? {
            ScriptedReply::Text(fragments) => Ok(fragments.concat()),
            ScriptedReply::Fail(message) => Err(AgentSmithError::Provider(message).into()),
            other => Err(AgentSmithError::Provider(format!("unsupported reply {:?}", other)).into()),
        }
    }

    async fn chat_completion_stream(
        &self,
        request: CompletionRequest,
        text_tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<Vec<ToolCallRequest>> {
        match self.next_reply(request)? {
            ScriptedReply::Text(fragments) => {
                for fragment in fragments {
                    let _ = text_tx.send(fragment).await;
                }
                Ok(Vec::new())
            }
            ScriptedReply::ToolCalls(calls) => Ok(calls),
            ScriptedReply::Fail(message) => Err(AgentSmithError::Provider(message).into()),
            ScriptedReply::TextThenFail(fragments, message) => {
                for fragment in fragments {
                    let _ = text_tx.send(fragment).await;
                }
                Err(AgentSmithError::Provider(message).into())
            }
            ScriptedReply::Hang(fragments) => {
                for fragment in fragments {
                    let _ = text_tx.send(fragment).await;
                }
                cancel.cancelled().await;
                Err(AgentSmithError::Cancelled.into())
            }
        }
    }
}

/// Registry over an in-memory store, with `provider` registered
pub fn registry_with(provider: Arc<dyn Provider>, config: &Config) -> Arc<Registry> {
    let registry = Registry::new(Arc::new(MemoryStore::new()), EventBus::default(), config);
    registry.register_provider(provider);
    registry
}

/// SQLite storage in a fresh temporary directory
///
/// Keep the returned directory alive for as long as the storage is used.
pub fn temp_storage() -> (TempDir, SqliteStorage) {
    let dir = TempDir::new().expect("Failed to create temporary directory");
    let storage =
        SqliteStorage::new_with_path(dir.path().join("agentsmith.db")).expect("open storage");
    (dir, storage)
}

/// Assert that an error renders with the expected substring
pub fn assert_error_contains<T: std::fmt::Debug>(result: Result<T>, expected: &str) {
    match result {
        Ok(value) => panic!("Expected error containing '{}' but got Ok({:?})", expected, value),
        Err(e) => {
            let message = e.to_string();
            assert!(
                message.contains(expected),
                "Error message '{}' does not contain '{}'",
                message,
                expected
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;

    #[tokio::test]
    async fn test_scripted_provider_replays_in_order() {
        let provider = ScriptedProvider::new("p", &["m"])
            .with_reply(ScriptedReply::text(&["a", "b"]))
            .with_reply(ScriptedReply::Fail("boom".into()));

        let (tx, mut rx) = mpsc::channel(8);
        let calls = provider
            .chat_completion_stream(CompletionRequest::default(), tx, CancellationToken::new())
            .await
            .unwrap();
        assert!(calls.is_empty());
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));

        assert_error_contains(
            provider.chat_completion(CompletionRequest::default()).await,
            "boom",
        );
        assert_error_contains(
            provider.chat_completion(CompletionRequest::default()).await,
            "no scripted reply",
        );
        assert_eq!(provider.requests().len(), 3);
    }

    #[test]
    fn test_temp_storage_is_usable() {
        let (_dir, storage) = temp_storage();
        assert!(storage.load_sessions().unwrap().is_empty());
    }
}

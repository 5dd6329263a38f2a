//! Conversation sessions
//!
//! [`Session`] is the plain data that gets persisted. [`SessionHandle`] is the
//! shared, mutable view the agent loop works through: every mutation emits
//! the matching event and, unless the session is transient, is written to
//! the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{AgentSmithError, Result};
use crate::events::{Event, EventBus};
use crate::providers::{Message, MessageOrigin};
use crate::storage::Store;
use crate::tools::ToolCallRequest;

/// Title of a session before its first message
pub const NEW_SESSION_SUMMARY: &str = "New chat";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Last activity
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub summary: String,
    /// Transient sessions are never persisted
    #[serde(skip)]
    pub transient: bool,
}

/// Listing entry for `session_list_update`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub date: DateTime<Utc>,
    pub summary: String,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            date: Utc::now(),
            messages: Vec::new(),
            summary: NEW_SESSION_SUMMARY.to_string(),
            transient: false,
        }
    }

    /// A session that lives only in memory
    pub fn transient() -> Self {
        Self {
            transient: true,
            ..Self::new()
        }
    }

    /// Append a message and refresh the activity date
    ///
    /// The first message also becomes the session summary.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.date = Utc::now();
        if self.messages.len() == 1 {
            self.summary = self.messages[0].text.clone();
        }
    }

    fn position(&self, message_id: &str) -> Result<usize> {
        self.messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| {
                AgentSmithError::MessageNotFound {
                    session: self.id.clone(),
                    message: message_id.to_string(),
                }
                .into()
            })
    }

    /// Keep only the messages before `message_id`
    ///
    /// # Errors
    ///
    /// Returns `MessageNotFound` if no message has that id
    pub fn truncate_at(&mut self, message_id: &str) -> Result<()> {
        let index = self.position(message_id)?;
        self.messages.truncate(index);
        Ok(())
    }

    /// Remove a message
    ///
    /// Removing an assistant message also removes the run of tool and
    /// assistant messages right before it, up to the previous user message.
    /// Any other message is removed alone.
    ///
    /// # Errors
    ///
    /// Returns `MessageNotFound` if no message has that id
    pub fn delete_message(&mut self, message_id: &str) -> Result<()> {
        let index = self.position(message_id)?;
        let start = if self.messages[index].origin == MessageOrigin::Assistant {
            let mut start = index;
            while start > 0
                && matches!(
                    self.messages[start - 1].origin,
                    MessageOrigin::Assistant | MessageOrigin::Tool
                )
            {
                start -= 1;
            }
            start
        } else {
            index
        };
        self.messages.drain(start..=index);
        Ok(())
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            date: self.date,
            summary: self.summary.clone(),
        }
    }
}

/// Shared handle to a live session
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    transient: bool,
    inner: Arc<Mutex<Session>>,
    events: EventBus,
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("transient", &self.transient)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn new(session: Session, events: EventBus, store: Arc<dyn Store>) -> Self {
        Self {
            id: session.id.clone(),
            transient: session.transient,
            inner: Arc::new(Mutex::new(session)),
            events,
            store,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub async fn snapshot(&self) -> Session {
        self.inner.lock().await.clone()
    }

    /// Append a message, persist the session, then announce it
    ///
    /// # Errors
    ///
    /// Returns `Storage` if persisting fails. The message stays appended in
    /// memory but nothing is published.
    pub async fn add_message(&self, message: Message) -> Result<Message> {
        let snapshot = {
            let mut session = self.inner.lock().await;
            session.push(message.clone());
            session.clone()
        };

        self.persist(&snapshot)?;
        self.events.publish(Event::NewMessage {
            session_id: self.id.clone(),
            message: message.clone(),
        });
        self.events.publish(Event::SessionUpdate(snapshot));
        Ok(message)
    }

    /// Grow the last message's text
    pub async fn append_to_last_message(&self, fragment: &str) {
        let updated = {
            let mut session = self.inner.lock().await;
            session.messages.last_mut().map(|last| {
                last.text.push_str(fragment);
                last.clone()
            })
        };

        if let Some(message) = updated {
            self.events.publish(Event::LastMessageUpdate {
                session_id: self.id.clone(),
                message,
            });
        }
    }

    /// Record the tool call the last message triggered
    pub async fn attach_tool_request(&self, request: ToolCallRequest) {
        let updated = {
            let mut session = self.inner.lock().await;
            session.messages.last_mut().map(|last| {
                last.tool_requests = vec![request];
                last.clone()
            })
        };

        if let Some(message) = updated {
            self.events.publish(Event::LastMessageUpdate {
                session_id: self.id.clone(),
                message,
            });
        }
    }

    /// Persist the current state
    pub async fn save(&self) -> Result<()> {
        let snapshot = self.snapshot().await;
        self.persist(&snapshot)
    }

    /// Apply an edit, then persist and announce the result
    pub async fn edit<F>(&self, edit: F) -> Result<Session>
    where
        F: FnOnce(&mut Session) -> Result<()>,
    {
        let snapshot = {
            let mut session = self.inner.lock().await;
            edit(&mut session)?;
            session.clone()
        };
        self.persist(&snapshot)?;
        self.events.publish(Event::SessionUpdate(snapshot.clone()));
        Ok(snapshot)
    }

    /// Every message except the last one
    pub async fn history_without_last(&self) -> Vec<Message> {
        let session = self.inner.lock().await;
        let keep = session.messages.len().saturating_sub(1);
        session.messages[..keep].to_vec()
    }

    pub async fn last_message(&self) -> Option<Message> {
        self.inner.lock().await.messages.last().cloned()
    }

    fn persist(&self, session: &Session) -> Result<()> {
        if self.transient {
            return Ok(());
        }
        self.store.save_session(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::Map;

    fn session_with(origins: &[MessageOrigin]) -> Session {
        let mut session = Session::new();
        for (i, origin) in origins.iter().enumerate() {
            session.push(Message::new(*origin, format!("m{}", i)));
        }
        session
    }

    fn texts(session: &Session) -> Vec<&str> {
        session.messages.iter().map(|m| m.text.as_str()).collect()
    }

    use MessageOrigin::{Assistant as A, Tool as T, User as U};

    #[test]
    fn test_new_session_summary() {
        let mut session = Session::new();
        assert_eq!(session.summary, NEW_SESSION_SUMMARY);
        session.push(Message::user("What's 2+2?"));
        session.push(Message::assistant("4."));
        assert_eq!(session.summary, "What's 2+2?");
    }

    #[test]
    fn test_truncate_keeps_prefix() {
        let mut session = session_with(&[U, A, U, A]);
        let id = session.messages[2].id.clone();
        session.truncate_at(&id).unwrap();
        assert_eq!(texts(&session), vec!["m0", "m1"]);
    }

    #[test]
    fn test_delete_user_message_alone() {
        let mut session = session_with(&[U, A, T, A]);
        let id = session.messages[0].id.clone();
        session.delete_message(&id).unwrap();
        assert_eq!(texts(&session), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_delete_assistant_removes_tool_chain() {
        let mut session = session_with(&[U, A, U, A, T, A, T, A]);
        let id = session.messages[7].id.clone();
        session.delete_message(&id).unwrap();
        assert_eq!(texts(&session), vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn test_delete_middle_assistant() {
        let mut session = session_with(&[U, A, T, A]);
        let id = session.messages[1].id.clone();
        session.delete_message(&id).unwrap();
        assert_eq!(texts(&session), vec!["m0", "m2", "m3"]);
    }

    #[test]
    fn test_unknown_message_is_error() {
        let mut session = session_with(&[U]);
        let err = session.truncate_at("nope").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AgentSmithError>(),
            Some(AgentSmithError::MessageNotFound { .. })
        ));
        assert!(session.delete_message("nope").is_err());
    }

    #[test]
    fn test_transient_flag_not_serialized() {
        let session = Session::transient();
        let value = serde_json::to_value(&session).unwrap();
        assert!(value.get("transient").is_none());
        let back: Session = serde_json::from_value(value).unwrap();
        assert!(!back.transient);
    }

    #[tokio::test]
    async fn test_handle_emits_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let events = EventBus::default();
        let mut subscription = events.subscribe();
        let handle = SessionHandle::new(Session::new(), events, store.clone());

        handle.add_message(Message::user("hi")).await.unwrap();
        handle.add_message(Message::assistant("")).await.unwrap();
        handle.append_to_last_message("hel").await;
        handle.append_to_last_message("lo").await;

        let mut kinds = Vec::new();
        for _ in 0..6 {
            kinds.push(subscription.next().await.unwrap().kind());
        }
        assert_eq!(
            kinds,
            vec![
                "new_message",
                "session_update",
                "new_message",
                "session_update",
                "last_message_update",
                "last_message_update"
            ]
        );

        assert_eq!(handle.last_message().await.unwrap().text, "hello");
        assert_eq!(handle.history_without_last().await.len(), 1);
        assert_eq!(store.load_sessions().unwrap()[0].messages.len(), 2);
    }

    /// Store whose session writes always fail
    struct ReadOnlyStore;

    impl Store for ReadOnlyStore {
        fn load_sessions(&self) -> Result<Vec<Session>> {
            Ok(Vec::new())
        }
        fn save_session(&self, _session: &Session) -> Result<()> {
            Err(AgentSmithError::Storage("disk full".into()).into())
        }
        fn delete_session(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        fn load_roles(&self) -> Result<Vec<crate::agent::role::Role>> {
            Ok(Vec::new())
        }
        fn save_role(&self, _role: &crate::agent::role::Role) -> Result<()> {
            Ok(())
        }
        fn delete_role(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        fn load_providers(&self) -> Result<Vec<crate::providers::ProviderConfig>> {
            Ok(Vec::new())
        }
        fn save_provider(&self, _provider: &crate::providers::ProviderConfig) -> Result<()> {
            Ok(())
        }
        fn delete_provider(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        fn load_mcp_servers(&self) -> Result<Vec<crate::mcp::McpServerConfig>> {
            Ok(Vec::new())
        }
        fn save_mcp_server(&self, _server: &crate::mcp::McpServerConfig) -> Result<()> {
            Ok(())
        }
        fn delete_mcp_server(&self, _id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_persist_publishes_nothing() {
        let events = EventBus::default();
        let mut subscription = events.subscribe();
        let handle = SessionHandle::new(Session::new(), events, Arc::new(ReadOnlyStore));

        let err = handle.add_message(Message::user("hi")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AgentSmithError>(),
            Some(AgentSmithError::Storage(_))
        ));
        assert!(handle
            .edit(|session| {
                session.summary = "renamed".to_string();
                Ok(())
            })
            .await
            .is_err());

        // The first event seen is the fragment, so neither failed write announced anything
        handle.append_to_last_message("!").await;
        assert_eq!(
            subscription.next().await.unwrap().kind(),
            "last_message_update"
        );
        assert_eq!(handle.last_message().await.unwrap().text, "hi!");
    }

    #[tokio::test]
    async fn test_transient_handle_never_persists() {
        let store = Arc::new(MemoryStore::new());
        let handle = SessionHandle::new(Session::transient(), EventBus::default(), store.clone());
        handle.add_message(Message::user("hi")).await.unwrap();
        handle.save().await.unwrap();
        assert!(store.load_sessions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attach_tool_request_to_last_message() {
        let handle = SessionHandle::new(
            Session::new(),
            EventBus::default(),
            Arc::new(MemoryStore::new()),
        );
        handle.add_message(Message::assistant("")).await.unwrap();
        handle
            .attach_tool_request(ToolCallRequest::new("c1", "lua_code_runner", Map::new()))
            .await;
        let last = handle.last_message().await.unwrap();
        assert_eq!(last.tool_requests[0].id, "c1");
    }
}

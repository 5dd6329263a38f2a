/*!
Command handlers for the CLI

This module provides the handlers invoked by the CLI entrypoint. Each one
opens the store, loads the registry and calls into the library; none of
them holds orchestration logic of its own.

- `chat`     - Run one turn and stream the reply
- `models`   - List models across providers
- `provider` - Provider management
- `mcp`      - MCP server management
- `role`     - Role management
- `session`  - Session management
- `events`   - Print the event bus as JSON lines
*/

use crate::agent::Registry;
use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::storage::SqliteStorage;
use std::sync::Arc;

pub mod events;
pub mod mcp;
pub mod models;
pub mod provider;
pub mod role;
pub mod session;

/// Open the configured store and load every collection
///
/// # Arguments
///
/// * `config` - Loaded configuration
/// * `events` - Bus the registry publishes on
pub async fn open_registry(config: &Config, events: EventBus) -> Result<Arc<Registry>> {
    let storage = SqliteStorage::new(&config.storage)?;
    tracing::debug!("Using database {}", storage.path().display());
    let registry = Registry::new(Arc::new(storage), events, config);
    registry.load().await?;
    Ok(registry)
}

/// Shorten `text` to `max` characters for table cells
pub(crate) fn ellipsize(text: &str, max: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max {
        return single_line;
    }
    let kept: String = single_line.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

// Chat command handler
pub mod chat {
    //! One-shot chat turn handler.
    //!
    //! Runs the turn on its own task and prints the assistant text as it
    //! streams in, by following `new_message` and `last_message_update`
    //! events for the session. Ctrl-C cancels the turn.

    use super::*;
    use crate::agent::{AgentLoop, TurnOutcome, TurnRequest};
    use crate::error::AgentSmithError;
    use crate::events::Event;
    use crate::providers::{Message, MessageOrigin};
    use colored::Colorize;
    use std::io::Write;
    use tokio_util::sync::CancellationToken;

    /// Options of one `chat` invocation
    #[derive(Debug, Clone)]
    pub struct ChatOptions {
        pub model: String,
        pub session: Option<String>,
        pub role: Option<String>,
        pub direct: bool,
        pub query: String,
    }

    /// Tracks how much of the in-flight assistant message was printed
    #[derive(Debug, Default)]
    struct StreamPrinter {
        current: Option<String>,
        printed: usize,
    }

    impl StreamPrinter {
        fn on_event(&mut self, session_id: &str, event: &Event) {
            match event {
                Event::NewMessage {
                    session_id: sid,
                    message,
                } if sid == session_id => self.on_new_message(message),
                Event::LastMessageUpdate {
                    session_id: sid,
                    message,
                } if sid == session_id => self.on_update(message),
                _ => {}
            }
        }

        fn on_new_message(&mut self, message: &Message) {
            match message.origin {
                MessageOrigin::Assistant => {
                    self.current = Some(message.id.clone());
                    self.printed = 0;
                    self.on_update(message);
                }
                MessageOrigin::Tool => {
                    let name = message
                        .tool_requests
                        .first()
                        .map(|request| request.name.as_str())
                        .unwrap_or("tool");
                    println!();
                    println!(
                        "{}",
                        format!("[{}] {}", name, ellipsize(&message.text, 120)).cyan()
                    );
                }
                _ => {}
            }
        }

        fn on_update(&mut self, message: &Message) {
            if self.current.as_deref() != Some(message.id.as_str()) {
                return;
            }
            if let Some(fresh) = message.text.get(self.printed..) {
                if !fresh.is_empty() {
                    print!("{}", fresh);
                    let _ = std::io::stdout().flush();
                    self.printed = message.text.len();
                }
            }
        }
    }

    /// Run one chat turn
    ///
    /// # Arguments
    ///
    /// * `config` - Loaded configuration
    /// * `options` - Model, session, role and query
    ///
    /// # Errors
    ///
    /// Returns the turn's error, `SessionNotFound` for an unknown session,
    /// or `Cancelled` after Ctrl-C
    pub async fn run_chat(config: Config, options: ChatOptions) -> Result<()> {
        let events = EventBus::from_config(&config.events);
        let registry = open_registry(&config, events.clone()).await?;

        if !options.direct
            && !registry
                .wait_for_tool_discovery(config.mcp.handshake_timeout())
                .await
        {
            tracing::warn!("Some MCP servers are still loading their tools");
        }

        let session_id = match options.session {
            Some(id) => {
                registry
                    .session(&id)
                    .ok_or_else(|| AgentSmithError::SessionNotFound(id.clone()))?;
                id
            }
            None => registry.create_session().await?.id,
        };

        let request = TurnRequest {
            session_id: session_id.clone(),
            model_id: options.model,
            role_id: options.role,
            query: options.query,
        };

        let mut subscription = events.subscribe();
        let cancel = CancellationToken::new();
        let agent = AgentLoop::new(registry);
        let mut turn = if options.direct {
            let agent = agent.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { agent.direct_chat(request, cancel).await })
        } else {
            agent.spawn_turn(request, cancel.clone())
        };

        let mut printer = StreamPrinter::default();
        let outcome: Result<TurnOutcome> = loop {
            tokio::select! {
                biased;

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, cancelling the turn");
                    cancel.cancel();
                }
                Some(event) = subscription.next() => printer.on_event(&session_id, &event),
                joined = &mut turn => {
                    break joined.map_err(|e| AgentSmithError::Provider(e.to_string()))?;
                }
            }
        };
        println!();

        match outcome {
            Ok(outcome) => {
                tracing::debug!(
                    "Turn finished with {} tool calls in session {}",
                    outcome.tool_calls,
                    outcome.session_id
                );
                eprintln!("{}", format!("session: {}", outcome.session_id).dimmed());
                Ok(())
            }
            Err(e) => {
                eprintln!("{}", format!("Error: {}", e).red());
                Err(e)
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_printer_follows_current_message() {
            let mut printer = StreamPrinter::default();
            let mut message = Message::assistant("");
            printer.on_event(
                "s",
                &Event::NewMessage {
                    session_id: "s".into(),
                    message: message.clone(),
                },
            );
            message.text.push_str("Hello");
            printer.on_event(
                "s",
                &Event::LastMessageUpdate {
                    session_id: "s".into(),
                    message: message.clone(),
                },
            );
            assert_eq!(printer.printed, 5);

            printer.on_event(
                "other",
                &Event::NewMessage {
                    session_id: "other".into(),
                    message: Message::assistant("x"),
                },
            );
            assert_eq!(printer.current.as_deref(), Some(message.id.as_str()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ellipsize() {
        assert_eq!(ellipsize("short", 10), "short");
        assert_eq!(ellipsize("a\nb", 10), "a b");
        assert_eq!(ellipsize("abcdefghijkl", 8), "abcde...");
    }

    #[tokio::test]
    async fn test_open_registry_on_empty_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.db_path = Some(dir.path().join("agentsmith.db"));
        let registry = open_registry(&config, EventBus::default()).await.unwrap();
        assert!(registry.list_sessions().await.is_empty());
        assert!(registry.providers().is_empty());
    }
}

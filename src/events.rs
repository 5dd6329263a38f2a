//! Event bus
//!
//! A single `tokio::sync::broadcast` channel carries every notification.
//! Delivery is best-effort: a subscriber only sees events published after it
//! subscribed, and a subscriber that falls behind by more than the channel
//! capacity skips the events it missed. Subscriptions yield a synthetic
//! heartbeat whenever no real event arrives within the heartbeat interval.

use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agent::role::Role;
use crate::agent::session::{Session, SessionSummary};
use crate::config::EventsConfig;
use crate::mcp::McpServerInfo;
use crate::providers::{Message, ProviderInfo};

/// Every notification the engine emits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    SessionUpdate(Session),
    SessionListUpdate(Vec<SessionSummary>),
    NewMessage {
        session_id: String,
        message: Message,
    },
    /// The in-flight assistant message grew
    LastMessageUpdate {
        session_id: String,
        message: Message,
    },
    ProviderListUpdate(Vec<ProviderInfo>),
    McpListUpdate(Vec<McpServerInfo>),
    RoleListUpdate(Vec<Role>),
    Heartbeat,
}

impl Event {
    /// Wire name of the event
    pub fn kind(&self) -> &'static str {
        match self {
            Event::SessionUpdate(_) => "session_update",
            Event::SessionListUpdate(_) => "session_list_update",
            Event::NewMessage { .. } => "new_message",
            Event::LastMessageUpdate { .. } => "last_message_update",
            Event::ProviderListUpdate(_) => "provider_list_update",
            Event::McpListUpdate(_) => "mcp_list_update",
            Event::RoleListUpdate(_) => "role_list_update",
            Event::Heartbeat => "heartbeat",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    heartbeat: Duration,
}

impl EventBus {
    /// Create a bus
    ///
    /// # Arguments
    ///
    /// * `capacity` - Events buffered per subscriber before it lags
    /// * `heartbeat` - Idle interval after which subscribers get a heartbeat
    pub fn new(capacity: usize, heartbeat: Duration) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, heartbeat }
    }

    pub fn from_config(config: &EventsConfig) -> Self {
        Self::new(
            config.channel_capacity,
            Duration::from_secs(config.heartbeat_seconds),
        )
    }

    /// Publish to every current subscriber
    pub fn publish(&self, event: Event) {
        tracing::trace!("event {}", event.kind());
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            heartbeat: self.heartbeat,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::from_config(&EventsConfig::default())
    }
}

/// One subscriber's view of the bus
#[derive(Debug)]
pub struct EventSubscription {
    receiver: broadcast::Receiver<Event>,
    heartbeat: Duration,
}

impl EventSubscription {
    /// Next event, or a heartbeat after the idle interval
    ///
    /// Returns `None` once the bus is dropped.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match tokio::time::timeout(self.heartbeat, self.receiver.recv()).await {
                Err(_) => return Some(Event::Heartbeat),
                Ok(Ok(event)) => return Some(event),
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!("Event subscriber lagged, skipped {} events", skipped);
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
            }
        }
    }

    /// Consume the subscription as a stream
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            let event = subscription.next().await?;
            Some((event, subscription))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MessageOrigin;
    use futures::StreamExt;

    fn message_event() -> Event {
        Event::NewMessage {
            session_id: "s1".to_string(),
            message: Message::user("hello"),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new(16, Duration::from_secs(10));
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(message_event());

        for subscription in [&mut first, &mut second] {
            match subscription.next().await.unwrap() {
                Event::NewMessage { session_id, message } => {
                    assert_eq!(session_id, "s1");
                    assert_eq!(message.origin, MessageOrigin::User);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(Event::Heartbeat);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new(16, Duration::from_millis(20));
        bus.publish(message_event());
        let mut late = bus.subscribe();
        assert_eq!(late.next().await, Some(Event::Heartbeat));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_when_idle() {
        let bus = EventBus::new(16, Duration::from_secs(10));
        let mut subscription = bus.subscribe();
        let started = tokio::time::Instant::now();
        assert_eq!(subscription.next().await, Some(Event::Heartbeat));
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let bus = EventBus::new(2, Duration::from_secs(10));
        let mut subscription = bus.subscribe();
        for _ in 0..5 {
            bus.publish(Event::RoleListUpdate(Vec::new()));
        }
        bus.publish(message_event());

        let mut kinds = Vec::new();
        while let Some(event) = subscription.next().await {
            kinds.push(event.kind());
            if event.kind() == "new_message" {
                break;
            }
        }
        assert!(kinds.len() <= 2);
        assert_eq!(kinds.last(), Some(&"new_message"));
    }

    #[tokio::test]
    async fn test_stream_ends_when_bus_dropped() {
        let bus = EventBus::new(4, Duration::from_secs(10));
        let stream = bus.subscribe().into_stream();
        bus.publish(Event::ProviderListUpdate(Vec::new()));
        drop(bus);

        let events: Vec<Event> = stream.collect().await;
        assert_eq!(events, vec![Event::ProviderListUpdate(Vec::new())]);
    }

    #[test]
    fn test_wire_shape() {
        let value = serde_json::to_value(Event::McpListUpdate(Vec::new())).unwrap();
        assert_eq!(value, serde_json::json!({"type": "mcp_list_update", "data": []}));
        let value = serde_json::to_value(Event::Heartbeat).unwrap();
        assert_eq!(value, serde_json::json!({"type": "heartbeat"}));
    }
}

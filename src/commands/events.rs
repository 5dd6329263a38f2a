//! Event bus observer

use super::open_registry;
use crate::config::Config;
use crate::error::Result;
use crate::events::{Event, EventBus};
use std::io::Write;

/// Print every event as one JSON line until Ctrl-C
///
/// The subscription is taken before the registry loads, so provider and
/// MCP discovery updates from this process are printed too.
pub async fn watch_events(config: &Config) -> Result<()> {
    let events = EventBus::from_config(&config.events);
    let mut subscription = events.subscribe();
    let _registry = open_registry(config, events.clone()).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = subscription.next() => match event {
                Some(event) => print_event(&event)?,
                None => break,
            },
        }
    }
    Ok(())
}

fn print_event(event: &Event) -> Result<()> {
    let line = serde_json::to_string(event)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()?;
    Ok(())
}

//! Session management commands

use super::{ellipsize, open_registry};
use crate::agent::Session;
use crate::cli::SessionCommand;
use crate::config::Config;
use crate::error::{AgentSmithError, Result};
use crate::events::EventBus;
use crate::providers::MessageOrigin;
use colored::{ColoredString, Colorize};
use prettytable::{format, row, Table};

/// Handle `session` subcommands
pub async fn handle_session(config: &Config, command: SessionCommand) -> Result<()> {
    let registry = open_registry(config, EventBus::from_config(&config.events)).await?;

    match command {
        SessionCommand::List => {
            let sessions = registry.list_sessions().await;
            if sessions.is_empty() {
                println!("{}", "No sessions found.".yellow());
                return Ok(());
            }

            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
            table.add_row(row!["ID".bold(), "Summary".bold(), "Last Activity".bold()]);
            for session in sessions {
                table.add_row(row![
                    session.id.cyan(),
                    ellipsize(&session.summary, 50),
                    session.date.format("%Y-%m-%d %H:%M").to_string()
                ]);
            }
            println!("\nSessions:");
            table.printstd();
            println!();
            println!(
                "Use {} to continue a session.",
                "agentsmith chat --session <ID>".cyan()
            );
            println!();
        }
        SessionCommand::New => {
            let session = registry.create_session().await?;
            println!("{}", session.id);
        }
        SessionCommand::Show { id } => {
            let session = registry
                .session(&id)
                .ok_or_else(|| AgentSmithError::SessionNotFound(id.clone()))?
                .snapshot()
                .await;
            print_session(&session);
        }
        SessionCommand::Delete { id } => {
            registry.delete_session(&id).await?;
            println!("{}", format!("Deleted session {}", id).green());
        }
        SessionCommand::Truncate { session, message } => {
            let session = registry.truncate_session(&session, &message).await?;
            println!(
                "{}",
                format!(
                    "Session {} now has {} messages",
                    session.id,
                    session.messages.len()
                )
                .green()
            );
        }
        SessionCommand::DeleteMessage { session, message } => {
            let session = registry.delete_message(&session, &message).await?;
            println!(
                "{}",
                format!(
                    "Session {} now has {} messages",
                    session.id,
                    session.messages.len()
                )
                .green()
            );
        }
    }

    Ok(())
}

fn origin_tag(origin: MessageOrigin) -> ColoredString {
    match origin {
        MessageOrigin::User => "user".green(),
        MessageOrigin::Assistant => "assistant".cyan(),
        MessageOrigin::Tool => "tool".yellow(),
        MessageOrigin::System => "system".magenta(),
    }
}

fn print_session(session: &Session) {
    println!(
        "\n{} {}  {}\n",
        session.summary.bold(),
        format!("({})", session.id).dimmed(),
        session.date.format("%Y-%m-%d %H:%M")
    );
    for message in &session.messages {
        println!("{} {}", origin_tag(message.origin), message.id.dimmed());
        for request in &message.tool_requests {
            println!(
                "  {} {} {}",
                "->".dimmed(),
                request.name,
                serde_json::Value::Object(request.params.clone())
            );
        }
        if !message.text.is_empty() {
            println!("{}", message.text);
        }
        println!();
    }
}

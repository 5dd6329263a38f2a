//! AgentSmith - local tool-calling orchestration engine
//!
#![doc = "AgentSmith - local tool-calling orchestration engine"]
#![doc = "Main entry point for the agentsmith command-line front door."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use agentsmith::cli::{Cli, Commands};
use agentsmith::commands;
use agentsmith::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);

    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;
    config.validate()?;

    match cli.command {
        Commands::Chat {
            model,
            session,
            role,
            direct,
            query,
        } => {
            tracing::info!("Starting chat turn with model {}", model);
            if let Some(s) = &session {
                tracing::debug!("Continuing session: {}", s);
            }
            let options = commands::chat::ChatOptions {
                model,
                session,
                role,
                direct,
                query: query.join(" "),
            };
            commands::chat::run_chat(config, options).await?;
            Ok(())
        }
        Commands::Models { json } => {
            commands::models::list_models(&config, json).await?;
            Ok(())
        }
        Commands::Provider { command } => {
            commands::provider::handle_provider(&config, command).await?;
            Ok(())
        }
        Commands::Mcp { command } => {
            commands::mcp::handle_mcp(&config, command).await?;
            Ok(())
        }
        Commands::Role { command } => {
            commands::role::handle_role(&config, command).await?;
            Ok(())
        }
        Commands::Session { command } => {
            commands::session::handle_session(&config, command).await?;
            Ok(())
        }
        Commands::Events => {
            tracing::info!("Watching the event bus");
            commands::events::watch_events(&config).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so streamed replies on stdout stay clean.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "agentsmith=debug"
    } else {
        "agentsmith=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

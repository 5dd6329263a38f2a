//! Provider management commands

use super::{ellipsize, open_registry};
use crate::cli::ProviderCommand;
use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::providers::{ApiType, ProviderConfig};
use colored::Colorize;
use prettytable::{format, row, Table};

/// Handle `provider` subcommands
pub async fn handle_provider(config: &Config, command: ProviderCommand) -> Result<()> {
    let registry = open_registry(config, EventBus::from_config(&config.events)).await?;

    match command {
        ProviderCommand::List => {
            let providers = registry.provider_infos();
            if providers.is_empty() {
                println!("{}", "No providers registered.".yellow());
                return Ok(());
            }

            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
            table.add_row(row![
                "ID".bold(),
                "Name".bold(),
                "Type".bold(),
                "URL".bold(),
                "Rate limit".bold(),
                "Models".bold()
            ]);
            for provider in providers {
                let rate = if provider.rate_limit == 0 {
                    "-".to_string()
                } else {
                    format!("{}/min", provider.rate_limit)
                };
                table.add_row(row![
                    provider.id.cyan(),
                    provider.name,
                    provider.api_type.as_str(),
                    ellipsize(&provider.url, 40),
                    rate,
                    provider.models.len()
                ]);
            }
            println!("\nProviders:");
            table.printstd();
            println!();
        }
        ProviderCommand::Add {
            name,
            url,
            api_key,
            api_type,
            rate_limit,
        } => {
            let api_type: ApiType = api_type.parse()?;
            let mut provider = ProviderConfig::new(name, url, api_type);
            provider.api_key = api_key.unwrap_or_default();
            provider.rate_limit = rate_limit;

            let info = registry.create_provider(provider).await?;
            println!(
                "{}",
                format!(
                    "Added provider {} ({}) with {} models",
                    info.name,
                    info.id,
                    info.models.len()
                )
                .green()
            );
        }
        ProviderCommand::Remove { id } => {
            registry.delete_provider(&id)?;
            println!("{}", format!("Removed provider {}", id).green());
        }
        ProviderCommand::Test { id } => {
            if registry.test_provider(&id).await? {
                println!("{}", format!("Provider {} is reachable", id).green());
            } else {
                println!("{}", format!("Provider {} failed to list models", id).red());
            }
        }
    }

    Ok(())
}

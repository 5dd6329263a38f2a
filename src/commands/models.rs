//! Model listing command

use super::open_registry;
use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::providers::{Model, ProviderInfo};
use colored::Colorize;
use prettytable::{format, row, Table};

/// List the models of every registered provider
///
/// Providers whose endpoints cannot be reached are listed without models.
///
/// # Arguments
///
/// * `config` - Loaded configuration
/// * `json` - Print JSON instead of a table
pub async fn list_models(config: &Config, json: bool) -> Result<()> {
    let registry = open_registry(config, EventBus::from_config(&config.events)).await?;
    let providers = registry.provider_infos();

    if json {
        let models: Vec<&Model> = providers.iter().flat_map(|p| p.models.iter()).collect();
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }

    if providers.is_empty() {
        println!(
            "{} Add one with {}",
            "No providers registered.".yellow(),
            "agentsmith provider add".cyan()
        );
        return Ok(());
    }

    output_models_table(&providers);
    Ok(())
}

fn output_models_table(providers: &[ProviderInfo]) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row!["Model".bold(), "Provider".bold(), "Type".bold()]);

    for provider in providers {
        if provider.models.is_empty() {
            table.add_row(row![
                "-".dimmed(),
                provider.name,
                provider.api_type.as_str()
            ]);
        }
        for model in &provider.models {
            table.add_row(row![model.id.cyan(), provider.name, provider.api_type.as_str()]);
        }
    }

    println!("\nAvailable models:\n");
    table.printstd();
    println!();
}

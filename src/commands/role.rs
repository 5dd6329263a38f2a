//! Role management commands

use super::{ellipsize, open_registry};
use crate::agent::RoleConfig;
use crate::cli::RoleCommand;
use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use colored::Colorize;
use prettytable::{format, row, Table};

/// Handle `role` subcommands
pub async fn handle_role(config: &Config, command: RoleCommand) -> Result<()> {
    let registry = open_registry(config, EventBus::from_config(&config.events)).await?;

    match command {
        RoleCommand::List => {
            let roles = registry.roles();
            if roles.is_empty() {
                println!("{}", "No roles defined.".yellow());
                return Ok(());
            }

            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
            table.add_row(row!["ID".bold(), "Name".bold(), "Role".bold(), "Style".bold()]);
            for role in roles {
                table.add_row(row![
                    role.id.cyan(),
                    role.config.name,
                    ellipsize(&role.config.role, 40),
                    ellipsize(&role.config.style, 30)
                ]);
            }
            println!("\nRoles:");
            table.printstd();
            println!();
        }
        RoleCommand::Add {
            name,
            instruction,
            role,
            style,
        } => {
            let created = registry.create_role(RoleConfig {
                name,
                general_instruction: instruction,
                role,
                style,
            })?;
            println!(
                "{}",
                format!("Added role {} ({})", created.config.name, created.id).green()
            );
        }
        RoleCommand::Remove { id } => {
            registry.delete_role(&id)?;
            println!("{}", format!("Removed role {}", id).green());
        }
    }

    Ok(())
}

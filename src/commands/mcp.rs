//! MCP server management commands

use super::{ellipsize, open_registry};
use crate::cli::McpCommand;
use crate::config::Config;
use crate::error::{AgentSmithError, Result};
use crate::events::EventBus;
use crate::mcp::{McpServerConfig, McpServerInfo, McpTransportKind};
use colored::Colorize;
use prettytable::{format, row, Table};

/// Handle `mcp` subcommands
pub async fn handle_mcp(config: &Config, command: McpCommand) -> Result<()> {
    let registry = open_registry(config, EventBus::from_config(&config.events)).await?;

    match command {
        McpCommand::List => {
            registry
                .wait_for_tool_discovery(config.mcp.handshake_timeout())
                .await;
            let servers = registry.mcp_infos();
            if servers.is_empty() {
                println!("{}", "No MCP servers registered.".yellow());
                return Ok(());
            }
            output_servers_table(&servers);
        }
        McpCommand::Add {
            name,
            transport,
            url,
            command,
            args,
            inactive,
        } => {
            let transport: McpTransportKind = transport.parse()?;
            let mut server = match transport {
                McpTransportKind::Stdio => McpServerConfig::stdio(
                    name,
                    command.ok_or_else(|| {
                        AgentSmithError::Config("--command is required for stdio".into())
                    })?,
                    args,
                ),
                McpTransportKind::Sse => McpServerConfig::sse(
                    name,
                    url.ok_or_else(|| {
                        AgentSmithError::Config("--url is required for sse".into())
                    })?,
                ),
            };
            server.active = !inactive;

            let info = registry.create_mcp_server(server).await?;
            println!(
                "{}",
                format!(
                    "Added MCP server {} ({}) with {} tools",
                    info.config.name,
                    info.config.id,
                    info.tools.len()
                )
                .green()
            );
        }
        McpCommand::Remove { id } => {
            registry.delete_mcp_server(&id)?;
            println!("{}", format!("Removed MCP server {}", id).green());
        }
        McpCommand::Enable { id } => {
            registry.set_mcp_active(&id, true)?;
            println!("{}", format!("Enabled MCP server {}", id).green());
        }
        McpCommand::Disable { id } => {
            registry.set_mcp_active(&id, false)?;
            println!("{}", format!("Disabled MCP server {}", id).green());
        }
        McpCommand::Test { id } => {
            if registry.test_mcp_server(&id).await? {
                println!("{}", format!("MCP server {} is working", id).green());
            } else {
                println!("{}", format!("MCP server {} offers no tools", id).red());
            }
        }
    }

    Ok(())
}

fn output_servers_table(servers: &[McpServerInfo]) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "ID".bold(),
        "Name".bold(),
        "Transport".bold(),
        "Target".bold(),
        "Active".bold(),
        "Tools".bold()
    ]);

    for server in servers {
        let config = &server.config;
        let target = match config.transport {
            McpTransportKind::Stdio => {
                let mut line = config.command.clone();
                for arg in &config.args {
                    line.push(' ');
                    line.push_str(arg);
                }
                line
            }
            McpTransportKind::Sse => config.url.clone(),
        };
        let tools = if server.loaded {
            server
                .tools
                .iter()
                .map(|tool| tool.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            "not loaded".to_string()
        };
        table.add_row(row![
            config.id.cyan(),
            config.name,
            config.transport.as_str(),
            ellipsize(&target, 40),
            if config.active { "yes".green() } else { "no".red() },
            ellipsize(&tools, 50)
        ]);
    }

    println!("\nMCP servers:");
    table.printstd();
    println!();
}

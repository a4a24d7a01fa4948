//! agentical - MCP client runtime CLI
//!
#![doc = "Main entry point for the agentical command-line tool."]

use std::time::Duration;

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use agentical::cli::{Cli, Commands};
use agentical::commands;
use agentical::config::McpConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.json_logs);

    let config = McpConfig::load(&cli.config)?;
    tracing::debug!(
        path = %cli.config.display(),
        servers = config.servers.len(),
        "Loaded configuration"
    );

    match cli.command {
        Commands::Servers { json } => commands::mcp::list_servers(&config, json),
        Commands::Connect {
            server,
            hold_secs,
            json,
        } => {
            commands::mcp::connect_servers(config, server, Duration::from_secs(hold_secs), json)
                .await
        }
    }
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agentical=info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

//! Handlers for the `servers` and `connect` subcommands

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::config::McpConfig;
use crate::error::Result;
use crate::provider::McpProvider;
use crate::runtime::ConnectionState;

/// One line of `connect` output.
#[derive(Debug, Clone, Serialize)]
pub struct ServerReport {
    pub server: String,
    pub state: ConnectionState,
    pub tools: usize,
    pub resources: usize,
    pub prompts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Print the configured servers.
pub fn list_servers(config: &McpConfig, json: bool) -> Result<()> {
    if json {
        let servers: Vec<_> = config
            .servers
            .iter()
            .map(|(name, spec)| {
                serde_json::json!({
                    "name": name,
                    "command": spec.command,
                    "args": spec.args,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&servers)?);
        return Ok(());
    }

    for (name, spec) in &config.servers {
        if spec.args.is_empty() {
            println!("{}: {}", name, spec.command);
        } else {
            println!("{}: {} {}", name, spec.command, spec.args.join(" "));
        }
    }
    Ok(())
}

/// Connect `server` (or every server), report, hold, then clean up.
///
/// # Errors
///
/// Fails when not a single server could be connected.
pub async fn connect_servers(
    config: McpConfig,
    server: Option<String>,
    hold: Duration,
    json: bool,
) -> Result<()> {
    let provider = McpProvider::new(config)?;

    let results: BTreeMap<String, Result<()>> = match &server {
        Some(name) => {
            let result = provider.connect(name).await;
            std::iter::once((name.clone(), result)).collect()
        }
        None => provider.connect_all().await,
    };

    let mut reports = Vec::with_capacity(results.len());
    for (name, result) in &results {
        reports.push(ServerReport {
            server: name.clone(),
            state: provider.server_state(name).await,
            tools: provider.server_tools(name).await.len(),
            resources: provider.server_resources(name).await.len(),
            prompts: provider.server_prompts(name).await.len(),
            error: result.as_ref().err().map(|e| format!("{e:#}")),
        });
    }
    print_reports(&reports, json)?;

    if !hold.is_zero() {
        tracing::info!(secs = hold.as_secs(), "holding connections");
        tokio::select! {
            _ = tokio::time::sleep(hold) => {}
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
        }
    }

    for (name, result) in provider.cleanup_all().await {
        if let Err(e) = result {
            tracing::warn!(server = %name, "cleanup: {e:#}");
        }
    }

    if results.values().all(|r| r.is_err()) {
        anyhow::bail!("none of {} server(s) could be connected", results.len());
    }
    Ok(())
}

fn print_reports(reports: &[ServerReport], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }
    for r in reports {
        match &r.error {
            None => println!(
                "{}: {} (tools: {}, resources: {}, prompts: {})",
                r.server, r.state, r.tools, r.resources, r.prompts
            ),
            Some(e) => println!("{}: {} ({})", r.server, r.state, e),
        }
    }
    Ok(())
}

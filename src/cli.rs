//! Command-line interface definition for agentical
//!
//! This module defines the CLI structure using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// agentical - MCP client runtime
///
/// Connects to the MCP servers described in a configuration file, keeps
/// the sessions healthy and reports the capabilities they expose.
#[derive(Parser, Debug, Clone)]
#[command(name = "agentical")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the server configuration file (JSON or YAML)
    #[arg(
        short,
        long,
        global = true,
        env = "AGENTICAL_CONFIG",
        default_value = "mcp.json"
    )]
    pub config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List configured servers
    Servers {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Connect to servers, print their status and capabilities, then clean up
    Connect {
        /// Connect only this server (default: all configured servers)
        #[arg(short, long)]
        server: Option<String>,

        /// Keep the connections open this many seconds before cleaning up
        #[arg(long, default_value_t = 0)]
        hold_secs: u64,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from the process arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

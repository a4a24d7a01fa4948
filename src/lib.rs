//! agentical - MCP client runtime library
//!
//! Connects an LLM application to a fleet of MCP servers, keeps each session
//! alive with heartbeats and automatic reconnection, and exposes the tools,
//! resources and prompts the servers advertise.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `config`: server catalog and runtime settings
//! - `error`: error types and result aliases
//! - `events`: structured lifecycle events
//! - `mcp`: JSON-RPC client, MCP protocol types and transports
//! - `session`: the session abstraction and its MCP implementation
//! - `runtime`: connection state machine, retry, heartbeat, connect/disconnect
//! - `registry`: per-server capability registries
//! - `provider`: the facade applications hold
//! - `cli` / `commands`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use agentical::{McpConfig, McpProvider};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = McpProvider::new(McpConfig::load("mcp.json")?)?;
//!     provider.connect_all().await;
//!     println!("{} tools available", provider.tools().await.len());
//!     provider.cleanup_all().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod mcp;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod session;

// Re-export commonly used types
pub use config::{McpConfig, RuntimeSettings, ServerSpec};
pub use error::{AgenticalError, Result};
pub use events::{EventSink, LifecycleEvent, RecordingEventSink, TracingEventSink};
pub use provider::McpProvider;
pub use registry::{CapabilityEntry, CapabilityRegistry};
pub use runtime::{ConnectionService, ConnectionState};
pub use session::{McpSession, Session, SessionFactory, StdioSessionFactory};

#[cfg(test)]
pub mod test_utils;

//! Command handlers for the CLI
//!
//! - `mcp` -- list configured servers; connect, report and clean up

pub mod mcp;

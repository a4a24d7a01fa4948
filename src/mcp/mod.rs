//! MCP (Model Context Protocol) wire layer
//!
//! - `types`     -- protocol types and JSON-RPC primitives
//! - `client`    -- transport-agnostic async JSON-RPC 2.0 client
//! - `protocol`  -- typed handshake and request wrapper over `JsonRpcClient`
//! - `transport` -- `Transport` trait, stdio implementation, test fake

pub mod client;
pub mod protocol;
pub mod transport;
pub mod types;

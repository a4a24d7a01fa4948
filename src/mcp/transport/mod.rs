//! MCP transport abstraction and implementations
//!
//! - [`stdio::StdioTransport`] spawns a child process and talks
//!   newline-delimited JSON over its stdin/stdout pipes.
//! - `fake::FakeTransport` is an in-process pair of channels used by unit
//!   tests.
//!
//! A transport only moves complete JSON-RPC strings; correlation, timeouts
//! and the handshake live in [`crate::mcp::client`] and
//! [`crate::mcp::protocol`].

use std::pin::Pin;

use futures::Stream;

use crate::error::Result;

/// Abstraction over MCP transport implementations, used through
/// `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send one complete JSON-RPC message. The transport adds any framing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::AgenticalError::McpTransport`] if the peer is
    /// gone or the transport was closed.
    async fn send(&self, message: String) -> Result<()>;

    /// Stream of inbound JSON-RPC messages, one complete object per item.
    /// Ends when the peer disconnects or the transport is closed.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Stream of diagnostic lines (a child's stderr). Never an error signal.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Release the underlying resources. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

pub mod stdio;

#[cfg(test)]
pub mod fake;

//! Error types for agentical
//!
//! Every fallible operation in the crate returns [`Result`], an alias for
//! `anyhow::Result`. The concrete failure is always an [`AgenticalError`]
//! wrapped in `anyhow::Error`, so callers that need to branch on the kind of
//! failure can `downcast_ref::<AgenticalError>()`.

use thiserror::Error;

/// Main error type for agentical operations.
#[derive(Error, Debug)]
pub enum AgenticalError {
    /// Invalid or unreadable configuration. Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A server could not be reached after every retry was spent.
    #[error("Failed to connect to server '{server}' after {attempts} attempt(s): {source}")]
    Connect {
        /// Name of the server that could not be reached
        server: String,
        /// Number of attempts made before giving up
        attempts: u32,
        /// The failure reported by the last attempt
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// A server stopped answering heartbeat pings.
    #[error("Heartbeat timeout for server '{server}': {misses} consecutive missed ping(s)")]
    HeartbeatTimeout {
        /// Name of the unresponsive server
        server: String,
        /// Consecutive misses observed when the threshold was hit
        misses: u32,
    },

    /// No connected server owns the requested capability.
    #[error("No connected server provides {kind} '{id}'")]
    CapabilityNotFound {
        /// Capability kind ("tool", "resource" or "prompt")
        kind: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Releasing a server's resources failed. The server still ends up
    /// disconnected.
    #[error("Cleanup failed for server '{server}': {message}")]
    Cleanup {
        /// Name of the server being torn down
        server: String,
        /// What went wrong
        message: String,
    },

    /// Transport-level failure (process spawn, closed pipe, dead read loop).
    #[error("MCP transport error: {0}")]
    McpTransport(String),

    /// A request did not receive a response in time.
    #[error("MCP timeout: server '{server}' did not answer '{method}' in time")]
    McpTimeout {
        /// Name of the server the request was sent to
        server: String,
        /// JSON-RPC method that timed out
        method: String,
    },

    /// The server answered with a JSON-RPC error object.
    #[error("MCP error: {0}")]
    Mcp(String),

    /// The server negotiated a protocol revision we do not speak.
    #[error("MCP protocol version mismatch: expected one of {expected:?}, got '{got}'")]
    McpProtocolVersion {
        /// Versions this client accepts
        expected: Vec<String>,
        /// Version the server returned
        got: String,
    },

    /// The server name is not present in the loaded configuration.
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    /// The operation was aborted by a disconnect or shutdown.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for agentical operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

impl AgenticalError {
    /// Returns `true` when a connection attempt that failed with this error
    /// is worth repeating.
    ///
    /// Configuration problems and cancellations are permanent; everything
    /// else (spawn failures, timeouts, protocol errors during the handshake)
    /// may be transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AgenticalError::Config(_)
                | AgenticalError::Cancelled(_)
                | AgenticalError::UnknownServer(_)
        )
    }
}

/// [`AgenticalError::is_retryable`] for an `anyhow` error. Errors that are not
/// an [`AgenticalError`] are treated as transient.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<AgenticalError>()
        .map_or(true, AgenticalError::is_retryable)
}

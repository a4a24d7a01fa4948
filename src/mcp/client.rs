//! Transport-agnostic async JSON-RPC 2.0 client
//!
//! [`JsonRpcClient`] writes serialized requests to an outbound
//! [`tokio::sync::mpsc`] channel and resolves them from an inbound channel
//! serviced by [`start_read_loop`]. The transport only moves strings between
//! those channels and the wire.
//!
//! - In-flight requests live in a `pending` map keyed by `u64` request id,
//!   each holding the `oneshot::Sender` that receives the `result` or `error`.
//! - Server-initiated requests are answered with `-32601 Method not found`;
//!   this client exposes no sampling, roots or elicitation handlers.
//! - Server notifications are logged and otherwise ignored.
//! - Cancelling the read loop drops every pending sender, so awaiting callers
//!   fail fast instead of waiting out their timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{AgenticalError, Result};
use crate::mcp::types::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, METHOD_NOT_FOUND,
};

/// Default timeout applied to every request when the caller does not specify one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap =
    HashMap<u64, oneshot::Sender<std::result::Result<serde_json::Value, JsonRpcError>>>;

/// Transport-agnostic async JSON-RPC 2.0 client bound to one server.
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
/// use agentical::mcp::client::{start_read_loop, JsonRpcClient};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let (out_tx, _out_rx) = mpsc::unbounded_channel::<String>();
///     let (_in_tx, in_rx) = mpsc::unbounded_channel::<String>();
///     let client = Arc::new(JsonRpcClient::new("files", out_tx));
///     let _loop = start_read_loop(in_rx, CancellationToken::new(), Arc::clone(&client));
///     Ok(())
/// }
/// ```
pub struct JsonRpcClient {
    server: Arc<str>,
    default_timeout: Duration,
    next_id: Arc<AtomicU64>,
    pending: Arc<Mutex<PendingMap>>,
    outbound_tx: mpsc::UnboundedSender<String>,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("server", &self.server)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a client for `server` that writes to `outbound_tx`.
    ///
    /// The caller wires the matching outbound receiver to a transport writer
    /// and passes the inbound receiver to [`start_read_loop`].
    pub fn new(server: impl Into<String>, outbound_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            server: Arc::from(server.into()),
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbound_tx,
        }
    }

    /// Use `timeout` for requests that do not pass their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// A second handle onto the same pending map and id counter.
    ///
    /// The read loop takes an `Arc<JsonRpcClient>` while the protocol layer
    /// owns its client by value; both must resolve through one pending map.
    pub fn clone_shared(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
            default_timeout: self.default_timeout,
            next_id: Arc::clone(&self.next_id),
            pending: Arc::clone(&self.pending),
            outbound_tx: self.outbound_tx.clone(),
        }
    }

    /// Send a JSON-RPC request and await the typed response.
    ///
    /// # Errors
    ///
    /// - [`AgenticalError::McpTransport`] if the outbound channel is closed or
    ///   the read loop exits before the response arrives.
    /// - [`AgenticalError::McpTimeout`] if no response arrives in time.
    /// - [`AgenticalError::Mcp`] if the server returns an error object.
    /// - [`AgenticalError::Serialization`] if (de)serialization fails.
    pub async fn request<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register before sending so a fast response always finds its slot.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = serde_json::to_string(&JsonRpcRequest::new(
            id,
            method,
            Some(serde_json::to_value(params)?),
        ))?;

        if self.outbound_tx.send(message).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(AgenticalError::McpTransport("outbound channel closed".to_string()).into());
        }

        let deadline = timeout.unwrap_or(self.default_timeout);
        let outcome = match tokio::time::timeout(deadline, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(AgenticalError::McpTimeout {
                    server: self.server.to_string(),
                    method: method.to_string(),
                }
                .into());
            }
        };

        let rpc_result = outcome.map_err(|_| {
            AgenticalError::McpTransport("read loop exited before response arrived".to_string())
        })?;

        let value = rpc_result.map_err(|e| AgenticalError::Mcp(e.to_string()))?;

        serde_json::from_value(value).map_err(|e| AgenticalError::Serialization(e).into())
    }

    /// Send a JSON-RPC notification (no `id`, no response).
    pub fn notify<P: serde::Serialize + Send>(&self, method: &str, params: P) -> Result<()> {
        let message = serde_json::to_string(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": serde_json::to_value(params)?
        }))?;

        self.outbound_tx
            .send(message)
            .map_err(|_| AgenticalError::McpTransport("outbound channel closed".to_string()))?;

        Ok(())
    }

    /// Number of requests still waiting for a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Start the JSON-RPC read loop as a background Tokio task.
///
/// Each inbound string is classified as a response (resolves the pending
/// sender), a server-initiated request (answered with `-32601`), or a
/// notification (logged). The loop ends when `cancellation` fires or the
/// inbound channel closes; either way every pending sender is dropped.
pub fn start_read_loop(
    mut inbound_rx: mpsc::UnboundedReceiver<String>,
    cancellation: CancellationToken,
    client: Arc<JsonRpcClient>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => break,

                maybe_msg = inbound_rx.recv() => match maybe_msg {
                    Some(raw) => dispatch_message(&raw, &client).await,
                    None => {
                        tracing::debug!(server = %client.server, "MCP inbound channel closed");
                        break;
                    }
                },
            }
        }

        client.pending.lock().await.clear();
    })
}

async fn dispatch_message(raw: &str, client: &JsonRpcClient) {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                server = %client.server,
                "MCP read loop: failed to parse inbound JSON: {e}"
            );
            return;
        }
    };

    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let method = value.get("method").and_then(|m| m.as_str());
    let is_response = value.get("result").is_some() || value.get("error").is_some();

    match (has_id, method) {
        (true, None) if is_response => handle_response(value, client).await,
        (true, Some(method)) => reject_server_request(method, &value, client),
        (false, Some(method)) => {
            tracing::debug!(server = %client.server, method, "MCP notification ignored");
        }
        _ => {
            tracing::debug!(
                server = %client.server,
                "MCP read loop: unclassifiable message ignored"
            );
        }
    }
}

async fn handle_response(value: serde_json::Value, client: &JsonRpcClient) {
    let id_val = &value["id"];
    let id = id_val
        .as_u64()
        .or_else(|| id_val.as_str().and_then(|s| s.parse::<u64>().ok()));

    let Some(id) = id else {
        tracing::warn!(
            server = %client.server,
            "MCP read loop: response has non-integer id: {id_val}"
        );
        return;
    };

    let Some(tx) = client.pending.lock().await.remove(&id) else {
        tracing::debug!(server = %client.server, "MCP read loop: response for unknown id {id}");
        return;
    };

    let outcome = match value.get("error") {
        Some(error_val) => Err(serde_json::from_value::<JsonRpcError>(error_val.clone())
            .unwrap_or_else(|_| JsonRpcError {
                code: INTERNAL_ERROR,
                message: format!("malformed error object: {error_val}"),
                data: None,
            })),
        None => Ok(value
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null)),
    };

    // The caller may already have timed out.
    let _ = tx.send(outcome);
}

fn reject_server_request(method: &str, value: &serde_json::Value, client: &JsonRpcClient) {
    tracing::debug!(server = %client.server, method, "rejecting server-initiated request");

    let response = JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id: value.get("id").cloned(),
        result: None,
        error: Some(JsonRpcError {
            code: METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
            data: None,
        }),
    };

    if let Ok(serialized) = serde_json::to_string(&response) {
        let _ = client.outbound_tx.send(serialized);
    }
}

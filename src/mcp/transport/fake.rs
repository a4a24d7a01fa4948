//! In-process fake transport for unit tests
//!
//! ```text
//! client send() -----> outbound_tx -----> outbound_rx (handle reads)
//! handle inbound_tx ------------------->  receive()   (client reads)
//! ```
//!
//! [`FakeTransportHandle::serve`] turns the handle into a scripted MCP server
//! that answers every request through a closure.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::error::{AgenticalError, Result};
use crate::mcp::transport::Transport;

/// Reply produced by a scripted server for one request.
pub enum FakeReply {
    Result(serde_json::Value),
    Error { code: i64, message: String },
    /// Swallow the request; the client will time out.
    Silence,
}

#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    close_calls: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let close_calls = Arc::new(AtomicUsize::new(0));

        let transport = Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            close_calls: Arc::clone(&close_calls),
        };

        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            close_calls,
        };

        (transport, handle)
    }
}

/// The test-side handle for a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Messages the client sent.
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Messages the client will receive.
    pub inbound_tx: mpsc::UnboundedSender<String>,
    close_calls: Arc<AtomicUsize>,
}

impl FakeTransportHandle {
    /// Shared counter of [`Transport::close`] calls on the paired transport.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.close_calls)
    }

    /// Answer every inbound request with `reply(method, params)` until the
    /// client side goes away. Notifications are consumed silently.
    pub fn serve<F>(mut self, reply: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(&str, &serde_json::Value) -> FakeReply + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(raw) = self.outbound_rx.recv().await {
                let Ok(req) = serde_json::from_str::<serde_json::Value>(&raw) else {
                    continue;
                };
                let Some(id) = req.get("id").cloned() else {
                    continue;
                };
                let method = req["method"].as_str().unwrap_or_default();
                let params = req.get("params").cloned().unwrap_or_default();

                let response = match reply(method, &params) {
                    FakeReply::Result(result) => {
                        serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
                    }
                    FakeReply::Error { code, message } => serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": code, "message": message }
                    }),
                    FakeReply::Silence => continue,
                };

                if self.inbound_tx.send(response.to_string()).is_err() {
                    break;
                }
            }
        })
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        if self.close_calls.load(Ordering::SeqCst) > 0 {
            return Err(AgenticalError::McpTransport("fake transport closed".to_string()).into());
        }
        self.outbound_tx.send(message).map_err(|_| {
            AgenticalError::McpTransport("fake transport: outbound channel closed".to_string())
                .into()
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let item = rx.lock().await.recv().await?;
            Some((item, rx))
        }))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        Box::pin(futures::stream::empty())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_send_and_receive_cross_over() {
        let (transport, mut handle) = FakeTransport::new();

        transport.send("out".to_string()).await.unwrap();
        assert_eq!(handle.outbound_rx.recv().await.unwrap(), "out");

        handle.inbound_tx.send("in".to_string()).unwrap();
        assert_eq!(transport.receive().next().await.unwrap(), "in");
    }

    #[tokio::test]
    async fn test_send_fails_after_close() {
        let (transport, handle) = FakeTransport::new();
        let closes = handle.close_counter();

        transport.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(transport.send("x".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_serve_answers_requests_by_method() {
        let (transport, handle) = FakeTransport::new();
        handle.serve(|method, _| match method {
            "ping" => FakeReply::Result(serde_json::json!({})),
            _ => FakeReply::Error {
                code: -32601,
                message: "nope".to_string(),
            },
        });

        transport
            .send(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#.to_string())
            .await
            .unwrap();
        let reply: serde_json::Value =
            serde_json::from_str(&transport.receive().next().await.unwrap()).unwrap();
        assert_eq!(reply["id"], 7);
        assert!(reply.get("result").is_some());
    }
}

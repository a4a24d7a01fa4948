//! Live sessions with MCP servers
//!
//! [`Session`] is what the runtime holds for a connected server: it can
//! enumerate capabilities, answer a heartbeat ping, invoke a tool, read a
//! resource, render a prompt and close. [`SessionFactory`] opens one
//! session per attempt; the connection manager calls it inside its retry
//! loop.
//!
//! [`McpSession`] is the protocol-backed implementation: it pumps messages
//! between a [`Transport`] and a [`JsonRpcClient`] and runs the MCP
//! handshake. [`StdioSessionFactory`] spawns the server process for it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ServerSpec;
use crate::error::{AgenticalError, Result};
use crate::mcp::client::{start_read_loop, JsonRpcClient};
use crate::mcp::protocol::{InitializedMcpProtocol, McpProtocol, ServerCapabilityFlag};
use crate::mcp::transport::stdio::StdioTransport;
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CallToolResponse, ClientCapabilities, GetPromptResponse, Implementation, McpTool, Prompt,
    Resource, ResourceContents,
};

/// An established, handshaken connection to one MCP server.
#[async_trait]
pub trait Session: Send + Sync + std::fmt::Debug {
    async fn enumerate_tools(&self) -> Result<Vec<McpTool>>;

    async fn enumerate_resources(&self) -> Result<Vec<Resource>>;

    async fn enumerate_prompts(&self) -> Result<Vec<Prompt>>;

    /// Liveness probe. The caller bounds it with its own timeout.
    async fn ping(&self) -> Result<()>;

    /// Call a tool by name.
    async fn invoke(&self, tool: &str, arguments: Option<serde_json::Value>)
        -> Result<CallToolResponse>;

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>>;

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResponse>;

    /// Release the session. Calls after the first are no-ops.
    async fn close(&self) -> Result<()>;
}

/// Opens sessions. One call is one connection attempt.
#[async_trait]
pub trait SessionFactory: Send + Sync + std::fmt::Debug {
    async fn open(&self, server: &str, spec: &ServerSpec) -> Result<Arc<dyn Session>>;
}

/// A [`Session`] speaking MCP over any [`Transport`].
#[derive(Debug)]
pub struct McpSession {
    server: String,
    protocol: InitializedMcpProtocol,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl McpSession {
    /// Wire `transport` to a JSON-RPC client and perform the MCP handshake.
    ///
    /// On failure the pumps are stopped and the transport is closed before
    /// the error is returned. Dropping the future mid-handshake (for example
    /// when an outer attempt timeout fires) also stops the pumps, which
    /// releases the transport.
    pub async fn handshake(
        server: &str,
        transport: Arc<dyn Transport>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let shutdown = CancellationToken::new();
        // Cancels the pumps unless the handshake completes.
        let abandon_guard = shutdown.clone().drop_guard();

        let shared = Arc::new(
            JsonRpcClient::new(server, out_tx).with_default_timeout(request_timeout),
        );
        start_read_loop(in_rx, shutdown.clone(), Arc::clone(&shared));

        let writer_transport = Arc::clone(&transport);
        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => break,
                    msg = out_rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(e) = writer_transport.send(msg).await {
                                tracing::debug!("MCP writer stopped: {e}");
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        let reader_transport = Arc::clone(&transport);
        let reader_shutdown = shutdown.clone();
        let reader_server = server.to_string();
        tokio::spawn(async move {
            let mut stream = reader_transport.receive();
            loop {
                tokio::select! {
                    _ = reader_shutdown.cancelled() => break,
                    msg = stream.next() => match msg {
                        Some(msg) => {
                            if in_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        None => {
                            tracing::debug!(server = %reader_server, "MCP transport stream ended");
                            // Dead peer: fail every later request immediately.
                            reader_shutdown.cancel();
                            break;
                        }
                    },
                }
            }
        });

        let initialized = McpProtocol::new(shared.clone_shared())
            .initialize(Implementation::agentical(), ClientCapabilities::default())
            .await;

        match initialized {
            Ok(protocol) => {
                abandon_guard.disarm();
                Ok(Self {
                    server: server.to_string(),
                    protocol,
                    transport,
                    shutdown,
                    closed: AtomicBool::new(false),
                })
            }
            Err(e) => {
                drop(abandon_guard);
                if let Err(close_err) = transport.close().await {
                    tracing::debug!(
                        server,
                        "closing transport after failed handshake: {close_err}"
                    );
                }
                Err(e)
            }
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol.initialize_response.protocol_version
    }

    pub fn server_info(&self) -> &Implementation {
        &self.protocol.initialize_response.server_info
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(AgenticalError::McpTransport(format!(
                "session with '{}' is closed",
                self.server
            ))
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl Session for McpSession {
    async fn enumerate_tools(&self) -> Result<Vec<McpTool>> {
        self.ensure_open()?;
        if !self.protocol.capable(ServerCapabilityFlag::Tools) {
            return Ok(Vec::new());
        }
        self.protocol.list_tools().await
    }

    async fn enumerate_resources(&self) -> Result<Vec<Resource>> {
        self.ensure_open()?;
        if !self.protocol.capable(ServerCapabilityFlag::Resources) {
            return Ok(Vec::new());
        }
        self.protocol.list_resources().await
    }

    async fn enumerate_prompts(&self) -> Result<Vec<Prompt>> {
        self.ensure_open()?;
        if !self.protocol.capable(ServerCapabilityFlag::Prompts) {
            return Ok(Vec::new());
        }
        self.protocol.list_prompts().await
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        self.protocol.ping(None).await
    }

    async fn invoke(
        &self,
        tool: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResponse> {
        self.ensure_open()?;
        self.protocol.call_tool(tool, arguments).await
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        self.ensure_open()?;
        self.protocol.read_resource(uri).await
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResponse> {
        self.ensure_open()?;
        self.protocol.get_prompt(name, arguments).await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!(server = %self.server, "closing MCP session");
        self.shutdown.cancel();
        self.transport.close().await
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        // Stops the pumps, which releases the last transport references.
        self.shutdown.cancel();
    }
}

/// Spawns each server as a child process and handshakes over stdio.
#[derive(Debug, Clone)]
pub struct StdioSessionFactory {
    request_timeout: Duration,
}

impl StdioSessionFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl SessionFactory for StdioSessionFactory {
    async fn open(&self, server: &str, spec: &ServerSpec) -> Result<Arc<dyn Session>> {
        let transport: Arc<dyn Transport> = Arc::new(StdioTransport::spawn(server, spec)?);
        let session = McpSession::handshake(server, transport, self.request_timeout).await?;
        tracing::info!(
            server,
            protocol_version = %session.protocol_version(),
            server_name = %session.server_info().name,
            "MCP session established"
        );
        Ok(Arc::new(session))
    }
}

//! Test utilities for agentical
//!
//! [`MockFactory`] hands out [`MockSession`]s for scripted in-memory
//! servers. Every behaviour of a [`MockServer`] (failing connects, failing
//! pings, failing enumeration) can be flipped while sessions are live, and
//! the server counts opens, pings and closes so tests can assert on them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::config::{McpConfig, RuntimeSettings, ServerSpec};
use crate::error::{AgenticalError, Result};
use crate::mcp::types::{
    CallToolResponse, GetPromptResponse, McpTool, MessageContent, Prompt, PromptMessage,
    Resource, ResourceContents, Role, TextContent, TextResourceContents,
};
use crate::session::{Session, SessionFactory};

/// Scripted behaviour and counters for one mock server.
#[derive(Debug)]
pub struct MockServer {
    name: Mutex<String>,
    connect_failures: AtomicU32,
    hang: AtomicBool,
    ping_ok: AtomicBool,
    enumeration_fails: AtomicBool,
    tools: Mutex<Vec<McpTool>>,
    resources: Mutex<Vec<Resource>>,
    prompts: Mutex<Vec<Prompt>>,
    opens: AtomicU32,
    pings: AtomicU32,
    closes: AtomicU32,
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            name: Mutex::new(String::new()),
            connect_failures: AtomicU32::new(0),
            hang: AtomicBool::new(false),
            ping_ok: AtomicBool::new(true),
            enumeration_fails: AtomicBool::new(false),
            tools: Mutex::new(Vec::new()),
            resources: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            opens: AtomicU32::new(0),
            pings: AtomicU32::new(0),
            closes: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` opens.
    pub fn fail_connects(self, n: u32) -> Self {
        self.connect_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Opens never complete.
    pub fn hang_connects(self) -> Self {
        self.hang.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_enumeration(self) -> Self {
        self.enumeration_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_tools(self, names: &[&str]) -> Self {
        *lock(&self.tools) = names
            .iter()
            .map(|n| McpTool::new(*n, serde_json::json!({ "type": "object" })))
            .collect();
        self
    }

    pub fn with_resources(self, uris: &[&str]) -> Self {
        *lock(&self.resources) = uris
            .iter()
            .map(|uri| Resource {
                uri: uri.to_string(),
                name: uri.rsplit('/').next().unwrap_or(uri).to_string(),
                description: None,
                mime_type: Some("text/plain".to_string()),
            })
            .collect();
        self
    }

    pub fn with_prompts(self, names: &[&str]) -> Self {
        *lock(&self.prompts) = names
            .iter()
            .map(|n| Prompt {
                name: n.to_string(),
                description: None,
                arguments: None,
            })
            .collect();
        self
    }

    pub fn set_ping_ok(&self, ok: bool) {
        self.ping_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_connect_failures(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_enumeration_fails(&self, fails: bool) {
        self.enumeration_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_tools(&self, names: &[&str]) {
        *lock(&self.tools) = names
            .iter()
            .map(|n| McpTool::new(*n, serde_json::json!({ "type": "object" })))
            .collect();
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> u32 {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    fn name(&self) -> String {
        lock(&self.name).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A session against a [`MockServer`].
#[derive(Debug)]
pub struct MockSession {
    server: Arc<MockServer>,
    closed: AtomicBool,
}

impl MockSession {
    fn check_enumeration(&self) -> Result<()> {
        if self.server.enumeration_fails.load(Ordering::SeqCst) {
            return Err(AgenticalError::Mcp("mock enumeration failure".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl Session for MockSession {
    async fn enumerate_tools(&self) -> Result<Vec<McpTool>> {
        self.check_enumeration()?;
        Ok(lock(&self.server.tools).clone())
    }

    async fn enumerate_resources(&self) -> Result<Vec<Resource>> {
        self.check_enumeration()?;
        Ok(lock(&self.server.resources).clone())
    }

    async fn enumerate_prompts(&self) -> Result<Vec<Prompt>> {
        self.check_enumeration()?;
        Ok(lock(&self.server.prompts).clone())
    }

    async fn ping(&self) -> Result<()> {
        self.server.pings.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) || !self.server.ping_ok.load(Ordering::SeqCst) {
            return Err(AgenticalError::McpTransport("mock ping failed".to_string()).into());
        }
        Ok(())
    }

    async fn invoke(
        &self,
        tool: &str,
        _arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResponse> {
        Ok(CallToolResponse::text(format!("{}:{}", self.server.name(), tool)))
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        Ok(vec![ResourceContents::Text(TextResourceContents {
            uri: uri.to_string(),
            mime_type: Some("text/plain".to_string()),
            text: format!("contents of {uri}"),
        })])
    }

    async fn get_prompt(
        &self,
        name: &str,
        _arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResponse> {
        Ok(GetPromptResponse {
            description: None,
            messages: vec![PromptMessage {
                role: Role::User,
                content: MessageContent::Text(TextContent {
                    text: format!("prompt {name}"),
                    annotations: None,
                }),
            }],
        })
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.server.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Opens [`MockSession`]s for registered [`MockServer`]s. Unknown names
/// fail like a missing executable.
#[derive(Debug, Default)]
pub struct MockFactory {
    servers: Mutex<HashMap<String, Arc<MockServer>>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, name: &str, server: MockServer) -> Arc<MockServer> {
        *lock(&server.name) = name.to_string();
        let server = Arc::new(server);
        lock(&self.servers).insert(name.to_string(), Arc::clone(&server));
        server
    }

    pub fn open_count(&self, name: &str) -> u32 {
        lock(&self.servers).get(name).map_or(0, |s| s.opens())
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn open(&self, server: &str, _spec: &ServerSpec) -> Result<Arc<dyn Session>> {
        let mock = lock(&self.servers).get(server).cloned().ok_or_else(|| {
            AgenticalError::McpTransport(format!("no mock server named '{server}'"))
        })?;
        mock.opens.fetch_add(1, Ordering::SeqCst);

        if mock.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let remaining = mock.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            mock.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AgenticalError::McpTransport(format!(
                "mock connect failure for '{server}'"
            ))
            .into());
        }

        Ok(Arc::new(MockSession {
            server: mock,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Fast settings for tests: 1s base delay, 10s heartbeat, threshold 2.
pub fn test_settings() -> RuntimeSettings {
    RuntimeSettings {
        heartbeat_interval_secs: 10,
        ping_timeout_secs: 2,
        ..RuntimeSettings::default()
    }
}

/// A config naming each server with a placeholder command.
pub fn mock_config(names: &[&str]) -> McpConfig {
    McpConfig {
        servers: names
            .iter()
            .map(|n| (n.to_string(), ServerSpec::new("mock-server", vec![])))
            .collect(),
        settings: test_settings(),
    }
}

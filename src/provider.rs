//! Provider facade
//!
//! [`McpProvider`] is what an application holds: it owns the connection
//! service and the three capability registries. Connecting a server
//! enumerates its tools, resources and prompts and registers them while the
//! server's lifecycle lock is still held; tearing a server down removes
//! them again before its session is closed. Invocations are routed to the
//! owning server through the registries.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};

use crate::config::McpConfig;
use crate::error::{AgenticalError, Result};
use crate::events::{EventSink, LifecycleEvent, TracingEventSink};
use crate::mcp::types::{
    CallToolResponse, GetPromptResponse, McpTool, Prompt, Resource, ResourceContents,
};
use crate::registry::{
    CapabilityEntry, CapabilityRegistry, PromptRegistry, ResourceRegistry, ToolRegistry,
};
use crate::runtime::{ConnectionService, ConnectionState, LifecycleHooks};
use crate::session::{Session, SessionFactory, StdioSessionFactory};

/// The tool, resource and prompt registries, kept in step with the
/// connection lifecycle.
#[derive(Debug)]
pub struct CapabilityRegistries {
    tools: RwLock<ToolRegistry>,
    resources: RwLock<ResourceRegistry>,
    prompts: RwLock<PromptRegistry>,
    events: Arc<dyn EventSink>,
}

impl CapabilityRegistries {
    fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            tools: RwLock::new(ToolRegistry::new()),
            resources: RwLock::new(ResourceRegistry::new()),
            prompts: RwLock::new(PromptRegistry::new()),
            events,
        }
    }

    async fn clear(&self) -> (usize, usize) {
        let (tools, servers) = self.tools.write().await.clear();
        let (resources, _) = self.resources.write().await.clear();
        let (prompts, _) = self.prompts.write().await.clear();
        (tools + resources + prompts, servers)
    }
}

#[async_trait]
impl LifecycleHooks for CapabilityRegistries {
    /// Enumerate everything first and register only when all three kinds
    /// succeeded, so a failure never leaves a server half-registered.
    async fn on_established(&self, server: &str, session: &dyn Session) -> Result<()> {
        let tools = session.enumerate_tools().await?;
        let resources = session.enumerate_resources().await?;
        let prompts = session.enumerate_prompts().await?;

        let counts = (tools.len(), resources.len(), prompts.len());
        self.tools.write().await.register_server(server, tools);
        self.resources.write().await.register_server(server, resources);
        self.prompts.write().await.register_server(server, prompts);

        self.events.emit(LifecycleEvent::CapabilitiesRegistered {
            server: server.to_string(),
            tools: counts.0,
            resources: counts.1,
            prompts: counts.2,
        });
        Ok(())
    }

    async fn on_teardown(&self, server: &str) {
        let tools = self.tools.write().await.remove_server(server);
        let resources = self.resources.write().await.remove_server(server);
        let prompts = self.prompts.write().await.remove_server(server);

        self.events.emit(LifecycleEvent::CapabilitiesRemoved {
            server: server.to_string(),
            tools,
            resources,
            prompts,
        });
    }
}

/// Connects configured MCP servers and exposes their capabilities.
///
/// ```no_run
/// use agentical::{McpConfig, McpProvider};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let provider = McpProvider::new(McpConfig::load("mcp.json")?)?;
/// for (server, result) in provider.connect_all().await {
///     if let Err(e) = result {
///         eprintln!("{server}: {e}");
///     }
/// }
/// let response = provider.invoke_capability("read_file", None).await?;
/// println!("{}", response.text_content());
/// provider.cleanup_all().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct McpProvider {
    config: McpConfig,
    service: ConnectionService,
    registries: Arc<CapabilityRegistries>,
}

impl McpProvider {
    /// A provider that spawns each server over stdio and logs lifecycle
    /// events through `tracing`.
    ///
    /// # Errors
    ///
    /// [`AgenticalError::Config`] if `config` is invalid.
    pub fn new(config: McpConfig) -> Result<Self> {
        let factory = Arc::new(StdioSessionFactory::new(config.settings.request_timeout()));
        Self::with_factory(config, factory, Arc::new(TracingEventSink))
    }

    /// A provider with an explicit session factory and event sink.
    ///
    /// # Errors
    ///
    /// [`AgenticalError::Config`] if `config` is invalid.
    pub fn with_factory(
        config: McpConfig,
        factory: Arc<dyn SessionFactory>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let registries = Arc::new(CapabilityRegistries::new(Arc::clone(&events)));
        let service = ConnectionService::new(
            factory,
            config.settings.clone(),
            Arc::clone(&registries) as Arc<dyn LifecycleHooks>,
            events,
        );
        Ok(Self {
            config,
            service,
            registries,
        })
    }

    /// The configuration this provider was built from.
    pub fn config(&self) -> &McpConfig {
        &self.config
    }

    /// Configured server names, sorted.
    pub fn list_available_servers(&self) -> Vec<String> {
        self.config.server_names()
    }

    /// Servers that currently have a live session.
    ///
    /// # Returns
    ///
    /// Names of configured servers that are `Connected` or `Unhealthy`,
    /// sorted. A server that is reconnecting is not included.
    pub async fn connected_servers(&self) -> Vec<String> {
        let mut connected = Vec::new();
        for name in self.config.servers.keys() {
            if self.service.is_connected(name).await {
                connected.push(name.clone());
            }
        }
        connected
    }

    /// Current lifecycle state of `name`.
    ///
    /// Servers that were never connected, and names that are not
    /// configured at all, report `Disconnected`.
    pub async fn server_state(&self, name: &str) -> ConnectionState {
        self.service.state(name).await
    }

    /// Watch `name`'s state changes; see [`ConnectionService::subscribe`].
    pub async fn subscribe(&self, name: &str) -> watch::Receiver<ConnectionState> {
        self.service.subscribe(name).await
    }

    /// Connect one configured server and register its capabilities.
    ///
    /// Connecting a server that is already connected is a no-op. Its
    /// capabilities are not enumerated again.
    ///
    /// # Arguments
    ///
    /// * `name` - A key of the configured `servers` map.
    ///
    /// # Errors
    ///
    /// - [`AgenticalError::UnknownServer`] if `name` is not configured
    /// - [`AgenticalError::Connect`] once every attempt has failed
    /// - the enumeration error if capabilities could not be listed; the
    ///   server is left disconnected
    pub async fn connect(&self, name: &str) -> Result<()> {
        let spec = self
            .config
            .servers
            .get(name)
            .ok_or_else(|| AgenticalError::UnknownServer(name.to_string()))?;
        self.service.connect(name, spec).await?;
        Ok(())
    }

    /// Connect every configured server concurrently. One server's failure
    /// does not affect the others.
    ///
    /// # Returns
    ///
    /// One result per configured server, keyed by name.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use agentical::McpProvider;
    /// # async fn report(provider: &McpProvider) {
    /// let results = provider.connect_all().await;
    /// let failed: Vec<_> = results
    ///     .iter()
    ///     .filter(|(_, r)| r.is_err())
    ///     .map(|(name, _)| name.as_str())
    ///     .collect();
    /// println!("failed: {failed:?}");
    /// # }
    /// ```
    pub async fn connect_all(&self) -> BTreeMap<String, Result<()>> {
        let names = self.list_available_servers();
        let results = futures::future::join_all(names.iter().map(|n| self.connect(n))).await;

        let outcome: BTreeMap<String, Result<()>> = names.into_iter().zip(results).collect();
        let connected = outcome.values().filter(|r| r.is_ok()).count();
        tracing::info!(connected, total = outcome.len(), "connect_all finished");
        for (name, result) in &outcome {
            if let Err(e) = result {
                tracing::warn!(server = %name, "failed to connect: {e:#}");
            }
        }
        outcome
    }

    /// Stop monitoring `name`, drop its capabilities and close its session.
    ///
    /// # Errors
    ///
    /// [`AgenticalError::Cleanup`] if closing the session failed; the server
    /// is disconnected regardless.
    pub async fn cleanup(&self, name: &str) -> Result<()> {
        self.service.disconnect(name).await
    }

    /// Clean up every server, bounded by the shutdown timeout.
    ///
    /// Afterwards every registry is empty, even for a server whose cleanup
    /// timed out.
    ///
    /// # Returns
    ///
    /// One result per server the provider has seen.
    pub async fn cleanup_all(&self) -> BTreeMap<String, Result<()>> {
        let results = self
            .service
            .disconnect_all(self.config.settings.shutdown_timeout())
            .await;

        let (entries, servers) = self.registries.clear().await;
        if entries > 0 {
            tracing::warn!(entries, servers, "capabilities left behind after cleanup were dropped");
        }
        results
    }

    /// Every registered tool, in server registration order.
    pub async fn tools(&self) -> Vec<McpTool> {
        self.registries.tools.read().await.all_entries()
    }

    /// Every registered resource, in server registration order.
    pub async fn resources(&self) -> Vec<Resource> {
        self.registries.resources.read().await.all_entries()
    }

    /// Every registered prompt, in server registration order.
    pub async fn prompts(&self) -> Vec<Prompt> {
        self.registries.prompts.read().await.all_entries()
    }

    /// Tools registered by `server`; empty when it is not connected.
    pub async fn server_tools(&self, server: &str) -> Vec<McpTool> {
        self.registries.tools.read().await.server_entries(server)
    }

    pub async fn server_resources(&self, server: &str) -> Vec<Resource> {
        self.registries.resources.read().await.server_entries(server)
    }

    pub async fn server_prompts(&self, server: &str) -> Vec<Prompt> {
        self.registries.prompts.read().await.server_entries(server)
    }

    /// Call a tool on whichever connected server advertises it.
    ///
    /// When several servers advertise the same tool name, the one that
    /// registered first wins.
    ///
    /// # Arguments
    ///
    /// * `tool` - Tool name as advertised by the server.
    /// * `arguments` - JSON arguments passed through unchanged.
    ///
    /// # Returns
    ///
    /// The server's response. A tool-level failure is an `Ok` response
    /// with `is_error` set.
    ///
    /// # Errors
    ///
    /// [`AgenticalError::CapabilityNotFound`] if no connected server owns
    /// `tool`, otherwise whatever the server call reports.
    pub async fn invoke_capability(
        &self,
        tool: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResponse> {
        let (server, session) = self.resolve(&self.registries.tools, tool).await?;
        tracing::debug!(server = %server, tool, "invoking tool");
        session.invoke(tool, arguments).await
    }

    /// Read a resource from the server that advertises `uri`.
    ///
    /// # Errors
    ///
    /// [`AgenticalError::CapabilityNotFound`] if no connected server owns
    /// `uri`, otherwise whatever the server call reports.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        let (server, session) = self.resolve(&self.registries.resources, uri).await?;
        tracing::debug!(server = %server, uri, "reading resource");
        session.read_resource(uri).await
    }

    /// Render a prompt from the server that advertises `name`.
    ///
    /// # Errors
    ///
    /// [`AgenticalError::CapabilityNotFound`] if no connected server owns
    /// `name`, otherwise whatever the server call reports.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResponse> {
        let (server, session) = self.resolve(&self.registries.prompts, name).await?;
        tracing::debug!(server = %server, prompt = name, "getting prompt");
        session.get_prompt(name, arguments).await
    }

    /// Owner of `id` in `registry` and its live session.
    async fn resolve<T: CapabilityEntry>(
        &self,
        registry: &RwLock<CapabilityRegistry<T>>,
        id: &str,
    ) -> Result<(String, Arc<dyn Session>)> {
        let not_found = || AgenticalError::CapabilityNotFound {
            kind: T::KIND,
            id: id.to_string(),
        };

        let owner = registry
            .read()
            .await
            .find_owner(id)
            .map(str::to_string)
            .ok_or_else(not_found)?;
        let session = self.service.session(&owner).await.ok_or_else(not_found)?;
        Ok((owner, session))
    }
}

//! Typed MCP lifecycle wrapper over [`JsonRpcClient`]
//!
//! - [`McpProtocol`] is an uninitialized client. [`McpProtocol::initialize`]
//!   performs the `initialize` / `notifications/initialized` handshake.
//! - [`InitializedMcpProtocol`] is a negotiated session exposing `ping` and
//!   the tool, resource and prompt methods as typed async calls.
//!
//! `list_*` methods follow `nextCursor` until the server stops returning one.
//! Neither type owns a transport.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{AgenticalError, Result};
use crate::mcp::client::JsonRpcClient;
use crate::mcp::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, GetPromptParams, GetPromptResponse,
    Implementation, InitializeParams, InitializeResponse, ListPromptsResponse,
    ListResourcesResponse, ListToolsResponse, McpTool, PaginatedParams, Prompt,
    ReadResourceParams, ReadResourceResponse, Resource, ResourceContents,
    LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING,
    METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, SUPPORTED_PROTOCOL_VERSIONS,
};

/// A capability a server may advertise in its `initialize` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCapabilityFlag {
    Tools,
    Resources,
    Prompts,
    Logging,
    Completions,
}

/// One page of a cursor-paginated list response.
trait Page: DeserializeOwned {
    type Item;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

impl Page for ListToolsResponse {
    type Item = McpTool;

    fn into_parts(self) -> (Vec<McpTool>, Option<String>) {
        (self.tools, self.next_cursor)
    }
}

impl Page for ListResourcesResponse {
    type Item = Resource;

    fn into_parts(self) -> (Vec<Resource>, Option<String>) {
        (self.resources, self.next_cursor)
    }
}

impl Page for ListPromptsResponse {
    type Item = Prompt;

    fn into_parts(self) -> (Vec<Prompt>, Option<String>) {
        (self.prompts, self.next_cursor)
    }
}

/// An uninitialized MCP client session.
#[derive(Debug)]
pub struct McpProtocol {
    client: JsonRpcClient,
}

impl McpProtocol {
    /// Wrap a channel-wired client whose read loop is already running.
    pub fn new(client: JsonRpcClient) -> Self {
        Self { client }
    }

    /// Perform the MCP handshake.
    ///
    /// Sends `initialize` offering [`LATEST_PROTOCOL_VERSION`], checks that
    /// the server picked one of [`SUPPORTED_PROTOCOL_VERSIONS`], then sends
    /// `notifications/initialized`.
    ///
    /// # Errors
    ///
    /// Returns [`AgenticalError::McpProtocolVersion`] for an unsupported
    /// version, or any error from [`JsonRpcClient::request`].
    pub async fn initialize(
        self,
        client_info: Implementation,
        capabilities: ClientCapabilities,
    ) -> Result<InitializedMcpProtocol> {
        let response: InitializeResponse = self
            .client
            .request(
                METHOD_INITIALIZE,
                InitializeParams {
                    protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                    capabilities,
                    client_info,
                },
                None,
            )
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(AgenticalError::McpProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                got: response.protocol_version,
            }
            .into());
        }

        self.client
            .notify(METHOD_INITIALIZED, serde_json::json!({}))?;

        tracing::debug!(
            server = %self.client.server(),
            protocol_version = %response.protocol_version,
            server_name = %response.server_info.name,
            "MCP handshake complete"
        );

        Ok(InitializedMcpProtocol {
            client: self.client,
            initialize_response: response,
        })
    }
}

/// A fully negotiated MCP client session.
#[derive(Debug)]
pub struct InitializedMcpProtocol {
    /// The underlying JSON-RPC client.
    pub client: JsonRpcClient,
    /// The server's response to the `initialize` request.
    pub initialize_response: InitializeResponse,
}

impl InitializedMcpProtocol {
    /// Check whether the server advertised `capability` during the handshake.
    pub fn capable(&self, capability: ServerCapabilityFlag) -> bool {
        let caps = &self.initialize_response.capabilities;
        match capability {
            ServerCapabilityFlag::Tools => caps.tools.is_some(),
            ServerCapabilityFlag::Resources => caps.resources.is_some(),
            ServerCapabilityFlag::Prompts => caps.prompts.is_some(),
            ServerCapabilityFlag::Logging => caps.logging.is_some(),
            ServerCapabilityFlag::Completions => caps.completions.is_some(),
        }
    }

    async fn paginate<P: Page>(&self, method: &str) -> Result<Vec<P::Item>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let page: P = self
                .client
                .request(method, PaginatedParams { cursor }, None)
                .await?;
            let (batch, next) = page.into_parts();
            items.extend(batch);

            match next {
                Some(c) if !c.is_empty() => {
                    if !seen.insert(c.clone()) {
                        return Err(AgenticalError::Mcp(format!(
                            "{method}: server repeated pagination cursor '{c}'"
                        ))
                        .into());
                    }
                    cursor = Some(c);
                }
                _ => break,
            }
        }

        Ok(items)
    }

    /// All tools, across every page.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.paginate::<ListToolsResponse>(METHOD_TOOLS_LIST).await
    }

    /// All resources, across every page.
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.paginate::<ListResourcesResponse>(METHOD_RESOURCES_LIST)
            .await
    }

    /// All prompts, across every page.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.paginate::<ListPromptsResponse>(METHOD_PROMPTS_LIST)
            .await
    }

    /// Invoke a named tool.
    ///
    /// A tool that fails at the application level still returns `Ok` with
    /// `is_error: Some(true)`; only protocol failures are `Err`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResponse> {
        self.client
            .request(
                METHOD_TOOLS_CALL,
                CallToolParams {
                    name: name.to_string(),
                    arguments,
                },
                None,
            )
            .await
    }

    /// Read the contents of a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        let resp: ReadResourceResponse = self
            .client
            .request(
                METHOD_RESOURCES_READ,
                ReadResourceParams {
                    uri: uri.to_string(),
                },
                None,
            )
            .await?;
        Ok(resp.contents)
    }

    /// Render a prompt by name with optional argument substitutions.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResponse> {
        self.client
            .request(
                METHOD_PROMPTS_GET,
                GetPromptParams {
                    name: name.to_string(),
                    arguments,
                },
                None,
            )
            .await
    }

    /// Send `ping` and wait up to `timeout` (or the client default) for the
    /// empty result.
    pub async fn ping(&self, timeout: Option<Duration>) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .request(METHOD_PING, serde_json::json!({}), timeout)
            .await?;
        Ok(())
    }
}

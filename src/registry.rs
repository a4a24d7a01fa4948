//! Capability registries
//!
//! A [`CapabilityRegistry`] maps each server to the entries it advertised
//! and keeps them in registration order, so the aggregate view is always
//! the concatenation of the per-server lists. Identifiers are only unique
//! within one server. When two servers advertise the same identifier,
//! [`CapabilityRegistry::find_owner`] returns the server that appears first
//! in the current registration order. Re-registering a server moves it to
//! the end of that order.

use crate::mcp::types::{McpTool, Prompt, Resource};

/// Something a server advertises and the registry can index.
pub trait CapabilityEntry: Clone + Send + Sync {
    /// Human-readable kind used in errors ("tool", "resource", "prompt").
    const KIND: &'static str;

    /// Identifier, unique within one server.
    fn entry_id(&self) -> &str;

    fn display_name(&self) -> &str;
}

impl CapabilityEntry for McpTool {
    const KIND: &'static str = "tool";

    fn entry_id(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

/// Resources are addressed by URI.
impl CapabilityEntry for Resource {
    const KIND: &'static str = "resource";

    fn entry_id(&self) -> &str {
        &self.uri
    }

    fn display_name(&self) -> &str {
        &self.name
    }
}

impl CapabilityEntry for Prompt {
    const KIND: &'static str = "prompt";

    fn entry_id(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
pub struct CapabilityRegistry<T> {
    servers: Vec<(String, Vec<T>)>,
}

pub type ToolRegistry = CapabilityRegistry<McpTool>;
pub type ResourceRegistry = CapabilityRegistry<Resource>;
pub type PromptRegistry = CapabilityRegistry<Prompt>;

impl<T> Default for CapabilityRegistry<T> {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
        }
    }
}

impl<T: CapabilityEntry> CapabilityRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `server`'s entries with `entries`.
    pub fn register_server(&mut self, server: &str, entries: Vec<T>) {
        let replaced = self.remove_server(server);
        tracing::debug!(
            server,
            kind = T::KIND,
            count = entries.len(),
            replaced,
            "registering capabilities"
        );
        self.servers.push((server.to_string(), entries));
    }

    /// Drop `server`'s entries, returning how many there were.
    pub fn remove_server(&mut self, server: &str) -> usize {
        match self.servers.iter().position(|(name, _)| name == server) {
            Some(idx) => self.servers.remove(idx).1.len(),
            None => 0,
        }
    }

    /// The first server in registration order that advertises `id`.
    pub fn find_owner(&self, id: &str) -> Option<&str> {
        self.servers
            .iter()
            .find(|(_, entries)| entries.iter().any(|e| e.entry_id() == id))
            .map(|(name, _)| name.as_str())
    }

    pub fn find(&self, id: &str) -> Option<(&str, &T)> {
        self.servers.iter().find_map(|(name, entries)| {
            entries
                .iter()
                .find(|e| e.entry_id() == id)
                .map(|e| (name.as_str(), e))
        })
    }

    pub fn all_entries(&self) -> Vec<T> {
        self.servers
            .iter()
            .flat_map(|(_, entries)| entries.iter().cloned())
            .collect()
    }

    pub fn server_entries(&self, server: &str) -> Vec<T> {
        self.servers
            .iter()
            .find(|(name, _)| name == server)
            .map(|(_, entries)| entries.clone())
            .unwrap_or_default()
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.servers.iter().map(|(_, entries)| entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the registry. Returns `(entries, servers)` removed.
    pub fn clear(&mut self) -> (usize, usize) {
        let counts = (self.len(), self.servers.len());
        self.servers.clear();
        counts
    }
}

//! Configuration management for agentical
//!
//! This module loads the server catalog and runtime tuning knobs from a JSON
//! or YAML file, applies `AGENTICAL_*` environment overrides and validates the
//! result before anything is spawned.
//!
//! Two file shapes are accepted:
//!
//! ```yaml
//! # structured
//! servers:
//!   files:
//!     command: npx
//!     args: ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
//! settings:
//!   heartbeat_interval_secs: 15
//! ```
//!
//! ```json
//! { "files": { "command": "npx", "args": ["-y", "server-filesystem"] } }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgenticalError, Result};

/// How to launch one MCP server process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Executable to run
    pub command: String,

    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables layered on top of the inherited environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,

    /// Working directory for the child process
    #[serde(
        default,
        alias = "workingDir",
        alias = "working_dir",
        skip_serializing_if = "Option::is_none"
    )]
    pub cwd: Option<PathBuf>,
}

impl ServerSpec {
    /// Create a spec with no extra environment and no working directory.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: None,
            cwd: None,
        }
    }

    /// Check the spec for the problems that would make every connection
    /// attempt fail.
    ///
    /// # Errors
    ///
    /// Returns [`AgenticalError::Config`] when the command is blank or any
    /// argument is blank.
    pub fn validate(&self, server: &str) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(AgenticalError::Config(format!(
                "server '{server}': command cannot be empty"
            ))
            .into());
        }

        if self.args.iter().any(|arg| arg.trim().is_empty()) {
            return Err(AgenticalError::Config(format!(
                "server '{server}': all args must be non-empty strings"
            ))
            .into());
        }

        Ok(())
    }
}

/// Retry, heartbeat and timeout settings shared by every server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Total connection attempts per connect or reconnect sequence
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base; the second attempt waits this long, then it doubles
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Seconds between heartbeat pings
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Consecutive missed pings that trigger a reconnect
    #[serde(default = "default_max_heartbeat_miss")]
    pub max_heartbeat_miss: u32,

    /// Upper bound on a single connection attempt (spawn + handshake)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upper bound on a single heartbeat ping
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,

    /// Upper bound on any other request (enumeration, tool calls)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Upper bound on closing one session
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,

    /// Upper bound on tearing down every server at shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_max_heartbeat_miss() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_ping_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_close_timeout_secs() -> u64 {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            max_heartbeat_miss: default_max_heartbeat_miss(),
            connect_timeout_secs: default_connect_timeout_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            close_timeout_secs: default_close_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl RuntimeSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    fn apply_env_vars(&mut self) {
        override_from_env("AGENTICAL_MAX_RETRIES", &mut self.max_retries);
        override_from_env("AGENTICAL_BASE_DELAY_MS", &mut self.base_delay_ms);
        override_from_env(
            "AGENTICAL_HEARTBEAT_INTERVAL_SECS",
            &mut self.heartbeat_interval_secs,
        );
        override_from_env("AGENTICAL_MAX_HEARTBEAT_MISS", &mut self.max_heartbeat_miss);
    }

    /// Reject settings that would disable retries, heartbeats or timeouts.
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, u64); 9] = [
            ("max_retries", u64::from(self.max_retries)),
            ("base_delay_ms", self.base_delay_ms),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("max_heartbeat_miss", u64::from(self.max_heartbeat_miss)),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("ping_timeout_secs", self.ping_timeout_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("close_timeout_secs", self.close_timeout_secs),
            ("shutdown_timeout_secs", self.shutdown_timeout_secs),
        ];

        for (field, value) in checks {
            if value == 0 {
                return Err(AgenticalError::Config(format!(
                    "settings.{field} must be greater than 0"
                ))
                .into());
            }
        }

        Ok(())
    }
}

fn override_from_env<T: std::str::FromStr>(var: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        match raw.trim().parse() {
            Ok(value) => {
                *slot = value;
                tracing::debug!(var, value = %raw, "Env override applied");
            }
            Err(_) => tracing::warn!("Invalid {}: {}", var, raw),
        }
    }
}

/// The full runtime configuration: named servers plus shared settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpConfig {
    /// Server catalog keyed by name, iterated in name order
    pub servers: BTreeMap<String, ServerSpec>,

    /// Retry, heartbeat and timeout settings
    #[serde(default)]
    pub settings: RuntimeSettings,
}

/// On-disk shapes accepted by [`McpConfig::from_file`].
#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigFile {
    Structured {
        servers: BTreeMap<String, ServerSpec>,
        #[serde(default)]
        settings: RuntimeSettings,
    },
    Bare(BTreeMap<String, ServerSpec>),
}

impl From<ConfigFile> for McpConfig {
    fn from(file: ConfigFile) -> Self {
        match file {
            ConfigFile::Structured { servers, settings } => Self { servers, settings },
            ConfigFile::Bare(servers) => Self {
                servers,
                settings: RuntimeSettings::default(),
            },
        }
    }
}

impl McpConfig {
    /// Load, override from the environment, and validate.
    ///
    /// # Errors
    ///
    /// Returns [`AgenticalError::Config`] if the file is missing, unparsable
    /// or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path.as_ref())?;
        config.settings.apply_env_vars();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without applying overrides or validation.
    ///
    /// Files ending in `.json` are parsed as JSON; anything else as YAML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AgenticalError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&contents)
        } else {
            Self::from_yaml_str(&contents)
        }
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        serde_json::from_str::<ConfigFile>(contents)
            .map(Self::from)
            .map_err(|e| AgenticalError::Config(format!("Failed to parse config: {}", e)).into())
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        serde_yaml::from_str::<ConfigFile>(contents)
            .map(Self::from)
            .map_err(|e| AgenticalError::Config(format!("Failed to parse config: {}", e)).into())
    }

    /// Validate the server catalog and the settings.
    ///
    /// # Errors
    ///
    /// Returns [`AgenticalError::Config`] when the catalog is empty, a name
    /// is blank, a server spec is invalid or a setting is zero.
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(AgenticalError::Config(
                "At least one server configuration must be provided".to_string(),
            )
            .into());
        }

        for (name, spec) in &self.servers {
            if name.trim().is_empty() {
                return Err(
                    AgenticalError::Config("Server names cannot be empty".to_string()).into(),
                );
            }
            spec.validate(name)?;
        }

        self.settings.validate()
    }

    /// Server names in iteration order.
    pub fn server_names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }
}

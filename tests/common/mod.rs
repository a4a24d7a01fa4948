use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use agentical::config::{McpConfig, RuntimeSettings, ServerSpec};

/// Path to the `mcp_test_server` helper binary.
///
/// Cargo sets `CARGO_BIN_EXE_mcp_test_server` for integration tests; the
/// `target/debug` fallback helps when running a test binary by hand.
#[allow(dead_code)]
pub fn test_server_exe() -> PathBuf {
    if let Ok(p) = std::env::var("CARGO_BIN_EXE_mcp_test_server") {
        return PathBuf::from(p);
    }
    if let Ok(manifest) = std::env::var("CARGO_MANIFEST_DIR") {
        let debug = PathBuf::from(manifest)
            .join("target")
            .join("debug")
            .join("mcp_test_server");
        if debug.exists() {
            return debug;
        }
    }
    PathBuf::from("mcp_test_server")
}

/// Launch spec for the test server, with optional extra environment.
#[allow(dead_code)]
pub fn test_server_spec(env: &[(&str, &str)]) -> ServerSpec {
    let mut spec = ServerSpec::new(test_server_exe().to_string_lossy(), vec![]);
    if !env.is_empty() {
        spec.env = Some(
            env.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        );
    }
    spec
}

/// Launch spec for a binary that does not exist.
#[allow(dead_code)]
pub fn missing_server_spec() -> ServerSpec {
    ServerSpec::new("/nonexistent/agentical/mcp-server", vec![])
}

/// Settings that keep real-time tests short.
#[allow(dead_code)]
pub fn fast_settings() -> RuntimeSettings {
    RuntimeSettings {
        base_delay_ms: 20,
        connect_timeout_secs: 10,
        ping_timeout_secs: 1,
        request_timeout_secs: 5,
        close_timeout_secs: 2,
        shutdown_timeout_secs: 10,
        ..RuntimeSettings::default()
    }
}

#[allow(dead_code)]
pub fn config_with(servers: Vec<(&str, ServerSpec)>, settings: RuntimeSettings) -> McpConfig {
    McpConfig {
        servers: servers
            .into_iter()
            .map(|(name, spec)| (name.to_string(), spec))
            .collect(),
        settings,
    }
}

/// Write `contents` to `<tempdir>/<name>` and return both.
#[allow(dead_code)]
pub fn temp_config_file(name: &str, contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join(name);
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

#![allow(deprecated)]

//! CLI integration tests for the `agentical` binary

use assert_cmd::Command;
use predicates::prelude::*;

mod common;

fn config_json(servers: serde_json::Value) -> String {
    serde_json::json!({
        "servers": servers,
        "settings": { "base_delay_ms": 20 }
    })
    .to_string()
}

#[test]
fn test_servers_lists_yaml_config() {
    let (_dir, path) = common::temp_config_file(
        "mcp.yaml",
        "files:\n  command: npx\n  args: [\"-y\", \"server-filesystem\"]\nweather:\n  command: weather-mcp\n",
    );

    let mut cmd = Command::cargo_bin("agentical").unwrap();
    cmd.arg("servers").arg("--config").arg(&path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("files: npx -y server-filesystem"))
        .stdout(predicate::str::contains("weather: weather-mcp"));
}

#[test]
fn test_servers_json_output_is_parseable() {
    let (_dir, path) = common::temp_config_file(
        "mcp.json",
        &config_json(serde_json::json!({ "files": { "command": "npx" } })),
    );

    let output = Command::cargo_bin("agentical")
        .unwrap()
        .args(["servers", "--json", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed[0]["name"], "files");
}

#[test]
fn test_missing_config_file_fails() {
    let mut cmd = Command::cargo_bin("agentical").unwrap();
    cmd.args(["servers", "--config", "/nonexistent/agentical.json"]);
    cmd.assert().failure();
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_dir, path) = common::temp_config_file(
        "mcp.json",
        &config_json(serde_json::json!({ "files": { "command": "" } })),
    );

    let mut cmd = Command::cargo_bin("agentical").unwrap();
    cmd.arg("servers").arg("--config").arg(&path);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_connect_reports_capabilities() {
    let exe = common::test_server_exe();
    let (_dir, path) = common::temp_config_file(
        "mcp.json",
        &config_json(serde_json::json!({
            "test": { "command": exe.to_string_lossy() },
            "ghost": { "command": "/nonexistent/agentical/mcp-server" }
        })),
    );

    let mut cmd = Command::cargo_bin("agentical").unwrap();
    cmd.arg("connect").arg("--config").arg(&path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "test: connected (tools: 2, resources: 1, prompts: 0)",
        ))
        .stdout(predicate::str::contains("ghost: disconnected"));
}

#[test]
fn test_connect_fails_when_nothing_connects() {
    let (_dir, path) = common::temp_config_file(
        "mcp.json",
        &config_json(serde_json::json!({
            "ghost": { "command": "/nonexistent/agentical/mcp-server" }
        })),
    );

    let mut cmd = Command::cargo_bin("agentical").unwrap();
    cmd.args(["connect", "--server", "ghost", "--config"]).arg(&path);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("could be connected"));
}

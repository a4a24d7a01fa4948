//! MCP test server binary for integration tests
//!
//! A minimal MCP server speaking newline-delimited JSON-RPC over
//! stdin/stdout, used to exercise the stdio transport and the full session
//! lifecycle without a real external server.
//!
//! # Handled Methods
//!
//! - `initialize` -- protocol `2025-11-25`; advertises `tools` and
//!   `resources`, plus `prompts` when `MCP_TEST_SERVER_PROMPTS` is set.
//! - `notifications/initialized` -- swallowed.
//! - `tools/list` -- `echo` and `add`, one per page (cursor `"page-2"`).
//! - `tools/call` -- `echo` returns `arguments.message`; `add` sums `a`
//!   and `b`.
//! - `resources/list` / `resources/read` -- one text resource,
//!   `file:///greeting.txt`.
//! - `prompts/list` / `prompts/get` -- one prompt, `greet`, taking `name`.
//! - `ping` -- empty result, or no answer at all when
//!   `MCP_TEST_SERVER_SILENT_PING` is set.
//! - Anything else -- `-32601 Method not found`.

use std::io::{self, BufRead, Write};

const GREETING_URI: &str = "file:///greeting.txt";

fn main() {
    let with_prompts = std::env::var_os("MCP_TEST_SERVER_PROMPTS").is_some();
    let silent_ping = std::env::var_os("MCP_TEST_SERVER_SILENT_PING").is_some();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                let response = make_error(&serde_json::Value::Null, -32700, "Parse error");
                if !write_line(&mut out, &response) {
                    break;
                }
                continue;
            }
        };

        let Some(method) = request.get("method").and_then(|m| m.as_str()) else {
            // A response to something we never sent.
            continue;
        };
        let Some(id) = request.get("id").cloned() else {
            // Notification.
            continue;
        };
        let params = request
            .get("params")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let result = match method {
            "initialize" => Ok(initialize(with_prompts)),
            "ping" if silent_ping => continue,
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => Ok(tools_list(&params)),
            "tools/call" => tools_call(&params),
            "resources/list" => Ok(resources_list()),
            "resources/read" => resources_read(&params),
            "prompts/list" if with_prompts => Ok(prompts_list()),
            "prompts/get" if with_prompts => prompts_get(&params),
            other => Err((-32601, format!("Method not found: {}", other))),
        };

        let response = match result {
            Ok(result) => serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => make_error(&id, code, &message),
        };
        if !write_line(&mut out, &response) {
            break;
        }
    }
}

fn write_line(out: &mut impl Write, value: &serde_json::Value) -> bool {
    writeln!(out, "{}", value).is_ok() && out.flush().is_ok()
}

fn initialize(with_prompts: bool) -> serde_json::Value {
    let mut capabilities = serde_json::json!({
        "tools": {},
        "resources": {}
    });
    if with_prompts {
        capabilities["prompts"] = serde_json::json!({});
    }
    serde_json::json!({
        "protocolVersion": "2025-11-25",
        "capabilities": capabilities,
        "serverInfo": {
            "name": "mcp-test-server",
            "version": "0.1.0"
        }
    })
}

fn tools_list(params: &serde_json::Value) -> serde_json::Value {
    match params.get("cursor").and_then(|c| c.as_str()) {
        None => serde_json::json!({
            "tools": [{
                "name": "echo",
                "description": "Echoes input",
                "inputSchema": {
                    "type": "object",
                    "properties": { "message": { "type": "string" } }
                }
            }],
            "nextCursor": "page-2"
        }),
        Some(_) => serde_json::json!({
            "tools": [{
                "name": "add",
                "description": "Adds two numbers",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "a": { "type": "number" },
                        "b": { "type": "number" }
                    }
                }
            }]
        }),
    }
}

fn tools_call(params: &serde_json::Value) -> Result<serde_json::Value, (i64, String)> {
    let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or_default();

    let text = match name {
        "echo" => args
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string(),
        "add" => {
            let a = args.get("a").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let b = args.get("b").and_then(|v| v.as_f64()).unwrap_or(0.0);
            (a + b).to_string()
        }
        other => return Err((-32602, format!("Unknown tool: {}", other))),
    };

    Ok(serde_json::json!({
        "content": [{ "type": "text", "text": text }],
        "isError": false
    }))
}

fn resources_list() -> serde_json::Value {
    serde_json::json!({
        "resources": [{
            "uri": GREETING_URI,
            "name": "greeting",
            "mimeType": "text/plain"
        }]
    })
}

fn resources_read(params: &serde_json::Value) -> Result<serde_json::Value, (i64, String)> {
    let uri = params.get("uri").and_then(|u| u.as_str()).unwrap_or("");
    if uri != GREETING_URI {
        return Err((-32002, format!("Resource not found: {}", uri)));
    }
    Ok(serde_json::json!({
        "contents": [{
            "uri": GREETING_URI,
            "mimeType": "text/plain",
            "text": "hello from the test server"
        }]
    }))
}

fn prompts_list() -> serde_json::Value {
    serde_json::json!({
        "prompts": [{
            "name": "greet",
            "description": "Greets someone",
            "arguments": [{ "name": "name", "required": true }]
        }]
    })
}

fn prompts_get(params: &serde_json::Value) -> Result<serde_json::Value, (i64, String)> {
    if params.get("name").and_then(|n| n.as_str()) != Some("greet") {
        return Err((-32602, "Unknown prompt".to_string()));
    }
    let who = params
        .get("arguments")
        .and_then(|a| a.get("name"))
        .and_then(|n| n.as_str())
        .unwrap_or("world");
    Ok(serde_json::json!({
        "description": "Greets someone",
        "messages": [{
            "role": "user",
            "content": { "type": "text", "text": format!("Say hello to {}", who) }
        }]
    }))
}

fn make_error(id: &serde_json::Value, code: i64, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}

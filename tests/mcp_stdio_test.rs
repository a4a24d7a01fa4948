//! MCP stdio integration tests
//!
//! Drives `McpSession` over a real `StdioTransport` against the
//! `mcp_test_server` subprocess: handshake, paginated enumeration,
//! capability gating, tool calls, resource reads, prompts, ping and close.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agentical::error::AgenticalError;
use agentical::mcp::transport::stdio::StdioTransport;
use agentical::mcp::transport::Transport;
use agentical::mcp::types::{MessageContent, ResourceContents};
use agentical::session::{McpSession, Session, SessionFactory, StdioSessionFactory};

mod common;

async fn open_session(env: &[(&str, &str)]) -> McpSession {
    let spec = common::test_server_spec(env);
    let transport: Arc<dyn Transport> = Arc::new(
        StdioTransport::spawn("test", &spec)
            .expect("failed to spawn mcp_test_server -- was it built with `cargo build`?"),
    );
    tokio::time::timeout(
        Duration::from_secs(10),
        McpSession::handshake("test", transport, Duration::from_secs(5)),
    )
    .await
    .expect("initialize timed out")
    .expect("initialize failed")
}

#[tokio::test]
async fn test_handshake_reports_server_identity() {
    let session = open_session(&[]).await;
    assert_eq!(session.protocol_version(), "2025-11-25");
    assert_eq!(session.server_info().name, "mcp-test-server");
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_enumeration_follows_pagination_and_gating() {
    let session = open_session(&[]).await;

    let tools: Vec<String> = session
        .enumerate_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(tools, vec!["echo".to_string(), "add".to_string()]);

    let resources = session.enumerate_resources().await.unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].uri, "file:///greeting.txt");

    // prompts not advertised
    assert!(session.enumerate_prompts().await.unwrap().is_empty());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_tool_calls_round_trip() {
    let session = open_session(&[]).await;

    let echoed = session
        .invoke("echo", Some(serde_json::json!({ "message": "hi there" })))
        .await
        .unwrap();
    assert_eq!(echoed.text_content(), "hi there");
    assert_eq!(echoed.is_error, Some(false));

    let sum = session
        .invoke("add", Some(serde_json::json!({ "a": 2, "b": 3 })))
        .await
        .unwrap();
    assert_eq!(sum.text_content(), "5");

    let err = session.invoke("missing", None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AgenticalError>(),
        Some(AgenticalError::Mcp(msg)) if msg.contains("Unknown tool")
    ));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_read_resource_and_get_prompt() {
    let session = open_session(&[("MCP_TEST_SERVER_PROMPTS", "1")]).await;

    let contents = session.read_resource("file:///greeting.txt").await.unwrap();
    match contents.as_slice() {
        [ResourceContents::Text(text)] => assert_eq!(text.text, "hello from the test server"),
        other => panic!("unexpected contents: {other:?}"),
    }

    let prompts = session.enumerate_prompts().await.unwrap();
    assert_eq!(prompts.len(), 1);

    let rendered = session
        .get_prompt(
            "greet",
            Some(HashMap::from([("name".to_string(), "Ada".to_string())])),
        )
        .await
        .unwrap();
    match &rendered.messages[0].content {
        MessageContent::Text(t) => assert_eq!(t.text, "Say hello to Ada"),
        other => panic!("unexpected content: {other:?}"),
    }

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_ping_and_close() {
    let session = open_session(&[]).await;
    session.ping().await.unwrap();

    session.close().await.unwrap();
    session.close().await.unwrap();
    assert!(session.ping().await.is_err());
}

#[tokio::test]
async fn test_silent_server_ping_times_out() {
    let session = open_session(&[("MCP_TEST_SERVER_SILENT_PING", "1")]).await;

    let err = session.ping().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AgenticalError>(),
        Some(AgenticalError::McpTimeout { method, .. }) if method == "ping"
    ));
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_factory_spawn_failure_is_a_transport_error() {
    let factory = StdioSessionFactory::new(Duration::from_secs(5));
    let err = factory
        .open("ghost", &common::missing_server_spec())
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AgenticalError>(),
        Some(AgenticalError::McpTransport(_))
    ));
    assert!(agentical::error::is_retryable(&err));
}

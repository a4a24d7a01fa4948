//! Stdio transport for MCP child-process servers
//!
//! Outbound messages are written to the child's stdin as one JSON object per
//! line; inbound messages are read from stdout the same way. Stderr lines
//! are logged at `DEBUG` and buffered for [`Transport::receive_err`]; they
//! never signal an error.
//!
//! The child inherits the parent environment with the server's `env`
//! entries layered on top. [`Transport::close`] closes stdin, waits for the
//! child to exit, then escalates to SIGTERM and finally a kill. Dropping the
//! transport without closing it sends SIGTERM.

use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::ServerSpec;
use crate::error::{AgenticalError, Result};
use crate::mcp::transport::Transport;

/// How long the child gets to exit on its own after stdin closes, and again
/// after SIGTERM.
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Stderr lines kept for [`Transport::receive_err`]; older lines are dropped.
const STDERR_BUFFER: usize = 256;

/// Stdio-based MCP transport that drives a child process.
///
/// ```no_run
/// use agentical::config::ServerSpec;
/// use agentical::mcp::transport::stdio::StdioTransport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let spec = ServerSpec::new("npx", vec!["-y".into(), "server-filesystem".into()]);
/// let transport = StdioTransport::spawn("files", &spec)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    server: String,
    stdin_tx: mpsc::UnboundedSender<String>,
    stdout_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    stderr_rx: Arc<Mutex<mpsc::Receiver<String>>>,
    child: Arc<Mutex<Child>>,
    shutdown: CancellationToken,
}

impl StdioTransport {
    /// Spawn the server described by `spec` and wire up its pipes.
    ///
    /// # Errors
    ///
    /// Returns [`AgenticalError::McpTransport`] if the process cannot be
    /// spawned or a pipe is missing.
    pub fn spawn(server: &str, spec: &ServerSpec) -> Result<Self> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        if let Some(env) = &spec.env {
            cmd.envs(env);
        }
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            AgenticalError::McpTransport(format!(
                "failed to spawn MCP server '{}' (`{}`): {}",
                server, spec.command, e
            ))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            AgenticalError::McpTransport("child stdin unavailable after spawn".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            AgenticalError::McpTransport("child stdout unavailable after spawn".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            AgenticalError::McpTransport("child stderr unavailable after spawn".into())
        })?;

        tracing::debug!(server, command = %spec.command, pid = ?child.id(), "spawned MCP server");

        let shutdown = CancellationToken::new();
        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<String>();
        let (stderr_tx, stderr_rx) = mpsc::channel::<String>(STDERR_BUFFER);

        // Writer: dropping `stdin` on exit gives the child EOF.
        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut stdin = stdin;
            loop {
                let msg = tokio::select! {
                    _ = writer_shutdown.cancelled() => break,
                    msg = stdin_rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };
                let line = format!("{}\n", msg);
                if stdin.write_all(line.as_bytes()).await.is_err() || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if stdout_tx.send(line.to_string()).is_err() {
                    break;
                }
            }
        });

        let stderr_server = server.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(
                    target: "agentical::mcp::transport::stdio",
                    server = %stderr_server,
                    "mcp server stderr: {}",
                    line
                );
                let _ = stderr_tx.try_send(line);
            }
        });

        Ok(Self {
            server: server.to_string(),
            stdin_tx,
            stdout_rx: Arc::new(Mutex::new(stdout_rx)),
            stderr_rx: Arc::new(Mutex::new(stderr_rx)),
            child: Arc::new(Mutex::new(child)),
            shutdown,
        })
    }

    /// OS process id of the child, if it is still running.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.id()
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid comes from a live tokio::process::Child we still own.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.start_kill();
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: String) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(AgenticalError::McpTransport("transport closed".to_string()).into());
        }
        self.stdin_tx.send(message).map_err(|e| {
            AgenticalError::McpTransport(format!("stdin channel closed: {}", e)).into()
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.stdout_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let item = rx.lock().await.recv().await?;
            Some((item, rx))
        }))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.stderr_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let item = rx.lock().await.recv().await?;
            Some((item, rx))
        }))
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.cancel();

        let mut child = self.child.lock().await;
        if child.try_wait()?.is_some() {
            return Ok(());
        }

        if let Ok(status) = tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            tracing::debug!(
                server = %self.server,
                status = ?status?,
                "MCP server exited after stdin closed"
            );
            return Ok(());
        }

        #[cfg(unix)]
        send_sigterm(&child);
        #[cfg(not(unix))]
        send_sigterm(&mut child);

        if let Ok(status) = tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            tracing::debug!(
                server = %self.server,
                status = ?status?,
                "MCP server exited after SIGTERM"
            );
            return Ok(());
        }

        tracing::warn!(server = %self.server, "MCP server ignored SIGTERM; killing");
        child.kill().await.map_err(|e| {
            AgenticalError::McpTransport(format!(
                "failed to kill MCP server '{}': {}",
                self.server, e
            ))
            .into()
        })
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
        // If the lock is held elsewhere a close is in progress.
        if let Ok(mut child) = self.child.try_lock() {
            if matches!(child.try_wait(), Ok(None)) {
                #[cfg(unix)]
                send_sigterm(&child);
                #[cfg(not(unix))]
                send_sigterm(&mut child);
            }
        }
    }
}

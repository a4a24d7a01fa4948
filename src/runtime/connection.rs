//! The live entity for one connected server
//!
//! A [`ServerConnection`] exclusively owns the server's session, its
//! heartbeat counters and its monitor task. Resources are recorded on a
//! teardown stack as they are acquired and released in reverse order, so
//! every exit path (disconnect, failed registration, exhausted reconnect)
//! stops the monitor, then drops registry entries, then closes the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerSpec;
use crate::error::{AgenticalError, Result};
use crate::events::{EventSink, LifecycleEvent};
use crate::runtime::service::LifecycleHooks;
use crate::session::Session;

/// One resource to release on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    CloseSession,
    Deregister,
    StopMonitor,
}

/// A running heartbeat task and the token that stops it.
#[derive(Debug)]
pub struct MonitorHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn new(token: CancellationToken, join: JoinHandle<()>) -> Self {
        Self { token, join }
    }

    /// Cancel the task and wait up to `grace` for it to finish; abort it
    /// otherwise.
    pub async fn stop(self, grace: Duration) {
        self.token.cancel();
        let abort = self.join.abort_handle();
        if tokio::time::timeout(grace, self.join).await.is_err() {
            abort.abort();
        }
    }
}

#[derive(Debug)]
pub struct ServerConnection {
    name: String,
    spec: ServerSpec,
    session: Option<Arc<dyn Session>>,
    /// Consecutive missed heartbeats.
    pub heartbeat_misses: u32,
    /// Attempt number of the reconnect in progress, 0 when none is.
    pub reconnect_attempts: u32,
    monitor: Option<MonitorHandle>,
    teardown: Vec<TeardownStep>,
}

impl ServerConnection {
    /// Wrap a freshly established session. The session is the first
    /// resource on the teardown stack.
    pub fn new(name: impl Into<String>, spec: ServerSpec, session: Arc<dyn Session>) -> Self {
        Self {
            name: name.into(),
            spec,
            session: Some(session),
            heartbeat_misses: 0,
            reconnect_attempts: 0,
            monitor: None,
            teardown: vec![TeardownStep::CloseSession],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub fn session(&self) -> Option<Arc<dyn Session>> {
        self.session.clone()
    }

    pub fn take_session(&mut self) -> Option<Arc<dyn Session>> {
        self.session.take()
    }

    /// Put a re-established session in place and reset both counters.
    pub fn replace_session(&mut self, session: Arc<dyn Session>) {
        self.session = Some(session);
        self.heartbeat_misses = 0;
        self.reconnect_attempts = 0;
    }

    pub fn push_teardown(&mut self, step: TeardownStep) {
        self.teardown.push(step);
    }

    pub fn teardown_steps(&self) -> &[TeardownStep] {
        &self.teardown
    }

    pub fn attach_monitor(&mut self, monitor: MonitorHandle) {
        self.monitor = Some(monitor);
        self.push_teardown(TeardownStep::StopMonitor);
    }

    /// Detach the monitor without stopping it. The monitor calls this on
    /// itself before tearing down its own connection.
    pub fn take_monitor(&mut self) -> Option<MonitorHandle> {
        self.monitor.take()
    }

    /// Release every recorded resource, most recent first.
    ///
    /// Every step runs even when an earlier one fails. Failures are emitted
    /// as `CleanupFailed` and returned together as one
    /// [`AgenticalError::Cleanup`].
    pub async fn teardown(
        &mut self,
        hooks: &dyn LifecycleHooks,
        events: &dyn EventSink,
        close_timeout: Duration,
    ) -> Result<()> {
        let mut failures = Vec::new();

        while let Some(step) = self.teardown.pop() {
            tracing::debug!(server = %self.name, ?step, "teardown");
            match step {
                TeardownStep::StopMonitor => {
                    if let Some(monitor) = self.monitor.take() {
                        monitor.stop(close_timeout).await;
                    }
                }
                TeardownStep::Deregister => hooks.on_teardown(&self.name).await,
                TeardownStep::CloseSession => {
                    let Some(session) = self.session.take() else {
                        continue;
                    };
                    match tokio::time::timeout(close_timeout, session.close()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => failures.push(format!("{e:#}")),
                        Err(_) => failures.push(format!(
                            "session close timed out after {}s",
                            close_timeout.as_secs()
                        )),
                    }
                }
            }
        }

        if failures.is_empty() {
            return Ok(());
        }

        for failure in &failures {
            tracing::warn!(server = %self.name, "cleanup failed: {failure}");
            events.emit(LifecycleEvent::CleanupFailed {
                server: self.name.clone(),
                error: failure.clone(),
            });
        }
        Err(AgenticalError::Cleanup {
            server: self.name.clone(),
            message: failures.join("; "),
        }
        .into())
    }
}

//! Connection Manager: turns a launch spec into a live session
//!
//! [`ConnectionManager::establish`] opens a session through the configured
//! [`SessionFactory`], retrying transient failures with exponential backoff.
//! The first attempt starts immediately; attempt `n > 1` waits
//! `base_delay * 2^(n-2)`, so the default policy sleeps 0s, 1s, 2s.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{RuntimeSettings, ServerSpec};
use crate::error::{is_retryable, AgenticalError, Result};
use crate::events::{EventSink, LifecycleEvent};
use crate::session::{Session, SessionFactory};

/// Bounded exponential backoff.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use agentical::runtime::RetryPolicy;
///
/// let policy = RetryPolicy::new(3, Duration::from_secs(1));
/// assert_eq!(policy.delay_before_attempt(1), Duration::ZERO);
/// assert_eq!(policy.delay_before_attempt(2), Duration::from_secs(1));
/// assert_eq!(policy.delay_before_attempt(3), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    /// Delay before the second attempt; doubles for each attempt after.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// The policy described by `max_retries` and `base_delay_ms`.
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self::new(settings.max_retries, settings.base_delay())
    }

    /// Sleep before attempt number `attempt` (1-based).
    ///
    /// # Arguments
    ///
    /// * `attempt` - Attempt number; 0 and 1 both mean the first attempt.
    ///
    /// # Returns
    ///
    /// Zero for the first attempt, `base_delay * 2^(attempt - 2)` after
    /// that, saturating instead of overflowing.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt - 2))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RuntimeSettings::default())
    }
}

/// A session together with the number of attempts it took.
#[derive(Debug)]
pub struct Established {
    pub session: Arc<dyn Session>,
    /// 1 when the first attempt succeeded.
    pub attempts: u32,
}

/// Establishes sessions with retry, backoff and a per-attempt timeout.
///
/// The manager holds no per-server state; the connection service and the
/// heartbeat monitor both call [`establish`](Self::establish) with their
/// own cancellation token, and each call counts its attempts from one.
#[derive(Debug)]
pub struct ConnectionManager {
    factory: Arc<dyn SessionFactory>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    events: Arc<dyn EventSink>,
}

impl ConnectionManager {
    /// Create a manager.
    ///
    /// # Arguments
    ///
    /// * `factory` - Opens one session per attempt.
    /// * `policy` - Attempt count and backoff.
    /// * `attempt_timeout` - Upper bound on a single attempt, handshake
    ///   included. A timed-out attempt counts as a retryable failure.
    /// * `events` - Receives one `AttemptFailed` per failed attempt.
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        policy: RetryPolicy,
        attempt_timeout: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            factory,
            policy,
            attempt_timeout,
            events,
        }
    }

    /// The retry policy in use.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Open a session for `server`, retrying per the policy.
    ///
    /// A failed or timed-out attempt releases whatever it opened before
    /// the next attempt starts. Each attempt is bounded by the attempt timeout. Cancelling `cancel`
    /// aborts the sleep or the attempt in flight; a session that finishes
    /// opening after cancellation is closed before returning.
    ///
    /// # Errors
    ///
    /// - [`AgenticalError::Config`] if `spec` is invalid (no attempt is made)
    /// - [`AgenticalError::Cancelled`] if `cancel` fires
    /// - [`AgenticalError::Connect`] carrying the last failure once every
    ///   attempt has failed
    /// - any non-retryable error from the factory, unchanged
    pub async fn establish(
        &self,
        server: &str,
        spec: &ServerSpec,
        cancel: &CancellationToken,
    ) -> Result<Established> {
        self.establish_observed(server, spec, cancel, &mut |_: u32| {}).await
    }

    /// Like [`establish`](Self::establish), calling `on_attempt` with the
    /// 1-based attempt number just before each attempt is opened.
    ///
    /// The heartbeat monitor uses this to keep a connection's reconnect
    /// counter current while it retries.
    pub async fn establish_observed(
        &self,
        server: &str,
        spec: &ServerSpec,
        cancel: &CancellationToken,
        on_attempt: &mut (dyn FnMut(u32) + Send),
    ) -> Result<Established> {
        spec.validate(server)?;

        let max_attempts = self.policy.max_retries.max(1);
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 1..=max_attempts {
            let delay = self.policy.delay_before_attempt(attempt);
            if !delay.is_zero() {
                tracing::debug!(
                    server,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "backing off before connect attempt"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(cancelled(server)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            tracing::debug!(server, attempt, max_attempts, "opening session");
            on_attempt(attempt);
            let attempt_fut =
                tokio::time::timeout(self.attempt_timeout, self.factory.open(server, spec));
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled(server)),
                outcome = attempt_fut => outcome,
            };

            let error = match outcome {
                Ok(Ok(session)) => {
                    if cancel.is_cancelled() {
                        if let Err(e) = session.close().await {
                            tracing::debug!(
                                server,
                                "closing session opened after cancellation: {e}"
                            );
                        }
                        return Err(cancelled(server));
                    }
                    return Ok(Established {
                        session,
                        attempts: attempt,
                    });
                }
                Ok(Err(e)) => e,
                Err(_) => AgenticalError::McpTimeout {
                    server: server.to_string(),
                    method: "initialize".to_string(),
                }
                .into(),
            };

            if !is_retryable(&error) {
                return Err(error);
            }

            tracing::warn!(server, attempt, max_attempts, "connect attempt failed: {error:#}");
            self.events.emit(LifecycleEvent::AttemptFailed {
                server: server.to_string(),
                attempt,
                max_attempts,
                error: format!("{error:#}"),
            });
            last_error = Some(error);
        }

        let source = last_error
            .unwrap_or_else(|| anyhow::anyhow!("no connection attempt was made"))
            .into();
        Err(AgenticalError::Connect {
            server: server.to_string(),
            attempts: max_attempts,
            source,
        }
        .into())
    }
}

fn cancelled(server: &str) -> anyhow::Error {
    AgenticalError::Cancelled(format!("connecting to '{server}'")).into()
}

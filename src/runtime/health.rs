//! Health Monitor
//!
//! One background task per connected server pings the session every
//! heartbeat interval. A missed ping demotes the server to `Unhealthy`; a
//! successful one restores `Connected`. Once consecutive misses reach the
//! threshold the monitor takes the lifecycle lock, moves the server to
//! `Reconnecting` and re-establishes the session with the manager's retry
//! policy. When every reconnect attempt fails the server is torn down and
//! left `Failed` until someone connects it again explicitly.
//!
//! The ping itself runs outside the lifecycle lock so a slow server never
//! blocks disconnects. Every await point also watches the monitor's token;
//! after cancellation the monitor writes nothing.

use std::sync::Arc;

use tokio::sync::MutexGuard;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::AgenticalError;
use crate::events::LifecycleEvent;
use crate::runtime::connection::{MonitorHandle, ServerConnection};
use crate::runtime::service::{ServerSlot, Shared};
use crate::runtime::state::ConnectionState;

enum Flow {
    Continue,
    Stop,
}

/// Start monitoring `slot`'s connection.
///
/// The first ping happens one heartbeat interval from now. The task runs
/// until `token` is cancelled, the connection disappears, or a reconnect
/// is exhausted and the server is left `Failed`.
///
/// # Returns
///
/// A handle that stops the task; the caller records it on the
/// connection's teardown stack.
pub(crate) fn spawn(
    shared: Arc<Shared>,
    slot: Arc<ServerSlot>,
    token: CancellationToken,
) -> MonitorHandle {
    let join = tokio::spawn(run(shared, slot, token.clone()));
    MonitorHandle::new(token, join)
}

async fn run(shared: Arc<Shared>, slot: Arc<ServerSlot>, token: CancellationToken) {
    let period = shared.settings.heartbeat_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(
        server = %slot.name(),
        period_secs = period.as_secs(),
        "heartbeat monitor started"
    );
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Flow::Stop = heartbeat(&shared, &slot, &token).await {
            break;
        }
    }
    tracing::debug!(server = %slot.name(), "heartbeat monitor stopped");
}

/// One heartbeat: ping outside the lock, then record the outcome under it.
async fn heartbeat(shared: &Shared, slot: &ServerSlot, token: &CancellationToken) -> Flow {
    let session = {
        let guard = tokio::select! {
            _ = token.cancelled() => return Flow::Stop,
            guard = slot.lifecycle.lock() => guard,
        };
        match guard.as_ref().and_then(ServerConnection::session) {
            Some(session) => session,
            None => return Flow::Stop,
        }
    };

    let alive = tokio::select! {
        _ = token.cancelled() => return Flow::Stop,
        outcome = tokio::time::timeout(shared.settings.ping_timeout(), session.ping()) => {
            match outcome {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::debug!(server = %slot.name(), "ping failed: {e:#}");
                    false
                }
                Err(_) => {
                    tracing::debug!(server = %slot.name(), "ping timed out");
                    false
                }
            }
        }
    };
    drop(session);

    let mut guard = tokio::select! {
        _ = token.cancelled() => return Flow::Stop,
        guard = slot.lifecycle.lock() => guard,
    };
    if token.is_cancelled() {
        return Flow::Stop;
    }
    let Some(conn) = guard.as_mut() else {
        return Flow::Stop;
    };

    if alive {
        if conn.heartbeat_misses > 0 {
            conn.heartbeat_misses = 0;
            shared.transition(slot, ConnectionState::Connected);
            shared.events.emit(LifecycleEvent::HeartbeatRestored {
                server: slot.name().to_string(),
            });
        }
        return Flow::Continue;
    }

    conn.heartbeat_misses += 1;
    let misses = conn.heartbeat_misses;
    let threshold = shared.settings.max_heartbeat_miss;
    tracing::warn!(server = %slot.name(), misses, threshold, "heartbeat missed");
    shared.events.emit(LifecycleEvent::HeartbeatMissed {
        server: slot.name().to_string(),
        misses,
        threshold,
    });

    if misses < threshold {
        shared.transition(slot, ConnectionState::Unhealthy);
        return Flow::Continue;
    }

    let timeout = AgenticalError::HeartbeatTimeout {
        server: slot.name().to_string(),
        misses,
    };
    tracing::error!(server = %slot.name(), "{timeout}; reconnecting");
    reconnect(shared, slot, &mut guard, token).await
}

/// Replace the session of a connection whose heartbeat timed out. Runs
/// with the lifecycle lock held.
async fn reconnect(
    shared: &Shared,
    slot: &ServerSlot,
    guard: &mut MutexGuard<'_, Option<ServerConnection>>,
    token: &CancellationToken,
) -> Flow {
    let Some(conn) = guard.as_mut() else {
        return Flow::Stop;
    };
    shared.transition(slot, ConnectionState::Reconnecting);

    if let Some(old) = conn.take_session() {
        match tokio::time::timeout(shared.settings.close_timeout(), old.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(server = %slot.name(), "closing dead session: {e:#}"),
            Err(_) => tracing::debug!(server = %slot.name(), "closing dead session timed out"),
        }
    }

    let spec = conn.spec().clone();
    let outcome = shared
        .manager
        .establish_observed(slot.name(), &spec, token, &mut |attempt: u32| {
            conn.reconnect_attempts = attempt;
        })
        .await;
    match outcome {
        Ok(established) => {
            tracing::debug!(
                server = %slot.name(),
                attempts = conn.reconnect_attempts,
                "replacing session"
            );
            conn.replace_session(Arc::clone(&established.session));
            shared.transition(slot, ConnectionState::Connected);
            shared.events.emit(LifecycleEvent::SessionReplaced {
                server: slot.name().to_string(),
            });
            tracing::info!(server = %slot.name(), attempts = established.attempts, "reconnected");

            let refresh = tokio::time::timeout(
                shared.settings.request_timeout(),
                shared
                    .hooks
                    .on_established(slot.name(), established.session.as_ref()),
            )
            .await;
            match refresh {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    server = %slot.name(),
                    "capability refresh failed, keeping previous entries: {e:#}"
                ),
                Err(_) => tracing::warn!(
                    server = %slot.name(),
                    "capability refresh timed out, keeping previous entries"
                ),
            }
            Flow::Continue
        }
        Err(_) if token.is_cancelled() => Flow::Stop,
        Err(e) => {
            tracing::error!(
                server = %slot.name(),
                attempts = conn.reconnect_attempts,
                "reconnect failed, giving up: {e:#}"
            );

            let Some(mut dead) = guard.take() else {
                return Flow::Stop;
            };
            // Our own handle: the task is this one.
            drop(dead.take_monitor());
            if let Err(cleanup) = shared.teardown(&mut dead).await {
                tracing::warn!(server = %slot.name(), "{cleanup:#}");
            }
            shared.transition(slot, ConnectionState::Failed);
            Flow::Stop
        }
    }
}

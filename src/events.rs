//! Lifecycle events
//!
//! The runtime reports everything that happens to a server connection
//! (state changes, failed attempts, missed heartbeats, cleanup problems)
//! through an [`EventSink`]. The default sink, [`TracingEventSink`], turns
//! each event into a structured `tracing` record. [`RecordingEventSink`]
//! keeps them in memory so callers (and tests) can inspect what happened
//! after the fact.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::runtime::state::ConnectionState;

/// Something observable that happened to one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    StateChanged {
        server: String,
        from: ConnectionState,
        to: ConnectionState,
    },
    AttemptFailed {
        server: String,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    HeartbeatMissed {
        server: String,
        misses: u32,
        threshold: u32,
    },
    HeartbeatRestored {
        server: String,
    },
    SessionReplaced {
        server: String,
    },
    CapabilitiesRegistered {
        server: String,
        tools: usize,
        resources: usize,
        prompts: usize,
    },
    CapabilitiesRemoved {
        server: String,
        tools: usize,
        resources: usize,
        prompts: usize,
    },
    CleanupFailed {
        server: String,
        error: String,
    },
}

impl LifecycleEvent {
    pub fn server(&self) -> &str {
        match self {
            LifecycleEvent::StateChanged { server, .. }
            | LifecycleEvent::AttemptFailed { server, .. }
            | LifecycleEvent::HeartbeatMissed { server, .. }
            | LifecycleEvent::HeartbeatRestored { server }
            | LifecycleEvent::SessionReplaced { server }
            | LifecycleEvent::CapabilitiesRegistered { server, .. }
            | LifecycleEvent::CapabilitiesRemoved { server, .. }
            | LifecycleEvent::CleanupFailed { server, .. } => server,
        }
    }
}

/// A timestamped [`LifecycleEvent`].
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LifecycleEvent,
}

/// Receiver for lifecycle events. Implementations must not block.
pub trait EventSink: Send + Sync + std::fmt::Debug {
    fn emit(&self, event: LifecycleEvent);
}

/// Writes every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: LifecycleEvent) {
        match &event {
            LifecycleEvent::StateChanged { server, from, to } => {
                tracing::info!(
                    server = %server,
                    from = %from,
                    to = %to,
                    "connection state changed"
                );
            }
            LifecycleEvent::AttemptFailed {
                server,
                attempt,
                max_attempts,
                error,
            } => {
                tracing::warn!(
                    server = %server,
                    attempt,
                    max_attempts,
                    error = %error,
                    "connection attempt failed"
                );
            }
            LifecycleEvent::HeartbeatMissed {
                server,
                misses,
                threshold,
            } => {
                tracing::warn!(server = %server, misses, threshold, "heartbeat missed");
            }
            LifecycleEvent::HeartbeatRestored { server } => {
                tracing::info!(server = %server, "heartbeat restored");
            }
            LifecycleEvent::SessionReplaced { server } => {
                tracing::info!(server = %server, "session replaced after reconnect");
            }
            LifecycleEvent::CapabilitiesRegistered {
                server,
                tools,
                resources,
                prompts,
            } => {
                tracing::info!(
                    server = %server,
                    tools,
                    resources,
                    prompts,
                    "capabilities registered"
                );
            }
            LifecycleEvent::CapabilitiesRemoved {
                server,
                tools,
                resources,
                prompts,
            } => {
                tracing::debug!(
                    server = %server,
                    tools,
                    resources,
                    prompts,
                    "capabilities removed"
                );
            }
            LifecycleEvent::CleanupFailed { server, error } => {
                tracing::error!(server = %server, error = %error, "cleanup failed");
            }
        }
    }
}

/// Stores every event in memory and forwards it to tracing.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    records: Mutex<Vec<EventRecord>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn records(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }

    /// Events that concern `server`, oldest first.
    pub fn events_for(&self, server: &str) -> Vec<LifecycleEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.server() == server)
            .collect()
    }

    /// The sequence of states `server` moved into.
    pub fn transitions_for(&self, server: &str) -> Vec<ConnectionState> {
        self.events_for(server)
            .into_iter()
            .filter_map(|e| match e {
                LifecycleEvent::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: LifecycleEvent) {
        TracingEventSink.emit(event.clone());
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(EventRecord {
                at: Utc::now(),
                event,
            });
    }
}

//! Connection Service
//!
//! Owns one [`ServerSlot`] per server name. A slot's lifecycle lock
//! serializes every state transition for that server (connect, disconnect,
//! heartbeat demotion, reconnect), while different servers proceed
//! independently. The slot's `watch` channel is the only place the state
//! is stored; it is written only with the lifecycle lock held.
//!
//! Each connect starts a new *incarnation*, identified by a cancellation
//! token. Disconnect cancels the token before waiting for the lock, which
//! interrupts an in-flight connect or reconnect and stops the heartbeat
//! monitor before the session is closed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{RuntimeSettings, ServerSpec};
use crate::error::{AgenticalError, Result};
use crate::events::{EventSink, LifecycleEvent};
use crate::runtime::connection::{ServerConnection, TeardownStep};
use crate::runtime::health;
use crate::runtime::manager::{ConnectionManager, RetryPolicy};
use crate::runtime::state::ConnectionState;
use crate::session::{Session, SessionFactory};

/// Callbacks run under a server's lifecycle lock.
///
/// The provider facade implements this to keep its capability registries
/// in step with each server's session: entries are registered when a
/// session comes up and removed as part of teardown, before the session is
/// closed. Because both calls happen with the lock held, no other
/// transition for the same server can interleave with them.
#[async_trait]
pub trait LifecycleHooks: Send + Sync + std::fmt::Debug {
    /// A session was established (or re-established by the heartbeat
    /// monitor).
    ///
    /// # Arguments
    ///
    /// * `server` - Name of the server the session belongs to.
    /// * `session` - The freshly handshaken session.
    ///
    /// # Errors
    ///
    /// An error after an initial connect aborts the connect: the new
    /// connection is torn down and the server ends `Disconnected`. After a
    /// reconnect the error is only logged.
    async fn on_established(&self, server: &str, session: &dyn Session) -> Result<()>;

    /// The server is being torn down; drop everything held for it.
    async fn on_teardown(&self, server: &str);
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

#[async_trait]
impl LifecycleHooks for NoopHooks {
    async fn on_established(&self, _server: &str, _session: &dyn Session) -> Result<()> {
        Ok(())
    }

    async fn on_teardown(&self, _server: &str) {}
}

/// Per-server lifecycle lock, state and incarnation token.
///
/// Slots are created on first use and never removed, so a subscriber
/// obtained before a server was ever connected keeps observing it.
#[derive(Debug)]
pub struct ServerSlot {
    name: String,
    pub(crate) lifecycle: Mutex<Option<ServerConnection>>,
    state_tx: watch::Sender<ConnectionState>,
    incarnation: StdMutex<CancellationToken>,
}

impl ServerSlot {
    fn new(name: &str) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            name: name.to_string(),
            lifecycle: Mutex::new(None),
            state_tx,
            incarnation: StdMutex::new(CancellationToken::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn cancel_incarnation(&self) {
        self.incarnation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    fn renew_incarnation(&self) -> CancellationToken {
        let mut current = self.incarnation.lock().unwrap_or_else(PoisonError::into_inner);
        current.cancel();
        *current = CancellationToken::new();
        current.clone()
    }
}

/// State shared by the service and its heartbeat monitors.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) manager: ConnectionManager,
    pub(crate) settings: RuntimeSettings,
    pub(crate) hooks: Arc<dyn LifecycleHooks>,
    pub(crate) events: Arc<dyn EventSink>,
}

impl Shared {
    /// Record a state change. Callers hold the slot's lifecycle lock.
    pub(crate) fn transition(&self, slot: &ServerSlot, to: ConnectionState) {
        let from = slot.state();
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            tracing::warn!(server = %slot.name, %from, %to, "unexpected state transition");
        }
        slot.state_tx.send_replace(to);
        self.events.emit(LifecycleEvent::StateChanged {
            server: slot.name.clone(),
            from,
            to,
        });
    }

    /// Run a connection's teardown stack with this service's hooks.
    pub(crate) async fn teardown(&self, conn: &mut ServerConnection) -> Result<()> {
        conn.teardown(
            self.hooks.as_ref(),
            self.events.as_ref(),
            self.settings.close_timeout(),
        )
        .await
    }
}

/// Owns every server's connection lifecycle.
///
/// Connects go through the [`ConnectionManager`]'s retry policy; each
/// connected server gets a heartbeat monitor that demotes, reconnects or
/// fails it. Operations on one server are serialized; operations on
/// different servers run concurrently.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use agentical::runtime::{ConnectionService, NoopHooks};
/// use agentical::{RuntimeSettings, ServerSpec, Session};
/// use agentical::{StdioSessionFactory, TracingEventSink};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let settings = RuntimeSettings::default();
/// let service = ConnectionService::new(
///     Arc::new(StdioSessionFactory::new(settings.request_timeout())),
///     settings,
///     Arc::new(NoopHooks),
///     Arc::new(TracingEventSink),
/// );
///
/// let spec = ServerSpec::new("npx", vec!["-y".into(), "server-filesystem".into()]);
/// let session = service.connect("files", &spec).await?;
/// let tools = session.enumerate_tools().await?;
/// println!("{} tools", tools.len());
///
/// service.disconnect("files").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConnectionService {
    shared: Arc<Shared>,
    slots: Mutex<HashMap<String, Arc<ServerSlot>>>,
}

impl ConnectionService {
    /// Create a service with no servers connected.
    ///
    /// # Arguments
    ///
    /// * `factory` - Opens one session per connection attempt.
    /// * `settings` - Retry, heartbeat and timeout settings.
    /// * `hooks` - Run under the lifecycle lock when a session comes up or
    ///   is torn down.
    /// * `events` - Receives every [`LifecycleEvent`].
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        settings: RuntimeSettings,
        hooks: Arc<dyn LifecycleHooks>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let manager = ConnectionManager::new(
            factory,
            RetryPolicy::from_settings(&settings),
            settings.connect_timeout(),
            Arc::clone(&events),
        );
        Self {
            shared: Arc::new(Shared {
                manager,
                settings,
                hooks,
                events,
            }),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Settings the service was created with.
    pub fn settings(&self) -> &RuntimeSettings {
        &self.shared.settings
    }

    async fn slot(&self, name: &str) -> Arc<ServerSlot> {
        let mut slots = self.slots.lock().await;
        Arc::clone(
            slots
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(ServerSlot::new(name))),
        )
    }

    async fn existing_slot(&self, name: &str) -> Option<Arc<ServerSlot>> {
        self.slots.lock().await.get(name).cloned()
    }

    /// Connect `name`, or return its live session if it already has one.
    ///
    /// Waits for any transition in progress on the same server, so two
    /// concurrent calls open at most one session. On success
    /// the server is `Connected`, the hooks have run and a heartbeat
    /// monitor is ticking. On failure the server is `Disconnected` and
    /// nothing acquired along the way is left behind.
    ///
    /// # Arguments
    ///
    /// * `name` - Server name; also the key for state and subscriptions.
    /// * `spec` - How to launch the server.
    ///
    /// # Returns
    ///
    /// The server's live session.
    ///
    /// # Errors
    ///
    /// Whatever [`ConnectionManager::establish`] or
    /// [`LifecycleHooks::on_established`] reports.
    pub async fn connect(&self, name: &str, spec: &ServerSpec) -> Result<Arc<dyn Session>> {
        let slot = self.slot(name).await;
        let mut guard = slot.lifecycle.lock().await;

        if slot.state().has_session() {
            if let Some(session) = guard.as_ref().and_then(ServerConnection::session) {
                tracing::debug!(server = name, "already connected");
                return Ok(session);
            }
        }

        if let Some(mut stale) = guard.take() {
            if let Err(e) = self.shared.teardown(&mut stale).await {
                tracing::warn!(server = name, "releasing stale connection: {e:#}");
            }
        }

        let token = slot.renew_incarnation();
        self.shared.transition(&slot, ConnectionState::Connecting);

        let established = match self.shared.manager.establish(name, spec, &token).await {
            Ok(established) => established,
            Err(e) => {
                self.shared.transition(&slot, ConnectionState::Disconnected);
                return Err(e);
            }
        };

        tracing::info!(server = name, attempts = established.attempts, "connected");
        let session = Arc::clone(&established.session);
        let mut conn = ServerConnection::new(name, spec.clone(), established.session);
        self.shared.transition(&slot, ConnectionState::Connected);

        conn.push_teardown(TeardownStep::Deregister);
        let registered = match tokio::time::timeout(
            self.shared.settings.request_timeout(),
            self.shared.hooks.on_established(name, session.as_ref()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AgenticalError::McpTimeout {
                server: name.to_string(),
                method: "capability enumeration".to_string(),
            }
            .into()),
        };

        if let Err(e) = registered {
            tracing::warn!(server = name, "post-connect setup failed: {e:#}");
            if let Err(cleanup) = self.shared.teardown(&mut conn).await {
                tracing::warn!(server = name, "{cleanup:#}");
            }
            self.shared.transition(&slot, ConnectionState::Disconnected);
            return Err(e);
        }

        let monitor = health::spawn(
            Arc::clone(&self.shared),
            Arc::clone(&slot),
            token.child_token(),
        );
        conn.attach_monitor(monitor);
        *guard = Some(conn);

        Ok(session)
    }

    /// Drive `name` to `Disconnected`, releasing everything it holds.
    ///
    /// Idempotent; unknown names are a no-op. The server always ends up
    /// `Disconnected`, even when closing the session fails.
    ///
    /// # Errors
    ///
    /// [`AgenticalError::Cleanup`] if releasing the session failed.
    pub async fn disconnect(&self, name: &str) -> Result<()> {
        let Some(slot) = self.existing_slot(name).await else {
            return Ok(());
        };

        // Stop the monitor and any reconnect before queueing for the lock.
        slot.cancel_incarnation();
        let mut guard = slot.lifecycle.lock().await;

        let result = match guard.take() {
            Some(mut conn) => self.shared.teardown(&mut conn).await,
            None => Ok(()),
        };
        self.shared.transition(&slot, ConnectionState::Disconnected);
        tracing::info!(server = name, "disconnected");
        result
    }

    /// Disconnect every known server concurrently, each bounded by
    /// `timeout`. One server's failure never blocks another's.
    ///
    /// # Returns
    ///
    /// One result per server name. A server whose disconnect exceeded
    /// `timeout` reports [`AgenticalError::Cleanup`].
    pub async fn disconnect_all(&self, timeout: Duration) -> BTreeMap<String, Result<()>> {
        let names = self.server_names().await;
        let results = futures::future::join_all(names.iter().map(|name| async move {
            match tokio::time::timeout(timeout, self.disconnect(name)).await {
                Ok(result) => result,
                Err(_) => Err(AgenticalError::Cleanup {
                    server: name.clone(),
                    message: format!("shutdown timed out after {}s", timeout.as_secs()),
                }
                .into()),
            }
        }))
        .await;
        names.into_iter().zip(results).collect()
    }

    /// `true` while the server has a live session (`Connected` or
    /// `Unhealthy`).
    pub async fn is_connected(&self, name: &str) -> bool {
        self.state(name).await.has_session()
    }

    /// Current state of `name`; `Disconnected` for names never seen.
    pub async fn state(&self, name: &str) -> ConnectionState {
        match self.existing_slot(name).await {
            Some(slot) => slot.state(),
            None => ConnectionState::Disconnected,
        }
    }

    /// Observe `name`'s state changes.
    ///
    /// Works for servers that have not been connected yet; the receiver
    /// starts at the current state.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use agentical::runtime::ConnectionService;
    /// use agentical::ConnectionState;
    ///
    /// # async fn wait(service: &ConnectionService) -> anyhow::Result<()> {
    /// let mut states = service.subscribe("files").await;
    /// states.wait_for(|s| *s == ConnectionState::Connected).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn subscribe(&self, name: &str) -> watch::Receiver<ConnectionState> {
        self.slot(name).await.state_tx.subscribe()
    }

    /// The live session for `name`, waiting out any transition in progress.
    pub async fn session(&self, name: &str) -> Option<Arc<dyn Session>> {
        let slot = self.existing_slot(name).await?;
        let guard = slot.lifecycle.lock().await;
        if !slot.state().has_session() {
            return None;
        }
        guard.as_ref().and_then(ServerConnection::session)
    }

    /// Every server name this service has seen, sorted.
    pub async fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

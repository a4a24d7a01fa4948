//! Connection lifecycle runtime
//!
//! - `state`      -- the per-server [`ConnectionState`] machine
//! - `manager`    -- retrying session establishment with backoff
//! - `connection` -- the live [`ServerConnection`] and its teardown stack
//! - `health`     -- heartbeat monitor, demotion and reconnect
//! - `service`    -- serialized connect/disconnect per server

pub mod connection;
pub(crate) mod health;
pub mod manager;
pub mod service;
pub mod state;

pub use connection::{ServerConnection, TeardownStep};
pub use manager::{ConnectionManager, Established, RetryPolicy};
pub use service::{ConnectionService, LifecycleHooks, NoopHooks};
pub use state::ConnectionState;

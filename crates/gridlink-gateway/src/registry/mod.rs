//! Live agent channel tracking.
//!
//! The registry is the only in-memory record of which agents can be
//! addressed right now. Entries are ephemeral: created on connect,
//! destroyed on disconnect, write failure, or process restart.

pub mod connection;
pub mod keepalive;

pub use connection::ConnectionRegistry;
pub use keepalive::{spawn_keepalive_task, EVENT_HEARTBEAT};

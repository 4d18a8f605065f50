//! SQLite storage for the gateway.
//!
//! Holds the credential store (agents) and the diagnostic session rows.
//! All terminal-state writes on sessions are guarded compare-and-set
//! updates so racing writers cannot produce conflicting terminal states.

pub mod db;
pub mod models;
pub mod queries;

pub use db::GatewayDatabase;
pub use models::{Agent, DiagnosticSessionRow};
pub use queries::NewSession;

pub use gridlink_core::DatabaseError;

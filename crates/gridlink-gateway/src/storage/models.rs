//! Data models for gateway storage.

use serde::{Deserialize, Serialize};

use crate::diagnostics::SessionState;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub active: i64,
    pub secret_hash: String,
    pub previous_secret_hash: Option<String>,
    pub rotated_at: i64,
    pub last_heartbeat: i64,
    pub last_address: String,
    pub created_at: i64,
}

impl Agent {
    pub const fn is_active(&self) -> bool {
        self.active != 0
    }
}

/// One diagnostic session as persisted.
///
/// `state` is stored as text but only ever written through
/// [`SessionState::as_str`]; [`DiagnosticSessionRow::state`] converts it
/// back to the closed enum.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DiagnosticSessionRow {
    pub id: String,
    pub agent_id: String,
    pub address: String,
    pub port: i64,
    pub unit_id: i64,
    pub kind: String,
    pub start: i64,
    pub count: i64,
    pub state: String,
    pub requester: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: Option<i64>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl DiagnosticSessionRow {
    /// Decode the state column. Rows are only written by this crate, so
    /// an unknown string is treated as a failed session rather than a
    /// reason to crash a read path.
    pub fn state(&self) -> SessionState {
        SessionState::parse(&self.state).unwrap_or(SessionState::Error)
    }

    /// Decode the stored result payload (register or bit values).
    pub fn values(&self) -> Vec<u32> {
        self.result
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }
}

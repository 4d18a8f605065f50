//! Database queries for the gateway.

use gridlink_core::db::unix_timestamp;

use crate::diagnostics::SessionState;

use super::db::GatewayDatabase;
use super::models::{Agent, DiagnosticSessionRow};
use super::DatabaseError;

/// Parameters for inserting a new diagnostic session in `pending` state.
pub struct NewSession<'a> {
    pub id: &'a str,
    pub agent_id: &'a str,
    pub address: &'a str,
    pub port: u16,
    pub unit_id: u8,
    pub kind: &'a str,
    pub start: u32,
    pub count: u32,
    pub requester: &'a str,
}

impl GatewayDatabase {
    // =========================================================================
    // Agent queries
    // =========================================================================

    /// Create a new agent with its initial secret hash.
    pub async fn create_agent(
        &self,
        id: &str,
        name: &str,
        secret_hash: &str,
    ) -> Result<Agent, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO agents (id, name, active, secret_hash, rotated_at, created_at) VALUES (?, ?, 1, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(secret_hash)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_agent(id).await
    }

    /// Get an agent by ID.
    pub async fn get_agent(&self, id: &str) -> Result<Agent, DatabaseError> {
        sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Agent {id}")))
    }

    /// List all agents, most recently heard-from first.
    pub async fn list_agents(&self) -> Result<Vec<Agent>, DatabaseError> {
        let agents =
            sqlx::query_as::<_, Agent>("SELECT * FROM agents ORDER BY last_heartbeat DESC")
                .fetch_all(self.pool())
                .await?;
        Ok(agents)
    }

    /// List agents eligible for secret verification.
    pub async fn list_active_agents(&self) -> Result<Vec<Agent>, DatabaseError> {
        let agents = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE active = 1")
            .fetch_all(self.pool())
            .await?;
        Ok(agents)
    }

    /// Atomically rotate an agent's secret: the current hash moves into
    /// the previous slot, the new hash becomes current, and the rotation
    /// time is stamped in the same statement.
    pub async fn rotate_agent_secret(
        &self,
        id: &str,
        new_hash: &str,
        now: i64,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE agents SET previous_secret_hash = secret_hash, secret_hash = ?, rotated_at = ? WHERE id = ?",
        )
        .bind(new_hash)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Agent {id}")));
        }
        Ok(())
    }

    /// Update an agent's heartbeat bookkeeping.
    pub async fn touch_agent(
        &self,
        id: &str,
        address: &str,
        now: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE agents SET last_heartbeat = ?, last_address = ? WHERE id = ?")
            .bind(now)
            .bind(address)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Enable or disable an agent.
    pub async fn set_agent_active(&self, id: &str, active: bool) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE agents SET active = ? WHERE id = ?")
            .bind(i64::from(active))
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Diagnostic session queries
    // =========================================================================

    /// Insert a new session in `pending` state.
    pub async fn create_session(
        &self,
        params: &NewSession<'_>,
        now: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO diagnostic_sessions \
             (id, agent_id, address, port, unit_id, kind, start, count, state, requester, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.id)
        .bind(params.agent_id)
        .bind(params.address)
        .bind(i64::from(params.port))
        .bind(i64::from(params.unit_id))
        .bind(params.kind)
        .bind(i64::from(params.start))
        .bind(i64::from(params.count))
        .bind(SessionState::Pending.as_str())
        .bind(params.requester)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Get a session by ID.
    pub async fn get_session(&self, id: &str) -> Result<DiagnosticSessionRow, DatabaseError> {
        sqlx::query_as::<_, DiagnosticSessionRow>("SELECT * FROM diagnostic_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Session {id}")))
    }

    /// Move a session from `pending` to `sent` after a successful dispatch.
    pub async fn mark_session_sent(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE diagnostic_sessions SET state = ? WHERE id = ? AND state = ?")
            .bind(SessionState::Sent.as_str())
            .bind(id)
            .bind(SessionState::Pending.as_str())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Complete a live session with a result payload.
    ///
    /// Returns `false` when the session was already terminal: the update
    /// is guarded on the state still being live, so whichever terminal
    /// write lands first wins and the loser becomes a no-op.
    pub async fn complete_session(
        &self,
        id: &str,
        result_json: &str,
        elapsed_ms: Option<i64>,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE diagnostic_sessions \
             SET state = ?, result = ?, elapsed_ms = ?, completed_at = ? \
             WHERE id = ? AND state IN (?, ?)",
        )
        .bind(SessionState::Completed.as_str())
        .bind(result_json)
        .bind(elapsed_ms)
        .bind(now)
        .bind(id)
        .bind(SessionState::Pending.as_str())
        .bind(SessionState::Sent.as_str())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fail a live session with an error message. Guarded like
    /// [`GatewayDatabase::complete_session`].
    pub async fn fail_session(
        &self,
        id: &str,
        error: &str,
        elapsed_ms: Option<i64>,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE diagnostic_sessions \
             SET state = ?, error = ?, elapsed_ms = ?, completed_at = ? \
             WHERE id = ? AND state IN (?, ?)",
        )
        .bind(SessionState::Error.as_str())
        .bind(error)
        .bind(elapsed_ms)
        .bind(now)
        .bind(id)
        .bind(SessionState::Pending.as_str())
        .bind(SessionState::Sent.as_str())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Expire a live session. Guarded like
    /// [`GatewayDatabase::complete_session`].
    pub async fn timeout_session(&self, id: &str, now: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE diagnostic_sessions SET state = ?, completed_at = ? \
             WHERE id = ? AND state IN (?, ?)",
        )
        .bind(SessionState::Timeout.as_str())
        .bind(now)
        .bind(id)
        .bind(SessionState::Pending.as_str())
        .bind(SessionState::Sent.as_str())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

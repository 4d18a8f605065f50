//! Diagnostic session manager.
//!
//! Owns the `pending -> sent -> {completed | error | timeout}` lifecycle
//! of device probes. The authoritative state lives in storage; every
//! terminal write is a guarded compare-and-set so a racing resolve and
//! lazy timeout cannot both land. Sessions are never re-dispatched: a
//! session that outlives its agent's channel degrades into a timeout on
//! the next poll.

pub mod state;

pub use state::SessionState;

use std::sync::Arc;

use tracing::warn;

use gridlink_core::db::unix_timestamp;
use gridlink_core::DatabaseError;

use crate::dispatch::{CommandDispatcher, CooldownGate, ProbeCommand, ProbeKind};
use crate::error::GatewayError;
use crate::storage::{DiagnosticSessionRow, GatewayDatabase, NewSession};

/// How long a session may stay live before a poll lazily expires it.
pub const DEFAULT_SESSION_TIMEOUT_SECS: i64 = 30;

/// Fixed error message stored when dispatch itself fails.
pub const DISPATCH_FAILED_ERROR: &str = "agent not connected";

/// Modbus PDU limits for one read.
const MAX_REGISTER_COUNT: u32 = 125;
const MAX_BIT_COUNT: u32 = 2000;

/// A validated request to probe one device through one agent.
#[derive(Debug, Clone)]
pub struct DiagnosticRequest {
    pub agent_id: String,
    pub address: String,
    pub port: u16,
    pub unit_id: u8,
    pub kind: ProbeKind,
    pub start: u32,
    pub count: u32,
    pub requester: String,
}

/// Outcome of creating a session.
///
/// The session id is returned even when dispatch failed; failed
/// sessions stay inspectable by id.
#[derive(Debug, Clone)]
pub struct StartedDiagnostic {
    pub session_id: String,
    pub timeout_secs: i64,
    /// `false` when the agent had no live channel; the session is then
    /// already in `error` state, never left `pending`.
    pub dispatched: bool,
}

/// An agent's asynchronous result callback.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub session_id: String,
    pub success: bool,
    pub values: Vec<u32>,
    pub error: Option<String>,
    pub elapsed_ms: Option<i64>,
}

/// Creates, queries, and resolves diagnostic sessions.
#[derive(Clone)]
pub struct DiagnosticManager {
    db: GatewayDatabase,
    dispatcher: CommandDispatcher,
    cooldown: Arc<CooldownGate>,
    timeout_secs: i64,
}

impl DiagnosticManager {
    pub fn new(
        db: GatewayDatabase,
        dispatcher: CommandDispatcher,
        cooldown: Arc<CooldownGate>,
        timeout_secs: i64,
    ) -> Self {
        Self {
            db,
            dispatcher,
            cooldown,
            timeout_secs,
        }
    }

    fn validate(request: &DiagnosticRequest) -> Result<(), GatewayError> {
        if request.address.trim().is_empty() {
            return Err(GatewayError::Validation("address must not be empty".into()));
        }
        if request.port == 0 {
            return Err(GatewayError::Validation("port must be non-zero".into()));
        }
        if request.count == 0 {
            return Err(GatewayError::Validation("count must be at least 1".into()));
        }
        let max = match request.kind {
            ProbeKind::Registers => MAX_REGISTER_COUNT,
            ProbeKind::Bits => MAX_BIT_COUNT,
        };
        if request.count > max {
            return Err(GatewayError::Validation(format!(
                "count must be at most {max} for {}",
                request.kind.as_str()
            )));
        }
        Ok(())
    }

    /// Create a session and hand it to the dispatcher.
    ///
    /// Ordering matters: the cool-down is checked first, the session is
    /// persisted as `pending`, the cool-down is recorded immediately
    /// before the dispatch attempt, and only then is the command pushed.
    /// If persisting fails the cool-down has not been recorded; if
    /// dispatch fails after recording, the extra throttle window on that
    /// target is harmless.
    pub async fn create(
        &self,
        request: DiagnosticRequest,
    ) -> Result<StartedDiagnostic, GatewayError> {
        self.create_at(request, unix_timestamp()).await
    }

    pub async fn create_at(
        &self,
        request: DiagnosticRequest,
        now: i64,
    ) -> Result<StartedDiagnostic, GatewayError> {
        Self::validate(&request)?;

        self.db
            .get_agent(&request.agent_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound(_) => {
                    GatewayError::AgentNotFound(request.agent_id.clone())
                }
                other => GatewayError::Internal(other.to_string()),
            })?;

        self.cooldown.check_at(&request.address, request.port, now)?;

        let session_id = uuid::Uuid::new_v4().to_string();
        self.db
            .create_session(
                &NewSession {
                    id: &session_id,
                    agent_id: &request.agent_id,
                    address: &request.address,
                    port: request.port,
                    unit_id: request.unit_id,
                    kind: request.kind.as_str(),
                    start: request.start,
                    count: request.count,
                    requester: &request.requester,
                },
                now,
            )
            .await?;

        self.cooldown.record_at(&request.address, request.port, now);

        let command = ProbeCommand {
            session_id: session_id.clone(),
            address: request.address.clone(),
            port: request.port,
            unit_id: request.unit_id,
            kind: request.kind,
            start: request.start,
            count: request.count,
        };

        match self.dispatcher.dispatch(&request.agent_id, &command).await {
            Ok(()) => {
                self.db.mark_session_sent(&session_id).await?;
                Ok(StartedDiagnostic {
                    session_id,
                    timeout_secs: self.timeout_secs,
                    dispatched: true,
                })
            }
            Err(GatewayError::AgentOffline(_)) => {
                self.db
                    .fail_session(&session_id, DISPATCH_FAILED_ERROR, None, now)
                    .await?;
                warn!(
                    session_id = %session_id,
                    agent_id = %request.agent_id,
                    "Diagnostic dispatch failed, agent offline"
                );
                Ok(StartedDiagnostic {
                    session_id,
                    timeout_secs: self.timeout_secs,
                    dispatched: false,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Poll a session by id.
    ///
    /// A live session past its timeout is expired as a side effect of
    /// the query itself; there is no background sweep. The expiry write
    /// is guarded, so a resolve that lands first wins and the session is
    /// re-read either way.
    pub async fn query(&self, session_id: &str) -> Result<DiagnosticSessionRow, GatewayError> {
        self.query_at(session_id, unix_timestamp()).await
    }

    pub async fn query_at(
        &self,
        session_id: &str,
        now: i64,
    ) -> Result<DiagnosticSessionRow, GatewayError> {
        let session = self.get_session(session_id).await?;

        if session.state().is_live() && now - session.created_at > self.timeout_secs {
            self.db.timeout_session(session_id, now).await?;
            return self.get_session(session_id).await;
        }

        Ok(session)
    }

    /// Apply an agent's result callback.
    ///
    /// Only the session's own agent may resolve it, and only while the
    /// session is live; a terminal session is reported as already
    /// processed and keeps its first resolution.
    pub async fn resolve(
        &self,
        agent_id: &str,
        resolution: Resolution,
    ) -> Result<(), GatewayError> {
        self.resolve_at(agent_id, resolution, unix_timestamp()).await
    }

    pub async fn resolve_at(
        &self,
        agent_id: &str,
        resolution: Resolution,
        now: i64,
    ) -> Result<(), GatewayError> {
        let session = self.get_session(&resolution.session_id).await?;

        if session.agent_id != agent_id {
            warn!(
                session_id = %resolution.session_id,
                caller = %agent_id,
                owner = %session.agent_id,
                "Agent tried to resolve another agent's session"
            );
            return Err(GatewayError::AuthFailure);
        }

        if session.state().is_terminal() {
            return Err(GatewayError::SessionAlreadyTerminal(resolution.session_id));
        }

        let updated = if resolution.success {
            let values = serde_json::to_string(&resolution.values)
                .map_err(|e| GatewayError::Internal(format!("encode result: {e}")))?;
            self.db
                .complete_session(
                    &resolution.session_id,
                    &values,
                    resolution.elapsed_ms,
                    now,
                )
                .await?
        } else {
            let message = resolution
                .error
                .as_deref()
                .unwrap_or("agent reported failure");
            self.db
                .fail_session(&resolution.session_id, message, resolution.elapsed_ms, now)
                .await?
        };

        if !updated {
            // Lost the race to a lazy timeout between the read above and
            // the guarded write.
            return Err(GatewayError::SessionAlreadyTerminal(resolution.session_id));
        }
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<DiagnosticSessionRow, GatewayError> {
        self.db.get_session(session_id).await.map_err(|e| match e {
            DatabaseError::NotFound(_) => GatewayError::SessionNotFound(session_id.to_string()),
            other => GatewayError::Internal(other.to_string()),
        })
    }
}

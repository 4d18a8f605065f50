//! Caller-facing error taxonomy for the gateway.
//!
//! Every variant is recoverable by the caller: retry later, fix the
//! input, or re-authenticate. None is fatal to the gateway process.

use tonic::Status;

use gridlink_core::DatabaseError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Bad or expired credential or token. Deliberately carries no
    /// detail; the distinguishing reason goes to the logs only.
    #[error("authentication failed")]
    AuthFailure,

    #[error("agent {0} not found")]
    AgentNotFound(String),

    #[error("agent {0} has no live channel")]
    AgentOffline(String),

    #[error("target in cool-down, retry in {retry_after_secs}s")]
    CoolDownActive { retry_after_secs: i64 },

    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: i64 },

    #[error("diagnostic session {0} not found")]
    SessionNotFound(String),

    #[error("diagnostic session {0} already processed")]
    SessionAlreadyTerminal(String),

    #[error("invalid diagnostic parameters: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DatabaseError> for GatewayError {
    fn from(e: DatabaseError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<GatewayError> for Status {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::AuthFailure => Status::unauthenticated("Authentication failed"),
            GatewayError::AgentNotFound(_) => Status::not_found(e.to_string()),
            GatewayError::AgentOffline(_) => Status::unavailable("Agent not connected"),
            GatewayError::CoolDownActive { retry_after_secs } => {
                with_retry_after(Status::resource_exhausted(e.to_string()), retry_after_secs)
            }
            GatewayError::RateLimited { retry_after_secs } => with_retry_after(
                Status::resource_exhausted("Too many requests"),
                retry_after_secs,
            ),
            GatewayError::SessionNotFound(_) => Status::not_found(e.to_string()),
            GatewayError::SessionAlreadyTerminal(_) => Status::failed_precondition(e.to_string()),
            GatewayError::Validation(_) => Status::invalid_argument(e.to_string()),
            GatewayError::Internal(_) => {
                tracing::error!(error = %e, "Internal gateway error");
                Status::internal("Internal error")
            }
        }
    }
}

/// Attach the remaining wait to a throttling status so clients can back
/// off without parsing the message text.
fn with_retry_after(mut status: Status, retry_after_secs: i64) -> Status {
    if let Ok(value) = retry_after_secs.to_string().parse() {
        status.metadata_mut().insert("retry-after-secs", value);
    }
    status
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn cooldown_maps_to_resource_exhausted_with_retry_metadata() {
        let status = Status::from(GatewayError::CoolDownActive {
            retry_after_secs: 42,
        });
        assert_eq!(status.code(), Code::ResourceExhausted);
        let retry = status.metadata().get("retry-after-secs").unwrap();
        assert_eq!(retry.to_str().unwrap(), "42");
    }

    #[test]
    fn auth_failure_is_opaque() {
        let status = Status::from(GatewayError::AuthFailure);
        assert_eq!(status.code(), Code::Unauthenticated);
        assert_eq!(status.message(), "Authentication failed");
    }

    #[test]
    fn terminal_session_maps_to_failed_precondition() {
        let status = Status::from(GatewayError::SessionAlreadyTerminal("s-1".into()));
        assert_eq!(status.code(), Code::FailedPrecondition);
        assert!(status.message().contains("already processed"));
    }

    #[test]
    fn offline_maps_to_unavailable() {
        let status = Status::from(GatewayError::AgentOffline("a-1".into()));
        assert_eq!(status.code(), Code::Unavailable);
    }
}

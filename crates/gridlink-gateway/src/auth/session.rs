//! Post-token agent session checks.
//!
//! The JWT interceptor validates signature and expiry; this layer
//! re-confirms the referenced agent still exists and is active, so a
//! deactivated agent's outstanding tokens stop working before they
//! expire. The distinguishing failure reason goes to the logs; callers
//! always see the same unauthenticated outcome.

use tracing::warn;

use gridlink_core::DatabaseError;

use crate::auth::claims::Claims;
use crate::error::GatewayError;
use crate::storage::{Agent, GatewayDatabase};

#[derive(Clone)]
pub struct SessionAuthenticator {
    db: GatewayDatabase,
}

impl SessionAuthenticator {
    pub const fn new(db: GatewayDatabase) -> Self {
        Self { db }
    }

    /// Confirm the agent referenced by validated claims is still active.
    pub async fn confirm_active(&self, claims: &Claims) -> Result<Agent, GatewayError> {
        match self.db.get_agent(&claims.sub).await {
            Ok(agent) if agent.is_active() => Ok(agent),
            Ok(_) => {
                warn!(agent_id = %claims.sub, "Token for deactivated agent rejected");
                Err(GatewayError::AuthFailure)
            }
            Err(DatabaseError::NotFound(_)) => {
                warn!(agent_id = %claims.sub, "Token references unknown agent");
                Err(GatewayError::AuthFailure)
            }
            Err(e) => Err(GatewayError::Internal(e.to_string())),
        }
    }
}

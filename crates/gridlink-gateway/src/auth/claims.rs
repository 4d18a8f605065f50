//! JWT claims structure for agent session tokens.

use serde::{Deserialize, Serialize};

/// JWT claims embedded in agent session tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// JWT ID (unique per token).
    pub jti: String,
    /// Subject (agent ID).
    pub sub: String,
    /// Agent display name.
    pub name: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiration (unix timestamp).
    pub exp: i64,
    /// Token type; always "agent" for tokens issued by this gateway.
    pub token_type: String,
}

impl Claims {
    pub fn is_agent(&self) -> bool {
        self.token_type == "agent"
    }
}

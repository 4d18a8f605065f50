//! Shared-secret verification, rotation, and agent enrollment.
//!
//! Secrets are 256-bit-entropy random strings handed to an agent exactly
//! once; only SHA-256 digests are stored. Verification iterates every
//! active agent, so the per-candidate check is a constant-time digest
//! comparison rather than a memory-hard password hash.
//!
//! Rotation keeps the superseded digest valid for a bounded grace window
//! so rotating a credential never requires updating every deployed agent
//! at the same instant.

use rand::RngExt;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use gridlink_core::db::unix_timestamp;
use gridlink_core::DatabaseError;

use crate::error::GatewayError;
use crate::storage::GatewayDatabase;

/// How long a superseded secret keeps authenticating after a rotation.
pub const GRACE_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Length of generated plaintext secrets.
const SECRET_LEN: usize = 48;

/// An agent identity established from a presented secret.
#[derive(Debug, Clone)]
pub struct VerifiedAgent {
    pub agent_id: String,
    pub name: String,
    /// The previous-generation secret matched; the agent should pick up
    /// its rotated secret before the grace window closes.
    pub used_previous: bool,
}

/// Generate a random alphanumeric secret.
pub fn generate_secret() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..SECRET_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// SHA-256 digest of a plaintext secret, hex-encoded for storage.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of two stored digest strings.
fn digests_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Checks presented secrets against the credential store and owns the
/// rotation and enrollment paths.
#[derive(Clone)]
pub struct SecretVerifier {
    db: GatewayDatabase,
}

impl SecretVerifier {
    pub const fn new(db: GatewayDatabase) -> Self {
        Self { db }
    }

    /// Verify a presented secret against every active agent.
    ///
    /// The current digest is checked first; the previous digest only
    /// counts while the rotation is within [`GRACE_WINDOW_SECS`]. First
    /// match wins.
    pub async fn verify(&self, presented: &str) -> Result<VerifiedAgent, GatewayError> {
        self.verify_at(presented, unix_timestamp()).await
    }

    pub async fn verify_at(
        &self,
        presented: &str,
        now: i64,
    ) -> Result<VerifiedAgent, GatewayError> {
        let digest = hash_secret(presented);
        let agents = self.db.list_active_agents().await?;

        for agent in agents {
            if digests_equal(&digest, &agent.secret_hash) {
                return Ok(VerifiedAgent {
                    agent_id: agent.id,
                    name: agent.name,
                    used_previous: false,
                });
            }

            if let Some(previous) = &agent.previous_secret_hash {
                let within_grace = now - agent.rotated_at < GRACE_WINDOW_SECS;
                if within_grace && digests_equal(&digest, previous) {
                    return Ok(VerifiedAgent {
                        agent_id: agent.id,
                        name: agent.name,
                        used_previous: true,
                    });
                }
            }
        }

        warn!("Failed agent authentication attempt");
        Err(GatewayError::AuthFailure)
    }

    /// Rotate an agent's secret.
    ///
    /// The current digest moves into the previous slot atomically and
    /// the fresh plaintext is returned exactly once; it is never
    /// retrievable again.
    pub async fn rotate(&self, agent_id: &str) -> Result<String, GatewayError> {
        let secret = generate_secret();
        self.db
            .rotate_agent_secret(agent_id, &hash_secret(&secret), unix_timestamp())
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound(_) => GatewayError::AgentNotFound(agent_id.to_string()),
                other => GatewayError::Internal(other.to_string()),
            })?;

        info!(agent_id = %agent_id, "Agent secret rotated");
        Ok(secret)
    }

    /// Enroll a new agent, returning its id and initial plaintext secret.
    pub async fn enroll(&self, name: &str) -> Result<(String, String), GatewayError> {
        let agent_id = uuid::Uuid::new_v4().to_string();
        let secret = generate_secret();
        self.db
            .create_agent(&agent_id, name, &hash_secret(&secret))
            .await?;

        info!(agent_id = %agent_id, name = %name, "Agent enrolled");
        Ok((agent_id, secret))
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn test_verifier() -> SecretVerifier {
        let db = GatewayDatabase::open_in_memory().await.unwrap();
        SecretVerifier::new(db)
    }

    #[test]
    fn generated_secrets_are_distinct_and_alphanumeric() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), SECRET_LEN);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_secret("s"), hash_secret("s"));
        assert_ne!(hash_secret("s"), hash_secret("t"));
    }

    #[tokio::test]
    async fn current_secret_verifies() {
        let verifier = test_verifier().await;
        let (agent_id, secret) = verifier.enroll("substation-7").await.unwrap();

        let verified = verifier.verify(&secret).await.unwrap();
        assert_eq!(verified.agent_id, agent_id);
        assert_eq!(verified.name, "substation-7");
        assert!(!verified.used_previous);
    }

    #[tokio::test]
    async fn unknown_secret_is_rejected() {
        let verifier = test_verifier().await;
        verifier.enroll("n").await.unwrap();

        let err = verifier.verify("wrong-secret").await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthFailure));
    }

    #[tokio::test]
    async fn previous_secret_honored_within_grace_window() {
        let verifier = test_verifier().await;
        let (agent_id, old_secret) = verifier.enroll("n").await.unwrap();
        let new_secret = verifier.rotate(&agent_id).await.unwrap();
        assert_ne!(old_secret, new_secret);

        // New secret verifies cleanly
        let verified = verifier.verify(&new_secret).await.unwrap();
        assert!(!verified.used_previous);

        // Old secret still verifies, but flags the rotation
        let verified = verifier.verify(&old_secret).await.unwrap();
        assert_eq!(verified.agent_id, agent_id);
        assert!(verified.used_previous);
    }

    #[tokio::test]
    async fn previous_secret_expires_after_grace_window() {
        let verifier = test_verifier().await;
        let (agent_id, old_secret) = verifier.enroll("n").await.unwrap();
        verifier.rotate(&agent_id).await.unwrap();

        let after_grace = gridlink_core::unix_timestamp() + GRACE_WINDOW_SECS + 1;
        let err = verifier
            .verify_at(&old_secret, after_grace)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AuthFailure));
    }

    #[tokio::test]
    async fn only_one_generation_of_grace() {
        let verifier = test_verifier().await;
        let (agent_id, first) = verifier.enroll("n").await.unwrap();
        let second = verifier.rotate(&agent_id).await.unwrap();
        let third = verifier.rotate(&agent_id).await.unwrap();
        assert_ne!(second, third);

        // Generation one no longer authenticates once a second rotation
        // has happened; generation two still does.
        assert!(verifier.verify(&first).await.is_err());
        assert!(verifier.verify(&second).await.unwrap().used_previous);
        assert!(!verifier.verify(&third).await.unwrap().used_previous);
    }

    #[tokio::test]
    async fn rotation_never_repeats_plaintext() {
        let verifier = test_verifier().await;
        let (agent_id, initial) = verifier.enroll("n").await.unwrap();

        let mut seen = vec![initial];
        for _ in 0..5 {
            let secret = verifier.rotate(&agent_id).await.unwrap();
            assert!(!seen.contains(&secret));
            seen.push(secret);
        }
    }

    #[tokio::test]
    async fn inactive_agent_never_matches() {
        let verifier = test_verifier().await;
        let (agent_id, secret) = verifier.enroll("n").await.unwrap();
        verifier.db.set_agent_active(&agent_id, false).await.unwrap();

        let err = verifier.verify(&secret).await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthFailure));
    }

    #[tokio::test]
    async fn rotate_unknown_agent_is_not_found() {
        let verifier = test_verifier().await;
        let err = verifier.rotate("missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::AgentNotFound(_)));
    }
}

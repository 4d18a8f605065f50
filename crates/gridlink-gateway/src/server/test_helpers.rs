//! Shared test helpers for gateway service test modules.

#![allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use tokio::sync::mpsc;
use tonic::Request;

use gridlink_proto::v1::AgentEvent;

use crate::auth::claims::Claims;
use crate::auth::jwt::JwtManager;
use crate::auth::rate_limit::RateLimiter;
use crate::auth::secret::SecretVerifier;
use crate::auth::session::SessionAuthenticator;
use crate::diagnostics::{DiagnosticManager, DEFAULT_SESSION_TIMEOUT_SECS};
use crate::dispatch::{CommandDispatcher, CooldownGate};
use crate::registry::ConnectionRegistry;
use crate::storage::GatewayDatabase;

/// All the owned service objects a handler test needs, wired the same
/// way `main` wires them.
pub struct TestGateway {
    pub db: GatewayDatabase,
    pub registry: ConnectionRegistry,
    pub limiter: Arc<RateLimiter>,
    pub manager: Arc<DiagnosticManager>,
    pub verifier: SecretVerifier,
    pub authenticator: SessionAuthenticator,
    pub jwt: Arc<JwtManager>,
}

pub async fn test_gateway() -> TestGateway {
    let db = GatewayDatabase::open_in_memory().await.unwrap();
    let registry = ConnectionRegistry::new();
    let limiter = Arc::new(RateLimiter::new());
    let manager = Arc::new(DiagnosticManager::new(
        db.clone(),
        CommandDispatcher::new(registry.clone()),
        Arc::new(CooldownGate::new(60)),
        DEFAULT_SESSION_TIMEOUT_SECS,
    ));

    TestGateway {
        verifier: SecretVerifier::new(db.clone()),
        authenticator: SessionAuthenticator::new(db.clone()),
        jwt: Arc::new(JwtManager::new(b"test-secret", 3600)),
        db,
        registry,
        limiter,
        manager,
    }
}

/// Build `Claims` as the interceptor would inject them.
pub fn agent_claims(agent_id: &str) -> Claims {
    Claims {
        jti: "test-jti".into(),
        sub: agent_id.into(),
        name: "test-agent".into(),
        iat: 0,
        exp: i64::MAX,
        token_type: "agent".into(),
    }
}

/// Create a `Request<T>` with agent claims already attached.
pub fn make_agent_request<T>(inner: T, agent_id: &str) -> Request<T> {
    let mut req = Request::new(inner);
    req.extensions_mut().insert(agent_claims(agent_id));
    req
}

/// Register a raw channel for an agent, returning the receiving end.
pub async fn connect_agent(
    registry: &ConnectionRegistry,
    agent_id: &str,
) -> mpsc::Receiver<AgentEvent> {
    let (tx, rx) = mpsc::channel(16);
    registry.register(agent_id.into(), tx).await;
    rx
}

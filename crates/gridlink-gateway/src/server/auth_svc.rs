//! `AgentAuthService` gRPC implementation.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use gridlink_proto::v1::agent_auth_service_server::AgentAuthService;
use gridlink_proto::v1::{AuthenticateRequest, AuthenticateResponse};

use crate::auth::jwt::JwtManager;
use crate::auth::rate_limit::{routes, RateLimiter};
use crate::auth::secret::SecretVerifier;
use crate::server::peer_ip;

pub struct AgentAuthServiceImpl {
    verifier: SecretVerifier,
    jwt: Arc<JwtManager>,
    limiter: Arc<RateLimiter>,
}

impl AgentAuthServiceImpl {
    pub fn new(verifier: SecretVerifier, jwt: Arc<JwtManager>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            verifier,
            jwt,
            limiter,
        }
    }
}

#[tonic::async_trait]
impl AgentAuthService for AgentAuthServiceImpl {
    #[instrument(skip(self, request), fields(rpc = "Authenticate"))]
    async fn authenticate(
        &self,
        request: Request<AuthenticateRequest>,
    ) -> Result<Response<AuthenticateResponse>, Status> {
        let caller = peer_ip(&request);
        self.limiter
            .allow(&caller, routes::AUTHENTICATE)
            .map_err(Status::from)?;

        let req = request.into_inner();

        let verified = self.verifier.verify(&req.secret).await.map_err(Status::from)?;

        let (token, expires_in) = self
            .jwt
            .issue_agent_token(&verified.agent_id, &verified.name)
            .map_err(|e| Status::internal(format!("Token creation failed: {e}")))?;

        if verified.used_previous {
            info!(
                agent_id = %verified.agent_id,
                "Agent authenticated with previous-generation secret"
            );
        } else {
            info!(agent_id = %verified.agent_id, "Agent authenticated");
        }

        Ok(Response::new(AuthenticateResponse {
            token,
            expires_in_secs: expires_in,
            agent_id: verified.agent_id,
            rotation_advised: verified.used_previous,
        }))
    }
}

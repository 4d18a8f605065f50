//! `OperatorService` gRPC implementation.
//!
//! Diagnostics and credential management for privileged callers.
//! Operator identity is handled by whatever fronts the gateway; these
//! routes are rate-limited by source address only.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use gridlink_proto::v1::operator_service_server::OperatorService;
use gridlink_proto::v1::start_diagnostic_request::Range;
use gridlink_proto::v1::{
    AgentInfo, DiagnosticState, GetDiagnosticRequest, GetDiagnosticResponse, ListAgentsRequest,
    ListAgentsResponse, RegisterAgentRequest, RegisterAgentResponse, RotateAgentSecretRequest,
    RotateAgentSecretResponse, SetAgentActiveRequest, SetAgentActiveResponse,
    StartDiagnosticRequest, StartDiagnosticResponse,
};

use crate::auth::rate_limit::{routes, RateLimiter};
use crate::auth::secret::SecretVerifier;
use crate::diagnostics::{DiagnosticManager, DiagnosticRequest, SessionState};
use crate::dispatch::ProbeKind;
use crate::registry::ConnectionRegistry;
use crate::server::peer_ip;
use crate::storage::{DiagnosticSessionRow, GatewayDatabase};

pub struct OperatorServiceImpl {
    db: GatewayDatabase,
    manager: Arc<DiagnosticManager>,
    verifier: SecretVerifier,
    registry: ConnectionRegistry,
    limiter: Arc<RateLimiter>,
}

impl OperatorServiceImpl {
    pub fn new(
        db: GatewayDatabase,
        manager: Arc<DiagnosticManager>,
        verifier: SecretVerifier,
        registry: ConnectionRegistry,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            db,
            manager,
            verifier,
            registry,
            limiter,
        }
    }
}

const fn state_to_proto(state: SessionState) -> DiagnosticState {
    match state {
        SessionState::Pending => DiagnosticState::Pending,
        SessionState::Sent => DiagnosticState::Sent,
        SessionState::Completed => DiagnosticState::Completed,
        SessionState::Error => DiagnosticState::Error,
        SessionState::Timeout => DiagnosticState::Timeout,
    }
}

fn session_to_proto(row: &DiagnosticSessionRow) -> GetDiagnosticResponse {
    GetDiagnosticResponse {
        session_id: row.id.clone(),
        agent_id: row.agent_id.clone(),
        state: state_to_proto(row.state()) as i32,
        values: row.values(),
        error: row.error.clone().unwrap_or_default(),
        elapsed_ms: row
            .elapsed_ms
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or_default(),
        created_at: row.created_at,
        completed_at: row.completed_at.unwrap_or_default(),
    }
}

#[tonic::async_trait]
impl OperatorService for OperatorServiceImpl {
    #[instrument(skip(self, request), fields(rpc = "StartDiagnostic"))]
    async fn start_diagnostic(
        &self,
        request: Request<StartDiagnosticRequest>,
    ) -> Result<Response<StartDiagnosticResponse>, Status> {
        let caller = peer_ip(&request);
        self.limiter
            .allow(&caller, routes::OPERATOR)
            .map_err(Status::from)?;

        let req = request.into_inner();

        let (kind, start) = match req.range {
            Some(Range::StartRegister(start)) => (ProbeKind::Registers, start),
            Some(Range::StartBit(start)) => (ProbeKind::Bits, start),
            None => {
                return Err(Status::invalid_argument(
                    "start_register or start_bit is required",
                ));
            }
        };
        let port = u16::try_from(req.port)
            .map_err(|_| Status::invalid_argument("port out of range"))?;
        let unit_id = u8::try_from(req.unit_id)
            .map_err(|_| Status::invalid_argument("unit_id out of range"))?;

        let started = self
            .manager
            .create(DiagnosticRequest {
                agent_id: req.agent_id,
                address: req.address,
                port,
                unit_id,
                kind,
                start,
                count: req.count,
                requester: caller,
            })
            .await
            .map_err(Status::from)?;

        if !started.dispatched {
            // The failed session stays inspectable: hand the id back on
            // the error so the caller can still poll it.
            let mut status = Status::unavailable("Agent not connected");
            if let Ok(value) = started.session_id.parse() {
                status.metadata_mut().insert("session-id", value);
            }
            return Err(status);
        }

        Ok(Response::new(StartDiagnosticResponse {
            session_id: started.session_id,
            timeout_secs: u32::try_from(started.timeout_secs).unwrap_or_default(),
        }))
    }

    #[instrument(skip(self, request), fields(rpc = "GetDiagnostic"))]
    async fn get_diagnostic(
        &self,
        request: Request<GetDiagnosticRequest>,
    ) -> Result<Response<GetDiagnosticResponse>, Status> {
        let caller = peer_ip(&request);
        self.limiter
            .allow(&caller, routes::OPERATOR)
            .map_err(Status::from)?;

        let req = request.into_inner();
        let row = self
            .manager
            .query(&req.session_id)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(session_to_proto(&row)))
    }

    #[instrument(skip(self, request), fields(rpc = "RegisterAgent"))]
    async fn register_agent(
        &self,
        request: Request<RegisterAgentRequest>,
    ) -> Result<Response<RegisterAgentResponse>, Status> {
        let caller = peer_ip(&request);
        self.limiter
            .allow(&caller, routes::OPERATOR)
            .map_err(Status::from)?;

        let req = request.into_inner();
        if req.name.trim().len() < 3 {
            return Err(Status::invalid_argument(
                "Agent name must be at least 3 characters",
            ));
        }

        let (agent_id, secret) = self
            .verifier
            .enroll(req.name.trim())
            .await
            .map_err(Status::from)?;

        Ok(Response::new(RegisterAgentResponse { agent_id, secret }))
    }

    #[instrument(skip(self, request), fields(rpc = "RotateAgentSecret"))]
    async fn rotate_agent_secret(
        &self,
        request: Request<RotateAgentSecretRequest>,
    ) -> Result<Response<RotateAgentSecretResponse>, Status> {
        let caller = peer_ip(&request);
        self.limiter
            .allow(&caller, routes::OPERATOR)
            .map_err(Status::from)?;

        let req = request.into_inner();
        let secret = self
            .verifier
            .rotate(&req.agent_id)
            .await
            .map_err(Status::from)?;

        // The plaintext goes out exactly once; only its hash survives
        // here.
        Ok(Response::new(RotateAgentSecretResponse { secret }))
    }

    #[instrument(skip(self, request), fields(rpc = "SetAgentActive"))]
    async fn set_agent_active(
        &self,
        request: Request<SetAgentActiveRequest>,
    ) -> Result<Response<SetAgentActiveResponse>, Status> {
        let caller = peer_ip(&request);
        self.limiter
            .allow(&caller, routes::OPERATOR)
            .map_err(Status::from)?;

        let req = request.into_inner();
        let updated = self
            .db
            .set_agent_active(&req.agent_id, req.active)
            .await
            .map_err(|e| Status::internal(format!("Failed to update agent: {e}")))?;

        if !updated {
            return Err(Status::not_found(format!("agent {} not found", req.agent_id)));
        }

        info!(agent_id = %req.agent_id, active = req.active, "Agent active flag updated");
        Ok(Response::new(SetAgentActiveResponse { updated }))
    }

    #[instrument(skip(self, request), fields(rpc = "ListAgents"))]
    async fn list_agents(
        &self,
        request: Request<ListAgentsRequest>,
    ) -> Result<Response<ListAgentsResponse>, Status> {
        let caller = peer_ip(&request);
        self.limiter
            .allow(&caller, routes::OPERATOR)
            .map_err(Status::from)?;

        let agents = self
            .db
            .list_agents()
            .await
            .map_err(|e| Status::internal(format!("Failed to list agents: {e}")))?;

        let mut infos = Vec::with_capacity(agents.len());
        for agent in &agents {
            infos.push(AgentInfo {
                agent_id: agent.id.clone(),
                name: agent.name.clone(),
                active: agent.is_active(),
                connected: self.registry.is_connected(&agent.id).await,
                last_heartbeat: agent.last_heartbeat,
                last_address: agent.last_address.clone(),
                rotated_at: agent.rotated_at,
            });
        }

        Ok(Response::new(ListAgentsResponse { agents: infos }))
    }
}

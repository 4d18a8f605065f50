//! `AgentChannelService` gRPC implementation.
//!
//! Owns the long-lived server-to-agent event stream plus the heartbeat
//! and diagnostic-resolve callbacks. The stream carries named events
//! with JSON bodies; delivery success is inferred purely from the
//! absence of a write error.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use gridlink_core::db::unix_timestamp;
use gridlink_proto::v1::agent_channel_service_server::AgentChannelService;
use gridlink_proto::v1::{
    AgentEvent, HeartbeatRequest, HeartbeatResponse, OpenChannelRequest,
    ResolveDiagnosticRequest, ResolveDiagnosticResponse,
};

use crate::auth::rate_limit::{routes, RateLimiter};
use crate::auth::session::SessionAuthenticator;
use crate::diagnostics::{DiagnosticManager, Resolution};
use crate::registry::ConnectionRegistry;
use crate::server::interceptor::extract_claims;
use crate::server::peer_ip;
use crate::storage::GatewayDatabase;

/// Buffered events per channel before a slow agent counts as a failed
/// write.
const CHANNEL_CAPACITY: usize = 64;

pub struct AgentChannelServiceImpl {
    registry: ConnectionRegistry,
    db: GatewayDatabase,
    authenticator: SessionAuthenticator,
    limiter: Arc<RateLimiter>,
    manager: Arc<DiagnosticManager>,
}

impl AgentChannelServiceImpl {
    pub fn new(
        registry: ConnectionRegistry,
        db: GatewayDatabase,
        authenticator: SessionAuthenticator,
        limiter: Arc<RateLimiter>,
        manager: Arc<DiagnosticManager>,
    ) -> Self {
        Self {
            registry,
            db,
            authenticator,
            limiter,
            manager,
        }
    }
}

/// Unregisters the channel when the outbound stream is torn down, so a
/// transport-level close removes the registry entry without waiting for
/// the next failed write.
struct ChannelGuard {
    registry: ConnectionRegistry,
    agent_id: String,
    channel_id: String,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let agent_id = std::mem::take(&mut self.agent_id);
        let channel_id = std::mem::take(&mut self.channel_id);
        tokio::spawn(async move {
            registry.unregister_channel(&agent_id, &channel_id).await;
        });
    }
}

/// The outbound event stream handed to tonic, with its registry guard.
struct AgentEventStream {
    inner: ReceiverStream<AgentEvent>,
    _guard: ChannelGuard,
}

impl Stream for AgentEventStream {
    type Item = Result<AgentEvent, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_next(cx)
            .map(|event| event.map(Ok))
    }
}

type EventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, Status>> + Send>>;

#[tonic::async_trait]
impl AgentChannelService for AgentChannelServiceImpl {
    type OpenChannelStream = EventStream;

    #[instrument(skip(self, request), fields(rpc = "OpenChannel"))]
    async fn open_channel(
        &self,
        request: Request<OpenChannelRequest>,
    ) -> Result<Response<Self::OpenChannelStream>, Status> {
        let claims = extract_claims(&request)?.clone();
        self.authenticator
            .confirm_active(&claims)
            .await
            .map_err(Status::from)?;
        self.limiter
            .allow(&claims.sub, routes::AGENT)
            .map_err(Status::from)?;

        let (tx, rx) = mpsc::channel::<AgentEvent>(CHANNEL_CAPACITY);
        let channel_id = self.registry.register(claims.sub.clone(), tx).await;

        info!(agent_id = %claims.sub, "Agent channel opened");

        let stream = AgentEventStream {
            inner: ReceiverStream::new(rx),
            _guard: ChannelGuard {
                registry: self.registry.clone(),
                agent_id: claims.sub,
                channel_id,
            },
        };
        Ok(Response::new(Box::pin(stream)))
    }

    #[instrument(skip(self, request), fields(rpc = "Heartbeat"))]
    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let claims = extract_claims(&request)?.clone();
        self.authenticator
            .confirm_active(&claims)
            .await
            .map_err(Status::from)?;
        self.limiter
            .allow(&claims.sub, routes::HEARTBEAT)
            .map_err(Status::from)?;

        let address = peer_ip(&request);
        let now = unix_timestamp();
        self.db
            .touch_agent(&claims.sub, &address, now)
            .await
            .map_err(|e| Status::internal(format!("Heartbeat update failed: {e}")))?;

        Ok(Response::new(HeartbeatResponse { server_time: now }))
    }

    #[instrument(skip(self, request), fields(rpc = "ResolveDiagnostic"))]
    async fn resolve_diagnostic(
        &self,
        request: Request<ResolveDiagnosticRequest>,
    ) -> Result<Response<ResolveDiagnosticResponse>, Status> {
        let claims = extract_claims(&request)?.clone();
        self.authenticator
            .confirm_active(&claims)
            .await
            .map_err(Status::from)?;
        self.limiter
            .allow(&claims.sub, routes::AGENT)
            .map_err(Status::from)?;

        let req = request.into_inner();
        let resolution = Resolution {
            session_id: req.session_id,
            success: req.success,
            values: req.values,
            error: if req.error.is_empty() {
                None
            } else {
                Some(req.error)
            },
            elapsed_ms: i64::try_from(req.elapsed_ms).ok(),
        };

        self.manager
            .resolve(&claims.sub, resolution)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(ResolveDiagnosticResponse { accepted: true }))
    }
}

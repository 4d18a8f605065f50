//! Gridlink Gateway Server
//!
//! Keeps a live push channel to each field agent, dispatches diagnostics
//! to a specific agent, and manages rotating shared-secret credentials.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tonic::transport::Server;
use tracing::info;

use gridlink_proto::v1::agent_auth_service_server::AgentAuthServiceServer;
use gridlink_proto::v1::agent_channel_service_server::AgentChannelServiceServer;
use gridlink_proto::v1::operator_service_server::OperatorServiceServer;

use gridlink_gateway::auth::rate_limit::spawn_sweeper_task;
use gridlink_gateway::auth::{JwtManager, RateLimiter, SecretVerifier, SessionAuthenticator};
use gridlink_gateway::diagnostics::DiagnosticManager;
use gridlink_gateway::dispatch::{CommandDispatcher, CooldownGate};
use gridlink_gateway::registry::{spawn_keepalive_task, ConnectionRegistry};
use gridlink_gateway::server::{
    jwt_interceptor, AgentAuthServiceImpl, AgentChannelServiceImpl, OperatorServiceImpl,
};
use gridlink_gateway::storage::GatewayDatabase;

#[derive(Parser, Debug)]
#[command(name = "gridlink-gateway")]
#[command(version, about = "Gridlink gateway - agent channels and device diagnostics")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:50061")]
    addr: SocketAddr,

    /// Path to SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JWT signing secret for agent session tokens.
    #[arg(long, env = "GRIDLINK_JWT_SECRET", default_value = "dev-secret-change-me")]
    jwt_secret: String,

    /// Agent session token TTL in seconds.
    #[arg(long, default_value_t = 86_400)]
    token_ttl: i64,

    /// Minimum seconds between diagnostics aimed at one device target.
    #[arg(long, default_value_t = 60)]
    cooldown_secs: i64,

    /// Seconds before an unanswered diagnostic session is expired.
    #[arg(long, default_value_t = 30)]
    diagnostic_timeout: i64,

    /// Interval between keep-alive pushes on agent channels, in seconds.
    #[arg(long, default_value_t = 30)]
    keepalive_secs: u64,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    gridlink_core::tracing_init::init_tracing("gridlink_gateway=info", args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        "Starting gridlink-gateway"
    );

    let db = match &args.db_path {
        Some(path) => {
            info!(path = %path.display(), "Opening gateway database");
            GatewayDatabase::open(path).await?
        }
        None => {
            let default_path = default_db_path()?;
            info!(path = %default_path.display(), "Opening gateway database (default path)");
            GatewayDatabase::open(&default_path).await?
        }
    };

    let jwt = Arc::new(JwtManager::new(args.jwt_secret.as_bytes(), args.token_ttl));

    // Owned service objects, created once here and handed to every
    // handler by injection.
    let registry = ConnectionRegistry::new();
    let limiter = Arc::new(RateLimiter::new());
    let cooldown = Arc::new(CooldownGate::new(args.cooldown_secs));
    let dispatcher = CommandDispatcher::new(registry.clone());
    let manager = Arc::new(DiagnosticManager::new(
        db.clone(),
        dispatcher,
        cooldown,
        args.diagnostic_timeout,
    ));
    let verifier = SecretVerifier::new(db.clone());
    let authenticator = SessionAuthenticator::new(db.clone());

    // Build services
    let auth = AgentAuthServiceImpl::new(verifier.clone(), Arc::clone(&jwt), Arc::clone(&limiter));
    let channel = AgentChannelServiceImpl::new(
        registry.clone(),
        db.clone(),
        authenticator,
        Arc::clone(&limiter),
        Arc::clone(&manager),
    );
    let operator = OperatorServiceImpl::new(
        db.clone(),
        Arc::clone(&manager),
        verifier,
        registry.clone(),
        Arc::clone(&limiter),
    );

    let jwt_check = jwt_interceptor(Arc::clone(&jwt));

    // Background tasks: channel keep-alives and the rate-window sweep.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let keepalive_handle = spawn_keepalive_task(
        registry,
        Duration::from_secs(args.keepalive_secs),
        shutdown_rx.clone(),
    );
    let sweeper_handle = spawn_sweeper_task(
        Arc::clone(&limiter),
        Duration::from_secs(60),
        shutdown_rx,
    );

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<AgentAuthServiceServer<AgentAuthServiceImpl>>()
        .await;

    info!(addr = %args.addr, "Gateway server starting");

    let grpc_router = Server::builder()
        .http2_keepalive_interval(Some(Duration::from_secs(30)))
        .http2_keepalive_timeout(Some(Duration::from_secs(10)))
        .add_service(health_service)
        .add_service(AgentAuthServiceServer::new(auth))
        .add_service(AgentChannelServiceServer::with_interceptor(
            channel, jwt_check,
        ))
        .add_service(OperatorServiceServer::new(operator));

    tokio::select! {
        result = grpc_router.serve(args.addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    keepalive_handle.abort();
    sweeper_handle.abort();

    info!("Gateway stopped");
    Ok(())
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".gridlink").join("gateway.db"))
}

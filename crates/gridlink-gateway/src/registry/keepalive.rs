//! Keep-alive pushes on open agent channels.
//!
//! A periodic heartbeat event on every live channel detects silently
//! dead connections and keeps idle streams alive through intermediary
//! proxies. A failed push evicts the channel through the registry's
//! normal write-failure path.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use gridlink_proto::v1::AgentEvent;

use super::connection::ConnectionRegistry;

/// Event name for keep-alive pushes.
pub const EVENT_HEARTBEAT: &str = "heartbeat";

/// Push one keep-alive round to every live channel.
///
/// Returns the number of channels the push was delivered to.
pub async fn push_keepalives(registry: &ConnectionRegistry) -> usize {
    let mut delivered = 0;
    for agent_id in registry.connected_agents().await {
        let event = AgentEvent {
            event: EVENT_HEARTBEAT.to_string(),
            data: String::new(),
        };
        if registry.send(&agent_id, event).await {
            delivered += 1;
        } else {
            warn!(agent_id = %agent_id, "Keep-alive push failed, channel evicted");
        }
    }
    delivered
}

/// Spawn the background task that pushes keep-alives on a fixed interval.
pub fn spawn_keepalive_task(
    registry: ConnectionRegistry,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let delivered = push_keepalives(&registry).await;
                    debug!(delivered, "Keep-alive round complete");
                }
                _ = shutdown.changed() => {
                    info!("Keep-alive task shutting down");
                    return;
                }
            }
        }
    })
}

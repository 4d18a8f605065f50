//! In-memory registry of live agent push channels.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use gridlink_proto::v1::AgentEvent;

/// One live server-to-agent push channel.
struct AgentChannel {
    /// Distinguishes this channel from any replacement registered for
    /// the same agent id, so a stale teardown cannot evict a newer
    /// connection.
    channel_id: String,
    event_tx: mpsc::Sender<AgentEvent>,
}

/// Thread-safe registry of live agent channels.
///
/// At most one channel per agent id: a second registration replaces the
/// previous entry (last writer wins).
#[derive(Clone)]
pub struct ConnectionRegistry {
    channels: Arc<RwLock<HashMap<String, AgentChannel>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a channel for an agent, replacing any existing entry.
    ///
    /// Returns the channel id to pass back to
    /// [`ConnectionRegistry::unregister_channel`] on teardown.
    pub async fn register(&self, agent_id: String, event_tx: mpsc::Sender<AgentEvent>) -> String {
        let channel_id = uuid::Uuid::new_v4().to_string();
        let channel = AgentChannel {
            channel_id: channel_id.clone(),
            event_tx,
        };

        let replaced = self
            .channels
            .write()
            .await
            .insert(agent_id.clone(), channel)
            .is_some();

        if replaced {
            warn!(agent_id = %agent_id, "Agent channel replaced by a new connection");
        } else {
            info!(agent_id = %agent_id, "Agent channel registered");
        }
        channel_id
    }

    /// Remove an agent's channel regardless of which connection owns it.
    pub async fn unregister(&self, agent_id: &str) -> bool {
        let removed = self.channels.write().await.remove(agent_id).is_some();
        if removed {
            info!(agent_id = %agent_id, "Agent channel unregistered");
        }
        removed
    }

    /// Remove an agent's channel only if it is still the given one.
    ///
    /// Used on stream teardown so a connection that was already replaced
    /// does not tear down its successor.
    pub async fn unregister_channel(&self, agent_id: &str, channel_id: &str) -> bool {
        let mut channels = self.channels.write().await;
        match channels.get(agent_id) {
            Some(channel) if channel.channel_id == channel_id => {
                channels.remove(agent_id);
                info!(agent_id = %agent_id, "Agent channel unregistered");
                true
            }
            _ => false,
        }
    }

    /// Push an event to an agent's channel.
    ///
    /// Returns `false` when no channel exists or the write fails; a
    /// failed write evicts the entry immediately and is never retried.
    /// Callers must treat `false` as "agent offline", not as transient.
    pub async fn send(&self, agent_id: &str, event: AgentEvent) -> bool {
        let target = {
            let channels = self.channels.read().await;
            channels
                .get(agent_id)
                .map(|c| (c.channel_id.clone(), c.event_tx.clone()))
        };

        let Some((channel_id, tx)) = target else {
            return false;
        };

        if tx.send(event).await.is_err() {
            warn!(agent_id = %agent_id, "Channel write failed, evicting");
            self.unregister_channel(agent_id, &channel_id).await;
            return false;
        }
        true
    }

    /// Check if an agent has a live channel.
    pub async fn is_connected(&self, agent_id: &str) -> bool {
        self.channels.read().await.contains_key(agent_id)
    }

    /// Ids of all agents with a live channel.
    pub async fn connected_agents(&self) -> Vec<String> {
        self.channels.read().await.keys().cloned().collect()
    }

    /// Count of live channels.
    pub async fn connection_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

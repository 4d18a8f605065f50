//! Addressed command dispatch to connected agents.
//!
//! Commands are pushed to one specific agent's live channel as a typed
//! payload inside a `command` event. There is no broadcast, no retry,
//! and no offline buffering: an absent or failing channel is immediately
//! reported as the agent being offline.

pub mod cooldown;

pub use cooldown::CooldownGate;

use serde::{Deserialize, Serialize};
use tracing::debug;

use gridlink_proto::v1::AgentEvent;

use crate::error::GatewayError;
use crate::registry::ConnectionRegistry;

/// Event name for dispatched commands.
pub const EVENT_COMMAND: &str = "command";

/// What a probe reads from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Holding registers.
    Registers,
    /// Discrete bits / coils.
    Bits,
}

impl ProbeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registers => "registers",
            Self::Bits => "bits",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "registers" => Some(Self::Registers),
            "bits" => Some(Self::Bits),
            _ => None,
        }
    }
}

/// The typed body of a `command` event.
///
/// Serialized to JSON at the transport boundary; the agent answers
/// asynchronously via the diagnostic resolve callback, addressed by
/// `session_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeCommand {
    pub session_id: String,
    pub address: String,
    pub port: u16,
    pub unit_id: u8,
    pub kind: ProbeKind,
    pub start: u32,
    pub count: u32,
}

/// Pushes commands to a specific agent through the connection registry.
#[derive(Clone)]
pub struct CommandDispatcher {
    registry: ConnectionRegistry,
}

impl CommandDispatcher {
    pub const fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Push a probe command to the agent's live channel.
    ///
    /// `AgentOffline` covers both "no channel registered" and "write
    /// failed": the registry evicts on write failure, so by the time
    /// this returns the two cases are indistinguishable and equally
    /// final.
    pub async fn dispatch(
        &self,
        agent_id: &str,
        command: &ProbeCommand,
    ) -> Result<(), GatewayError> {
        let data = serde_json::to_string(command)
            .map_err(|e| GatewayError::Internal(format!("encode command: {e}")))?;

        let event = AgentEvent {
            event: EVENT_COMMAND.to_string(),
            data,
        };

        if self.registry.send(agent_id, event).await {
            debug!(agent_id = %agent_id, session_id = %command.session_id, "Command dispatched");
            Ok(())
        } else {
            Err(GatewayError::AgentOffline(agent_id.to_string()))
        }
    }

    /// Check if an agent currently has a live channel.
    pub async fn is_agent_online(&self, agent_id: &str) -> bool {
        self.registry.is_connected(agent_id).await
    }
}

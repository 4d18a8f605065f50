//! Diagnostic session lifecycle states.

use std::fmt;

/// Closed set of diagnostic session states.
///
/// `Pending` and `Sent` are live; `Completed`, `Error`, and `Timeout`
/// are terminal and immutable once written. Every transition goes
/// through a guarded storage update, so an invalid move (for example
/// `Timeout` back to `Completed`) cannot land even under races.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Persisted, not yet handed to the agent's channel.
    Pending,
    /// Pushed to the agent; awaiting its asynchronous callback.
    Sent,
    /// Agent reported a result payload.
    Completed,
    /// Dispatch failed or the agent reported a failure.
    Error,
    /// No callback arrived within the session timeout.
    Timeout,
}

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }

    /// A terminal session can never change state again.
    pub const fn is_terminal(self) -> bool {
        match self {
            Self::Completed | Self::Error | Self::Timeout => true,
            Self::Pending | Self::Sent => false,
        }
    }

    pub const fn is_live(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

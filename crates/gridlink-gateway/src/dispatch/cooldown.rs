//! Per-target cool-down gate for diagnostic dispatch.
//!
//! Throttles by the physical target (device address + port) regardless
//! of which agent or operator issues the request, so concurrent callers
//! cannot flood one device. Distinct from the rate limiter, which
//! protects the gateway itself. Purely in-memory: losing the table on
//! restart only means one probe may be allowed sooner than ideal.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use gridlink_core::db::unix_timestamp;

use crate::error::GatewayError;

/// Prune pass triggers once the table grows past this many targets.
const PRUNE_THRESHOLD: usize = 1024;

/// Tracks the last dispatch time per (address, port) target.
pub struct CooldownGate {
    cooldown_secs: i64,
    targets: Mutex<HashMap<(String, u16), i64>>,
}

impl CooldownGate {
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            cooldown_secs,
            targets: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether a dispatch to the target is currently allowed.
    ///
    /// Denials report the remaining wait rounded up to whole seconds.
    pub fn check(&self, address: &str, port: u16) -> Result<(), GatewayError> {
        self.check_at(address, port, unix_timestamp())
    }

    pub fn check_at(&self, address: &str, port: u16, now: i64) -> Result<(), GatewayError> {
        let targets = self.targets.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(last) = targets.get(&(address.to_string(), port)) {
            let elapsed = now - last;
            if elapsed < self.cooldown_secs {
                return Err(GatewayError::CoolDownActive {
                    retry_after_secs: (self.cooldown_secs - elapsed).max(1),
                });
            }
        }
        Ok(())
    }

    /// Record a dispatch to the target.
    ///
    /// Must be called immediately before the dispatch attempt, not after
    /// completion, so two nearly-simultaneous requests cannot both pass
    /// the check before either records.
    pub fn record(&self, address: &str, port: u16) {
        self.record_at(address, port, unix_timestamp());
    }

    pub fn record_at(&self, address: &str, port: u16, now: i64) {
        let mut targets = self.targets.lock().unwrap_or_else(PoisonError::into_inner);

        if targets.len() >= PRUNE_THRESHOLD {
            let cutoff = now - self.cooldown_secs;
            targets.retain(|_, last| *last > cutoff);
        }

        targets.insert((address.to_string(), port), now);
    }

    /// Number of tracked targets (for tests and status reporting).
    pub fn tracked_targets(&self) -> usize {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

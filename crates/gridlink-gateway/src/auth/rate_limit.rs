//! Fixed-window request limiter keyed by (caller, route).
//!
//! Protects the gateway itself from any single caller; it knows nothing
//! about business state. Each route carries its own ceiling so
//! authentication attempts can be throttled tightly while liveness
//! pings stay loose. Windows reset on expiry rather than sliding, and a
//! periodic sweep discards idle windows to bound memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use gridlink_core::db::unix_timestamp;

use crate::error::GatewayError;

/// Route names with independent counters and ceilings.
pub mod routes {
    /// Secret-based authentication attempts (tight).
    pub const AUTHENTICATE: &str = "authenticate";
    /// General authenticated agent traffic (loose).
    pub const AGENT: &str = "agent";
    /// Liveness pings (loose).
    pub const HEARTBEAT: &str = "heartbeat";
    /// Operator-facing diagnostics and credential management.
    pub const OPERATOR: &str = "operator";
}

/// Per-route ceiling: at most `max_requests` per `window_secs`.
#[derive(Debug, Clone, Copy)]
pub struct RouteLimit {
    pub max_requests: u32,
    pub window_secs: i64,
}

struct Window {
    count: u32,
    started_at: i64,
    last_seen: i64,
}

/// Fixed-window counters keyed by (caller, route).
pub struct RateLimiter {
    limits: HashMap<&'static str, RouteLimit>,
    windows: Mutex<HashMap<(String, &'static str), Window>>,
}

impl RateLimiter {
    /// Limiter with the gateway's default per-route ceilings.
    pub fn new() -> Self {
        let mut limiter = Self::empty();
        limiter.set_limit(routes::AUTHENTICATE, RouteLimit { max_requests: 10, window_secs: 60 });
        limiter.set_limit(routes::AGENT, RouteLimit { max_requests: 300, window_secs: 60 });
        limiter.set_limit(routes::HEARTBEAT, RouteLimit { max_requests: 120, window_secs: 60 });
        limiter.set_limit(routes::OPERATOR, RouteLimit { max_requests: 60, window_secs: 60 });
        limiter
    }

    /// Limiter with no routes configured.
    pub fn empty() -> Self {
        Self {
            limits: HashMap::new(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_limit(&mut self, route: &'static str, limit: RouteLimit) {
        self.limits.insert(route, limit);
    }

    /// Count a request against the caller's window for the route.
    ///
    /// Denials report the remaining wait until the window expires.
    pub fn allow(&self, caller: &str, route: &'static str) -> Result<(), GatewayError> {
        self.allow_at(caller, route, unix_timestamp())
    }

    pub fn allow_at(
        &self,
        caller: &str,
        route: &'static str,
        now: i64,
    ) -> Result<(), GatewayError> {
        let Some(limit) = self.limits.get(route) else {
            // Unconfigured route: fail open, but make it visible.
            warn!(route = %route, "Rate limit route not configured");
            return Ok(());
        };

        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let key = (caller.to_string(), route);
        let Some(window) = windows.get_mut(&key) else {
            windows.insert(key, Window { count: 1, started_at: now, last_seen: now });
            return Ok(());
        };

        if now - window.started_at >= limit.window_secs {
            // Window expired: reset rather than slide.
            window.count = 1;
            window.started_at = now;
            window.last_seen = now;
            return Ok(());
        }

        window.last_seen = now;
        if window.count >= limit.max_requests {
            let retry_after_secs = (window.started_at + limit.window_secs - now).max(1);
            debug!(caller = %caller, route = %route, retry_after_secs, "Rate limit exceeded");
            return Err(GatewayError::RateLimited { retry_after_secs });
        }

        window.count += 1;
        Ok(())
    }

    /// Discard windows idle for more than twice their route's window
    /// length. Called periodically from the sweeper task.
    pub fn sweep(&self) {
        self.sweep_at(unix_timestamp());
    }

    pub fn sweep_at(&self, now: i64) {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        windows.retain(|(_, route), window| {
            self.limits
                .get(route)
                .is_some_and(|limit| now - window.last_seen <= 2 * limit.window_secs)
        });
    }

    /// Number of live windows (for tests and status reporting).
    pub fn tracked_windows(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the background task that periodically sweeps idle windows.
pub fn spawn_sweeper_task(
    limiter: Arc<RateLimiter>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    limiter.sweep();
                }
                _ = shutdown.changed() => {
                    info!("Rate-limit sweeper shutting down");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tight_limiter() -> RateLimiter {
        let mut limiter = RateLimiter::empty();
        limiter.set_limit(routes::AUTHENTICATE, RouteLimit { max_requests: 3, window_secs: 60 });
        limiter.set_limit(routes::HEARTBEAT, RouteLimit { max_requests: 5, window_secs: 60 });
        limiter
    }

    #[test]
    fn ceiling_is_enforced_within_window() {
        let limiter = tight_limiter();

        for _ in 0..3 {
            assert!(limiter.allow_at("10.0.0.1", routes::AUTHENTICATE, 100).is_ok());
        }

        let err = limiter
            .allow_at("10.0.0.1", routes::AUTHENTICATE, 110)
            .unwrap_err();
        match err {
            GatewayError::RateLimited { retry_after_secs } => {
                // Window started at 100, so 50s remain at t=110
                assert_eq!(retry_after_secs, 50);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn window_expiry_resets_the_counter() {
        let limiter = tight_limiter();

        for _ in 0..3 {
            assert!(limiter.allow_at("c", routes::AUTHENTICATE, 100).is_ok());
        }
        assert!(limiter.allow_at("c", routes::AUTHENTICATE, 120).is_err());

        // Past the window start + length: fresh window
        assert!(limiter.allow_at("c", routes::AUTHENTICATE, 161).is_ok());
    }

    #[test]
    fn callers_have_independent_windows() {
        let limiter = tight_limiter();

        for _ in 0..3 {
            limiter.allow_at("a", routes::AUTHENTICATE, 100).unwrap();
        }
        assert!(limiter.allow_at("a", routes::AUTHENTICATE, 101).is_err());
        assert!(limiter.allow_at("b", routes::AUTHENTICATE, 101).is_ok());
    }

    #[test]
    fn routes_have_independent_counters() {
        let limiter = tight_limiter();

        for _ in 0..3 {
            limiter.allow_at("c", routes::AUTHENTICATE, 100).unwrap();
        }
        assert!(limiter.allow_at("c", routes::AUTHENTICATE, 101).is_err());
        // Same caller, different route: unaffected
        assert!(limiter.allow_at("c", routes::HEARTBEAT, 101).is_ok());
    }

    #[test]
    fn unconfigured_route_fails_open() {
        let limiter = RateLimiter::empty();
        assert!(limiter.allow_at("c", routes::AGENT, 100).is_ok());
        assert_eq!(limiter.tracked_windows(), 0);
    }

    #[test]
    fn sweep_discards_idle_windows_only() {
        let limiter = tight_limiter();
        limiter.allow_at("idle", routes::AUTHENTICATE, 100).unwrap();
        limiter.allow_at("busy", routes::AUTHENTICATE, 200).unwrap();
        assert_eq!(limiter.tracked_windows(), 2);

        // "idle" last seen 121s ago (> 2x window), "busy" 21s ago
        limiter.sweep_at(221);
        assert_eq!(limiter.tracked_windows(), 1);
        // The surviving window still counts requests
        limiter.allow_at("busy", routes::AUTHENTICATE, 222).unwrap();
    }

    #[test]
    fn default_routes_are_configured() {
        let limiter = RateLimiter::new();
        for route in [routes::AUTHENTICATE, routes::AGENT, routes::HEARTBEAT, routes::OPERATOR] {
            assert!(limiter.allow_at("c", route, 100).is_ok());
        }
        assert_eq!(limiter.tracked_windows(), 4);
    }
}

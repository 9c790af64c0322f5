//! Sliding-window request limiting per client IP.
//!
//! One instance is built at startup and shared by every handler that needs
//! it. Pruning and appending for an IP happen under one lock, so concurrent
//! requests from the same client are counted exactly.

use crate::config::RateLimitConfig;
use crate::metrics_defs::RATE_LIMIT_CLIENTS;
use indexmap::IndexMap;
use parking_lot::Mutex;
use shared::gauge;
use std::time::{Duration, Instant};

/// Bound on distinct clients remembered at once. Past it the client that was
/// first seen earliest is forgotten, which is insertion order rather than
/// least recently used.
pub const MAX_TRACKED_CLIENTS: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: usize,
    pub remaining: usize,
    /// Time until the oldest counted request leaves the window.
    pub reset_after: Duration,
}

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clients: Mutex<IndexMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        RateLimiter {
            max_requests,
            window,
            clients: Mutex::new(IndexMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_millis(config.window_ms))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admits the request and counts it, or rejects it without counting.
    pub fn check(&self, ip: &str) -> bool {
        self.check_at(ip, Instant::now())
    }

    pub fn check_at(&self, ip: &str, now: Instant) -> bool {
        let mut clients = self.clients.lock();

        let recent = clients.entry(ip.to_string()).or_default();
        recent.retain(|seen| now.saturating_duration_since(*seen) < self.window);
        if recent.len() >= self.max_requests {
            return false;
        }
        recent.push(now);

        if clients.len() > MAX_TRACKED_CLIENTS {
            clients.shift_remove_index(0);
        }
        gauge!(RATE_LIMIT_CLIENTS).set(clients.len() as f64);
        true
    }

    pub fn status(&self, ip: &str) -> RateLimitStatus {
        self.status_at(ip, Instant::now())
    }

    pub fn status_at(&self, ip: &str, now: Instant) -> RateLimitStatus {
        let clients = self.clients.lock();
        let mut recent = clients
            .get(ip)
            .into_iter()
            .flatten()
            .filter(|seen| now.saturating_duration_since(**seen) < self.window);

        let oldest = recent.next().copied();
        let count = oldest.map_or(0, |_| 1 + recent.count());

        RateLimitStatus {
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(count),
            reset_after: oldest.map_or(Duration::ZERO, |oldest| {
                (oldest + self.window).saturating_duration_since(now)
            }),
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }
}

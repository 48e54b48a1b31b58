//! Statistics tracking for the dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::group::GroupRole;

/// Atomic counters for tracking dispatcher outcomes.
pub struct Stats {
    pub requests: AtomicU64,
    pub cached: AtomicU64,
    pub local: AtomicU64,
    pub remote: AtomicU64,
    pub failed: AtomicU64,
    /// Cumulative response time in microseconds for averaging.
    total_response_time_us: AtomicU64,
    started: Instant,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            cached: AtomicU64::new(0),
            local: AtomicU64::new(0),
            remote: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    fn record(&self, counter: &AtomicU64, response_time: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add(response_time.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_cached(&self, response_time: Duration) {
        self.record(&self.cached, response_time);
    }

    pub fn record_answered(&self, role: GroupRole, response_time: Duration) {
        let counter = match role {
            GroupRole::Local => &self.local,
            GroupRole::Remote => &self.remote,
        };
        self.record(counter, response_time);
    }

    pub fn record_failed(&self, response_time: Duration) {
        self.record(&self.failed, response_time);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let requests = self.requests.swap(0, Ordering::Relaxed);
        let cached = self.cached.swap(0, Ordering::Relaxed);
        let local = self.local.swap(0, Ordering::Relaxed);
        let remote = self.remote.swap(0, Ordering::Relaxed);
        let failed = self.failed.swap(0, Ordering::Relaxed);
        let total_us = self.total_response_time_us.swap(0, Ordering::Relaxed);

        let avg_response_ms = if requests > 0 {
            (total_us as f64 / requests as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            requests,
            cached,
            local,
            remote,
            failed,
            avg_response_ms,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub requests: u64,
    pub cached: u64,
    pub local: u64,
    pub remote: u64,
    pub failed: u64,
    pub avg_response_ms: f64,
}

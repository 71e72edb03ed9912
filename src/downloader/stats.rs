// Service counters shared by the orchestrator

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct StatsTracker {
    started: Instant,
    requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    upstream_fetches: AtomicU64,
    joined_flights: AtomicU64,
    failures: AtomicU64,
    durable_uploads: AtomicU64,
    upload_failures: AtomicU64,
    active: AtomicUsize,
}

/// Point-in-time view of the service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub upstream_fetches: u64,
    pub joined_flights: u64,
    pub failures: u64,
    pub durable_uploads: u64,
    pub upload_failures: u64,
    pub active_requests: usize,
    pub cache_entries: usize,
    pub masked_urls: usize,
    pub uptime_secs: u64,
}

/// Decrements the active-request gauge when dropped
pub struct ActiveGuard<'a> {
    tracker: &'a StatsTracker,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::Relaxed);
    }
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            upstream_fetches: AtomicU64::new(0),
            joined_flights: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            durable_uploads: AtomicU64::new(0),
            upload_failures: AtomicU64::new(0),
            active: AtomicUsize::new(0),
        }
    }

    /// Count a request and hold the active gauge for its lifetime
    pub fn begin(&self) -> ActiveGuard<'_> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
        ActiveGuard { tracker: self }
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch(&self) {
        self.upstream_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_joined(&self) {
        self.joined_flights.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload(&self, ok: bool) {
        if ok {
            self.durable_uploads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.upload_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self, cache_entries: usize, masked_urls: usize) -> ServiceStats {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        ServiceStats {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            upstream_fetches: self.upstream_fetches.load(Ordering::Relaxed),
            joined_flights: self.joined_flights.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            durable_uploads: self.durable_uploads.load(Ordering::Relaxed),
            upload_failures: self.upload_failures.load(Ordering::Relaxed),
            active_requests: self.active.load(Ordering::Relaxed),
            cache_entries,
            masked_urls,
            uptime_secs: self.uptime().as_secs(),
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

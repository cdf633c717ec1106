//! Observability and Metrics
//!
//! Counters for stream lifecycles, request validation and response writes.
//!
//! Uses atomic counters for thread-safe metrics collection. One [`Metrics`]
//! instance is normally shared (behind an `Arc`) by every stream a handler
//! serves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for request/response streams
#[derive(Debug)]
pub struct Metrics {
    /// Streams handed to the lifecycle manager
    pub streams_total: AtomicU64,
    /// Streams not yet closed
    pub streams_active: AtomicU64,
    /// Streams closed (counted once per stream)
    pub streams_closed: AtomicU64,
    /// Streams force-closed because their deadline expired
    pub streams_timed_out: AtomicU64,
    /// Streams force-closed because their context was cancelled
    pub streams_cancelled: AtomicU64,
    /// Requests whose header passed validation
    pub requests_accepted: AtomicU64,
    /// Requests rejected by header validation
    pub requests_rejected: AtomicU64,
    /// Response chunks written by handlers
    pub chunks_written: AtomicU64,
    /// Failed response chunk writes
    pub write_failures: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            streams_total: AtomicU64::new(0),
            streams_active: AtomicU64::new(0),
            streams_closed: AtomicU64::new(0),
            streams_timed_out: AtomicU64::new(0),
            streams_cancelled: AtomicU64::new(0),
            requests_accepted: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            chunks_written: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a stream handed to the lifecycle manager
    pub fn stream_opened(&self) {
        self.streams_total.fetch_add(1, Ordering::Relaxed);
        self.streams_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the single close of a stream
    pub fn stream_closed(&self) {
        self.streams_closed.fetch_add(1, Ordering::Relaxed);
        self.streams_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a force-close caused by deadline expiry
    pub fn stream_timed_out(&self) {
        self.streams_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a force-close caused by external cancellation
    pub fn stream_cancelled(&self) {
        self.streams_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request header that passed validation
    pub fn request_accepted(&self) {
        self.requests_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request header rejected by validation
    pub fn request_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record response chunk outcomes for one stream
    pub fn chunks(&self, written: u64, failed: u64) {
        self.chunks_written.fetch_add(written, Ordering::Relaxed);
        self.write_failures.fetch_add(failed, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            streams_total: self.streams_total.load(Ordering::Relaxed),
            streams_active: self.streams_active.load(Ordering::Relaxed),
            streams_closed: self.streams_closed.load(Ordering::Relaxed),
            streams_timed_out: self.streams_timed_out.load(Ordering::Relaxed),
            streams_cancelled: self.streams_cancelled.load(Ordering::Relaxed),
            requests_accepted: self.requests_accepted.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            streams_total = snapshot.streams_total,
            streams_active = snapshot.streams_active,
            streams_closed = snapshot.streams_closed,
            streams_timed_out = snapshot.streams_timed_out,
            streams_cancelled = snapshot.streams_cancelled,
            requests_accepted = snapshot.requests_accepted,
            requests_rejected = snapshot.requests_rejected,
            chunks_written = snapshot.chunks_written,
            write_failures = snapshot.write_failures,
            uptime_seconds = snapshot.uptime_seconds,
            "Request/response metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub streams_total: u64,
    pub streams_active: u64,
    pub streams_closed: u64,
    pub streams_timed_out: u64,
    pub streams_cancelled: u64,
    pub requests_accepted: u64,
    pub requests_rejected: u64,
    pub chunks_written: u64,
    pub write_failures: u64,
    pub uptime_seconds: u64,
}

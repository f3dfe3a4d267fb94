//! Session Metrics
//!
//! Atomic counters describing one session's handshakes, frames and requests.
//! A [`SessionMetrics`] is shared between the driver task and its handles
//! through an `Arc`; reads go through [`SessionMetrics::snapshot`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Counters for one session.
#[derive(Debug)]
pub struct SessionMetrics {
    /// Handshake attempts (admin init sent)
    pub handshakes_total: AtomicU64,
    /// Handshakes that reached authenticated state
    pub handshakes_success: AtomicU64,
    /// Handshakes aborted or failed before authentication
    pub handshakes_failed: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_sent: AtomicU64,
    /// Authenticated binary frames that verified and decrypted
    pub frames_decrypted: AtomicU64,
    pub mac_failures: AtomicU64,
    pub decode_errors: AtomicU64,
    pub requests_sent: AtomicU64,
    pub requests_resolved: AtomicU64,
    pub requests_timed_out: AtomicU64,
    pub requests_cancelled: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    start_time: Instant,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_decrypted: AtomicU64::new(0),
            mac_failures: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            requests_sent: AtomicU64::new(0),
            requests_resolved: AtomicU64::new(0),
            requests_timed_out: AtomicU64::new(0),
            requests_cancelled: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an inbound frame of `byte_count` bytes
    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record an outbound frame of `byte_count` bytes
    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn frame_decrypted(&self) {
        self.frames_decrypted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mac_failure(&self) {
        self.mac_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_resolved(&self) {
        self.requests_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_timed_out(&self, count: u64) {
        self.requests_timed_out.fetch_add(count, Ordering::Relaxed);
    }

    pub fn requests_cancelled(&self, count: u64) {
        self.requests_cancelled.fetch_add(count, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_decrypted: self.frames_decrypted.load(Ordering::Relaxed),
            mac_failures: self.mac_failures.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            requests_resolved: self.requests_resolved.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            requests_cancelled: self.requests_cancelled.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            frames_received = snapshot.frames_received,
            frames_sent = snapshot.frames_sent,
            frames_decrypted = snapshot.frames_decrypted,
            mac_failures = snapshot.mac_failures,
            decode_errors = snapshot.decode_errors,
            requests_sent = snapshot.requests_sent,
            requests_resolved = snapshot.requests_resolved,
            requests_timed_out = snapshot.requests_timed_out,
            requests_cancelled = snapshot.requests_cancelled,
            uptime_seconds = snapshot.uptime_seconds,
            "Session metrics snapshot"
        );
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub frames_decrypted: u64,
    pub mac_failures: u64,
    pub decode_errors: u64,
    pub requests_sent: u64,
    pub requests_resolved: u64,
    pub requests_timed_out: u64,
    pub requests_cancelled: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Time since [`Timer::start`].
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            operation = self.operation,
            duration_us = self.start.elapsed().as_micros() as u64,
            "Operation completed"
        );
    }
}

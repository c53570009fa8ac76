//! Observability and Metrics
//!
//! Counters describing what the relay has been doing. Uses atomic counters so every
//! connection task can record without coordination.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Relay-wide counters
#[derive(Debug)]
pub struct RelayMetrics {
    /// Total connections admitted to the registry
    pub connections_accepted: AtomicU64,
    /// Currently registered connections
    pub connections_active: AtomicU64,
    /// Connections removed from the registry
    pub connections_closed: AtomicU64,
    /// Packets read from peers
    pub packets_received: AtomicU64,
    /// Frames successfully written to recipients
    pub frames_delivered: AtomicU64,
    /// Frames that could not be written to a recipient
    pub delivery_failures: AtomicU64,
    /// Connections dropped because of undecodable input
    pub protocol_errors: AtomicU64,
    start_time: Instant,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            connections_accepted: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Called once per removed registry record
    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_delivered(&self) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_failed(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_secs: self.uptime().as_secs(),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            uptime_secs = s.uptime_secs,
            connections_accepted = s.connections_accepted,
            connections_active = s.connections_active,
            packets_received = s.packets_received,
            frames_delivered = s.frames_delivered,
            delivery_failures = s.delivery_failures,
            protocol_errors = s.protocol_errors,
            "Relay metrics"
        );
    }
}

/// Plain copy of [`RelayMetrics`] counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub connections_closed: u64,
    pub packets_received: u64,
    pub frames_delivered: u64,
    pub delivery_failures: u64,
    pub protocol_errors: u64,
    pub uptime_secs: u64,
}

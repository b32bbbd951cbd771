//! Observability and Metrics
//!
//! Hosts report per-call timings to a [`StatsSink`]. The default sink, [`NullStats`],
//! drops everything; [`Metrics`] keeps atomic counters and can log a snapshot.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Category used for interface synchronization timings.
pub const CATEGORY_SYNC: &str = "sync";
/// Category used for method invocation timings.
pub const CATEGORY_INVOKE: &str = "invoke";

/// Receives one timing record per synchronization and per invocation.
pub trait StatsSink: Send + Sync {
    fn record(&self, category: &str, name: &str, elapsed: Duration);

    /// Connection lifecycle notifications; ignored unless the sink cares.
    fn connection_opened(&self) {}
    fn connection_closed(&self) {}
    fn handshake_finished(&self, _success: bool) {}
    fn protocol_error(&self) {}

    /// Called once when the host shuts down.
    fn report(&self) {}
}

/// Sink that discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStats;

impl StatsSink for NullStats {
    fn record(&self, _category: &str, _name: &str, _elapsed: Duration) {}
}

/// Accumulated timing for one `(category, name)` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

/// Metrics collector for host operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections established
    pub connections_total: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Total handshake attempts
    pub handshakes_total: AtomicU64,
    /// Successful handshakes
    pub handshakes_success: AtomicU64,
    /// Failed handshakes
    pub handshakes_failed: AtomicU64,
    /// Interface synchronizations served
    pub syncs_total: AtomicU64,
    /// Method invocations served
    pub invocations_total: AtomicU64,
    /// Protocol errors
    pub protocol_errors: AtomicU64,
    calls: Mutex<HashMap<(String, String), CallStats>>,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            syncs_total: AtomicU64::new(0),
            invocations_total: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            calls: Mutex::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Timing totals for one `(category, name)` pair.
    pub fn call_stats(&self, category: &str, name: &str) -> Option<CallStats> {
        let calls = self.calls.lock().ok()?;
        calls
            .get(&(category.to_string(), name.to_string()))
            .copied()
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            syncs_total: self.syncs_total.load(Ordering::Relaxed),
            invocations_total: self.invocations_total.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            syncs_total = snapshot.syncs_total,
            invocations_total = snapshot.invocations_total,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Host metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSink for Metrics {
    fn record(&self, category: &str, name: &str, elapsed: Duration) {
        match category {
            CATEGORY_SYNC => self.syncs_total.fetch_add(1, Ordering::Relaxed),
            CATEGORY_INVOKE => self.invocations_total.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };

        if let Ok(mut calls) = self.calls.lock() {
            let entry = calls
                .entry((category.to_string(), name.to_string()))
                .or_default();
            entry.count += 1;
            entry.total += elapsed;
            entry.max = entry.max.max(elapsed);
        }
    }

    fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    fn handshake_finished(&self, success: bool) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.handshakes_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self) {
        self.log_metrics();
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub syncs_total: u64,
    pub invocations_total: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring one operation; reports to the sink when finished.
pub struct Timer<'a> {
    start: Instant,
    category: &'static str,
    name: &'a str,
}

impl<'a> Timer<'a> {
    /// Start timing an operation
    pub fn start(category: &'static str, name: &'a str) -> Self {
        Self {
            start: Instant::now(),
            category,
            name,
        }
    }

    pub fn finish(self, sink: &dyn StatsSink) {
        let elapsed = self.start.elapsed();
        debug!(
            category = self.category,
            name = self.name,
            duration_us = elapsed.as_micros() as u64,
            "Operation completed"
        );
        sink.record(self.category, self.name, elapsed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_accumulates_calls() {
        let metrics = Metrics::new();
        metrics.record(CATEGORY_INVOKE, "Calc.Min", Duration::from_millis(2));
        metrics.record(CATEGORY_INVOKE, "Calc.Min", Duration::from_millis(5));
        metrics.record(CATEGORY_SYNC, "Calc", Duration::from_millis(1));

        let min = metrics.call_stats(CATEGORY_INVOKE, "Calc.Min").unwrap();
        assert_eq!(min.count, 2);
        assert_eq!(min.total, Duration::from_millis(7));
        assert_eq!(min.max, Duration::from_millis(5));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.invocations_total, 2);
        assert_eq!(snapshot.syncs_total, 1);
        assert!(metrics.call_stats(CATEGORY_SYNC, "Other").is_none());
    }

    #[test]
    fn test_connection_and_handshake_counters() {
        let metrics = Metrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        metrics.handshake_finished(true);
        metrics.handshake_finished(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_total, 2);
        assert_eq!(snapshot.connections_active, 1);
        assert_eq!(snapshot.handshakes_total, 2);
        assert_eq!(snapshot.handshakes_failed, 1);
    }
}

//! Per-connection request metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters and rolling latency for one MCP connection.
///
/// Lock-free counters; the rolling average sits behind a small mutex because
/// it updates two fields together.
#[derive(Default)]
pub struct ConnectionMetrics {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    rolling: Mutex<Rolling>,
}

#[derive(Default)]
struct Rolling {
    avg_latency_ms: f64,
    samples: u64,
    last_request_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the metrics, for logs and health endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub avg_latency_ms: f64,
    pub last_request_at: Option<DateTime<Utc>>,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed request.
    pub fn record(&self, ok: bool, latency_ms: u64) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if ok {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure.fetch_add(1, Ordering::Relaxed);
        }
        let mut rolling = self.rolling.lock().unwrap_or_else(|e| e.into_inner());
        rolling.samples += 1;
        let n = rolling.samples as f64;
        rolling.avg_latency_ms += (latency_ms as f64 - rolling.avg_latency_ms) / n;
        rolling.last_request_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let rolling = self.rolling.lock().unwrap_or_else(|e| e.into_inner());
        MetricsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            failure: self.failure.load(Ordering::Relaxed),
            avg_latency_ms: rolling.avg_latency_ms,
            last_request_at: rolling.last_request_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: counters split by outcome; average converges on samples.
    #[test]
    fn record_updates_counts_and_average() {
        let metrics = ConnectionMetrics::new();
        metrics.record(true, 10);
        metrics.record(true, 30);
        metrics.record(false, 20);

        let snap = metrics.snapshot();
        assert_eq!(snap.total, 3);
        assert_eq!(snap.success, 2);
        assert_eq!(snap.failure, 1);
        assert!((snap.avg_latency_ms - 20.0).abs() < 1e-9);
        assert!(snap.last_request_at.is_some());
    }

    /// **Scenario**: a fresh metrics block reads as all zeros.
    #[test]
    fn empty_snapshot() {
        let snap = ConnectionMetrics::new().snapshot();
        assert_eq!(snap.total, 0);
        assert_eq!(snap.avg_latency_ms, 0.0);
        assert!(snap.last_request_at.is_none());
    }
}

//! Relay counters reported by `/status`.
//!
//! All counters are backed by atomics for lock-free concurrent access.

use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregated metrics for the randomness relay.
///
/// Thread-safe via atomics; shared via `Arc<Metrics>`.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Request events received, duplicates included.
    pub requests_received: AtomicU64,
    /// Request events rejected by the correlation tracker.
    pub duplicates_skipped: AtomicU64,
    /// Fulfillments confirmed on-chain.
    pub requests_fulfilled: AtomicU64,
    /// Fulfillments that ended Failed (rejected, reverted, or timed out).
    pub requests_failed: AtomicU64,
    /// Completion events observed from the target program.
    pub completions_observed: AtomicU64,
    /// Request tasks currently running.
    pub in_flight: AtomicU64,
    /// Sum of submit-to-confirm latencies in milliseconds.
    pub fulfillment_latency_sum_ms: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a confirmed fulfillment with its latency.
    pub fn record_fulfillment(&self, latency_ms: u64) {
        self.requests_fulfilled.fetch_add(1, Ordering::Relaxed);
        self.fulfillment_latency_sum_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completions_observed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Compute average fulfillment latency in milliseconds, or 0 if none.
    pub fn avg_latency_ms(&self) -> u64 {
        let count = self.requests_fulfilled.load(Ordering::Relaxed);
        if count == 0 {
            return 0;
        }
        self.fulfillment_latency_sum_ms.load(Ordering::Relaxed) / count
    }

    /// Serialize metrics as a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "requests_received": self.requests_received.load(Ordering::Relaxed),
            "duplicates_skipped": self.duplicates_skipped.load(Ordering::Relaxed),
            "requests_fulfilled": self.requests_fulfilled.load(Ordering::Relaxed),
            "requests_failed": self.requests_failed.load(Ordering::Relaxed),
            "completions_observed": self.completions_observed.load(Ordering::Relaxed),
            "in_flight": self.in_flight.load(Ordering::Relaxed),
            "avg_fulfillment_latency_ms": self.avg_latency_ms(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_latency_over_fulfilled_requests() {
        let metrics = Metrics::new();
        assert_eq!(metrics.avg_latency_ms(), 0);

        metrics.record_fulfillment(100);
        metrics.record_fulfillment(300);
        metrics.record_failure();

        assert_eq!(metrics.avg_latency_ms(), 200);
        let json = metrics.to_json();
        assert_eq!(json["requests_fulfilled"], 2);
        assert_eq!(json["requests_failed"], 1);
    }

    #[test]
    fn in_flight_tracks_task_lifetimes() {
        let metrics = Metrics::new();
        metrics.task_started();
        metrics.task_started();
        metrics.task_finished();
        assert_eq!(metrics.to_json()["in_flight"], 1);
    }
}

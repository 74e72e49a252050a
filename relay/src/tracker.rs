//! Correlation tracker: the single source of truth for whether a request id
//! has already been handled.
//!
//! Per-request state machine:
//!
//! ```text
//! Pending ──▶ Submitted ──▶ Confirmed
//!    │            │
//!    ▼            ▼
//!  Failed       Failed
//! (retryable)  (terminal)
//! ```
//!
//! A record that failed before anything was broadcast may be re-begun when
//! its event is redelivered; once a transaction left the relay the request is
//! never submitted again.

use alloy_primitives::U256;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::ledger::TxHandle;
use crate::randomness::RandomWords;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct FulfillmentRecord {
    pub request_id: U256,
    pub random_words: Option<RandomWords>,
    pub status: FulfillmentStatus,
    pub tx: Option<TxHandle>,
    pub submitted_at: Option<SystemTime>,
    pub confirmed_at: Option<SystemTime>,
    pub failure: Option<String>,
}

impl FulfillmentRecord {
    fn pending(request_id: U256) -> Self {
        Self {
            request_id,
            random_words: None,
            status: FulfillmentStatus::Pending,
            tx: None,
            submitted_at: None,
            confirmed_at: None,
            failure: None,
        }
    }

    /// JSON view served by `/requests/{id}`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "request_id": self.request_id.to_string(),
            "status": self.status,
            "random_words": self
                .random_words
                .map(|words| words.iter().map(U256::to_string).collect::<Vec<_>>()),
            "signature": self.tx.as_ref().map(|tx| tx.signature.to_string()),
            "submitted_at_ms": self.submitted_at.map(unix_millis),
            "confirmed_at_ms": self.confirmed_at.map(unix_millis),
            "failure": self.failure,
        })
    }

    /// Failed before a transaction was broadcast.
    fn is_retryable(&self) -> bool {
        self.status == FulfillmentStatus::Failed && self.submitted_at.is_none()
    }
}

fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Per-status record totals, reported by `/status`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackerCounts {
    pub pending: usize,
    pub submitted: usize,
    pub confirmed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct CorrelationTracker {
    records: Mutex<HashMap<U256, FulfillmentRecord>>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `request_id` for processing.
    ///
    /// Returns `true` and inserts a fresh Pending record if the id is unknown
    /// or failed before submission. Returns `false` without touching the map
    /// otherwise. The check and the insert happen under one lock, so
    /// concurrent callers racing on the same id get exactly one `true`.
    pub fn try_begin(&self, request_id: U256) -> bool {
        let mut records = self.records.lock();
        match records.get(&request_id) {
            Some(existing) if !existing.is_retryable() => false,
            _ => {
                records.insert(request_id, FulfillmentRecord::pending(request_id));
                true
            }
        }
    }

    pub fn mark_submitted(&self, request_id: U256, random_words: RandomWords, tx: TxHandle) -> bool {
        self.transition(request_id, "submitted", |record| {
            if record.status != FulfillmentStatus::Pending {
                return false;
            }
            record.status = FulfillmentStatus::Submitted;
            record.random_words = Some(random_words);
            record.tx = Some(tx);
            record.submitted_at = Some(SystemTime::now());
            true
        })
    }

    pub fn mark_confirmed(&self, request_id: U256) -> bool {
        self.transition(request_id, "confirmed", |record| {
            if record.status != FulfillmentStatus::Submitted {
                return false;
            }
            record.status = FulfillmentStatus::Confirmed;
            record.confirmed_at = Some(SystemTime::now());
            true
        })
    }

    pub fn mark_failed(&self, request_id: U256, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.transition(request_id, "failed", |record| {
            if !matches!(
                record.status,
                FulfillmentStatus::Pending | FulfillmentStatus::Submitted
            ) {
                return false;
            }
            record.status = FulfillmentStatus::Failed;
            record.failure = Some(reason);
            true
        })
    }

    pub fn status(&self, request_id: U256) -> Option<FulfillmentStatus> {
        self.records.lock().get(&request_id).map(|r| r.status)
    }

    pub fn record(&self, request_id: U256) -> Option<FulfillmentRecord> {
        self.records.lock().get(&request_id).cloned()
    }

    pub fn counts(&self) -> TrackerCounts {
        let records = self.records.lock();
        let mut counts = TrackerCounts::default();
        for record in records.values() {
            match record.status {
                FulfillmentStatus::Pending => counts.pending += 1,
                FulfillmentStatus::Submitted => counts.submitted += 1,
                FulfillmentStatus::Confirmed => counts.confirmed += 1,
                FulfillmentStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Apply `apply` to the record under the lock; logs an anomaly when the
    /// id is unknown or the transition is illegal from its current state.
    fn transition(
        &self,
        request_id: U256,
        to: &'static str,
        apply: impl FnOnce(&mut FulfillmentRecord) -> bool,
    ) -> bool {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(&request_id) else {
            warn!(request_id = %request_id, to, "Transition for unknown request ignored");
            return false;
        };
        let from = record.status;
        let applied = apply(record);
        if !applied {
            warn!(
                request_id = %request_id,
                from = ?from,
                to,
                "Illegal transition ignored"
            );
        }
        applied
    }
}

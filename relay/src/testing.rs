//! In-memory [`LedgerClient`] for driving the relay in tests.

use alloy_primitives::U256;
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{LedgerError, RandomnessError};
use crate::events::{EventKind, EventLayout, LedgerEvent, RequestEvent};
use crate::ledger::{EventFilter, EventStream, LedgerClient, TxHandle, TxOutcome};
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::randomness::{OsRandomness, RandomWords, RandomnessSource};
use crate::tracker::CorrelationTracker;

/// One scripted subscription session.
pub struct Session {
    items: Vec<Result<LedgerEvent, LedgerError>>,
    /// Keep the stream open after the items instead of ending it.
    hang: bool,
}

impl Session {
    /// Deliver `items`, then drop the connection.
    pub fn dropping(items: Vec<Result<LedgerEvent, LedgerError>>) -> Self {
        Self { items, hang: false }
    }

    /// Deliver `items`, then stay open.
    pub fn open(items: Vec<Result<LedgerEvent, LedgerError>>) -> Self {
        Self { items, hang: true }
    }
}

#[derive(Default)]
pub struct MockLedger {
    sessions: Mutex<HashMap<EventKind, VecDeque<Session>>>,
    pub subscribe_calls: AtomicUsize,
    submissions: Mutex<Vec<(U256, RandomWords)>>,
    submit_failures: Mutex<HashMap<U256, LedgerError>>,
    signatures: Mutex<HashMap<Signature, U256>>,
    confirmation_delays: Mutex<HashMap<U256, Duration>>,
    reverts: Mutex<HashMap<U256, String>>,
    never_confirm: Mutex<HashSet<U256>>,
    confirmed: Mutex<Vec<U256>>,
    next_signature: AtomicU64,
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, kind: EventKind, session: Session) {
        self.sessions.lock().entry(kind).or_default().push_back(session);
    }

    pub fn fail_submission(&self, request_id: U256, error: LedgerError) {
        self.submit_failures.lock().insert(request_id, error);
    }

    pub fn clear_submission_failure(&self, request_id: U256) {
        self.submit_failures.lock().remove(&request_id);
    }

    pub fn delay_confirmation(&self, request_id: U256, delay: Duration) {
        self.confirmation_delays.lock().insert(request_id, delay);
    }

    pub fn revert(&self, request_id: U256, reason: &str) {
        self.reverts.lock().insert(request_id, reason.to_string());
    }

    pub fn never_confirm(&self, request_id: U256) {
        self.never_confirm.lock().insert(request_id);
    }

    pub fn submissions(&self) -> Vec<(U256, RandomWords)> {
        self.submissions.lock().clone()
    }

    pub fn submissions_for(&self, request_id: U256) -> usize {
        self.submissions
            .lock()
            .iter()
            .filter(|(id, _)| *id == request_id)
            .count()
    }

    pub fn confirmed(&self) -> Vec<U256> {
        self.confirmed.lock().clone()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn subscribe(&self, kind: EventKind, _filter: EventFilter) -> Result<EventStream, LedgerError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let session = self.sessions.lock().get_mut(&kind).and_then(|q| q.pop_front());
        let stream = match session {
            Some(Session { items, hang: false }) => futures_util::stream::iter(items).boxed(),
            Some(Session { items, hang: true }) => futures_util::stream::iter(items)
                .chain(futures_util::stream::pending())
                .boxed(),
            None => futures_util::stream::pending().boxed(),
        };
        Ok(stream)
    }

    async fn submit_fulfillment(
        &self,
        request_id: U256,
        random_words: RandomWords,
    ) -> Result<TxHandle, LedgerError> {
        if let Some(error) = self.submit_failures.lock().get(&request_id) {
            return Err(error.clone());
        }
        self.submissions.lock().push((request_id, random_words));

        let n = self.next_signature.fetch_add(1, Ordering::SeqCst);
        let mut bytes = [0u8; 64];
        bytes[..8].copy_from_slice(&n.to_le_bytes());
        let signature = Signature::from(bytes);
        self.signatures.lock().insert(signature, request_id);

        Ok(TxHandle {
            signature,
            last_valid_block_height: 1_000,
        })
    }

    async fn await_confirmation(&self, tx: &TxHandle) -> Result<TxOutcome, LedgerError> {
        let request_id = self
            .signatures
            .lock()
            .get(&tx.signature)
            .copied()
            .ok_or_else(|| LedgerError::Rejected("unknown signature".into()))?;

        let hang = self.never_confirm.lock().contains(&request_id);
        if hang {
            std::future::pending::<()>().await;
        }
        let delay = self.confirmation_delays.lock().get(&request_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.reverts.lock().get(&request_id) {
            return Ok(TxOutcome::Reverted(reason.clone()));
        }

        self.confirmed.lock().push(request_id);
        Ok(TxOutcome::Success)
    }
}

/// Randomness source whose entropy is always exhausted.
pub struct ExhaustedEntropy;

impl RandomnessSource for ExhaustedEntropy {
    fn random_words(&self) -> Result<RandomWords, RandomnessError> {
        Err(RandomnessError(rand::Error::new(std::io::Error::other(
            "entropy pool exhausted",
        ))))
    }
}

pub fn filter() -> EventFilter {
    EventFilter {
        program_id: Pubkey::new_unique(),
        layout: EventLayout::Marketplace,
    }
}

pub fn request(id: u64) -> RequestEvent {
    RequestEvent {
        request_id: U256::from(id),
        subject_id: Some(U256::from(id + 1_000)),
        requester: Pubkey::new_unique(),
        observed_at_slot: 10,
    }
}

pub fn orchestrator(
    ledger: Arc<MockLedger>,
    confirmation_timeout: Duration,
) -> (Arc<Orchestrator>, Arc<CorrelationTracker>, Arc<Metrics>) {
    orchestrator_with(ledger, Arc::new(OsRandomness), confirmation_timeout)
}

pub fn orchestrator_with(
    ledger: Arc<MockLedger>,
    randomness: Arc<dyn RandomnessSource>,
    confirmation_timeout: Duration,
) -> (Arc<Orchestrator>, Arc<CorrelationTracker>, Arc<Metrics>) {
    let tracker = Arc::new(CorrelationTracker::new());
    let metrics = Arc::new(Metrics::new());
    let orchestrator = Orchestrator::new(
        ledger,
        tracker.clone(),
        randomness,
        metrics.clone(),
        confirmation_timeout,
        "localnet".into(),
    );
    (Arc::new(orchestrator), tracker, metrics)
}

/// Poll `condition` until it holds, panicking after a generous deadline.
pub async fn eventually(condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}


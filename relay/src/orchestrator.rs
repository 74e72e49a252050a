//! Fulfillment orchestrator: consumes request events and drives each one
//! through claim → draw → submit → confirm.
//!
//! Every request event runs in its own task so a slow confirmation never
//! holds up other requests. The tracker's `try_begin` is the only guard
//! against duplicate delivery; everything after it is a straight pipeline.

use alloy_primitives::U256;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, instrument, warn};

use crate::config::explorer_url;
use crate::error::RelayError;
use crate::events::{CompletionEvent, LedgerEvent, RequestEvent};
use crate::ledger::{LedgerClient, TxOutcome};
use crate::metrics::Metrics;
use crate::randomness::RandomnessSource;
use crate::shutdown;
use crate::tracker::CorrelationTracker;

/// Terminal result of handling one request event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Already claimed by an earlier delivery; nothing was sent.
    Duplicate,
    Confirmed,
    Failed(String),
}

type RequestTasks = JoinSet<Result<RequestOutcome, RelayError>>;

pub struct Orchestrator {
    ledger: Arc<dyn LedgerClient>,
    tracker: Arc<CorrelationTracker>,
    randomness: Arc<dyn RandomnessSource>,
    metrics: Arc<Metrics>,
    confirmation_timeout: Duration,
    cluster: String,
}

impl Orchestrator {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        tracker: Arc<CorrelationTracker>,
        randomness: Arc<dyn RandomnessSource>,
        metrics: Arc<Metrics>,
        confirmation_timeout: Duration,
        cluster: String,
    ) -> Self {
        Self {
            ledger,
            tracker,
            randomness,
            metrics,
            confirmation_timeout,
            cluster,
        }
    }

    /// Dispatch loop: one task per request event until shutdown or until the
    /// subscribers hang up.
    ///
    /// After the loop stops accepting events, in-flight requests get `grace`
    /// to finish; whatever is left is aborted and stays Pending/Submitted.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<LedgerEvent>,
        mut shutdown: watch::Receiver<bool>,
        grace: Duration,
    ) -> Result<(), RelayError> {
        let mut tasks = RequestTasks::new();

        loop {
            tokio::select! {
                biased;
                _ = shutdown::stopped(&mut shutdown) => {
                    info!("Shutdown requested, no longer accepting events");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = reap(joined) {
                        error!(error = %e, "Fatal error while fulfilling, stopping relay");
                        tasks.shutdown().await;
                        return Err(e);
                    }
                }
                event = events.recv() => match event {
                    Some(LedgerEvent::Request(event)) => self.spawn_request(&mut tasks, event),
                    Some(LedgerEvent::Completion(event)) => self.handle_completion(&event),
                    None => {
                        info!("Event channel closed");
                        break;
                    }
                },
            }
        }

        drain(tasks, grace).await
    }

    fn spawn_request(self: &Arc<Self>, tasks: &mut RequestTasks, event: RequestEvent) {
        let this = self.clone();
        let in_flight = InFlight::start(self.metrics.clone());
        tasks.spawn(async move {
            let _in_flight = in_flight;
            this.handle_request(event).await
        });
    }

    /// Run one request through the pipeline.
    ///
    /// Per-request failures come back as [`RequestOutcome::Failed`]; `Err` is
    /// reserved for conditions that must stop the process.
    #[instrument(skip_all, fields(request_id = %event.request_id))]
    pub async fn handle_request(&self, event: RequestEvent) -> Result<RequestOutcome, RelayError> {
        let request_id = event.request_id;
        self.metrics.record_request();

        if !self.tracker.try_begin(request_id) {
            self.metrics.record_duplicate();
            info!(
                request_id = %request_id,
                status = ?self.tracker.status(request_id),
                "Duplicate request, skipping"
            );
            return Ok(RequestOutcome::Duplicate);
        }

        info!(
            request_id = %request_id,
            subject = ?event.subject_id,
            requester = %event.requester,
            slot = event.observed_at_slot,
            "Fulfilling randomness request"
        );

        let random_words = match self.randomness.random_words() {
            Ok(words) => words,
            Err(e) => {
                self.fail(request_id, e.to_string());
                return Err(e.into());
            }
        };

        let start = Instant::now();
        let tx = match self.ledger.submit_fulfillment(request_id, random_words).await {
            Ok(tx) => tx,
            Err(e) if e.is_fatal() => {
                self.fail(request_id, e.to_string());
                return Err(e.into());
            }
            Err(e) => return Ok(self.fail(request_id, format!("submission failed: {e}"))),
        };

        self.tracker.mark_submitted(request_id, random_words, tx.clone());
        info!(
            request_id = %request_id,
            signature = %tx.signature,
            word1 = %random_words[0],
            word2 = %random_words[1],
            "Fulfillment submitted"
        );

        let confirmation =
            tokio::time::timeout(self.confirmation_timeout, self.ledger.await_confirmation(&tx)).await;

        let outcome = match confirmation {
            Ok(Ok(TxOutcome::Success)) => {
                self.tracker.mark_confirmed(request_id);
                let latency_ms = start.elapsed().as_millis() as u64;
                self.metrics.record_fulfillment(latency_ms);
                let signature = tx.signature.to_string();
                info!(
                    request_id = %request_id,
                    signature = %signature,
                    latency_ms,
                    explorer = %explorer_url(&self.cluster, &signature),
                    "Fulfilled successfully"
                );
                RequestOutcome::Confirmed
            }
            Ok(Ok(TxOutcome::Reverted(reason))) => self.fail(request_id, format!("reverted: {reason}")),
            Ok(Err(e)) => self.fail(request_id, format!("confirmation failed: {e}")),
            Err(_) => self.fail(
                request_id,
                format!("not confirmed within {:?}", self.confirmation_timeout),
            ),
        };

        Ok(outcome)
    }

    /// Completion events carry no work; they are logged for reconciliation.
    pub fn handle_completion(&self, event: &CompletionEvent) {
        self.metrics.record_completion();
        info!(
            request_id = %event.request_id,
            subject = ?event.subject_id,
            minter = %event.requester,
            status = ?self.tracker.status(event.request_id),
            "Request completed on-chain"
        );
    }

    fn fail(&self, request_id: U256, reason: String) -> RequestOutcome {
        self.tracker.mark_failed(request_id, reason.clone());
        self.metrics.record_failure();
        warn!(request_id = %request_id, reason = %reason, "Fulfillment failed");
        RequestOutcome::Failed(reason)
    }
}

/// Keeps `Metrics::in_flight` honest even when a task is aborted.
struct InFlight(Arc<Metrics>);

impl InFlight {
    fn start(metrics: Arc<Metrics>) -> Self {
        metrics.task_started();
        Self(metrics)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.task_finished();
    }
}

fn reap(joined: Result<Result<RequestOutcome, RelayError>, JoinError>) -> Result<(), RelayError> {
    match joined {
        Ok(result) => result.map(|_| ()),
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(RelayError::TaskPanicked(e.to_string())),
    }
}

async fn drain(mut tasks: RequestTasks, grace: Duration) -> Result<(), RelayError> {
    if tasks.is_empty() {
        return Ok(());
    }

    info!(in_flight = tasks.len(), grace = ?grace, "Waiting for in-flight requests");
    let finished = tokio::time::timeout(grace, async {
        while let Some(joined) = tasks.join_next().await {
            reap(joined)?;
        }
        Ok::<(), RelayError>(())
    })
    .await;

    match finished {
        Ok(result) => result,
        Err(_) => {
            warn!(abandoned = tasks.len(), "Grace period elapsed, abandoning in-flight requests");
            tasks.shutdown().await;
            Ok(())
        }
    }
}

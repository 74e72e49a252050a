//! [`LedgerClient`] backed by a Solana cluster.
//!
//! - Subscriptions use `logsSubscribe` over WebSocket, mention-filtered on the
//!   target program, and reconnect after a fixed delay. Consecutive connection
//!   failures beyond the configured limit end the stream with a fatal error.
//! - Submissions share one signing keypair and are serialized through a lock.
//!   Fetching the blockhash is retried with exponential backoff; the broadcast
//!   itself never is.
//! - Confirmation polls the signature status until it lands, fails, or its
//!   blockhash expires.

use alloy_primitives::U256;
use async_trait::async_trait;
use futures_util::StreamExt;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcTransactionLogsConfig, RpcTransactionLogsFilter};
use solana_commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::Transaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::LedgerError;
use crate::events::{EventKind, LedgerEvent, decode_log_lines};
use crate::instructions::fulfillment_instructions;
use crate::ledger::{EventFilter, EventStream, LedgerClient, TxHandle, TxOutcome};
use crate::randomness::RandomWords;

/// Buffered events per subscription before the WebSocket reader backs off.
const SUBSCRIPTION_BUFFER: usize = 256;

/// Interval between signature status polls.
const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Cap on the blockhash retry backoff.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

pub struct SolanaLedger {
    rpc: RpcClient,
    ws_url: String,
    authority: Arc<Keypair>,
    coordinator_program_id: Pubkey,
    consumer_program_id: Pubkey,
    priority_fee_micro_lamports: u64,
    max_retries: u32,
    initial_retry_delay: Duration,
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,
    /// Serializes submissions from the shared authority.
    submit_lock: Mutex<()>,
}

impl SolanaLedger {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            rpc: RpcClient::new_with_commitment(config.rpc_url.clone(), CommitmentConfig::confirmed()),
            ws_url: config.ws_url.clone(),
            authority: config.authority_keypair.clone(),
            coordinator_program_id: config.coordinator_program_id,
            consumer_program_id: config.target_program_id,
            priority_fee_micro_lamports: config.priority_fee_micro_lamports,
            max_retries: config.max_retries,
            initial_retry_delay: Duration::from_millis(config.initial_retry_delay_ms),
            reconnect_delay: config.reconnect_delay,
            max_reconnect_attempts: config.max_reconnect_attempts,
            submit_lock: Mutex::new(()),
        }
    }

    /// Fetch a recent blockhash with exponential backoff on RPC failures.
    async fn latest_blockhash(&self) -> Result<(Hash, u64), LedgerError> {
        let mut retry_delay = self.initial_retry_delay;

        for attempt in 1..=self.max_retries {
            match self
                .rpc
                .get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())
                .await
            {
                Ok(blockhash) => return Ok(blockhash),
                Err(e) if attempt < self.max_retries => {
                    warn!(
                        attempt,
                        delay = ?retry_delay,
                        error = %e,
                        "Failed to fetch latest blockhash, retrying"
                    );
                    tokio::time::sleep(retry_delay).await;
                    retry_delay = retry_delay.saturating_mul(2).min(MAX_RETRY_DELAY);
                }
                Err(e) => {
                    return Err(LedgerError::Connectivity(format!(
                        "failed to fetch latest blockhash after {attempt} attempts: {e}"
                    )));
                }
            }
        }

        Err(LedgerError::Connectivity("no blockhash attempts configured".into()))
    }
}

#[async_trait]
impl LedgerClient for SolanaLedger {
    async fn subscribe(&self, kind: EventKind, filter: EventFilter) -> Result<EventStream, LedgerError> {
        let (tx, mut rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let policy = ReconnectPolicy {
            delay: self.reconnect_delay,
            max_attempts: self.max_reconnect_attempts,
        };
        tokio::spawn(stream_logs(self.ws_url.clone(), kind, filter, policy, tx));

        Ok(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }

    async fn submit_fulfillment(
        &self,
        request_id: U256,
        random_words: RandomWords,
    ) -> Result<TxHandle, LedgerError> {
        let authority = self.authority.pubkey();
        let instructions = fulfillment_instructions(
            &self.coordinator_program_id,
            &authority,
            &self.consumer_program_id,
            request_id,
            &random_words,
            self.priority_fee_micro_lamports,
        );

        let _guard = self.submit_lock.lock().await;

        let (blockhash, last_valid_block_height) = self.latest_blockhash().await?;

        let mut tx = Transaction::new_with_payer(&instructions, Some(&authority));
        tx.try_sign(&[self.authority.as_ref()], blockhash)
            .map_err(|e| LedgerError::Signing(e.to_string()))?;

        let signature = self
            .rpc
            .send_transaction(&tx)
            .await
            .map_err(|e| LedgerError::Rejected(e.to_string()))?;

        debug!(request_id = %request_id, %signature, "Fulfillment broadcast");

        Ok(TxHandle {
            signature,
            last_valid_block_height,
        })
    }

    async fn await_confirmation(&self, tx: &TxHandle) -> Result<TxOutcome, LedgerError> {
        loop {
            match self
                .rpc
                .get_signature_status_with_commitment(&tx.signature, CommitmentConfig::confirmed())
                .await
            {
                Ok(status) => {
                    let block_height = if status.is_none() {
                        match self.rpc.get_block_height().await {
                            Ok(height) => Some(height),
                            Err(e) => {
                                debug!(error = %e, "Failed to fetch block height");
                                None
                            }
                        }
                    } else {
                        None
                    };

                    if let Some(outcome) =
                        confirmation_outcome(status, block_height, tx.last_valid_block_height)
                    {
                        return Ok(outcome);
                    }
                }
                Err(e) => {
                    debug!(signature = %tx.signature, error = %e, "Signature status poll failed");
                }
            }

            tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await;
        }
    }
}

/// Settle a broadcast transaction from its signature status and, while the
/// status is still unknown, the current block height. `None` means keep polling.
fn confirmation_outcome<E: std::fmt::Display>(
    status: Option<Result<(), E>>,
    block_height: Option<u64>,
    last_valid_block_height: u64,
) -> Option<TxOutcome> {
    match status {
        Some(Ok(())) => Some(TxOutcome::Success),
        Some(Err(err)) => Some(TxOutcome::Reverted(err.to_string())),
        None => match block_height {
            Some(height) if height > last_valid_block_height => Some(TxOutcome::Reverted(
                "blockhash expired before inclusion".into(),
            )),
            _ => None,
        },
    }
}

#[derive(Debug, Clone, Copy)]
struct ReconnectPolicy {
    delay: Duration,
    max_attempts: u32,
}

enum PumpEnd {
    /// The server closed the subscription.
    StreamEnded,
    /// Nobody is reading the subscription any more.
    ReceiverGone,
}

/// Keep one logs subscription alive, feeding decoded events into `tx`.
async fn stream_logs(
    ws_url: String,
    kind: EventKind,
    filter: EventFilter,
    policy: ReconnectPolicy,
    tx: mpsc::Sender<Result<LedgerEvent, LedgerError>>,
) {
    let mut failures = 0u32;

    loop {
        info!(url = %ws_url, %kind, "Connecting to WebSocket");

        match pump_logs(&ws_url, kind, filter, &tx).await {
            Ok(PumpEnd::ReceiverGone) => {
                debug!(%kind, "Subscription dropped by consumer");
                return;
            }
            Ok(PumpEnd::StreamEnded) => {
                failures = 0;
                warn!(%kind, "WebSocket stream ended, reconnecting");
            }
            Err(e) => {
                failures += 1;
                error!(%kind, attempt = failures, error = %e, "Subscription failed");
                if failures >= policy.max_attempts {
                    let fatal = LedgerError::Fatal(format!(
                        "{kind} subscription failed {failures} consecutive times: {e}"
                    ));
                    let _ = tx.send(Err(fatal)).await;
                    return;
                }
            }
        }

        info!(delay = ?policy.delay, %kind, "Reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(policy.delay) => {}
            _ = tx.closed() => return,
        }
    }
}

/// Connect, subscribe, and forward events until the stream or the consumer
/// goes away.
async fn pump_logs(
    ws_url: &str,
    kind: EventKind,
    filter: EventFilter,
    tx: &mpsc::Sender<Result<LedgerEvent, LedgerError>>,
) -> Result<PumpEnd, LedgerError> {
    let pubsub = PubsubClient::new(ws_url)
        .await
        .map_err(|e| LedgerError::Connectivity(format!("failed to connect to WebSocket: {e}")))?;

    let logs_filter = RpcTransactionLogsFilter::Mentions(vec![filter.program_id.to_string()]);
    let logs_config = RpcTransactionLogsConfig {
        commitment: Some(CommitmentConfig::confirmed()),
    };

    let (mut stream, _unsub) = pubsub
        .logs_subscribe(logs_filter, logs_config)
        .await
        .map_err(|e| LedgerError::Connectivity(format!("failed to subscribe to logs: {e}")))?;

    info!(%kind, program = %filter.program_id, layout = %filter.layout, "Subscribed to program logs");

    loop {
        let response = tokio::select! {
            next = stream.next() => match next {
                Some(response) => response,
                None => return Ok(PumpEnd::StreamEnded),
            },
            _ = tx.closed() => return Ok(PumpEnd::ReceiverGone),
        };

        if response.value.err.is_some() {
            debug!(signature = %response.value.signature, "Skipping logs of failed transaction");
            continue;
        }

        let slot = response.context.slot;
        for event in decode_log_lines(&response.value.logs, filter.layout, kind, slot) {
            if tx.send(Ok(event)).await.is_err() {
                return Ok(PumpEnd::ReceiverGone);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLayout;

    fn filter() -> EventFilter {
        EventFilter {
            program_id: Pubkey::new_unique(),
            layout: EventLayout::Simple,
        }
    }

    /// Nothing listens on port 1, so every connect attempt is refused.
    const UNREACHABLE_WS: &str = "ws://127.0.0.1:1";

    #[tokio::test]
    async fn exhausted_reconnects_end_stream_with_fatal() {
        let (tx, mut rx) = mpsc::channel(8);
        let policy = ReconnectPolicy {
            delay: Duration::from_millis(10),
            max_attempts: 3,
        };

        tokio::spawn(stream_logs(
            UNREACHABLE_WS.to_string(),
            EventKind::RequestRaised,
            filter(),
            policy,
            tx,
        ));

        let first = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap();
        match first {
            Some(Err(LedgerError::Fatal(msg))) => {
                assert!(msg.contains("3 consecutive times"), "unexpected message: {msg}");
            }
            other => panic!("expected a fatal error, got {other:?}"),
        }

        let next = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn stops_reconnecting_once_consumer_is_gone() {
        let (tx, rx) = mpsc::channel(8);
        let policy = ReconnectPolicy {
            delay: Duration::from_secs(3600),
            max_attempts: u32::MAX,
        };

        let task = tokio::spawn(stream_logs(
            UNREACHABLE_WS.to_string(),
            EventKind::RequestCompleted,
            filter(),
            policy,
            tx,
        ));
        drop(rx);

        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn landed_transaction_succeeds() {
        let outcome = confirmation_outcome::<String>(Some(Ok(())), None, 100);
        assert_eq!(outcome, Some(TxOutcome::Success));
    }

    #[test]
    fn failed_transaction_reverts_with_reason() {
        let outcome = confirmation_outcome(Some(Err("custom program error: 0x1771")), None, 100);
        assert_eq!(
            outcome,
            Some(TxOutcome::Reverted("custom program error: 0x1771".into()))
        );
    }

    #[test]
    fn unknown_status_keeps_polling_while_blockhash_valid() {
        assert_eq!(confirmation_outcome::<String>(None, Some(100), 100), None);
        assert_eq!(confirmation_outcome::<String>(None, None, 100), None);
    }

    #[test]
    fn unknown_status_past_last_valid_height_is_expired() {
        let outcome = confirmation_outcome::<String>(None, Some(101), 100);
        match outcome {
            Some(TxOutcome::Reverted(reason)) => assert!(reason.contains("blockhash expired")),
            other => panic!("expected expiry, got {other:?}"),
        }
    }
}

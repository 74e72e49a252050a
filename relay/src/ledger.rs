//! Ledger client seam.
//!
//! Everything the relay needs from the ledger: a self-healing event
//! subscription, a fire-and-return fulfillment broadcast, and a confirmation
//! wait. The production implementation lives in [`crate::solana_ledger`];
//! tests drive the orchestrator through an in-memory mock.

use alloy_primitives::U256;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;

use crate::error::LedgerError;
use crate::events::{EventKind, EventLayout, LedgerEvent};
use crate::randomness::RandomWords;

/// Decoded events of one kind. A terminal `Err` is always fatal and is the
/// last item of the stream.
pub type EventStream = BoxStream<'static, Result<LedgerEvent, LedgerError>>;

/// Which program's logs to watch and how to decode them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
    pub program_id: Pubkey,
    pub layout: EventLayout,
}

/// A broadcast, not yet confirmed, transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHandle {
    pub signature: Signature,
    /// Block height after which the transaction's blockhash expires.
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Success,
    Reverted(String),
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Open a persistent subscription.
    ///
    /// Dropped connections are re-established inside the client; events seen
    /// around a reconnect may be delivered twice.
    async fn subscribe(&self, kind: EventKind, filter: EventFilter) -> Result<EventStream, LedgerError>;

    /// Sign and broadcast the coordinator's fulfillment call. Returns as soon
    /// as the node accepted the transaction.
    async fn submit_fulfillment(
        &self,
        request_id: U256,
        random_words: RandomWords,
    ) -> Result<TxHandle, LedgerError>;

    /// Wait until `tx` is executed. Unbounded; wrap in a timeout.
    async fn await_confirmation(&self, tx: &TxHandle) -> Result<TxOutcome, LedgerError>;
}

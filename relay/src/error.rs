//! Error taxonomy for the relay.
//!
//! Connectivity failures are absorbed by the ledger client and subscriber;
//! everything else is either terminal for one request or fatal for the process.

use thiserror::Error;

/// Failures surfaced by a [`crate::ledger::LedgerClient`].
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Transport-level failure (socket closed, RPC timeout). Recoverable.
    #[error("connectivity error: {0}")]
    Connectivity(String),
    /// The signing credential could not produce a transaction.
    #[error("signing failed: {0}")]
    Signing(String),
    /// The node refused the transaction (preflight failure, duplicate, stale blockhash).
    #[error("broadcast rejected: {0}")]
    Rejected(String),
    /// Unrecoverable: reconnect policy exhausted or endpoint unusable.
    #[error("fatal ledger error: {0}")]
    Fatal(String),
}

impl LedgerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::Fatal(_))
    }
}

/// The OS entropy source failed to produce bytes.
#[derive(Debug, Error)]
#[error("entropy source unavailable: {0}")]
pub struct RandomnessError(#[from] pub rand::Error);

/// Process-level failures that stop the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Randomness(#[from] RandomnessError),
    #[error("request task panicked: {0}")]
    TaskPanicked(String),
}

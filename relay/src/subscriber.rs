//! Event subscriber: bridges one ledger subscription into the orchestrator's
//! channel.
//!
//! Events are forwarded unfiltered; deduplication belongs to the tracker. If
//! the subscription cannot be opened or its stream ends, it is re-opened after
//! `reconnect_delay`. Only a fatal ledger error escapes.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::error::{LedgerError, RelayError};
use crate::events::{EventKind, LedgerEvent};
use crate::ledger::{EventFilter, LedgerClient};
use crate::shutdown;

enum SessionEnd {
    Shutdown,
    /// The orchestrator stopped reading.
    ReceiverGone,
    /// The stream ended or could not be opened; worth another try.
    Dropped(Option<LedgerError>),
    Fatal(LedgerError),
}

/// Keep a `kind` subscription alive until shutdown.
pub async fn run_subscription(
    ledger: Arc<dyn LedgerClient>,
    kind: EventKind,
    filter: EventFilter,
    reconnect_delay: Duration,
    events: mpsc::Sender<LedgerEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), RelayError> {
    let mut reconnects: u64 = 0;

    loop {
        match session(ledger.as_ref(), kind, filter, &events, &mut shutdown).await {
            SessionEnd::Shutdown | SessionEnd::ReceiverGone => {
                info!(%kind, "Subscriber stopped");
                return Ok(());
            }
            SessionEnd::Fatal(e) => {
                error!(%kind, error = %e, "Subscription failed permanently");
                return Err(e.into());
            }
            SessionEnd::Dropped(Some(e)) => warn!(%kind, error = %e, "Subscription dropped"),
            SessionEnd::Dropped(None) => warn!(%kind, "Subscription stream ended"),
        }

        reconnects += 1;
        info!(%kind, attempt = reconnects, delay = ?reconnect_delay, "Re-opening subscription");
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = shutdown::stopped(&mut shutdown) => return Ok(()),
        }
    }
}

async fn session(
    ledger: &dyn LedgerClient,
    kind: EventKind,
    filter: EventFilter,
    events: &mpsc::Sender<LedgerEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let opened = tokio::select! {
        _ = shutdown::stopped(shutdown) => return SessionEnd::Shutdown,
        opened = ledger.subscribe(kind, filter) => opened,
    };

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) if e.is_fatal() => return SessionEnd::Fatal(e),
        Err(e) => return SessionEnd::Dropped(Some(e)),
    };
    info!(%kind, program = %filter.program_id, "Subscription open");

    loop {
        let item = tokio::select! {
            _ = shutdown::stopped(shutdown) => return SessionEnd::Shutdown,
            item = stream.next() => item,
        };

        match item {
            Some(Ok(event)) => {
                if events.send(event).await.is_err() {
                    return SessionEnd::ReceiverGone;
                }
            }
            Some(Err(e)) if e.is_fatal() => return SessionEnd::Fatal(e),
            Some(Err(e)) => return SessionEnd::Dropped(Some(e)),
            None => return SessionEnd::Dropped(None),
        }
    }
}

//! Request/completion events emitted by the target program and their
//! Anchor wire encoding.
//!
//! Anchor emits events as base64-encoded `Program data:` log entries: an 8-byte
//! discriminator `sha256("event:<Name>")[..8]` followed by the Borsh body.
//! `u256` fields are carried as 32 little-endian bytes.
//!
//! Deployed programs disagree on the event shape, so the layout is selected at
//! startup through [`EventLayout`] rather than hard-coded.

use alloy_primitives::U256;
use base64::Engine;
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// A randomness request raised by the target program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEvent {
    pub request_id: U256,
    /// Token (or other entity) the request is for, when the layout carries one.
    pub subject_id: Option<U256>,
    pub requester: Pubkey,
    pub observed_at_slot: u64,
}

/// Emitted once the target program consumed the randomness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    pub request_id: U256,
    pub subject_id: Option<U256>,
    pub requester: Pubkey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Request(RequestEvent),
    Completion(CompletionEvent),
}

/// The two event kinds the relay subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RequestRaised,
    RequestCompleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::RequestRaised => f.write_str("request-raised"),
            EventKind::RequestCompleted => f.write_str("request-completed"),
        }
    }
}

/// Field layout of the deployed target program's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLayout {
    /// `NftRequested(request_id, token_id, word1, word2, minter)` /
    /// `NftMinted(request_id, token_id, minter)`.
    Marketplace,
    /// `RandomnessRequested(request_id, minter)` /
    /// `RandomnessFulfilled(request_id, minter)`.
    Simple,
}

impl FromStr for EventLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "marketplace" => Ok(EventLayout::Marketplace),
            "simple" => Ok(EventLayout::Simple),
            other => Err(format!(
                "unknown event layout `{other}` (expected `marketplace` or `simple`)"
            )),
        }
    }
}

impl fmt::Display for EventLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventLayout::Marketplace => f.write_str("marketplace"),
            EventLayout::Simple => f.write_str("simple"),
        }
    }
}

impl EventLayout {
    /// Anchor event name for `kind` under this layout.
    pub fn event_name(self, kind: EventKind) -> &'static str {
        match (self, kind) {
            (EventLayout::Marketplace, EventKind::RequestRaised) => "NftRequested",
            (EventLayout::Marketplace, EventKind::RequestCompleted) => "NftMinted",
            (EventLayout::Simple, EventKind::RequestRaised) => "RandomnessRequested",
            (EventLayout::Simple, EventKind::RequestCompleted) => "RandomnessFulfilled",
        }
    }

    /// Decode an event body (discriminator already stripped).
    ///
    /// Trailing bytes are tolerated so programs may append fields.
    pub fn decode(self, kind: EventKind, body: &[u8], slot: u64) -> Option<LedgerEvent> {
        let mut r = BorshReader::new(body);
        match (self, kind) {
            (EventLayout::Marketplace, EventKind::RequestRaised) => {
                let request_id = r.u256()?;
                let token_id = r.u256()?;
                // word1/word2 are the program's placeholders for the answer; unused here.
                r.u256()?;
                r.u256()?;
                let requester = r.pubkey()?;
                Some(LedgerEvent::Request(RequestEvent {
                    request_id,
                    subject_id: Some(token_id),
                    requester,
                    observed_at_slot: slot,
                }))
            }
            (EventLayout::Simple, EventKind::RequestRaised) => {
                let request_id = r.u256()?;
                let requester = r.pubkey()?;
                Some(LedgerEvent::Request(RequestEvent {
                    request_id,
                    subject_id: None,
                    requester,
                    observed_at_slot: slot,
                }))
            }
            (EventLayout::Marketplace, EventKind::RequestCompleted) => {
                let request_id = r.u256()?;
                let token_id = r.u256()?;
                let requester = r.pubkey()?;
                Some(LedgerEvent::Completion(CompletionEvent {
                    request_id,
                    subject_id: Some(token_id),
                    requester,
                }))
            }
            (EventLayout::Simple, EventKind::RequestCompleted) => {
                let request_id = r.u256()?;
                let requester = r.pubkey()?;
                Some(LedgerEvent::Completion(CompletionEvent {
                    request_id,
                    subject_id: None,
                    requester,
                }))
            }
        }
    }
}

/// Compute the Anchor event discriminator: `sha256("event:<Name>")[..8]`.
pub fn event_discriminator(event_name: &str) -> [u8; 8] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(format!("event:{event_name}"));
    let hash = hasher.finalize();
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&hash[..8]);
    disc
}

/// Scan transaction log lines for `Program data:` entries carrying a `kind`
/// event under `layout`.
pub fn decode_log_lines(
    logs: &[String],
    layout: EventLayout,
    kind: EventKind,
    slot: u64,
) -> Vec<LedgerEvent> {
    let discriminator = event_discriminator(layout.event_name(kind));
    let mut events = Vec::new();

    for log_line in logs {
        let Some(data_str) = log_line.strip_prefix("Program data: ") else {
            continue;
        };

        let decoded = match base64::engine::general_purpose::STANDARD.decode(data_str.trim()) {
            Ok(d) => d,
            Err(e) => {
                debug!(error = %e, "Failed to decode base64 log data");
                continue;
            }
        };

        if decoded.len() < 8 || decoded[..8] != discriminator {
            continue;
        }

        match layout.decode(kind, &decoded[8..], slot) {
            Some(event) => events.push(event),
            None => warn!(
                %layout,
                event = layout.event_name(kind),
                len = decoded.len(),
                "Event payload too short for configured layout"
            ),
        }
    }

    events
}

/// Sequential reader over a Borsh-encoded body.
struct BorshReader<'a> {
    data: &'a [u8],
}

impl<'a> BorshReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        if self.data.len() < N {
            return None;
        }
        let (head, rest) = self.data.split_at(N);
        self.data = rest;
        head.try_into().ok()
    }

    fn u256(&mut self) -> Option<U256> {
        self.take::<32>().map(U256::from_le_bytes)
    }

    fn pubkey(&mut self) -> Option<Pubkey> {
        self.take::<32>().map(Pubkey::new_from_array)
    }
}

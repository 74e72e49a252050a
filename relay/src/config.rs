//! Application configuration loaded from environment variables.
//!
//! Required: `COORDINATOR_PROGRAM_ID`, `TARGET_PROGRAM_ID`
//! Optional: `RPC_URL`, `WS_URL`, `AUTHORITY_KEYPAIR_PATH`, `EVENT_LAYOUT`,
//!           `CLUSTER`, `HTTP_PORT`, `CONFIRMATION_TIMEOUT_MS`,
//!           `SHUTDOWN_GRACE_MS`, `RECONNECT_DELAY_MS`,
//!           `MAX_RECONNECT_ATTEMPTS`, `MAX_RETRIES`, `INITIAL_RETRY_DELAY_MS`,
//!           `PRIORITY_FEE_MICRO_LAMPORTS`, `EVENT_CHANNEL_CAPACITY`

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, read_keypair_file};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::events::EventLayout;

/// Application configuration for the randomness relay.
#[derive(Clone)]
pub struct AppConfig {
    /// Solana JSON-RPC endpoint (HTTP).
    pub rpc_url: String,
    /// Solana PubSub endpoint (WebSocket) for log subscriptions.
    pub ws_url: String,
    /// Keypair that signs and pays for fulfillment transactions.
    pub authority_keypair: Arc<Keypair>,
    /// The mock randomness coordinator program.
    pub coordinator_program_id: Pubkey,
    /// The program raising requests; also the fulfillment's consumer.
    pub target_program_id: Pubkey,
    /// Event field layout of the deployed target program.
    pub event_layout: EventLayout,
    /// Cluster name for explorer URLs.
    pub cluster: String,
    /// HTTP server port.
    pub http_port: u16,
    /// Upper bound on waiting for a fulfillment to confirm.
    pub confirmation_timeout: Duration,
    /// How long in-flight requests may run after a shutdown signal.
    pub shutdown_grace: Duration,
    /// Delay between WebSocket reconnect attempts.
    pub reconnect_delay: Duration,
    /// Consecutive failed connection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Maximum attempts at fetching a recent blockhash per submission.
    pub max_retries: u32,
    /// Initial retry delay in milliseconds.
    pub initial_retry_delay_ms: u64,
    /// Priority fee in micro-lamports per compute unit.
    pub priority_fee_micro_lamports: u64,
    /// Buffer between the subscribers and the orchestrator.
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let rpc_url = std::env::var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8899".into());
        let ws_url = std::env::var("WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:8900".into());

        let keypair_path = std::env::var("AUTHORITY_KEYPAIR_PATH")
            .unwrap_or_else(|_| "~/.config/solana/id.json".into());
        let keypair_path = shellexpand::tilde(&keypair_path).to_string();
        let authority_keypair = read_keypair_file(&keypair_path)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("failed to read keypair from {keypair_path}"))?;

        let coordinator_program_id = required_pubkey("COORDINATOR_PROGRAM_ID")?;
        let target_program_id = required_pubkey("TARGET_PROGRAM_ID")?;

        let event_layout = match std::env::var("EVENT_LAYOUT") {
            Ok(v) => v.parse::<EventLayout>().map_err(anyhow::Error::msg)?,
            Err(_) => EventLayout::Marketplace,
        };

        let cluster = std::env::var("CLUSTER").unwrap_or_else(|_| "localnet".into());

        Ok(Self {
            rpc_url,
            ws_url,
            authority_keypair: Arc::new(authority_keypair),
            coordinator_program_id,
            target_program_id,
            event_layout,
            cluster,
            http_port: parsed_or("HTTP_PORT", 8080),
            confirmation_timeout: Duration::from_millis(parsed_or("CONFIRMATION_TIMEOUT_MS", 30_000)),
            shutdown_grace: Duration::from_millis(parsed_or("SHUTDOWN_GRACE_MS", 10_000)),
            reconnect_delay: Duration::from_millis(parsed_or("RECONNECT_DELAY_MS", 5_000)),
            max_reconnect_attempts: parsed_or("MAX_RECONNECT_ATTEMPTS", 10u32).max(1),
            max_retries: parsed_or("MAX_RETRIES", 5u32).max(1),
            initial_retry_delay_ms: parsed_or("INITIAL_RETRY_DELAY_MS", 500),
            priority_fee_micro_lamports: parsed_or("PRIORITY_FEE_MICRO_LAMPORTS", 0),
            event_channel_capacity: parsed_or("EVENT_CHANNEL_CAPACITY", 256usize).max(1),
        })
    }
}

fn required_pubkey(var: &str) -> Result<Pubkey> {
    let value = std::env::var(var).with_context(|| format!("{var} env var must be set"))?;
    Pubkey::from_str(&value).with_context(|| format!("invalid {var}: {value}"))
}

fn parsed_or<T: FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Return the Solscan explorer URL for a given transaction signature.
pub fn explorer_url(cluster: &str, signature: &str) -> String {
    match cluster {
        "mainnet-beta" => format!("https://solscan.io/tx/{signature}"),
        "localnet" => format!(
            "https://solscan.io/tx/{signature}?cluster=custom&customUrl=http%3A%2F%2F127.0.0.1%3A8899"
        ),
        cluster => format!("https://solscan.io/tx/{signature}?cluster={cluster}"),
    }
}

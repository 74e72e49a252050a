//! Randomness Relay
//!
//! Off-chain process that watches the NFT program for randomness requests and
//! answers each one with a fulfillment transaction through the mock
//! coordinator, so pending mints complete on a local or test cluster. Runs
//! three concurrent subsystems:
//!
//! - **Subscribers**: WebSocket log subscriptions for request and completion events.
//! - **Orchestrator**: claims each request, draws randomness, submits and confirms.
//! - **HTTP server**: Liveness (`/health`) and readiness (`/status`) probes,
//!   plus per-request lifecycle at `/requests/{id}`.

use actix_web::{App, HttpResponse, HttpServer, web};
use alloy_primitives::U256;
use anyhow::Context;
use solana_sdk::signature::Signer;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

mod config;
mod consumer_accounts;
mod error;
mod events;
mod instructions;
mod ledger;
mod metrics;
mod orchestrator;
mod randomness;
mod shutdown;
mod solana_ledger;
mod subscriber;
mod tracker;

#[cfg(test)]
mod testing;

use config::AppConfig;
use events::EventKind;
use ledger::{EventFilter, LedgerClient};
use metrics::Metrics;
use orchestrator::Orchestrator;
use randomness::OsRandomness;
use solana_ledger::SolanaLedger;
use tracker::CorrelationTracker;

/// Shared application state accessible from HTTP handlers.
struct AppState {
    tracker: Arc<CorrelationTracker>,
    metrics: Arc<Metrics>,
}

/// Liveness probe. Returns 200 if the process is running.
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

/// Readiness / status probe. Reports in-flight work and per-status totals.
async fn status(data: web::Data<AppState>) -> HttpResponse {
    let metrics = data.metrics.to_json();
    HttpResponse::Ok().json(serde_json::json!({
        "status": "running",
        "pending_fulfillments": metrics["in_flight"],
        "requests": data.tracker.counts(),
        "metrics": metrics,
    }))
}

/// Lifecycle of a single request: `/requests/{id}` with a decimal or `0x` id.
async fn request_status(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let Ok(request_id) = path.parse::<U256>() else {
        return HttpResponse::BadRequest().json(serde_json::json!({"error": "invalid request id"}));
    };
    match data.tracker.record(request_id) {
        Some(record) => HttpResponse::Ok().json(record.to_json()),
        None => HttpResponse::NotFound().json(serde_json::json!({"error": "unknown request id"})),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,solana_client=warn,solana_rpc_client=warn,hyper=warn,reqwest=warn")),
        )
        .with_target(true)
        .with_ansi(true)
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    info!(
        coordinator = %config.coordinator_program_id,
        target = %config.target_program_id,
        layout = %config.event_layout,
        authority = %config.authority_keypair.pubkey(),
        "Starting randomness relay"
    );
    info!(rpc = %config.rpc_url, ws = %config.ws_url, "Endpoints configured");

    let ledger: Arc<dyn LedgerClient> = Arc::new(SolanaLedger::new(&config));
    let tracker = Arc::new(CorrelationTracker::new());
    let metrics = Arc::new(Metrics::new());
    let orchestrator = Arc::new(Orchestrator::new(
        ledger.clone(),
        tracker.clone(),
        Arc::new(OsRandomness),
        metrics.clone(),
        config.confirmation_timeout,
        config.cluster.clone(),
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity);
    let filter = EventFilter {
        program_id: config.target_program_id,
        layout: config.event_layout,
    };

    // Background: one subscription per event kind, feeding the orchestrator.
    let mut subscribers = JoinSet::new();
    for kind in [EventKind::RequestRaised, EventKind::RequestCompleted] {
        subscribers.spawn(subscriber::run_subscription(
            ledger.clone(),
            kind,
            filter,
            config.reconnect_delay,
            events_tx.clone(),
            stop_rx.clone(),
        ));
    }
    drop(events_tx);

    // Background: claim requests and submit fulfillment transactions.
    let mut relay = tokio::spawn(orchestrator.run(events_rx, stop_rx, config.shutdown_grace));

    let state = web::Data::new(AppState {
        tracker: tracker.clone(),
        metrics: metrics.clone(),
    });

    info!(port = config.http_port, "Starting HTTP server");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(health))
            .route("/status", web::get().to(status))
            .route("/requests/{id}", web::get().to(request_status))
    })
    .bind(("0.0.0.0", config.http_port))?
    .disable_signals()
    .run();
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    let mut relay_result = None;
    let trigger: anyhow::Result<()> = tokio::select! {
        result = shutdown::signal() => result.context("cannot listen for shutdown signals"),
        Some(joined) = subscribers.join_next() => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(anyhow::anyhow!("subscriber task failed: {e}")),
        },
        joined = &mut relay => {
            relay_result = Some(joined);
            Ok(())
        }
    };

    info!("Shutting down");
    let _ = stop_tx.send(true);
    let relay_result = match relay_result {
        Some(joined) => joined,
        None => relay.await,
    };
    subscribers.shutdown().await;
    server_handle.stop(true).await;
    let _ = server_task.await;

    if let Err(e) = &trigger {
        error!(error = %e, "Relay stopped on fatal error");
    }
    trigger?;
    relay_result.context("relay task failed")??;

    info!(counts = ?tracker.counts(), "Relay stopped");
    Ok(())
}

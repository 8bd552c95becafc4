// =============================================================================
// Helios Deriv Nexus — Main Entry Point
// =============================================================================
//
// Wiring: one broker session owns the WebSocket, one engine worker owns all
// trading state, one screener scheduler reads snapshots, and the API server
// exposes the command + push contracts. Every loop observes the same stop
// signal and unwinds on Ctrl+C.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod broker;
mod config;
mod engine;
mod indicators;
mod market_data;
mod screener;
mod strategy;
mod types;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::broker::broker_session;
use crate::config::BotConfig;
use crate::engine::{run_engine, EngineCommand, EngineEvent};
use crate::screener::{run_screener, TaFeed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("HELIOS_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let config = BotConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        BotConfig::default()
    });

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║          Helios Deriv Nexus — Starting Up               ║");
    info!("╚══════════════════════════════════════════════════════════╝");
    info!(
        symbols = ?config.symbols,
        strategy = %config.active_strategy,
        demo = config.is_demo,
        "Configured trading universe"
    );

    // ── 2. Channels & shared state ───────────────────────────────────────
    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<EngineCommand>();
    let (events_tx, events_rx) = mpsc::unbounded_channel::<EngineEvent>();
    let (stop_tx, stop_rx) = watch::channel(false);

    let state = Arc::new(AppState::new(config, &config_path, command_tx));

    // ── 3. Broker session (single socket owner) ──────────────────────────
    let (session, broker_handle) = broker_session();
    {
        let config = state.config.clone();
        let events = events_tx.clone();
        let stop = stop_rx.clone();
        let (broker_events_tx, mut broker_events_rx) = mpsc::unbounded_channel();
        tokio::spawn(session.run(config, broker_events_tx, stop));

        // Funnel broker events into the engine's single ordered stream.
        tokio::spawn(async move {
            while let Some(ev) = broker_events_rx.recv().await {
                if events.send(EngineEvent::Broker(ev)).is_err() {
                    break;
                }
            }
        });
    }

    // Funnel operator commands into the same stream.
    {
        let events = events_tx.clone();
        tokio::spawn(async move {
            while let Some(cmd) = command_rx.recv().await {
                if events.send(EngineEvent::Command(cmd)).is_err() {
                    break;
                }
            }
        });
    }

    // ── 4. Engine worker ─────────────────────────────────────────────────
    let mut engine_task = tokio::spawn(run_engine(
        state.clone(),
        broker_handle.clone(),
        events_rx,
        stop_rx.clone(),
    ));

    // ── 5. Screener scheduler ────────────────────────────────────────────
    let feed = TaFeed::new(broker_handle.clone());
    tokio::spawn(run_screener(state.clone(), feed, stop_rx.clone()));

    // ── 6. API server ────────────────────────────────────────────────────
    let bind_addr =
        std::env::var("HELIOS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    {
        let api_state = state.clone();
        let addr = bind_addr.clone();
        tokio::spawn(async move {
            let app = api::rest::router(api_state);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .expect("Failed to bind API server");
            info!(addr = %addr, "API server listening");
            axum::serve(listener, app).await.expect("API server failed");
        });
    }

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    // Either Ctrl+C or an operator `stop_bot` (which ends the engine worker)
    // brings the whole process down.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("Shutdown signal received — stopping gracefully");
            let _ = events_tx.send(EngineEvent::Command(EngineCommand::Shutdown));
        }
        result = &mut engine_task => {
            warn!("Engine worker exited — shutting down");
            if let Err(e) = result {
                error!(error = %e, "engine worker join failed");
            }
        }
    }

    let _ = stop_tx.send(true);

    // The engine flushes a final account_update before returning.
    if !engine_task.is_finished() {
        if let Err(e) = engine_task.await {
            error!(error = %e, "engine worker join failed");
        }
    }

    if let Err(e) = state.config.read().save(&state.config_path) {
        error!(error = %e, "Failed to save config on shutdown");
    }

    info!("Helios Deriv Nexus shut down complete.");
    Ok(())
}

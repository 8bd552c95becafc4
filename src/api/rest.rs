// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Thin operator surface over the engine's command channel:
//   GET  /api/health     liveness probe
//   GET  /api/config     active configuration
//   POST /api/config     persist + hot-apply a configuration
//   GET  /api/status     status, account summary, trades, scorecards
//   POST /api/command    operator commands (start/stop/close/cancel/...)
//
// CORS is configured permissively for development; tighten allowed origins
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::config::BotConfig;
use crate::engine::EngineCommand;

/// Build the full REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/config", get(get_config))
        .route("/api/config", post(update_config))
        .route("/api/status", get(status))
        .route("/api/command", post(command))
        .route("/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.config.read().clone();
    Json(config)
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    // Re-parse through the typed whitelist: unknown keys are dropped here.
    let config: BotConfig = match serde_json::from_value(body) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "config update rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "message": format!("invalid config: {e}") })),
            );
        }
    };

    if let Err(e) = config.save(&state.config_path) {
        warn!(error = %e, "config persist failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "message": format!("{e}") })),
        );
    }

    let _ = state.commands.send(EngineCommand::ApplyConfig(config));
    (
        StatusCode::OK,
        Json(json!({ "success": true, "message": "Configuration updated successfully" })),
    )
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let account = state.account.read().clone();
    let trades = state.open_trades.read().clone();
    let screener = state.screener.read().clone();
    Json(json!({
        "status": state.current_status(),
        "running": state.current_status().is_trading(),
        "account": account,
        "trades": trades,
        "screener": screener,
    }))
}

#[derive(Deserialize)]
struct CommandRequest {
    command: String,
    #[serde(default)]
    contract_id: Option<i64>,
}

async fn command(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CommandRequest>,
) -> impl IntoResponse {
    let cmd = match req.command.as_str() {
        "start" | "start_bot" => EngineCommand::Start,
        "stop" => EngineCommand::Pause,
        "stop_bot" => EngineCommand::Shutdown,
        "clear_console" => EngineCommand::ClearConsole,
        // emergency_sl is an alias of the batch cancel.
        "batch_cancel_orders" | "emergency_sl" => EngineCommand::BatchCancel,
        "close_trade" => match req.contract_id {
            Some(id) => EngineCommand::CloseTrade(id),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "success": false, "message": "contract_id required" })),
                )
            }
        },
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "message": format!("unknown command: {other}") })),
            )
        }
    };

    info!(command = %req.command, "operator command accepted");
    let _ = state.commands.send(cmd);
    (
        StatusCode::OK,
        Json(json!({ "success": true, "message": "Command accepted" })),
    )
}

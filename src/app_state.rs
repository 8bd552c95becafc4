// =============================================================================
// Central Application State — Helios Trading Engine
// =============================================================================
//
// The single source of truth shared between the engine worker, the screener
// scheduler and the API surface. The engine worker is the only writer of the
// market views, account summary, trade list and status mirror; screener
// workers write exactly one scorecard slot each; everything else reads.
//
// Thread safety:
//   - parking_lot::RwLock for all mutable shared collections.
//   - tokio broadcast for fire-and-forget push-socket emission.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::config::BotConfig;
use crate::engine::EngineCommand;
use crate::market_data::MarketView;
use crate::screener::scorecard::ScreenerScorecard;
use crate::types::EngineStatus;

/// Maximum console lines retained for replay.
const MAX_CONSOLE_LINES: usize = 500;
/// Push channel depth; slow dashboard clients drop old frames.
const PUSH_DEPTH: usize = 256;

// =============================================================================
// Push emitter
// =============================================================================

/// One named event on the push socket.
#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub event: String,
    pub data: Value,
}

/// Fire-and-forget push-socket emitter. Cloneable into any task; delivery is
/// handled by the WebSocket connections subscribed to the broadcast.
#[derive(Clone)]
pub struct Emitter {
    tx: broadcast::Sender<PushMessage>,
}

impl Emitter {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(PUSH_DEPTH);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushMessage> {
        self.tx.subscribe()
    }

    /// Emit a named event. Sending without any connected dashboard is fine.
    pub fn emit(&self, event: &str, data: Value) {
        let _ = self.tx.send(PushMessage {
            event: event.to_string(),
            data,
        });
    }

    pub fn success(&self, message: &str) {
        self.emit("success", json!({ "message": message }));
    }

    pub fn error(&self, message: &str) {
        self.emit("error", json!({ "message": message }));
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Dashboard views
// =============================================================================

/// One console line, replayed to dashboard clients on connect.
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleLine {
    pub timestamp: String,
    pub message: String,
    pub level: String,
}

/// Aggregated account payload for `account_update`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountSummary {
    pub running: bool,
    pub is_demo: bool,
    pub active_strategy: String,
    pub total_balance: f64,
    pub available_balance: f64,
    pub total_capital: f64,
    pub net_profit: f64,
    pub net_trade_profit: f64,
    pub total_trade_profit: f64,
    pub total_trade_loss: f64,
    pub used_amount: f64,
    pub total_trades: u32,
    pub win_rate: f64,
    pub avg_pnl: f64,
    pub daily_pnl_pct: f64,
}

/// One open trade row for `trades_update`.
#[derive(Debug, Clone, Serialize)]
pub struct OpenTradeView {
    pub id: i64,
    #[serde(rename = "type")]
    pub trade_type: String,
    pub symbol: String,
    pub entry_spot_price: Option<f64>,
    pub stake: f64,
    pub pnl: f64,
    pub expiry_time: Option<i64>,
    pub status: String,
    pub is_freeride: bool,
}

// =============================================================================
// AppState
// =============================================================================

/// Shared state behind `Arc<AppState>`.
pub struct AppState {
    pub config: Arc<RwLock<BotConfig>>,
    pub config_path: std::path::PathBuf,
    pub emitter: Emitter,

    pub console: RwLock<VecDeque<ConsoleLine>>,
    pub screener: RwLock<HashMap<String, ScreenerScorecard>>,
    pub market: RwLock<HashMap<String, MarketView>>,

    pub account: RwLock<AccountSummary>,
    pub open_trades: RwLock<Vec<OpenTradeView>>,
    pub status: RwLock<EngineStatus>,

    /// Operator command channel into the engine worker.
    pub commands: mpsc::UnboundedSender<EngineCommand>,
}

impl AppState {
    pub fn new(
        config: BotConfig,
        config_path: impl Into<std::path::PathBuf>,
        commands: mpsc::UnboundedSender<EngineCommand>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            config_path: config_path.into(),
            emitter: Emitter::new(),
            console: RwLock::new(VecDeque::with_capacity(MAX_CONSOLE_LINES)),
            screener: RwLock::new(HashMap::new()),
            market: RwLock::new(HashMap::new()),
            account: RwLock::new(AccountSummary::default()),
            open_trades: RwLock::new(Vec::new()),
            status: RwLock::new(EngineStatus::Stopped),
            commands,
        }
    }

    /// Append an operator-facing console line, mirror it to the push socket
    /// and the structured log.
    pub fn log_console(&self, level: &str, message: impl Into<String>) {
        let message = message.into();
        let line = ConsoleLine {
            timestamp: Utc::now().format("%H:%M:%S").to_string(),
            message: message.clone(),
            level: level.to_string(),
        };

        {
            let mut console = self.console.write();
            if console.len() >= MAX_CONSOLE_LINES {
                console.pop_front();
            }
            console.push_back(line.clone());
        }

        match level {
            "error" => error!("{message}"),
            "warning" => warn!("{message}"),
            _ => info!("{message}"),
        }

        self.emitter.emit(
            "console_log",
            json!({
                "timestamp": line.timestamp,
                "message": line.message,
                "level": line.level,
            }),
        );
    }

    pub fn set_status(&self, status: EngineStatus) {
        *self.status.write() = status;
        self.emitter.emit(
            "bot_status",
            json!({ "running": status.is_trading() }),
        );
    }

    pub fn current_status(&self) -> EngineStatus {
        *self.status.read()
    }

    /// Scorecard snapshot for one symbol.
    pub fn scorecard(&self, symbol: &str) -> Option<ScreenerScorecard> {
        self.screener.read().get(symbol).cloned()
    }

    /// Market view snapshot for one symbol (cheap: candle vectors are Arcs).
    pub fn market_view(&self, symbol: &str) -> Option<MarketView> {
        self.market.read().get(symbol).cloned()
    }
}

// =============================================================================
// Engine Coordinator — the single authoritative mutator of trading state
// =============================================================================
//
// One worker task owns the SymbolState map and the ContractBook. It consumes
// typed events (broker events + operator commands) from one channel, applies
// them in order, and publishes copy-on-read snapshots (market views, account
// summary, trade list) into AppState for the screener and the API surface.
//
// Lifecycle: Stopped -> PassiveMonitoring -> Trading -> PassiveMonitoring ->
// Stopped. Passive monitoring keeps the session authorized and the screener
// running but refuses new entries; a daily risk breach parks the engine there
// until the next UTC rollover.
//
// Ordering guarantees (per symbol): events apply in broker-delivered order;
// an LTF close notification is evaluated strictly before the next tick; at
// most one Open intent per (symbol, ltf_epoch).
// =============================================================================

pub mod contracts;
pub mod execution;
pub mod metrics;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::app_state::{AccountSummary, AppState, OpenTradeView};
use crate::broker::{protocol, BrokerEvent, BrokerHandle};
use crate::config::{BotConfig, ContractKind, EntryType, StrategyId};
use crate::engine::contracts::{ContractBook, EntrySnapshot, MonitorAction, MonitorCtx};
use crate::engine::metrics::{RiskBreach, SessionMetrics};
use crate::indicators::snr::calculate_snr_zones;
use crate::market_data::{MarketView, SymbolState};
use crate::strategy::{self, Intent};
use crate::types::{EngineStatus, Side};

/// Everything the engine worker consumes, in one ordered stream.
#[derive(Debug)]
pub enum EngineEvent {
    Broker(BrokerEvent),
    Command(EngineCommand),
}

/// Operator commands from the API surface.
#[derive(Debug)]
pub enum EngineCommand {
    Start,
    Pause,
    Shutdown,
    ClearConsole,
    BatchCancel,
    CloseTrade(i64),
    ApplyConfig(BotConfig),
}

/// The engine worker's owned state.
pub struct Engine {
    state: Arc<AppState>,
    broker: BrokerHandle,
    symbols: HashMap<String, SymbolState>,
    book: ContractBook,
    metrics: SessionMetrics,
    status: EngineStatus,
    /// Set when the engine parked itself after a risk breach; cleared (and
    /// trading resumed) at the next UTC rollover.
    risk_paused: bool,
    /// Screener context captured at order time, attached on the buy ack.
    pending_snapshots: HashMap<String, EntrySnapshot>,
}

/// Run the engine worker until shutdown.
pub async fn run_engine(
    state: Arc<AppState>,
    broker: BrokerHandle,
    mut events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    mut stop: watch::Receiver<bool>,
) {
    let mut engine = Engine::new(state, broker);
    info!("engine worker started");

    loop {
        let event = tokio::select! {
            ev = events_rx.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
            _ = stop.changed() => break,
        };

        let now = Utc::now().timestamp();
        if !engine.handle_event(event, now) {
            break;
        }
    }

    // Final flush so the dashboard sees the terminal account state.
    engine.publish_account();
    engine.state.set_status(EngineStatus::Stopped);
    info!("engine worker stopped");
}

impl Engine {
    pub fn new(state: Arc<AppState>, broker: BrokerHandle) -> Self {
        Self {
            state,
            broker,
            symbols: HashMap::new(),
            book: ContractBook::new(),
            metrics: SessionMetrics::default(),
            status: EngineStatus::Stopped,
            risk_paused: false,
            pending_snapshots: HashMap::new(),
        }
    }

    /// Apply one event. Returns `false` on shutdown.
    pub fn handle_event(&mut self, event: EngineEvent, now: i64) -> bool {
        match event {
            EngineEvent::Broker(ev) => self.handle_broker(ev, now),
            EngineEvent::Command(cmd) => return self.handle_command(cmd, now),
        }
        true
    }

    // -------------------------------------------------------------------------
    // Broker events
    // -------------------------------------------------------------------------

    fn handle_broker(&mut self, event: BrokerEvent, now: i64) {
        match event {
            BrokerEvent::Authorized { balance } => self.on_authorized(balance, now),
            BrokerEvent::Balance { balance } => {
                self.metrics.on_balance(balance, utc_date(now));
                self.publish_account();
            }
            BrokerEvent::Candles {
                symbol,
                granularity,
                candles,
            } => self.on_candles(&symbol, granularity, candles, now),
            BrokerEvent::Tick {
                symbol,
                epoch,
                quote,
                subscription_id,
            } => self.on_tick(&symbol, epoch, quote, subscription_id),
            BrokerEvent::ContractUpdate(poc) => self.on_contract_update(poc, now),
            BrokerEvent::ContractsFor {
                symbol,
                multipliers,
            } => {
                self.state.emitter.emit(
                    "multipliers_update",
                    json!({ "symbol": symbol, "multipliers": multipliers }),
                );
            }
            BrokerEvent::BuyAck {
                contract_id,
                buy_price,
                symbol,
                contract_type,
                multiplier,
            } => self.on_buy_ack(contract_id, buy_price, &symbol, &contract_type, multiplier),
            BrokerEvent::SellAck { contract_id } => {
                debug!(contract_id, "sell acknowledged");
            }
            BrokerEvent::ApiError { code, message } => self.on_api_error(&code, &message),
            BrokerEvent::Disconnected => {
                self.state
                    .log_console("warning", "Broker connection lost — reconnecting");
            }
        }
    }

    fn on_authorized(&mut self, balance: f64, now: i64) {
        self.state.log_console("info", "Authorization successful");
        self.metrics.on_balance(balance, utc_date(now));

        if self.status == EngineStatus::Stopped {
            self.status = EngineStatus::PassiveMonitoring;
            self.state.set_status(self.status);
        }

        // (Re)subscribe the trading universe. The per-symbol dedup keys live
        // in SymbolState and survive the reconnect, so the first post-connect
        // tick cannot duplicate an entry.
        if self.status.is_trading() {
            let symbols = self.state.config.read().symbols.clone();
            for symbol in symbols {
                self.attach_symbol(&symbol);
            }
        }
        self.publish_account();
    }

    fn on_candles(
        &mut self,
        symbol: &str,
        granularity: u32,
        candles: Vec<crate::market_data::Candle>,
        now: i64,
    ) {
        let cfg = self.state.config.read().clone();
        let profile = cfg.active_strategy.profile();
        let Some(sd) = self.symbols.get_mut(symbol) else {
            debug!(symbol, "candles for unknown symbol dropped");
            return;
        };

        debug!(symbol, granularity, count = candles.len(), "candles received");
        sd.apply_candles(granularity, candles, now, &profile);

        // Recompute SNR zones from the strategy's structure timeframe.
        let snr_source = match cfg.active_strategy {
            StrategyId::S4 => Some(300),
            StrategyId::S5 | StrategyId::S6 => Some(3_600),
            _ => None,
        };
        if snr_source == Some(granularity) {
            let series = sd.candles(granularity);
            sd.snr_zones = calculate_snr_zones(&series, &sd.snr_zones);
        }

        self.refresh_view(symbol);
    }

    fn on_tick(&mut self, symbol: &str, epoch: i64, quote: f64, sub_id: Option<String>) {
        if !quote.is_finite() {
            warn!(symbol, "non-finite tick dropped");
            return;
        }

        // UTC day rollover: re-base the daily balance, reset whipsaw
        // counters, lift a risk pause, refresh daily candles for daily-HTF
        // strategies.
        if self.metrics.maybe_roll_day(utc_date(epoch)) {
            for sd in self.symbols.values_mut() {
                sd.reset_daily_counters();
            }
            if self.risk_paused {
                self.risk_paused = false;
                self.status = EngineStatus::Trading;
                self.state.set_status(self.status);
                self.state
                    .log_console("info", "New UTC day — trading resumed after risk pause");
            }
            let cfg = self.state.config.read().clone();
            if cfg.active_strategy == StrategyId::S1 {
                // Full warm-up depth: a shallow batch would replace the ring
                // and disarm the +2 daily-ATR exit.
                for sym in &cfg.symbols {
                    self.broker.fetch_history(sym, 86_400, 50);
                }
            }
        }

        let cfg = self.state.config.read().clone();
        let profile = cfg.active_strategy.profile();

        let Some(sd) = self.symbols.get_mut(symbol) else {
            warn!(symbol, "tick for unknown symbol dropped");
            return;
        };
        if sub_id.is_some() && sd.subscription_id.is_none() {
            sd.subscription_id = sub_id;
        }

        // Candle assembly. The LTF close notification below is evaluated
        // before any later tick is processed (single ordered event stream).
        let outcome = sd.apply_tick(epoch, quote, &profile);

        // Position monitoring runs on every tick, trading or not.
        self.monitor_symbol(symbol, quote, epoch, &cfg);

        if outcome.ltf_closed {
            self.refresh_view(symbol);
        } else if let Some(view) = self.state.market.write().get_mut(symbol) {
            view.last_tick = Some(quote);
        }

        // Entry evaluation.
        if !self.status.is_trading() {
            return;
        }
        if let Some(breach) = self
            .metrics
            .risk_breach(cfg.max_daily_loss_pct, cfg.max_daily_profit_pct)
        {
            self.trip_risk_gate(breach);
            return;
        }

        let evaluate_close = outcome.ltf_closed && cfg.entry_type == EntryType::CandleClose;
        let evaluate_tick = cfg.entry_type == EntryType::Tick;
        if !evaluate_close && !evaluate_tick {
            return;
        }

        let card = self.state.scorecard(symbol);
        let Some(sd) = self.symbols.get_mut(symbol) else {
            return;
        };
        let intent = strategy::evaluate(sd, &cfg, card.as_ref(), epoch, evaluate_close);
        match intent {
            Intent::Open(side) => self.execute_open(symbol, side, epoch, &cfg),
            Intent::Close(id) => self.close_contract(id, epoch, "strategy close"),
            Intent::None => {}
        }
    }

    fn on_contract_update(&mut self, poc: crate::broker::ContractSnapshot, now: i64) {
        let cfg = self.state.config.read().clone();
        let (settlement, actions) = self.book.apply_update(&poc, now, &cfg);

        for action in actions {
            self.apply_monitor_action(action, now);
        }

        if let Some(s) = settlement {
            self.metrics.on_settlement(s.profit);
            self.state.log_console(
                if s.profit >= 0.0 { "info" } else { "warning" },
                format!(
                    "Trade {} ({}) closed. PnL: {:.2}",
                    s.contract_id, s.symbol, s.profit
                ),
            );

            // Adaptive streak counters feed the screener threshold.
            if let Some(sd) = self.symbols.get_mut(&s.symbol) {
                if s.profit > 0.0 {
                    sd.consecutive_wins += 1;
                    sd.consecutive_losses = 0;
                } else {
                    sd.consecutive_losses += 1;
                    sd.consecutive_wins = 0;
                    if sd.consecutive_losses >= 3 {
                        self.state.log_console(
                            "warning",
                            format!(
                                "{} on a {}-loss streak — screener threshold raised",
                                s.symbol, sd.consecutive_losses
                            ),
                        );
                    }
                }
                self.refresh_view(&s.symbol);
            }
        }

        self.metrics.set_floating(self.book.floating_pnl());
        self.state.emitter.emit(
            "position_update",
            json!({ "open_count": self.book.len() }),
        );
        self.publish_account();
    }

    fn on_buy_ack(
        &mut self,
        contract_id: i64,
        buy_price: f64,
        symbol: &str,
        contract_type: &str,
        multiplier: Option<f64>,
    ) {
        let cfg = self.state.config.read().clone();
        self.state.log_console(
            "info",
            format!("Trade opened: {contract_id} for {buy_price} USD"),
        );

        let last_tick = self.symbols.get(symbol).and_then(|sd| sd.last_tick);
        let snapshot = self.pending_snapshots.remove(symbol);
        self.book.register_buy(
            contract_id,
            symbol,
            contract_type,
            buy_price,
            multiplier,
            last_tick,
            snapshot,
            &cfg,
        );
        self.publish_account();
    }

    fn on_api_error(&mut self, code: &str, message: &str) {
        self.state
            .log_console("error", format!("Broker error: {message}"));
        self.state.emitter.error(message);

        if code == "AuthorizationRequired" {
            // Wait for fresh credentials; the session stays in its reconnect
            // loop and re-authorizes once the config is updated.
            self.status = EngineStatus::Stopped;
            self.state.set_status(self.status);
        }
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    fn handle_command(&mut self, cmd: EngineCommand, now: i64) -> bool {
        match cmd {
            EngineCommand::Start => {
                if self.state.config.read().api_token.is_empty() {
                    self.state.emitter.error("API token missing");
                    return true;
                }
                self.status = EngineStatus::Trading;
                self.state.set_status(self.status);
                self.state.log_console("info", "Bot started | Trading: ON");

                if self.broker.is_connected() {
                    let symbols = self.state.config.read().symbols.clone();
                    for symbol in symbols {
                        self.attach_symbol(&symbol);
                    }
                }
            }
            EngineCommand::Pause => {
                self.status = EngineStatus::PassiveMonitoring;
                self.state.set_status(self.status);
                self.state
                    .log_console("info", "Bot paused — passive monitoring active");

                // Unsubscribe ticks to save resources; balance and contract
                // streams stay up for monitoring.
                for sd in self.symbols.values_mut() {
                    if let Some(id) = sd.subscription_id.take() {
                        self.broker.send(protocol::forget(&id));
                    }
                }
            }
            EngineCommand::Shutdown => {
                self.state.log_console("info", "Bot engine shutting down");
                return false;
            }
            EngineCommand::ClearConsole => {
                self.state.console.write().clear();
                self.state.emitter.success("Console cleared");
            }
            EngineCommand::BatchCancel => {
                self.state.log_console("info", "Cancelling all open trades");
                for id in self.book.ids() {
                    self.close_contract(id, now, "batch cancel");
                }
            }
            EngineCommand::CloseTrade(id) => {
                let intent = if self.book.get(id).is_some() {
                    Intent::Close(id)
                } else {
                    Intent::None
                };
                match intent {
                    Intent::Close(id) => self.close_contract(id, now, "operator close"),
                    _ => self.state.emitter.error("Unknown contract id"),
                }
            }
            EngineCommand::ApplyConfig(new_cfg) => self.apply_config(new_cfg),
        }
        true
    }

    fn apply_config(&mut self, new_cfg: BotConfig) {
        let old = self.state.config.read().clone();
        let delta = old.diff(&new_cfg);
        *self.state.config.write() = new_cfg.clone();

        if delta.is_noop() {
            self.state.emitter.success("Configuration unchanged");
            return;
        }
        self.state.log_console("info", "Config applied live");

        if delta.reauthorize {
            if new_cfg.api_token.is_empty() {
                self.state.emitter.error("API token missing");
                return;
            }
            self.state
                .log_console("info", "Applying new API credentials, reconnecting...");
            self.broker.force_reconnect();
            self.state.emitter.success("Configuration updated");
            return;
        }

        if delta.strategy_changed {
            self.state.log_console(
                "info",
                format!("Strategy changed to {}. Resetting data...", new_cfg.active_strategy),
            );
            self.state.screener.write().clear();
            for symbol in new_cfg.symbols.clone() {
                self.symbols
                    .entry(symbol.clone())
                    .and_modify(SymbolState::reset_series)
                    .or_insert_with(|| SymbolState::new(&symbol));
                self.refresh_view(&symbol);
                self.warm_up_symbol(&symbol);
            }
            self.state.emitter.success("Configuration updated");
            return;
        }

        for symbol in &delta.added_symbols {
            self.state
                .log_console("info", format!("Subscribing to new symbol: {symbol}"));
            self.attach_symbol(symbol);
        }
        for symbol in &delta.removed_symbols {
            self.state
                .log_console("info", format!("Unsubscribing from symbol: {symbol}"));
            if let Some(mut sd) = self.symbols.remove(symbol) {
                if let Some(id) = sd.subscription_id.take() {
                    self.broker.send(protocol::forget(&id));
                }
            }
            self.state.market.write().remove(symbol);
            self.state.screener.write().remove(symbol);
        }
        self.state.emitter.success("Configuration updated");
    }

    // -------------------------------------------------------------------------
    // Subscription management
    // -------------------------------------------------------------------------

    /// Ensure a SymbolState exists, subscribe its ticks, and warm up the
    /// strategy's history set.
    fn attach_symbol(&mut self, symbol: &str) {
        self.symbols
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolState::new(symbol));
        self.broker.send(protocol::subscribe_ticks(symbol));
        self.warm_up_symbol(symbol);
    }

    /// Enqueue the active strategy's history fetch set for one symbol.
    fn warm_up_symbol(&mut self, symbol: &str) {
        let cfg = self.state.config.read().clone();
        for (granularity, count) in cfg.active_strategy.history_set() {
            self.broker.fetch_history(symbol, granularity, count);
        }
        // Multiplier range discovery for the intelligence strategies.
        if cfg.active_strategy.is_screener_driven()
            && cfg.contract_type == ContractKind::Multiplier
        {
            self.broker.send(protocol::contracts_for(symbol));
        }
    }

    // -------------------------------------------------------------------------
    // Monitoring & execution
    // -------------------------------------------------------------------------

    fn monitor_symbol(&mut self, symbol: &str, price: f64, now: i64, cfg: &BotConfig) {
        if self.book.is_empty() {
            return;
        }
        let Some(sd) = self.symbols.get(symbol) else {
            return;
        };

        let daily = sd.candles(86_400);
        let h1 = sd.candles(3_600);
        let m15 = sd.candles(900);
        let card = self.state.scorecard(symbol);
        let (fr_highs, fr_lows) = card
            .map(|c| (c.fractal_highs, c.fractal_lows))
            .unwrap_or_default();

        let ctx = MonitorCtx {
            htf_open: sd.htf_open,
            daily_candles: &daily,
            h1_candles: &h1,
            m15_candles: &m15,
            fractal_highs: &fr_highs,
            fractal_lows: &fr_lows,
        };

        let actions = self.book.monitor_on_tick(symbol, price, now, cfg, &ctx);
        for action in actions {
            self.apply_monitor_action(action, now);
        }
        self.metrics.set_floating(self.book.floating_pnl());
    }

    fn apply_monitor_action(&mut self, action: MonitorAction, now: i64) {
        match action {
            MonitorAction::Close {
                contract_id,
                reason,
            } => {
                self.state
                    .log_console("info", format!("Closing {contract_id}: {reason}"));
                self.close_contract(contract_id, now, &reason);
            }
            MonitorAction::Drop { contract_id } => {
                self.book.remove(contract_id);
                self.state.log_console(
                    "warning",
                    format!("Cleaned up ghost contract {contract_id}"),
                );
                self.publish_account();
            }
        }
    }

    /// Idempotent close: stamps the attempt time and sends the sell. Retried
    /// by the monitor on a 30s cooldown while the contract stays open.
    fn close_contract(&mut self, contract_id: i64, now: i64, _reason: &str) {
        if self.book.mark_closing(contract_id, now) {
            self.broker.send(protocol::sell(contract_id));
        }
    }

    fn trip_risk_gate(&mut self, breach: RiskBreach) {
        self.risk_paused = true;
        self.status = EngineStatus::PassiveMonitoring;
        self.state.set_status(self.status);
        let msg = match breach {
            RiskBreach::DailyLoss(pct) => {
                format!("Max daily loss reached ({pct:.2}%). Trading paused.")
            }
            RiskBreach::DailyProfit(pct) => {
                format!("Max daily profit reached ({pct:.2}%). Trading paused.")
            }
        };
        self.state.log_console("warning", msg);
    }

    /// Turn an Open intent into a broker order, enforcing the duplicate and
    /// opposite-position rules.
    fn execute_open(&mut self, symbol: &str, side: Side, now: i64, cfg: &BotConfig) {
        if self.book.find(symbol, side).is_some() {
            debug!(symbol, %side, "trade already exists in this direction");
            return;
        }
        if let Some(opposite) = self.book.find(symbol, side.flip()) {
            let id = opposite.id;
            self.state.log_console(
                "info",
                format!("Closing opposite {} trade for {symbol}", side.flip()),
            );
            self.close_contract(id, now, "reverse");
        }

        let Some(sd) = self.symbols.get(symbol) else {
            return;
        };
        let Some(price) = sd.last_tick else {
            return;
        };
        let card = self.state.scorecard(symbol);

        let is_mult = cfg.active_strategy.is_screener_driven()
            && cfg.contract_type == ContractKind::Multiplier;
        let halve = cfg.active_strategy == StrategyId::S4
            && crate::strategy::snr_reversal::zone_heavily_tested(sd, price);
        if halve {
            self.state.log_console(
                "info",
                format!("{symbol}: zone heavily tested — halving position size"),
            );
        }

        let stake =
            execution::compute_stake(cfg, self.metrics.account_balance, is_mult, halve);

        let order = if is_mult {
            let mult_val = card
                .as_ref()
                .map(|c| c.multiplier)
                .filter(|m| *m > 0.0)
                .unwrap_or(cfg.multiplier_value);
            let atr_1h = card.as_ref().map(|c| c.atr).unwrap_or(0.0);
            execution::multiplier_order(symbol, side, stake, mult_val, atr_1h, price)
        } else {
            let atr_1h = crate::indicators::atr::calculate_atr(&sd.candles(3_600), 14);
            let duration =
                execution::compute_duration(cfg, now, card.as_ref(), atr_1h, price, sd.htf_open);
            execution::binary_order(symbol, side, stake, duration)
        };

        if order.is_multiplier {
            self.pending_snapshots.insert(
                symbol.to_string(),
                EntrySnapshot {
                    confidence: card.as_ref().map(|c| c.confidence).unwrap_or(0.0),
                    atr: card.as_ref().map(|c| c.atr).unwrap_or(0.0),
                    entry_time: now,
                },
            );
            self.state.log_console(
                "info",
                format!("Opening MULTIPLIER {side} on {symbol} | stake {}", order.stake),
            );
        } else {
            let duration = order.frame["parameters"]["duration"].as_i64().unwrap_or(0);
            self.state.log_console(
                "info",
                format!(
                    "Opening {side} on {symbol} | stake {} | {}",
                    order.stake,
                    execution::expiry_label(duration, cfg.active_strategy.profile().expiry, now)
                ),
            );
        }

        if !self.broker.send(order.frame) {
            // Disconnected: drop the intent — the tick stream retries the
            // preconditions naturally.
            debug!(symbol, "order dropped, broker disconnected");
        }
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// Rebuild the copy-on-read market view for one symbol.
    fn refresh_view(&mut self, symbol: &str) {
        let Some(sd) = self.symbols.get(symbol) else {
            return;
        };
        let mut view = MarketView {
            last_tick: sd.last_tick,
            htf_open: sd.htf_open,
            snr_zones: sd.snr_zones.clone(),
            fractal_highs: sd.fractal_highs.clone(),
            fractal_lows: sd.fractal_lows.clone(),
            consecutive_losses: sd.consecutive_losses,
            ..Default::default()
        };
        for granularity in sd.granularities() {
            view.candles
                .insert(granularity, Arc::new(sd.candles(granularity)));
        }
        self.state.market.write().insert(symbol.to_string(), view);
    }

    /// Publish the aggregated account summary and trade list.
    pub fn publish_account(&self) {
        let cfg = self.state.config.read();

        let trades: Vec<OpenTradeView> = self
            .book
            .iter()
            .map(|c| OpenTradeView {
                id: c.id,
                trade_type: c.side.to_string(),
                symbol: c.symbol.clone(),
                entry_spot_price: c.entry_price,
                stake: c.stake,
                pnl: c.pnl,
                expiry_time: c.expiry_time,
                status: format!("{:?}", c.status),
                is_freeride: c.is_freeride,
            })
            .collect();

        let used: f64 = trades.iter().map(|t| t.stake).sum();
        let summary = AccountSummary {
            running: self.status.is_trading(),
            is_demo: cfg.is_demo,
            active_strategy: cfg.active_strategy.to_string(),
            total_balance: self.metrics.account_balance,
            available_balance: self.metrics.available_balance,
            total_capital: self.metrics.total_equity,
            net_profit: self.metrics.floating_pnl + self.metrics.net_trade_profit,
            net_trade_profit: self.metrics.net_trade_profit,
            total_trade_profit: self.metrics.total_trade_profit,
            total_trade_loss: self.metrics.total_trade_loss,
            used_amount: used,
            total_trades: self.metrics.total_trades_count + trades.len() as u32,
            win_rate: self.metrics.win_rate(),
            avg_pnl: self.metrics.avg_pnl(),
            daily_pnl_pct: self.metrics.daily_pnl_pct(),
        };

        self.state.emitter.emit(
            "account_update",
            serde_json::to_value(&summary).unwrap_or_default(),
        );
        self.state
            .emitter
            .emit("trades_update", json!({ "trades": &trades }));

        *self.state.account.write() = summary;
        *self.state.open_trades.write() = trades;
    }
}

fn utc_date(epoch: i64) -> chrono::NaiveDate {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .map(|t| t.date_naive())
        .unwrap_or_default()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::broker_session;
    use crate::broker::ContractSnapshot;
    use crate::market_data::candle::bucket_start;

    /// A mid-day timestamp (no midnight edge effects).
    const T0: i64 = 1_700_000_000;

    fn test_engine(strategy: StrategyId) -> (Engine, Arc<AppState>) {
        let mut cfg = BotConfig::default();
        cfg.api_token = "test-token".into();
        cfg.active_strategy = strategy;
        cfg.symbols = vec!["R_100".into()];

        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
        let state = Arc::new(AppState::new(cfg, "config.json", cmd_tx));
        let (_session, handle) = broker_session();
        (Engine::new(state.clone(), handle), state)
    }

    fn broker(ev: BrokerEvent) -> EngineEvent {
        EngineEvent::Broker(ev)
    }

    fn daily_candles(open: f64, now: i64) -> BrokerEvent {
        let bucket = bucket_start(now, 86_400);
        BrokerEvent::Candles {
            symbol: "R_100".into(),
            granularity: 86_400,
            candles: vec![
                crate::market_data::Candle {
                    epoch: bucket - 86_400,
                    open: open - 0.5,
                    high: open + 1.0,
                    low: open - 1.0,
                    close: open,
                },
                crate::market_data::Candle {
                    epoch: bucket,
                    open,
                    high: open + 0.4,
                    low: open - 0.4,
                    close: open + 0.1,
                },
            ],
        }
    }

    fn tick(epoch: i64, quote: f64) -> BrokerEvent {
        BrokerEvent::Tick {
            symbol: "R_100".into(),
            epoch,
            quote,
            subscription_id: Some("sub-1".into()),
        }
    }

    /// Drive the full S1 breakout scenario: daily open 100.0, a 15m candle
    /// opening below it and closing above — exactly one Open intent.
    #[tokio::test]
    async fn s1_breakout_long_emits_one_entry() {
        let (mut engine, state) = test_engine(StrategyId::S1);

        engine.handle_event(EngineEvent::Command(EngineCommand::Start), T0);
        assert!(engine.status.is_trading());

        engine.handle_event(broker(BrokerEvent::Authorized { balance: 1_000.0 }), T0);
        engine.handle_event(broker(daily_candles(100.0, T0)), T0);

        let mut console = state.emitter.subscribe();

        // Build the 15m candle: opens 99.95, trades up through the daily
        // open, closes at 100.20 on the boundary tick.
        let c0 = bucket_start(T0, 900);
        engine.handle_event(broker(tick(c0 + 10, 99.95)), c0 + 10);
        engine.handle_event(broker(tick(c0 + 400, 100.10)), c0 + 400);
        engine.handle_event(broker(tick(c0 + 899, 100.20)), c0 + 899);
        // Boundary tick closes the candle and triggers evaluation.
        engine.handle_event(broker(tick(c0 + 901, 100.20)), c0 + 901);

        let sd = engine.symbols.get("R_100").unwrap();
        assert_eq!(sd.last_trade_ltf, Some(c0));

        let mut saw_open = false;
        while let Ok(msg) = console.try_recv() {
            if msg.event == "console_log"
                && msg.data["message"]
                    .as_str()
                    .is_some_and(|m| m.contains("Opening long on R_100"))
            {
                saw_open = true;
            }
        }
        assert!(saw_open, "expected an opening console line");

        // Subsequent ticks in the next candle do not re-fire for the same
        // closed epoch.
        engine.handle_event(broker(tick(c0 + 910, 100.25)), c0 + 910);
        assert_eq!(engine.symbols.get("R_100").unwrap().last_trade_ltf, Some(c0));
    }

    #[tokio::test]
    async fn no_intents_while_not_trading() {
        let (mut engine, _state) = test_engine(StrategyId::S1);

        // Authorized but never started: passive monitoring only.
        engine.handle_event(broker(BrokerEvent::Authorized { balance: 1_000.0 }), T0);
        assert_eq!(engine.status, EngineStatus::PassiveMonitoring);

        // Ticks arrive (symbol attached manually, as after a prior session).
        engine
            .symbols
            .insert("R_100".into(), SymbolState::new("R_100"));
        engine.handle_event(broker(daily_candles(100.0, T0)), T0);

        let c0 = bucket_start(T0, 900);
        engine.handle_event(broker(tick(c0 + 10, 99.95)), c0 + 10);
        engine.handle_event(broker(tick(c0 + 901, 100.20)), c0 + 901);

        assert_eq!(engine.symbols.get("R_100").unwrap().last_trade_ltf, None);
    }

    #[tokio::test]
    async fn risk_gate_parks_engine_and_blocks_entries() {
        let (mut engine, state) = test_engine(StrategyId::S1);
        engine.handle_event(EngineEvent::Command(EngineCommand::Start), T0);
        engine.handle_event(broker(BrokerEvent::Authorized { balance: 100.0 }), T0);
        engine.handle_event(broker(daily_candles(100.0, T0)), T0);

        // Equity drops to 94: -6% vs a 5% cap.
        engine.handle_event(broker(BrokerEvent::Balance { balance: 94.0 }), T0);

        let c0 = bucket_start(T0, 900);
        engine.handle_event(broker(tick(c0 + 10, 99.95)), c0 + 10);
        engine.handle_event(broker(tick(c0 + 901, 100.20)), c0 + 901);

        assert_eq!(engine.status, EngineStatus::PassiveMonitoring);
        assert!(engine.risk_paused);
        assert_eq!(engine.symbols.get("R_100").unwrap().last_trade_ltf, None);
        assert_eq!(state.current_status(), EngineStatus::PassiveMonitoring);
    }

    #[tokio::test]
    async fn risk_pause_lifts_on_utc_rollover() {
        let (mut engine, _state) = test_engine(StrategyId::S2);
        engine.handle_event(EngineEvent::Command(EngineCommand::Start), T0);
        engine.handle_event(broker(BrokerEvent::Authorized { balance: 100.0 }), T0);
        engine.handle_event(broker(BrokerEvent::Balance { balance: 90.0 }), T0);

        let c0 = bucket_start(T0, 180);
        engine.handle_event(broker(tick(c0 + 10, 100.0)), c0 + 10);
        assert!(engine.risk_paused);

        // First tick of the next UTC day re-bases and resumes.
        let next_day = bucket_start(T0, 86_400) + 86_400 + 5;
        engine.handle_event(broker(tick(next_day, 100.0)), next_day);
        assert!(!engine.risk_paused);
        assert_eq!(engine.status, EngineStatus::Trading);
        assert_eq!(engine.metrics.daily_start_balance, 90.0);
    }

    #[tokio::test]
    async fn noop_config_update_has_zero_side_effects() {
        let (mut engine, state) = test_engine(StrategyId::S1);
        engine.handle_event(EngineEvent::Command(EngineCommand::Start), T0);
        engine.handle_event(broker(BrokerEvent::Authorized { balance: 100.0 }), T0);
        engine.handle_event(broker(daily_candles(100.0, T0)), T0);

        let before_htf = engine.symbols.get("R_100").unwrap().htf_open;
        let same = state.config.read().clone();
        engine.handle_event(EngineEvent::Command(EngineCommand::ApplyConfig(same)), T0);

        // No reset, no refetch: series and status untouched.
        assert_eq!(engine.symbols.get("R_100").unwrap().htf_open, before_htf);
        assert!(engine.status.is_trading());
    }

    #[tokio::test]
    async fn strategy_change_resets_series_keeps_dedup() {
        let (mut engine, state) = test_engine(StrategyId::S1);
        engine.handle_event(EngineEvent::Command(EngineCommand::Start), T0);
        engine.handle_event(broker(BrokerEvent::Authorized { balance: 100.0 }), T0);
        engine.handle_event(broker(daily_candles(100.0, T0)), T0);
        engine.symbols.get_mut("R_100").unwrap().last_trade_ltf = Some(12_345);

        let mut new_cfg = state.config.read().clone();
        new_cfg.active_strategy = StrategyId::S3;
        engine.handle_event(EngineEvent::Command(EngineCommand::ApplyConfig(new_cfg)), T0);

        let sd = engine.symbols.get("R_100").unwrap();
        assert!(sd.htf_open.is_none());
        assert_eq!(sd.last_trade_ltf, Some(12_345));
        assert_eq!(state.config.read().active_strategy, StrategyId::S3);
    }

    #[tokio::test]
    async fn contract_lifecycle_updates_metrics_and_streaks() {
        let (mut engine, _state) = test_engine(StrategyId::S5);
        engine.handle_event(EngineEvent::Command(EngineCommand::Start), T0);
        engine.handle_event(broker(BrokerEvent::Authorized { balance: 1_000.0 }), T0);

        let poc = ContractSnapshot {
            contract_id: 7,
            symbol: "R_100".into(),
            contract_type: "CALL".into(),
            profit: -0.5,
            buy_price: 10.0,
            entry_tick: Some(100.0),
            purchase_time: Some(T0),
            date_expiry: None,
            is_sold: false,
            multiplier: None,
        };
        engine.handle_event(broker(BrokerEvent::ContractUpdate(poc.clone())), T0 + 5);
        assert_eq!(engine.book.len(), 1);
        assert!((engine.metrics.floating_pnl + 0.5).abs() < 1e-9);

        let mut sold = poc;
        sold.is_sold = true;
        engine.handle_event(broker(BrokerEvent::ContractUpdate(sold)), T0 + 60);

        assert!(engine.book.is_empty());
        assert_eq!(engine.metrics.losses_count, 1);
        assert_eq!(
            engine.symbols.get("R_100").unwrap().consecutive_losses,
            1
        );
        assert_eq!(engine.symbols.get("R_100").unwrap().consecutive_wins, 0);
    }

    #[tokio::test]
    async fn duplicate_and_opposite_position_rules() {
        let (mut engine, state) = test_engine(StrategyId::S2);
        engine.handle_event(EngineEvent::Command(EngineCommand::Start), T0);
        engine.handle_event(broker(BrokerEvent::Authorized { balance: 1_000.0 }), T0);
        engine.symbols.get_mut("R_100").unwrap().last_tick = Some(100.0);

        // An open long already exists.
        let poc = ContractSnapshot {
            contract_id: 9,
            symbol: "R_100".into(),
            contract_type: "CALL".into(),
            profit: 0.1,
            buy_price: 10.0,
            entry_tick: Some(100.0),
            purchase_time: Some(T0),
            date_expiry: None,
            is_sold: false,
            multiplier: None,
        };
        engine.handle_event(broker(BrokerEvent::ContractUpdate(poc)), T0 + 1);

        let cfg = state.config.read().clone();
        let mut console = state.emitter.subscribe();

        // Same-side intent: dropped, nothing logged, nothing marked closing.
        engine.execute_open("R_100", Side::Long, T0 + 2, &cfg);
        assert!(console.try_recv().is_err());
        assert!(!engine.book.get(9).unwrap().is_closing);

        // Opposite-side intent: the long is closed first.
        engine.execute_open("R_100", Side::Short, T0 + 3, &cfg);
        assert!(engine.book.get(9).unwrap().is_closing);
    }

    #[tokio::test]
    async fn authorization_error_stops_engine() {
        let (mut engine, state) = test_engine(StrategyId::S1);
        engine.handle_event(EngineEvent::Command(EngineCommand::Start), T0);
        engine.handle_event(
            broker(BrokerEvent::ApiError {
                code: "AuthorizationRequired".into(),
                message: "Please log in.".into(),
            }),
            T0,
        );
        assert_eq!(engine.status, EngineStatus::Stopped);
        assert_eq!(state.current_status(), EngineStatus::Stopped);
    }

    #[tokio::test]
    async fn shutdown_command_ends_the_loop() {
        let (mut engine, _state) = test_engine(StrategyId::S1);
        assert!(engine.handle_event(EngineEvent::Command(EngineCommand::ClearConsole), T0));
        assert!(!engine.handle_event(EngineEvent::Command(EngineCommand::Shutdown), T0));
    }
}

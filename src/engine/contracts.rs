// =============================================================================
// Contract Book & Position Monitor
// =============================================================================
//
// State machine per contract: Opened -> Active -> Closing -> Sold.
//
//   Opened -> Active    first contract update carrying an entry tick; TP/SL
//                       price targets are derived once at this point.
//   Active -> Closing   profit TP/SL, price-trigger TP/SL, force-close timer,
//                       or a strategy-coupled exit.
//   Closing -> Closing  the sell is re-issued when the last attempt is older
//                       than 30s (the broker-side close is idempotent).
//   Closing -> Sold     terminal update with is_sold; the contract is removed
//                       and the settlement reported upward.
//
// Ghost cleanup: contracts past expiry + 60s are dropped locally without a
// sell. All mutations are linearized by the engine worker.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::broker::ContractSnapshot;
use crate::config::{BotConfig, StrategyId};
use crate::indicators::atr::calculate_atr;
use crate::indicators::macd::macd_divergence;
use crate::indicators::supertrend::supertrend_default;
use crate::market_data::Candle;
use crate::types::Side;

/// Sell-retry cooldown while a contract sits in Closing.
const CLOSE_RETRY_SECS: i64 = 30;
/// Grace period past expiry before a ghost contract is dropped locally.
const GHOST_GRACE_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractStatus {
    Opened,
    Active,
    Closing,
    Sold,
}

/// Screener context captured when the position was opened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub confidence: f64,
    pub atr: f64,
    pub entry_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: i64,
    pub symbol: String,
    pub side: Side,
    pub contract_type: String,
    pub stake: f64,
    pub entry_price: Option<f64>,
    pub pnl: f64,
    pub multiplier: Option<f64>,
    pub tp_price: Option<f64>,
    pub sl_price: Option<f64>,
    pub purchase_time: Option<i64>,
    pub expiry_time: Option<i64>,
    pub status: ContractStatus,
    pub is_closing: bool,
    pub last_close_attempt: Option<i64>,
    pub is_freeride: bool,
    pub entry_snapshot: Option<EntrySnapshot>,
}

impl Contract {
    pub fn is_multiplier(&self) -> bool {
        matches!(self.contract_type.as_str(), "MULTUP" | "MULTDOWN")
    }

    /// Derive TP/SL price triggers once the entry price is known.
    ///
    /// Multipliers invert `profit = (price - entry) / entry * mult * stake`;
    /// binary contracts fall back to a configurable percent band around entry
    /// (the `profit` field remains the primary trigger).
    pub fn compute_target_prices(&mut self, cfg: &BotConfig) {
        let Some(entry) = self.entry_price else {
            return;
        };
        if cfg.tp_value <= 0.0 && cfg.sl_value <= 0.0 {
            return;
        }

        let (tp_usd, sl_usd) = if cfg.use_fixed_balance {
            (cfg.tp_value, cfg.sl_value)
        } else {
            (
                self.stake * cfg.tp_value / 100.0,
                self.stake * cfg.sl_value / 100.0,
            )
        };

        let sign = self.side.sign();
        if let Some(mult) = self.multiplier {
            let denom = mult * self.stake;
            if denom == 0.0 {
                return;
            }
            if cfg.tp_value > 0.0 {
                self.tp_price = Some(entry * (1.0 + sign * tp_usd / denom));
            }
            if cfg.sl_value > 0.0 {
                self.sl_price = Some(entry * (1.0 - sign * sl_usd / denom));
            }
        } else {
            let band = cfg.binary_fallback_pct / 100.0;
            if cfg.tp_value > 0.0 {
                self.tp_price = Some(entry * (1.0 + sign * band));
            }
            if cfg.sl_value > 0.0 {
                self.sl_price = Some(entry * (1.0 - sign * band));
            }
        }
    }

    /// USD profit thresholds from config (fixed or percent-of-stake).
    fn profit_thresholds(&self, cfg: &BotConfig) -> (f64, f64) {
        if cfg.use_fixed_balance {
            (cfg.tp_value, -cfg.sl_value)
        } else {
            (
                self.stake * cfg.tp_value / 100.0,
                -self.stake * cfg.sl_value / 100.0,
            )
        }
    }
}

/// Action requested by the monitor, executed by the engine worker.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorAction {
    /// Send (or resend) a sell for this contract.
    Close { contract_id: i64, reason: String },
    /// Drop the contract locally without a sell (ghost cleanup).
    Drop { contract_id: i64 },
}

/// A terminal settlement extracted from a contract update.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub contract_id: i64,
    pub symbol: String,
    pub profit: f64,
}

/// Market context the monitor needs for strategy-coupled exits.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorCtx<'a> {
    pub htf_open: Option<f64>,
    pub daily_candles: &'a [Candle],
    pub h1_candles: &'a [Candle],
    pub m15_candles: &'a [Candle],
    pub fractal_highs: &'a [f64],
    pub fractal_lows: &'a [f64],
}

/// The set of open contracts, keyed by broker contract id.
#[derive(Debug, Default)]
pub struct ContractBook {
    contracts: HashMap<i64, Contract>,
}

impl ContractBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&Contract> {
        self.contracts.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contract> {
        self.contracts.values()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.contracts.keys().copied().collect()
    }

    /// First open contract for `symbol` on the given side.
    pub fn find(&self, symbol: &str, side: Side) -> Option<&Contract> {
        self.contracts
            .values()
            .find(|c| c.symbol == symbol && c.side == side)
    }

    pub fn has_any_for(&self, symbol: &str) -> bool {
        self.contracts.values().any(|c| c.symbol == symbol)
    }

    pub fn floating_pnl(&self) -> f64 {
        self.contracts.values().map(|c| c.pnl).sum()
    }

    /// Mark a contract closing and stamp the attempt time. Returns `false`
    /// when the contract is unknown.
    pub fn mark_closing(&mut self, id: i64, now: i64) -> bool {
        match self.contracts.get_mut(&id) {
            Some(c) => {
                c.is_closing = true;
                c.status = ContractStatus::Closing;
                c.last_close_attempt = Some(now);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: i64) -> Option<Contract> {
        self.contracts.remove(&id)
    }

    /// Pre-register a contract from the buy acknowledgement so monitoring can
    /// begin before the first streamed update. The last tick doubles as a
    /// preliminary entry price.
    pub fn register_buy(
        &mut self,
        id: i64,
        symbol: &str,
        contract_type: &str,
        stake: f64,
        multiplier: Option<f64>,
        last_tick: Option<f64>,
        snapshot: Option<EntrySnapshot>,
        cfg: &BotConfig,
    ) {
        let mut contract = Contract {
            id,
            symbol: symbol.to_string(),
            side: Side::from_contract_type(contract_type),
            contract_type: contract_type.to_string(),
            stake,
            entry_price: last_tick,
            pnl: 0.0,
            multiplier,
            tp_price: None,
            sl_price: None,
            purchase_time: None,
            expiry_time: None,
            status: ContractStatus::Opened,
            is_closing: false,
            last_close_attempt: None,
            is_freeride: false,
            entry_snapshot: snapshot,
        };
        if contract.entry_price.is_some() {
            contract.compute_target_prices(cfg);
        }
        info!(contract_id = id, symbol, contract_type, stake, "contract opened");
        self.contracts.insert(id, contract);
    }

    // -------------------------------------------------------------------------
    // Streamed contract updates
    // -------------------------------------------------------------------------

    /// Apply one `proposal_open_contract` snapshot.
    ///
    /// Replaying the same update twice leaves the book bit-identical: a
    /// terminal update removes the contract (the replay is then ignored) and
    /// a non-terminal update is a pure overwrite of broker-owned fields.
    pub fn apply_update(
        &mut self,
        poc: &ContractSnapshot,
        now: i64,
        cfg: &BotConfig,
    ) -> (Option<Settlement>, Vec<MonitorAction>) {
        let mut actions = Vec::new();

        if poc.is_sold {
            let Some(mut c) = self.contracts.remove(&poc.contract_id) else {
                return (None, actions);
            };
            c.status = ContractStatus::Sold;
            info!(
                contract_id = poc.contract_id,
                symbol = %poc.symbol,
                profit = poc.profit,
                "contract settled"
            );
            return (
                Some(Settlement {
                    contract_id: poc.contract_id,
                    symbol: poc.symbol.clone(),
                    profit: poc.profit,
                }),
                actions,
            );
        }

        let existing = self.contracts.get(&poc.contract_id);
        let is_closing = existing.map(|c| c.is_closing).unwrap_or(false);
        let prior = existing.map(|c| {
            (
                c.tp_price,
                c.sl_price,
                c.is_freeride,
                c.entry_snapshot,
                c.last_close_attempt,
            )
        });

        let mut contract = Contract {
            id: poc.contract_id,
            symbol: poc.symbol.clone(),
            side: Side::from_contract_type(&poc.contract_type),
            contract_type: poc.contract_type.clone(),
            stake: poc.buy_price,
            entry_price: poc.entry_tick,
            pnl: poc.profit,
            multiplier: poc.multiplier,
            tp_price: prior.and_then(|p| p.0),
            sl_price: prior.and_then(|p| p.1),
            purchase_time: poc.purchase_time,
            expiry_time: poc.date_expiry,
            status: if is_closing {
                ContractStatus::Closing
            } else if poc.entry_tick.is_some() {
                ContractStatus::Active
            } else {
                ContractStatus::Opened
            },
            is_closing,
            last_close_attempt: prior.and_then(|p| p.4),
            is_freeride: prior.map(|p| p.2).unwrap_or(false),
            entry_snapshot: prior.and_then(|p| p.3),
        };

        if contract.entry_price.is_some() && contract.tp_price.is_none() {
            contract.compute_target_prices(cfg);
        }

        if !is_closing {
            // Force-close window.
            if cfg.force_close_enabled {
                if let Some(purchase) = contract.purchase_time {
                    if now - purchase >= cfg.force_close_duration {
                        actions.push(MonitorAction::Close {
                            contract_id: contract.id,
                            reason: format!(
                                "force close after {}s",
                                now - purchase
                            ),
                        });
                    }
                }
            }

            // Profit-based TP/SL.
            if actions.is_empty() {
                let (tp, sl) = contract.profit_thresholds(cfg);
                if cfg.tp_enabled && cfg.tp_value > 0.0 && contract.pnl >= tp {
                    actions.push(MonitorAction::Close {
                        contract_id: contract.id,
                        reason: format!("TP reached: {:.2} USD >= {:.2}", contract.pnl, tp),
                    });
                } else if cfg.sl_enabled && cfg.sl_value > 0.0 && contract.pnl <= sl {
                    actions.push(MonitorAction::Close {
                        contract_id: contract.id,
                        reason: format!("SL reached: {:.2} USD <= {:.2}", contract.pnl, sl),
                    });
                }
            }
        }

        self.contracts.insert(poc.contract_id, contract);
        (None, actions)
    }

    // -------------------------------------------------------------------------
    // Tick-driven monitoring
    // -------------------------------------------------------------------------

    /// Evaluate every open contract on `symbol` against the current price.
    /// Runs on every tick for the symbol, independent of the trading flag.
    pub fn monitor_on_tick(
        &mut self,
        symbol: &str,
        price: f64,
        now: i64,
        cfg: &BotConfig,
        ctx: &MonitorCtx<'_>,
    ) -> Vec<MonitorAction> {
        let mut actions = Vec::new();

        for id in self.ids() {
            let Some(c) = self.contracts.get_mut(&id) else {
                continue;
            };
            if c.symbol != symbol {
                continue;
            }
            let is_long = c.side == Side::Long;

            // --- Strategy-coupled exits -------------------------------------
            if !c.is_closing {
                if let Some(reason) = strategy_exit(c, price, cfg, ctx) {
                    debug!(contract_id = id, reason = %reason, "strategy exit");
                    actions.push(MonitorAction::Close {
                        contract_id: id,
                        reason,
                    });
                    continue;
                }
            }

            // --- Price-trigger TP/SL (fail-safe redundant check) ------------
            if !c.is_closing && (cfg.tp_enabled || cfg.sl_enabled) {
                let tp_hit = cfg.tp_enabled
                    && c.tp_price.is_some_and(|tp| {
                        if is_long {
                            price >= tp
                        } else {
                            price <= tp
                        }
                    });
                let sl_hit = cfg.sl_enabled
                    && c.sl_price.is_some_and(|sl| {
                        if is_long {
                            price <= sl
                        } else {
                            price >= sl
                        }
                    });
                if tp_hit || sl_hit {
                    let which = if tp_hit { "TP" } else { "SL" };
                    actions.push(MonitorAction::Close {
                        contract_id: id,
                        reason: format!("{which} price trigger at {price}"),
                    });
                    continue;
                }
            }

            // --- Ghost cleanup ----------------------------------------------
            if let Some(expiry) = c.expiry_time {
                if now > expiry + GHOST_GRACE_SECS {
                    warn!(contract_id = id, "dropping ghost contract past expiry");
                    actions.push(MonitorAction::Drop { contract_id: id });
                    continue;
                }
            }

            // --- Closing retry ----------------------------------------------
            if c.is_closing {
                let due = c
                    .last_close_attempt
                    .map_or(true, |t| now - t >= CLOSE_RETRY_SECS);
                if due {
                    actions.push(MonitorAction::Close {
                        contract_id: id,
                        reason: "close retry".to_string(),
                    });
                }
                continue;
            }

            // --- Force close ------------------------------------------------
            if cfg.force_close_enabled {
                if let Some(purchase) = c.purchase_time {
                    let elapsed = now - purchase;
                    if elapsed >= cfg.force_close_duration {
                        actions.push(MonitorAction::Close {
                            contract_id: id,
                            reason: format!("force close after {elapsed}s"),
                        });
                        continue;
                    }
                }
            }

            // --- Profit-based TP/SL -----------------------------------------
            let (tp, sl) = c.profit_thresholds(cfg);
            if cfg.tp_enabled && cfg.tp_value > 0.0 && c.pnl >= tp {
                actions.push(MonitorAction::Close {
                    contract_id: id,
                    reason: format!("TP reached: {:.2} USD >= {:.2}", c.pnl, tp),
                });
            } else if cfg.sl_enabled && cfg.sl_value > 0.0 && c.pnl <= sl {
                actions.push(MonitorAction::Close {
                    contract_id: id,
                    reason: format!("SL reached: {:.2} USD <= {:.2}", c.pnl, sl),
                });
            }
        }

        actions
    }
}

/// Strategy-specific exit rules. Mutates freeride state on the contract.
fn strategy_exit(
    c: &mut Contract,
    price: f64,
    cfg: &BotConfig,
    ctx: &MonitorCtx<'_>,
) -> Option<String> {
    let is_long = c.side == Side::Long;

    match cfg.active_strategy {
        StrategyId::S1 => {
            if let Some(htf_open) = ctx.htf_open {
                // Exit when price crosses back through the daily open.
                if (is_long && price < htf_open) || (!is_long && price > htf_open) {
                    return Some("price crossed back through daily open".to_string());
                }
            }
            // Exit at +2 daily ATRs of favourable distance.
            if let (Some(entry), Some(daily_atr)) =
                (c.entry_price, calculate_atr(ctx.daily_candles, 14))
            {
                let profit_dist = c.side.sign() * (price - entry);
                if profit_dist > 2.0 * daily_atr {
                    return Some("+2 daily ATR target reached".to_string());
                }
            }
            None
        }
        StrategyId::S5 | StrategyId::S7 => {
            if ctx.h1_candles.len() < 20 || ctx.m15_candles.len() < 20 {
                return None;
            }

            // Hard exit on hourly MACD divergence against the position.
            let h1_closes: Vec<f64> = ctx.h1_candles.iter().map(|x| x.close).collect();
            let div = macd_divergence(&h1_closes, 20);
            if (is_long && div == -1) || (!is_long && div == 1) {
                return Some("hourly MACD divergence against position".to_string());
            }

            if c.is_multiplier() {
                let entry = c.entry_price?;
                let atr_1h = calculate_atr(ctx.h1_candles, 14)?;
                let profit_dist = c.side.sign() * (price - entry);

                // Free-ride: at 1.5 ATR of open profit, trail the stop to the
                // nearest structural point (fractal), falling back to a small
                // ATR buffer past entry.
                if profit_dist >= 1.5 * atr_1h && !c.is_freeride {
                    let trail = if is_long {
                        ctx.fractal_lows.last().copied()
                    } else {
                        ctx.fractal_highs.last().copied()
                    }
                    .unwrap_or(entry + c.side.sign() * 0.2 * atr_1h);
                    c.sl_price = Some(trail);
                    c.is_freeride = true;
                    info!(
                        contract_id = c.id,
                        trail,
                        "free-ride engaged — stop moved to structure"
                    );
                }

                // While free-riding, a 15m SuperTrend flip ends the ride.
                if c.is_freeride {
                    if let Some(st) = supertrend_default(ctx.m15_candles) {
                        let dir = st.last_direction().unwrap_or(0);
                        if (is_long && dir == -1) || (!is_long && dir == 1) {
                            return Some("15m SuperTrend reversal (trailing)".to_string());
                        }
                    }
                }
            }
            None
        }
        _ => None,
    }
}

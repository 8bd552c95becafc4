// =============================================================================
// SessionMetrics — account state, realized/floating PnL, daily risk gate
// =============================================================================
//
// Owned and mutated exclusively by the engine worker. The daily starting
// balance resets at the UTC day boundary; the daily PnL percentage gates new
// entries (max daily loss / max daily profit) by flipping the engine to
// passive monitoring — a risk breach is not an error.
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub account_balance: f64,
    pub available_balance: f64,
    pub total_equity: f64,

    pub daily_start_balance: f64,
    #[serde(skip)]
    pub last_reset_date: Option<NaiveDate>,

    /// Realized PnL accumulated this session.
    pub net_trade_profit: f64,
    pub total_trade_profit: f64,
    pub total_trade_loss: f64,
    pub floating_pnl: f64,

    pub wins_count: u32,
    pub losses_count: u32,
    pub total_trades_count: u32,
}

/// Outcome of the daily PnL gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskBreach {
    DailyLoss(f64),
    DailyProfit(f64),
}

impl SessionMetrics {
    /// Record the balance reported on authorize; seeds the daily baseline on
    /// first contact.
    pub fn on_balance(&mut self, balance: f64, today: NaiveDate) {
        self.account_balance = balance;
        self.available_balance = balance;
        self.total_equity = balance + self.floating_pnl;

        if self.daily_start_balance == 0.0 {
            self.daily_start_balance = balance;
            self.last_reset_date = Some(today);
            info!(balance, "daily starting balance set");
        }
    }

    /// Reset the daily baseline when the UTC date rolls over. Returns `true`
    /// when a rollover happened.
    pub fn maybe_roll_day(&mut self, today: NaiveDate) -> bool {
        match self.last_reset_date {
            Some(last) if today <= last => false,
            _ => {
                self.daily_start_balance = self.account_balance;
                self.last_reset_date = Some(today);
                info!(
                    date = %today,
                    balance = self.account_balance,
                    "new UTC day — daily starting balance reset"
                );
                true
            }
        }
    }

    /// Record a settled contract's profit.
    pub fn on_settlement(&mut self, profit: f64) {
        self.net_trade_profit += profit;
        if profit > 0.0 {
            self.total_trade_profit += profit;
            self.wins_count += 1;
        } else {
            self.total_trade_loss += profit.abs();
            self.losses_count += 1;
        }
        self.total_trades_count += 1;
    }

    /// Refresh the floating PnL from the open book.
    pub fn set_floating(&mut self, floating: f64) {
        self.floating_pnl = floating;
        self.total_equity = self.account_balance + floating;
    }

    /// Daily PnL as a percentage of the daily starting balance.
    pub fn daily_pnl_pct(&self) -> f64 {
        if self.daily_start_balance <= 0.0 {
            return 0.0;
        }
        (self.total_equity - self.daily_start_balance) / self.daily_start_balance * 100.0
    }

    /// Check the loss/profit caps. The caller transitions the engine to
    /// passive monitoring on a breach; entries stay blocked until the next
    /// UTC rollover re-bases the daily PnL.
    pub fn risk_breach(&self, max_loss_pct: f64, max_profit_pct: f64) -> Option<RiskBreach> {
        if self.daily_start_balance <= 0.0 {
            return None;
        }
        let pnl_pct = self.daily_pnl_pct();
        if pnl_pct <= -max_loss_pct {
            Some(RiskBreach::DailyLoss(pnl_pct))
        } else if pnl_pct >= max_profit_pct {
            Some(RiskBreach::DailyProfit(pnl_pct))
        } else {
            None
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades_count == 0 {
            return 0.0;
        }
        self.wins_count as f64 / self.total_trades_count as f64 * 100.0
    }

    pub fn avg_pnl(&self) -> f64 {
        if self.total_trades_count == 0 {
            return 0.0;
        }
        self.net_trade_profit / self.total_trades_count as f64
    }
}

// =============================================================================
// HTF-Open Breakout Strategies (1, 2, 3)
// =============================================================================
//
// Common core: a long fires when the LTF candle opened at-or-below the
// higher-timeframe reference open and price has pushed above both the open
// and the candle's own open; shorts symmetric.
//
//   S1 Slow (daily/15m): candle-close only, 4h EMA100 bias filter, whipsaw
//      cap (more than 3 daily-open crosses disables the day).
//   S2 Moderate (1h/3m): 3m RSI gate (>55 / <45), 4h EMA21/EMA50 bias.
//   S3 Fast (15m/1m): at most 4 entries per UTC hour per symbol, a 1m-ATR
//      volatility floor (20th percentile of the last 50 samples), and two
//      consecutive 1m closes beyond the reference open with a confirming
//      body.
// =============================================================================

use chrono::{TimeZone, Timelike, Utc};

use crate::config::{BotConfig, StrategyId};
use crate::indicators::atr::{calculate_atr, percentile_rank};
use crate::indicators::ema::last_ema;
use crate::indicators::rsi::last_rsi;
use crate::market_data::{Candle, SymbolState};
use crate::types::Side;

/// Max whipsaw crosses of the daily open before strategy 1 stands down.
const MAX_DAILY_CROSSES: u32 = 3;
/// Strategy 3 entry cap per UTC hour per symbol.
const MAX_HOURLY_TRADES: u32 = 4;

pub fn evaluate(
    state: &mut SymbolState,
    cfg: &BotConfig,
    htf_open: f64,
    eval_candle: &Candle,
    price: f64,
    is_candle_close: bool,
) -> Option<Side> {
    match cfg.active_strategy {
        StrategyId::S1 => evaluate_s1(state, htf_open, eval_candle, price, is_candle_close),
        StrategyId::S2 => evaluate_s2(state, htf_open, eval_candle, price, is_candle_close),
        StrategyId::S3 => evaluate_s3(state, htf_open),
        _ => breakout_signal(htf_open, eval_candle, check_price(eval_candle, price, is_candle_close)),
    }
}

/// Price the breakout is judged against: the candle close on close
/// notifications, the live tick otherwise.
fn check_price(eval_candle: &Candle, price: f64, is_candle_close: bool) -> f64 {
    if is_candle_close {
        eval_candle.close
    } else {
        price
    }
}

/// The shared breakout condition.
fn breakout_signal(htf_open: f64, candle: &Candle, check: f64) -> Option<Side> {
    if candle.open <= htf_open && check > htf_open && check > candle.open {
        Some(Side::Long)
    } else if candle.open >= htf_open && check < htf_open && check < candle.open {
        Some(Side::Short)
    } else {
        None
    }
}

// -----------------------------------------------------------------------------
// Strategy 1 — Slow (daily / 15m, end-of-day)
// -----------------------------------------------------------------------------

fn evaluate_s1(
    state: &SymbolState,
    htf_open: f64,
    eval_candle: &Candle,
    price: f64,
    is_candle_close: bool,
) -> Option<Side> {
    if !is_candle_close {
        return None;
    }
    if state.daily_crosses > MAX_DAILY_CROSSES {
        return None;
    }

    // 4h EMA100 bias, applied only when enough history exists.
    let h4_closes = state.closes(14_400);
    let bias = last_ema(&h4_closes, 100).map(|ema100| {
        if price > ema100 {
            Side::Long
        } else {
            Side::Short
        }
    });

    let signal = breakout_signal(htf_open, eval_candle, check_price(eval_candle, price, true))?;
    match bias {
        Some(b) if b != signal => None,
        _ => Some(signal),
    }
}

// -----------------------------------------------------------------------------
// Strategy 2 — Moderate (1h / 3m)
// -----------------------------------------------------------------------------

fn evaluate_s2(
    state: &SymbolState,
    htf_open: f64,
    eval_candle: &Candle,
    price: f64,
    is_candle_close: bool,
) -> Option<Side> {
    let signal = breakout_signal(
        htf_open,
        eval_candle,
        check_price(eval_candle, price, is_candle_close),
    )?;

    // 3m RSI momentum gate (neutral 50 when history is short).
    let m3_closes = state.closes(180);
    let rsi_m3 = last_rsi(&m3_closes, 14).unwrap_or(50.0);
    match signal {
        Side::Long if rsi_m3 <= 55.0 => return None,
        Side::Short if rsi_m3 >= 45.0 => return None,
        _ => {}
    }

    // 4h EMA21/EMA50 structural bias.
    let h4_closes = state.closes(14_400);
    if let (Some(e21), Some(e50)) = (last_ema(&h4_closes, 21), last_ema(&h4_closes, 50)) {
        let bias = if e21 > e50 { Side::Long } else { Side::Short };
        if bias != signal {
            return None;
        }
    }

    Some(signal)
}

// -----------------------------------------------------------------------------
// Strategy 3 — Fast (15m / 1m)
// -----------------------------------------------------------------------------

fn evaluate_s3(state: &mut SymbolState, htf_open: f64) -> Option<Side> {
    let hour = Utc
        .timestamp_opt(state.current_ltf.map(|c| c.epoch).unwrap_or_default(), 0)
        .single()?
        .hour();
    if state.last_trade_hour != Some(hour) {
        state.last_trade_hour = Some(hour);
        state.hourly_trade_count = 0;
    }
    if state.hourly_trade_count >= MAX_HOURLY_TRADES {
        return None;
    }

    // Volatility floor: the current 1m ATR must clear the 20th percentile of
    // the rolling sample window.
    let m1 = state.candles(60);
    if let Some(atr_1m) = calculate_atr(&m1, 14) {
        state.record_atr_sample(atr_1m);
        if state.atr_1m_history.len() >= 20 {
            let samples: Vec<f64> = state.atr_1m_history.iter().copied().collect();
            if percentile_rank(&samples, atr_1m) < 20.0 {
                return None;
            }
        }
    }

    // Two consecutive 1m closes beyond the reference open with a confirming
    // body on the latest.
    if m1.len() < 2 {
        return None;
    }
    let c1 = m1[m1.len() - 1];
    let c2 = m1[m1.len() - 2];

    let signal = if c1.close > htf_open && c2.close > htf_open && c1.close > c1.open {
        Some(Side::Long)
    } else if c1.close < htf_open && c2.close < htf_open && c1.close < c1.open {
        Some(Side::Short)
    } else {
        None
    };

    if signal.is_some() {
        state.hourly_trade_count += 1;
    }
    signal
}

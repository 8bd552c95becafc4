// =============================================================================
// SNR Price-Action Strategy (4) — zone touch + reversal pattern
// =============================================================================
//
// On each LTF close:
//   1. Invalidate zones the close pushed fully through (>= 0.05% beyond).
//   2. Classify the candlestick pattern; marubozu and unlabeled bars pass.
//   3. Score the reversal setup; require score >= 2.
//   4. For a zone touched within 0.02%: bullish patterns at support need
//      5m RSI < 80 and 1h EMA50 alignment; bearish at resistance symmetric.
//   5. A matching zone's lifetime touch counter is incremented (stake is
//      halved at >= 3 touches by the execution layer).
//
// The echo-forecast veto from the scorecard applies to the final signal.
// =============================================================================

use tracing::debug;

use crate::config::BotConfig;
use crate::indicators::ema::last_ema;
use crate::indicators::patterns::{classify, score_reversal, Pattern};
use crate::indicators::rsi::last_rsi;
use crate::market_data::{Candle, SymbolState};
use crate::screener::scorecard::ScreenerScorecard;
use crate::types::Side;

/// Close-through distance that invalidates a zone (0.05%).
const BREAK_FRACTION: f64 = 0.0005;
/// Touch buffer around a zone (0.02%).
const TOUCH_FRACTION: f64 = 0.0002;
/// Minimum reversal score.
const MIN_SCORE: u8 = 2;

pub fn evaluate(
    state: &mut SymbolState,
    _cfg: &BotConfig,
    card: Option<&ScreenerScorecard>,
    eval_candle: &Candle,
    price: f64,
    is_candle_close: bool,
) -> Option<Side> {
    if !is_candle_close {
        return None;
    }

    // 1. Invalidate zones fully broken by this close.
    let close = eval_candle.close;
    state.snr_zones.retain(|z| {
        let broken_down = z.kind.acts_as_support() && close < z.price * (1.0 - BREAK_FRACTION);
        let broken_up = z.kind.acts_as_resistance() && close > z.price * (1.0 + BREAK_FRACTION);
        if broken_down || broken_up {
            debug!(symbol = %state.symbol, zone = z.price, "SNR zone broken by close-through");
            false
        } else {
            true
        }
    });
    if state.snr_zones.is_empty() {
        return None;
    }

    // 2./3. Pattern classification and scoring on the 1m ring.
    let ltf = state.candles(60);
    let pattern = classify(&ltf)?;
    if pattern == Pattern::Marubozu {
        return None;
    }
    if score_reversal(pattern, &ltf) < MIN_SCORE {
        return None;
    }

    // Momentum and trend filters.
    let rsi_m5 = last_rsi(&state.closes(300), 14).unwrap_or(50.0);
    let ema50_h1 = last_ema(&state.closes(3_600), 50);

    // 4. Zone touch check.
    for z in state.snr_zones.iter_mut() {
        let buffer = z.price * TOUCH_FRACTION;
        let touched =
            eval_candle.low <= z.price + buffer && eval_candle.high >= z.price - buffer;
        if !touched {
            continue;
        }

        if z.kind.acts_as_support() && pattern.is_bullish_reversal() {
            if rsi_m5 < 80.0 && ema50_h1.map_or(true, |ema| price > ema) {
                z.lifetime_touches += 1;
                return apply_veto(card, Side::Long);
            }
        } else if z.kind.acts_as_resistance() && pattern.is_bearish_reversal() {
            if rsi_m5 > 20.0 && ema50_h1.map_or(true, |ema| price < ema) {
                z.lifetime_touches += 1;
                return apply_veto(card, Side::Short);
            }
        }
    }

    None
}

/// Demote a signal whose echo forecast points the other way.
fn apply_veto(card: Option<&ScreenerScorecard>, side: Side) -> Option<Side> {
    if let Some(f) = card.and_then(|c| c.fcast.as_ref()) {
        if let Some(&first) = f.forecast_prices.first() {
            let against = match side {
                Side::Long => f.final_price < first,
                Side::Short => f.final_price > first,
            };
            if against {
                return None;
            }
        }
    }
    Some(side)
}

/// Whether the zone nearest to `price` has been heavily tested (stake is
/// halved at three or more lifetime touches).
pub fn zone_heavily_tested(state: &SymbolState, price: f64) -> bool {
    state
        .snr_zones
        .iter()
        .find(|z| z.price != 0.0 && ((price - z.price) / z.price).abs() < 0.005)
        .is_some_and(|z| z.lifetime_touches >= 3)
}

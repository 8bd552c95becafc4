// =============================================================================
// Screener-Driven Strategies (5, 6, 7)
// =============================================================================
//
// All three consume the per-symbol scorecard. Shared gate: the scorecard must
// be fresh (<= 30s), its signal actionable, and — when an echo forecast is
// present — the correlation at least 0.5 with a structural reward/risk of at
// least 1.5.
//
//   S5 adds entry confirmation: structure contact plus a reversal pattern in
//      scalp mode, pullback-resumption candles in multiplier mode, and the
//      late-entry / volatility-freeze vetoes.
//   S6 (legacy) enters directly once the gate passes.
//   S7 debounces on the tracked timeframe: re-entry requires the composite
//      recommendation to leave and re-enter the signal state.
// =============================================================================

use tracing::debug;

use crate::config::{BotConfig, ContractKind};
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::ema::last_ema;
use crate::indicators::forecast::structural_rr;
use crate::indicators::patterns::{classify, Pattern};
use crate::indicators::supertrend::supertrend_default;
use crate::market_data::SymbolState;
use crate::screener::scorecard::{ScreenerScorecard, Signal};
use crate::types::Side;

/// Minimum echo correlation for screener-driven entries.
const MIN_CORRELATION: f64 = 0.5;
/// Minimum structural reward/risk.
const MIN_RR: f64 = 1.5;
/// Proximity to a pullback zone (EMA50 / SuperTrend), as a fraction.
const ZONE_PROXIMITY: f64 = 0.005;
/// Proximity to a fractal or SNR level, as a fraction.
const STRUCTURE_PROXIMITY: f64 = 0.002;

/// Shared gate. Returns the intended side or `None`.
fn gate(card: &ScreenerScorecard, entry: f64, now: i64) -> Option<Side> {
    if !card.is_fresh(now) {
        return None;
    }
    let side = match card.signal {
        Signal::Buy => Side::Long,
        Signal::Sell => Side::Short,
        Signal::Wait => return None,
    };

    if let Some(f) = &card.fcast {
        if f.correlation < MIN_CORRELATION {
            return None;
        }
        if structural_rr(f, side, entry) < MIN_RR {
            return None;
        }
    }

    Some(side)
}

// -----------------------------------------------------------------------------
// Strategies 5 & 6
// -----------------------------------------------------------------------------

pub fn evaluate_intelligence(
    state: &mut SymbolState,
    cfg: &BotConfig,
    card: Option<&ScreenerScorecard>,
    now: i64,
) -> Option<Side> {
    let card = card?;
    let price = state.last_tick?;
    let side = gate(card, price, now)?;

    // Legacy model takes the scorecard at face value.
    if cfg.active_strategy == crate::config::StrategyId::S6 {
        return Some(side);
    }

    match cfg.contract_type {
        ContractKind::Multiplier => confirm_multiplier_pullback(state, side),
        ContractKind::RiseFall => confirm_scalp_entry(state, card, side, price),
    }
}

/// Multiplier entries wait for a pullback to the 15m EMA50 / SuperTrend zone
/// followed by resumption candles on 5m and 1m.
fn confirm_multiplier_pullback(state: &SymbolState, side: Side) -> Option<Side> {
    let m15 = state.candles(900);
    if m15.is_empty() {
        return None;
    }
    let price_15 = m15.last()?.close;

    let ema50_15 = last_ema(&state.closes(900), 50)?;
    let st_15 = supertrend_default(&m15).and_then(|s| s.last_level());

    let near_ema = ema50_15 != 0.0 && ((price_15 - ema50_15) / ema50_15).abs() < ZONE_PROXIMITY;
    let near_st = st_15
        .is_some_and(|lvl| lvl != 0.0 && ((price_15 - lvl) / lvl).abs() < ZONE_PROXIMITY);
    if !near_ema && !near_st {
        return None;
    }

    let is_long = side == Side::Long;
    let m5 = state.candles(300);
    let m5_resumed = m5
        .last()
        .is_some_and(|c| if is_long { c.is_bullish() } else { !c.is_bullish() });
    if !m5_resumed {
        return None;
    }

    let m1 = state.candles(60);
    let ltf_confirmed = m1
        .last()
        .is_some_and(|c| if is_long { c.is_bullish() } else { !c.is_bullish() });
    ltf_confirmed.then_some(side)
}

/// Scalp entries require structure contact, a non-exhausted oscillator when
/// the contact is a fractal, and a confirming reversal pattern — after the
/// late-entry and volatility-freeze vetoes.
fn confirm_scalp_entry(
    state: &SymbolState,
    card: &ScreenerScorecard,
    side: Side,
    price: f64,
) -> Option<Side> {
    let is_long = side == Side::Long;
    let m1 = state.candles(60);

    // Late-entry veto: the trigger candle already ran more than 30% of the
    // average 1m ATR.
    if let Some(last) = m1.last() {
        let atr_values = crate::indicators::atr::atr_series(&m1, 14);
        if !atr_values.is_empty() {
            let avg_atr = atr_values.iter().sum::<f64>() / atr_values.len() as f64;
            if last.body() > avg_atr * 0.3 {
                debug!(symbol = %state.symbol, "scalp entry cancelled: late entry");
                return None;
            }
        }
    }

    // Volatility freeze.
    if card.atr_24h > 0.0 && card.atr_1m < card.atr_24h * 0.1 {
        debug!(symbol = %state.symbol, "scalp entry paused: volatility floor");
        return None;
    }
    if card.atr_1m < 1e-5 {
        return None;
    }

    // Structure contact: recent fractal, 15m Bollinger band, or SNR zone.
    let fractals = if is_long {
        &card.fractal_lows
    } else {
        &card.fractal_highs
    };
    let fractal_touch = fractals
        .iter()
        .rev()
        .take(3)
        .any(|f| *f != 0.0 && ((price - f) / f).abs() < STRUCTURE_PROXIMITY);

    let mut at_structure = fractal_touch;
    if !at_structure {
        let m15_closes = state.closes(900);
        if let Some(bb) = calculate_bollinger(&m15_closes, 20, 2.0) {
            let price_15 = *m15_closes.last()?;
            let at_bb = if is_long {
                price_15 <= bb.lower
            } else {
                price_15 >= bb.upper
            };
            let at_snr = state.snr_zones.iter().any(|z| {
                z.price != 0.0 && ((price_15 - z.price) / z.price).abs() < STRUCTURE_PROXIMITY
            });
            at_structure = at_bb || at_snr;
        }
    }
    if !at_structure {
        return None;
    }

    // A fractal contact without an exhausted oscillator is a fade, not a
    // reversal.
    let stoch_extreme = if is_long {
        card.srsi_k <= 0.2
    } else {
        card.srsi_k >= 0.8
    };
    if fractal_touch && !stoch_extreme {
        return None;
    }

    // Reversal pattern confirmation on the 1m ring.
    let pattern = classify(&m1)?;
    let confirmed = match side {
        Side::Long => matches!(
            pattern,
            Pattern::BullishPin | Pattern::BullishEngulfing | Pattern::TweezerBottom
        ),
        Side::Short => matches!(
            pattern,
            Pattern::BearishPin | Pattern::BearishEngulfing | Pattern::TweezerTop
        ),
    };
    confirmed.then_some(side)
}

// -----------------------------------------------------------------------------
// Strategy 7
// -----------------------------------------------------------------------------

pub fn evaluate_alignment(
    state: &mut SymbolState,
    cfg: &BotConfig,
    card: Option<&ScreenerScorecard>,
    now: i64,
) -> Option<Side> {
    let card = card?;
    let price = state.last_tick?;

    // Tracked recommendation for the debounce: the lowest enabled timeframe.
    let tracked = [&card.summary_small, &card.summary_mid, &card.summary_high]
        .into_iter()
        .flatten()
        .find(|s| s.as_str() != "OFF")
        .cloned();

    let side = gate(card, price, now);

    let result = match (side, &tracked) {
        (Some(side), Some(rec)) => {
            let want = match side {
                Side::Long => "BUY",
                Side::Short => "SELL",
            };
            // Re-entry needs the tracked recommendation to have left the
            // signal state since the last evaluation.
            let previous_same = state
                .last_alignment_rec
                .as_deref()
                .is_some_and(|prev| prev.contains(want));
            if rec.contains(want) && !previous_same {
                Some(side)
            } else {
                None
            }
        }
        (Some(side), None) => Some(side),
        (None, _) => None,
    };

    if let Some(rec) = tracked {
        state.last_alignment_rec = Some(rec);
    }
    result
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyId;
    use crate::indicators::forecast::EchoForecast;
    use crate::screener::scorecard::Direction;

    fn fresh_card(signal: Signal, now: i64) -> ScreenerScorecard {
        ScreenerScorecard {
            signal,
            direction: Direction::Call,
            confidence: 80.0,
            threshold: 72.0,
            atr_1m: 0.5,
            atr_24h: 1.0,
            last_update: now,
            ..Default::default()
        }
    }

    #[test]
    fn gate_rejects_stale_cards() {
        let card = fresh_card(Signal::Buy, 1_000);
        assert_eq!(gate(&card, 100.0, 1_020), Some(Side::Long));
        assert_eq!(gate(&card, 100.0, 1_031), None);
    }

    #[test]
    fn gate_rejects_wait() {
        let card = fresh_card(Signal::Wait, 1_000);
        assert_eq!(gate(&card, 100.0, 1_000), None);
    }

    #[test]
    fn gate_enforces_correlation_and_rr() {
        let mut card = fresh_card(Signal::Buy, 1_000);
        card.fcast = Some(EchoForecast {
            forecast_prices: vec![100.5, 101.0, 102.0],
            correlation: 0.4,
            high: 102.0,
            low: 100.5,
            final_price: 102.0,
        });
        assert_eq!(gate(&card, 100.0, 1_000), None); // low correlation

        card.fcast.as_mut().unwrap().correlation = 0.8;
        assert_eq!(gate(&card, 100.0, 1_000), Some(Side::Long)); // risk <= 0 caps RR

        // Entry far above the forecast band: reward shrinks, risk grows.
        assert_eq!(gate(&card, 101.9, 1_000), None);
    }

    #[test]
    fn s6_enters_directly_after_gate() {
        let mut cfg = BotConfig::default();
        cfg.active_strategy = StrategyId::S6;
        let mut st = SymbolState::new("R_100");
        st.last_tick = Some(100.0);

        let card = fresh_card(Signal::Sell, 1_000);
        assert_eq!(
            evaluate_intelligence(&mut st, &cfg, Some(&card), 1_000),
            Some(Side::Short)
        );
    }

    #[test]
    fn s5_scalp_requires_structure_and_pattern() {
        let mut cfg = BotConfig::default();
        cfg.active_strategy = StrategyId::S5;
        let mut st = SymbolState::new("R_100");
        st.last_tick = Some(100.0);

        // No structure anywhere near: blocked even with a BUY signal.
        let card = fresh_card(Signal::Buy, 1_000);
        assert_eq!(evaluate_intelligence(&mut st, &cfg, Some(&card), 1_000), None);
    }

    #[test]
    fn s5_volatility_freeze_blocks_entry() {
        let mut cfg = BotConfig::default();
        cfg.active_strategy = StrategyId::S5;
        let mut st = SymbolState::new("R_100");
        st.last_tick = Some(100.0);

        let mut card = fresh_card(Signal::Buy, 1_000);
        card.atr_1m = 0.05; // below 10% of the 24h ATR
        card.fractal_lows = vec![100.01];
        assert_eq!(evaluate_intelligence(&mut st, &cfg, Some(&card), 1_000), None);
    }

    #[test]
    fn s7_fires_once_then_debounces() {
        let cfg = {
            let mut c = BotConfig::default();
            c.active_strategy = StrategyId::S7;
            c
        };
        let mut st = SymbolState::new("R_100");
        st.last_tick = Some(100.0);

        let mut card = fresh_card(Signal::Buy, 1_000);
        card.summary_small = Some("BUY".to_string());
        card.summary_mid = Some("BUY".to_string());
        card.summary_high = Some("BUY".to_string());
        card.label = Some("ALIGNED_BUY".to_string());

        // First evaluation fires.
        assert_eq!(
            evaluate_alignment(&mut st, &cfg, Some(&card), 1_000),
            Some(Side::Long)
        );
        // Same persistent signal: suppressed.
        assert_eq!(evaluate_alignment(&mut st, &cfg, Some(&card), 1_005), None);
        assert_eq!(evaluate_alignment(&mut st, &cfg, Some(&card), 1_010), None);

        // The small TF flips away...
        let mut neutral = card.clone();
        neutral.signal = Signal::Wait;
        neutral.summary_small = Some("NEUTRAL".to_string());
        assert_eq!(evaluate_alignment(&mut st, &cfg, Some(&neutral), 1_015), None);

        // ...and back: fires again.
        card.last_update = 1_020;
        assert_eq!(
            evaluate_alignment(&mut st, &cfg, Some(&card), 1_020),
            Some(Side::Long)
        );
    }

    #[test]
    fn s7_stale_card_is_ignored() {
        let cfg = {
            let mut c = BotConfig::default();
            c.active_strategy = StrategyId::S7;
            c
        };
        let mut st = SymbolState::new("R_100");
        st.last_tick = Some(100.0);

        let mut card = fresh_card(Signal::Buy, 1_000);
        card.summary_small = Some("BUY".to_string());
        assert_eq!(evaluate_alignment(&mut st, &cfg, Some(&card), 2_000), None);
    }
}

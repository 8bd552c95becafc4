// =============================================================================
// Synthetic Intelligence Screener (strategy 5)
// =============================================================================
//
// Scores a symbol across four blocks and blends them by regime:
//   - Trend:      EMA50/EMA200 alignment, SuperTrend direction, ADX strength
//   - Momentum:   RSI, StochRSI, MACD divergence
//   - Volatility: Bollinger position, band breakout
//   - Structure:  fractals (scalp) / order blocks + FVGs (multiplier), SNR
//
// Core timeframe is 5m in scalp (rise/fall) mode and 1h in multiplier mode.
// Confidence lands in [-100, 100]; the adaptive threshold tightens during
// dead hours and on loss streaks; an echo-forecast contradiction demotes the
// signal to WAIT.
// =============================================================================

use chrono::{TimeZone, Timelike, Utc};

use crate::config::{BotConfig, ContractKind};
use crate::indicators::adx::calculate_adx;
use crate::indicators::atr::{calculate_atr, relative_atr};
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::ema::last_ema;
use crate::indicators::forecast::{echo_arrival_index, echo_forecast, EchoForecast};
use crate::indicators::macd::macd_divergence;
use crate::indicators::rsi::{last_rsi, stoch_rsi};
use crate::indicators::structure::{calculate_fractals, calculate_fvg, calculate_order_blocks};
use crate::indicators::supertrend::supertrend_default;
use crate::market_data::MarketView;
use crate::screener::scorecard::{is_dead_hours, Direction, ScreenerScorecard, Signal};
use crate::types::Side;

/// Echo forecast reference window (core candles).
const ECHO_WINDOW: usize = 20;
/// Candidate windows evaluated per forecast.
const ECHO_EVAL: usize = 40;

/// Scalp-mode base threshold.
const BASE_THRESHOLD_SCALP: f64 = 72.0;
/// Multiplier-mode base threshold.
const BASE_THRESHOLD_MULT: f64 = 68.0;

fn block_score(pos: f64, neg: f64) -> f64 {
    if pos + neg > 0.0 {
        (pos - neg) / (pos + neg)
    } else {
        0.0
    }
}

/// Compute the strategy-5 scorecard, or `None` while the core series is still
/// warming up (< 100 candles).
pub fn compute_synthetic(view: &MarketView, cfg: &BotConfig, now: i64) -> Option<ScreenerScorecard> {
    let is_mult = cfg.contract_type == ContractKind::Multiplier;
    let core_granularity: u32 = if is_mult { 3_600 } else { 300 };
    let core = view.series(core_granularity);
    if core.len() < 100 {
        return None;
    }

    let closes: Vec<f64> = core.iter().map(|c| c.close).collect();
    let last_close = *closes.last()?;

    let hour = Utc.timestamp_opt(now, 0).single()?.hour();
    let dead_hours = is_dead_hours(hour);

    // --- Structure inputs ---------------------------------------------------
    let fractals = if is_mult {
        Default::default()
    } else {
        calculate_fractals(core, 2)
    };
    let order_blocks = if is_mult {
        calculate_order_blocks(core)
    } else {
        Vec::new()
    };
    let fvgs = if is_mult { calculate_fvg(core, 50) } else { Vec::new() };

    // --- Trend block --------------------------------------------------------
    let mut t_pos = 0.0;
    let mut t_neg = 0.0;
    let ema50 = last_ema(&closes, 50)?;
    if last_close > ema50 {
        t_pos += 1.0;
    } else {
        t_neg += 1.0;
    }
    if let Some(ema200) = last_ema(&closes, 200) {
        if ema50 > ema200 {
            t_pos += 1.0;
        } else {
            t_neg += 1.0;
        }
    }

    let st = supertrend_default(core);
    let st_dir = st.as_ref().and_then(|s| s.last_direction()).unwrap_or(0);
    if st_dir == 1 {
        t_pos += 2.0;
    } else if st_dir == -1 {
        t_neg += 2.0;
    }

    let adx = calculate_adx(core, 14).map(|r| r.adx).unwrap_or(0.0);
    if adx > 25.0 {
        if last_close > ema50 {
            t_pos += 1.0;
        } else {
            t_neg += 1.0;
        }
    }
    let trend = block_score(t_pos, t_neg);

    // --- Momentum block -----------------------------------------------------
    let mut m_pos = 0.0;
    let mut m_neg = 0.0;
    if let Some(rsi) = last_rsi(&closes, 14) {
        if rsi > 50.0 {
            m_pos += 1.0;
        } else {
            m_neg += 1.0;
        }
    }
    let (srsi_k, srsi_d) = stoch_rsi(&closes, 14).unwrap_or((0.5, 0.5));
    if srsi_k > 0.5 {
        m_pos += 1.0;
    } else {
        m_neg += 1.0;
    }
    if srsi_k > srsi_d {
        m_pos += 1.0;
    } else {
        m_neg += 1.0;
    }
    match macd_divergence(&closes, 20) {
        1 => m_pos += 2.0,
        -1 => m_neg += 2.0,
        _ => {}
    }
    let momentum = block_score(m_pos, m_neg);

    // --- Volatility block ---------------------------------------------------
    let mut v_pos = 0.0;
    let mut v_neg = 0.0;
    if let Some(bb) = calculate_bollinger(&closes, 20, 2.0) {
        if last_close > bb.middle {
            v_pos += 1.0;
        } else {
            v_neg += 1.0;
        }
        if last_close > bb.upper {
            v_pos += 1.0;
        } else if last_close < bb.lower {
            v_neg += 1.0;
        }
    }
    let volatility = block_score(v_pos, v_neg);

    // --- Structure block ----------------------------------------------------
    let mut s_pos = 0.0;
    let mut s_neg = 0.0;
    let dist = (last_close - ema50) / ema50;
    if dist.abs() < 0.05 {
        s_pos += 1.0;
    } else {
        s_neg += 1.0;
    }

    if is_mult {
        let ob_hit = order_blocks
            .iter()
            .find(|ob| ob.price != 0.0 && ((last_close - ob.price) / ob.price).abs() < 0.005);
        let fvg_hit = fvgs.iter().find(|g| g.contains(last_close));
        match (ob_hit, fvg_hit) {
            (Some(ob), Some(g)) if ob.bullish && g.bullish => s_pos += 5.0,
            (Some(ob), Some(g)) if !ob.bullish && !g.bullish => s_neg += 5.0,
            (Some(ob), _) => {
                if ob.bullish {
                    s_pos += 3.0;
                } else {
                    s_neg += 3.0;
                }
            }
            (None, Some(g)) => {
                if g.bullish {
                    s_pos += 1.0;
                } else {
                    s_neg += 1.0;
                }
            }
            (None, None) => {}
        }
    } else {
        for fh in fractals.highs.iter().rev().take(5) {
            if *fh != 0.0 && ((last_close - fh) / fh).abs() < 0.002 {
                s_neg += 3.0;
            }
        }
        for fl in fractals.lows.iter().rev().take(5) {
            if *fl != 0.0 && ((last_close - fl) / fl).abs() < 0.002 {
                s_pos += 3.0;
            }
        }
    }

    for z in &view.snr_zones {
        if z.price != 0.0 && ((last_close - z.price) / z.price).abs() < 0.005 {
            if z.kind.acts_as_support() {
                s_pos += 2.0;
            }
            if z.kind.acts_as_resistance() {
                s_neg += 2.0;
            }
        }
    }
    let structure = block_score(s_pos, s_neg);

    // --- Regime blend -------------------------------------------------------
    let (regime, confidence) = if adx > 25.0 {
        ("Trending", trend * 40.0 + volatility * 40.0 + structure * 20.0)
    } else if adx < 20.0 {
        ("Ranging", momentum * 40.0 + structure * 40.0 + volatility * 20.0)
    } else if is_mult {
        (
            "Mixed",
            trend * 40.0 + volatility * 30.0 + structure * 20.0 + momentum * 10.0,
        )
    } else {
        (
            "Mixed",
            structure * 35.0 + momentum * 35.0 + volatility * 20.0 + trend * 10.0,
        )
    };
    let confidence = confidence.clamp(-100.0, 100.0);
    let direction = if confidence > 0.0 {
        Direction::Call
    } else {
        Direction::Put
    };

    // --- Volatility metrics -------------------------------------------------
    let atr = calculate_atr(core, 14).unwrap_or(0.0);
    let atr_1m = calculate_atr(view.series(60), 14).unwrap_or(0.0);
    let h1 = view.series(3_600);
    let atr_24h = if h1.len() >= 25 {
        calculate_atr(&h1[h1.len() - 25..], 14).unwrap_or(0.0)
    } else {
        0.0
    };

    // --- Suggested multiplier -----------------------------------------------
    let mut multiplier: f64 = 10.0;
    if is_mult {
        let rel_atr = relative_atr(core, 14).unwrap_or(0.0);
        multiplier = if rel_atr >= 0.008 && adx > 30.0 {
            50.0
        } else if rel_atr >= 0.005 && adx > 25.0 {
            20.0
        } else if rel_atr >= 0.003 && adx > 20.0 {
            10.0
        } else {
            5.0
        };
        if dead_hours {
            multiplier = multiplier.min(10.0);
        }
    }

    // --- Echo forecast & veto -----------------------------------------------
    let fcast = echo_forecast(&closes, ECHO_WINDOW, ECHO_EVAL);
    let vetoed = fcast.as_ref().is_some_and(|f| match direction {
        Direction::Call => f.final_price < last_close,
        Direction::Put => f.final_price > last_close,
    });

    let expiry_min = suggest_expiry(
        fcast.as_ref(),
        direction.side(),
        last_close,
        atr,
        confidence,
        core_granularity,
    );

    // --- Adaptive threshold -------------------------------------------------
    let streak = view.consecutive_losses;
    let base = if is_mult {
        BASE_THRESHOLD_MULT
    } else {
        BASE_THRESHOLD_SCALP
    };
    let mut threshold = base;
    if dead_hours {
        threshold += 5.0;
    }
    if streak >= 3 {
        threshold += 5.0 * (streak as f64 - 2.0);
    }

    let signal: Signal = ScreenerScorecard::resolve_signal(confidence, threshold, vetoed);

    Some(ScreenerScorecard {
        confidence,
        threshold,
        direction,
        signal,
        regime: regime.to_string(),
        trend,
        momentum,
        volatility,
        structure,
        adx,
        srsi_k,
        atr,
        atr_1m,
        atr_24h,
        is_dead_hours: dead_hours,
        streak,
        expiry_min,
        multiplier,
        supertrend_dir: st_dir,
        fcast,
        fractal_highs: fractals.highs,
        fractal_lows: fractals.lows,
        label: None,
        summary_small: None,
        summary_mid: None,
        summary_high: None,
        over_adr: false,
        last_update: now,
    })
}

/// Expiry in minutes from the echo-arrival index: the first forecast step at
/// which price would cross `entry ± (0.5 + |confidence|/100) * ATR` in the
/// signal direction. Falls back to the confidence bands (5/10/15 min).
pub fn suggest_expiry(
    fcast: Option<&EchoForecast>,
    side: Side,
    entry: f64,
    atr: f64,
    confidence: f64,
    core_granularity: u32,
) -> u32 {
    if let Some(f) = fcast {
        if atr > 0.0 {
            let reach = (0.5 + confidence.abs() / 100.0) * atr;
            if let Some(idx) = echo_arrival_index(f, side, entry, reach) {
                let core_minutes = (core_granularity / 60).max(1);
                return (((idx as u32) + 1) * core_minutes).clamp(1, 120);
            }
        }
    }

    if confidence.abs() > 75.0 {
        15
    } else if confidence.abs() > 60.0 {
        10
    } else {
        5
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Candle;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// Noon UTC, well clear of dead hours.
    const NOON: i64 = 1_700_000_000 / 86_400 * 86_400 + 12 * 3_600;
    /// 23:00 UTC.
    const NIGHT: i64 = 1_700_000_000 / 86_400 * 86_400 + 23 * 3_600;

    fn candles(prices: impl Iterator<Item = f64>, granularity: u32) -> Vec<Candle> {
        prices
            .enumerate()
            .map(|(i, p)| Candle {
                epoch: i as i64 * granularity as i64,
                open: p - 0.05,
                high: p + 0.3,
                low: p - 0.3,
                close: p,
            })
            .collect()
    }

    fn uptrend_view() -> MarketView {
        let m5 = candles((0..240).map(|i| 100.0 + i as f64 * 0.4), 300);
        let m1 = candles((0..120).map(|i| 190.0 + i as f64 * 0.05), 60);
        let h1 = candles((0..60).map(|i| 80.0 + i as f64 * 2.0), 3_600);

        let mut map = BTreeMap::new();
        map.insert(300, Arc::new(m5));
        map.insert(60, Arc::new(m1));
        map.insert(3_600, Arc::new(h1));

        MarketView {
            candles: map,
            last_tick: Some(195.6),
            htf_open: Some(100.0),
            snr_zones: Vec::new(),
            fractal_highs: Vec::new(),
            fractal_lows: Vec::new(),
            consecutive_losses: 0,
        }
    }

    #[test]
    fn insufficient_core_data_is_none() {
        let view = MarketView::default();
        assert!(compute_synthetic(&view, &BotConfig::default(), NOON).is_none());
    }

    #[test]
    fn uptrend_scores_call_direction() {
        let card = compute_synthetic(&uptrend_view(), &BotConfig::default(), NOON).unwrap();
        assert_eq!(card.direction, Direction::Call);
        assert!(card.confidence > 0.0);
        assert!(card.trend > 0.0);
        assert!((card.threshold - BASE_THRESHOLD_SCALP).abs() < f64::EPSILON);
        assert!(!card.is_dead_hours);
        assert_eq!(card.streak, 0);
        assert!(card.atr > 0.0);
    }

    #[test]
    fn signal_respects_threshold_invariant() {
        let card = compute_synthetic(&uptrend_view(), &BotConfig::default(), NOON).unwrap();
        if card.signal != Signal::Wait {
            assert!(card.confidence.abs() >= card.threshold);
        }
    }

    #[test]
    fn dead_hours_raise_threshold() {
        let day = compute_synthetic(&uptrend_view(), &BotConfig::default(), NOON).unwrap();
        let night = compute_synthetic(&uptrend_view(), &BotConfig::default(), NIGHT).unwrap();
        assert!((night.threshold - day.threshold - 5.0).abs() < f64::EPSILON);
        assert!(night.is_dead_hours);
    }

    #[test]
    fn loss_streak_raises_threshold() {
        let mut view = uptrend_view();
        view.consecutive_losses = 4;
        let card = compute_synthetic(&view, &BotConfig::default(), NOON).unwrap();
        // 5 * (4 - 2) = +10 over base.
        assert!((card.threshold - (BASE_THRESHOLD_SCALP + 10.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn multiplier_mode_uses_hourly_core() {
        let mut cfg = BotConfig::default();
        cfg.contract_type = ContractKind::Multiplier;

        // Only 1h candles present: scalp mode would bail, multiplier works.
        let h1 = candles((0..240).map(|i| 100.0 + i as f64 * 0.8), 3_600);
        let mut map = BTreeMap::new();
        map.insert(3_600, Arc::new(h1));
        let view = MarketView {
            candles: map,
            ..Default::default()
        };

        let card = compute_synthetic(&view, &cfg, NOON).unwrap();
        assert!((card.threshold - BASE_THRESHOLD_MULT).abs() < f64::EPSILON);
        assert!(compute_synthetic(&view, &BotConfig::default(), NOON).is_none());
    }

    #[test]
    fn expiry_fallback_bands() {
        assert_eq!(suggest_expiry(None, Side::Long, 100.0, 1.0, 80.0, 300), 15);
        assert_eq!(suggest_expiry(None, Side::Long, 100.0, 1.0, 65.0, 300), 10);
        assert_eq!(suggest_expiry(None, Side::Long, 100.0, 1.0, 30.0, 300), 5);
    }

    #[test]
    fn expiry_from_echo_arrival() {
        let f = EchoForecast {
            forecast_prices: vec![100.2, 100.6, 101.4, 102.0],
            correlation: 0.9,
            high: 102.0,
            low: 100.2,
            final_price: 102.0,
        };
        // reach = (0.5 + 0.8) * 1.0 = 1.3 — first crossed at index 2.
        let e = suggest_expiry(Some(&f), Side::Long, 100.0, 1.0, 80.0, 300);
        assert_eq!(e, 15); // (2 + 1) * 5 minutes
    }
}

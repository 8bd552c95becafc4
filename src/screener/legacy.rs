// =============================================================================
// Legacy Intelligence Screener v1 (strategy 6)
// =============================================================================
//
// Weighted block model over 1m/1h/4h: trend x3, momentum x2, volatility x1,
// structure x2, normalised to a [-100, 100] confidence with a fixed threshold
// of 60 and the echo-forecast veto.
// =============================================================================

use crate::indicators::adx::calculate_adx;
use crate::indicators::atr::{atr_series, calculate_atr};
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::composite::{cci, ichimoku_base, roc, williams_r};
use crate::indicators::ema::{last_ema, last_sma};
use crate::indicators::forecast::echo_forecast;
use crate::indicators::macd::last_macd;
use crate::indicators::rsi::{last_rsi, stoch_rsi};
use crate::market_data::MarketView;
use crate::screener::scorecard::{Direction, ScreenerScorecard};

/// Fixed entry threshold for the legacy model.
const LEGACY_THRESHOLD: f64 = 60.0;

fn sentiment(signals: &[f64]) -> f64 {
    if signals.is_empty() {
        0.0
    } else {
        signals.iter().sum::<f64>() / signals.len() as f64
    }
}

/// Compute the strategy-6 scorecard, or `None` while the hourly core series
/// is still warming up.
pub fn compute_legacy(view: &MarketView, now: i64) -> Option<ScreenerScorecard> {
    let core = view.series(3_600);
    if core.len() < 60 {
        return None;
    }
    let closes: Vec<f64> = core.iter().map(|c| c.close).collect();
    let highs: Vec<f64> = core.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = core.iter().map(|c| c.low).collect();
    let last_close = *closes.last()?;

    // --- Trend block (1h core with 4h bias), weight 3 -----------------------
    let mut t_signals: Vec<f64> = Vec::new();
    let ema50 = last_ema(&closes, 50)?;
    t_signals.push(if last_close > ema50 { 1.0 } else { -1.0 });
    if let Some(ema200) = last_ema(&closes, 200) {
        t_signals.push(if ema50 > ema200 { 1.0 } else { -1.0 });
    }
    if let Some(sma20) = last_sma(&closes, 20) {
        t_signals.push(if last_close > sma20 { 1.0 } else { -1.0 });
    }

    let adx = calculate_adx(core, 14).map(|r| r.adx).unwrap_or(0.0);
    if adx > 25.0 {
        t_signals.push(if last_close > ema50 { 1.0 } else { -1.0 });
    }

    if let Some(base) = ichimoku_base(&highs, &lows, 26) {
        if last_close > base {
            t_signals.push(1.0);
        } else if last_close < base {
            t_signals.push(-1.0);
        }
    }

    if let Some((line, signal)) = last_macd(&closes) {
        t_signals.push(if line > signal { 1.0 } else { -1.0 });
    }

    // 4h bias: EMA21 over EMA50.
    let h4_closes = view.closes(14_400);
    if let (Some(e21), Some(e50)) = (last_ema(&h4_closes, 21), last_ema(&h4_closes, 50)) {
        t_signals.push(if e21 > e50 { 1.0 } else { -1.0 });
    }

    let trend = sentiment(&t_signals) * 3.0;

    // --- Momentum block (1h), weight 2 --------------------------------------
    let mut m_signals: Vec<f64> = Vec::new();
    if let Some(rsi) = last_rsi(&closes, 14) {
        m_signals.push(if rsi > 50.0 { 1.0 } else { -1.0 });
    }
    let srsi_k = stoch_rsi(&closes, 14).map(|(k, _)| k).unwrap_or(0.5);
    m_signals.push(if srsi_k > 0.5 { 1.0 } else { -1.0 });
    if let Some(wr) = williams_r(&highs, &lows, &closes, 14) {
        m_signals.push(if wr > -50.0 { 1.0 } else { -1.0 });
    }
    if let Some(r) = roc(&closes, 12) {
        m_signals.push(if r > 0.0 { 1.0 } else { -1.0 });
    }
    if let Some(c) = cci(core, 20) {
        m_signals.push(if c > 0.0 { 1.0 } else { -1.0 });
    }
    let momentum = sentiment(&m_signals) * 2.0;

    // --- Volatility block (1h), weight 1 ------------------------------------
    let mut v_pos = 0.0;
    let v_neg = 0.0;
    let atr_values = atr_series(core, 14);
    if atr_values.len() >= 2 && atr_values[atr_values.len() - 1] > atr_values[atr_values.len() - 2]
    {
        v_pos += 0.5;
    }
    if let Some(bb) = calculate_bollinger(&closes, 20, 2.0) {
        if bb.width() > 0.0 {
            v_pos += 0.5;
        }
    }
    let volatility = if v_pos + v_neg > 0.0 {
        (v_pos - v_neg) / (v_pos + v_neg)
    } else {
        0.0
    };

    // --- Structure block (1h), weight 2 -------------------------------------
    let mut s_pos = 0.0;
    let mut s_neg = 0.0;
    let dist = (last_close - ema50) / ema50;
    if dist.abs() < 0.05 {
        s_pos += 1.0;
    } else if dist.abs() > 0.1 {
        s_neg += 0.5;
    }
    let structure = if s_pos + s_neg > 0.0 {
        (s_pos - s_neg) / (s_pos + s_neg) * 2.0
    } else {
        0.0
    };

    // --- Confidence ----------------------------------------------------------
    let raw_sum = trend + momentum + volatility + structure;
    let confidence = (raw_sum / 8.0 * 100.0).clamp(-100.0, 100.0);
    let direction = if confidence > 0.0 {
        Direction::Call
    } else {
        Direction::Put
    };

    let fcast = echo_forecast(&closes, 20, 40);
    let vetoed = fcast.as_ref().is_some_and(|f| match direction {
        Direction::Call => f.final_price < last_close,
        Direction::Put => f.final_price > last_close,
    });

    let abs_conf = confidence.abs();
    let expiry_min = if abs_conf >= 70.0 {
        15
    } else if abs_conf >= 55.0 {
        10
    } else {
        5
    };
    let multiplier = if abs_conf >= 80.0 {
        50.0
    } else if abs_conf >= 65.0 {
        20.0
    } else {
        5.0
    };

    let atr = calculate_atr(core, 14).unwrap_or(0.0);
    let atr_1m = calculate_atr(view.series(60), 14).unwrap_or(0.0);

    let signal = ScreenerScorecard::resolve_signal(confidence, LEGACY_THRESHOLD, vetoed);

    Some(ScreenerScorecard {
        confidence,
        threshold: LEGACY_THRESHOLD,
        direction,
        signal,
        regime: if adx > 25.0 { "Trending" } else { "Ranging" }.to_string(),
        trend,
        momentum,
        volatility,
        structure,
        adx,
        srsi_k,
        atr,
        atr_1m,
        atr_24h: 0.0,
        is_dead_hours: false,
        streak: view.consecutive_losses,
        expiry_min,
        multiplier,
        supertrend_dir: 0,
        fcast,
        fractal_highs: Vec::new(),
        fractal_lows: Vec::new(),
        label: None,
        summary_small: None,
        summary_mid: None,
        summary_high: None,
        over_adr: false,
        last_update: now,
    })
}

// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
// True Range for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is the smoothed average of TR using Wilder's method:
//   ATR_0 = SMA of first `period` TR values
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
// =============================================================================

use crate::market_data::Candle;

/// Compute the full ATR series (one value per bar from index `period`).
///
/// # Edge cases
/// - `period == 0` or fewer than `period + 1` candles => empty vec.
/// - Non-finite intermediate values truncate the series.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period + 1 {
        return Vec::new();
    }

    let mut tr_values: Vec<f64> = Vec::with_capacity(candles.len() - 1);
    for i in 1..candles.len() {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_close = candles[i - 1].close;
        tr_values.push(
            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs()),
        );
    }

    let seed: f64 = tr_values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return Vec::new();
    }

    let period_f = period as f64;
    let mut result = Vec::with_capacity(tr_values.len() - period + 1);
    result.push(seed);

    let mut atr = seed;
    for &tr in &tr_values[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            break;
        }
        result.push(atr);
    }

    result
}

/// Most recent ATR value, or `None` with insufficient data.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    atr_series(candles, period).last().copied()
}

/// ATR as a fraction of the last close. Useful for comparing volatility
/// across instruments with different price scales.
pub fn relative_atr(candles: &[Candle], period: usize) -> Option<f64> {
    let atr = calculate_atr(candles, period)?;
    let last_close = candles.last()?.close;
    (last_close != 0.0).then(|| atr / last_close)
}

/// Average Daily Range over the last `window` daily candles.
///
/// Returns 0.0 with insufficient data (no-signal sentinel).
pub fn calculate_adr(daily: &[Candle], window: usize) -> f64 {
    if window == 0 || daily.len() < window {
        return 0.0;
    }
    let tail = &daily[daily.len() - window..];
    tail.iter().map(Candle::range).sum::<f64>() / window as f64
}

/// Percentile (0..100) of `value` within `samples` — the share of samples
/// strictly below it. Used for the strategy-3 volatility floor.
pub fn percentile_rank(samples: &[f64], value: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let below = samples.iter().filter(|&&s| s < value).count();
    below as f64 / samples.len() as f64 * 100.0
}

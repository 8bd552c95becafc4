// =============================================================================
// Oscillators — RSI (Wilder), Stochastic %K/%D, StochRSI
// =============================================================================
//
// RSI:
//   Seed average gain/loss with the SMA of the first `period` deltas, then
//   apply Wilder's smoothing:
//     avg = (prev_avg * (period - 1) + current) / period
//     RSI = 100 - 100 / (1 + avg_gain / avg_loss)
//
// Stochastic:
//   raw %K = 100 * (close - lowest_low) / (highest_high - lowest_low)
//   %K = SMA(raw %K, smooth), %D = SMA(%K, d_period)
//
// StochRSI applies the stochastic transform to the RSI series itself and is
// reported in [0, 1].
// =============================================================================

/// Compute the full RSI series for the given `closes` and `period`.
///
/// # Edge cases
/// - `period == 0` => empty vec
/// - `closes.len() < period + 1` => empty vec (need `period` deltas)
/// - Zero average loss clamps RSI to 100; zero movement yields 50.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) = deltas[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l + d.abs())
            }
        });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    let Some(first) = rsi_from_averages(avg_gain, avg_loss) else {
        return Vec::new();
    };

    let mut result = Vec::with_capacity(deltas.len() - period + 1);
    result.push(first);

    for &delta in &deltas[period..] {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match rsi_from_averages(avg_gain, avg_loss) {
            Some(rsi) => result.push(rsi),
            None => break,
        }
    }

    result
}

/// Most recent RSI value, or `None` with insufficient data.
pub fn last_rsi(closes: &[f64], period: usize) -> Option<f64> {
    calculate_rsi(closes, period).last().copied()
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    rsi.is_finite().then_some(rsi)
}

// -----------------------------------------------------------------------------
// Stochastic
// -----------------------------------------------------------------------------

/// Stochastic oscillator over raw high/low/close series.
///
/// Returns `(%K, %D)` at the last bar, both in [0, 100], or `None` with
/// insufficient data. Flat windows (highest == lowest) resolve to 50.
pub fn stochastic(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    k_period: usize,
    smooth_k: usize,
    d_period: usize,
) -> Option<(f64, f64)> {
    let n = closes.len();
    if k_period == 0
        || smooth_k == 0
        || d_period == 0
        || highs.len() != n
        || lows.len() != n
        || n < k_period + smooth_k + d_period - 2
    {
        return None;
    }

    let mut raw_k = Vec::with_capacity(n - k_period + 1);
    for i in (k_period - 1)..n {
        let window = (i + 1 - k_period)..=i;
        let hh = highs[window.clone()].iter().fold(f64::MIN, |a, &b| a.max(b));
        let ll = lows[window].iter().fold(f64::MAX, |a, &b| a.min(b));
        let k = if hh > ll {
            100.0 * (closes[i] - ll) / (hh - ll)
        } else {
            50.0
        };
        raw_k.push(k);
    }

    let k_series = crate::indicators::ema::calculate_sma(&raw_k, smooth_k);
    let d_series = crate::indicators::ema::calculate_sma(&k_series, d_period);

    let k = *k_series.last()?;
    let d = *d_series.last()?;
    (k.is_finite() && d.is_finite()).then_some((k, d))
}

/// StochRSI %K and %D at the last bar, both in [0, 1].
///
/// Stochastic of the RSI series itself (14, 3, 3 by convention).
pub fn stoch_rsi(closes: &[f64], period: usize) -> Option<(f64, f64)> {
    let rsi = calculate_rsi(closes, period);
    if rsi.len() < period + 4 {
        return None;
    }

    let mut raw = Vec::with_capacity(rsi.len() - period + 1);
    for i in (period - 1)..rsi.len() {
        let window = &rsi[(i + 1 - period)..=i];
        let hi = window.iter().fold(f64::MIN, |a, &b| a.max(b));
        let lo = window.iter().fold(f64::MAX, |a, &b| a.min(b));
        let v = if hi > lo { (rsi[i] - lo) / (hi - lo) } else { 0.5 };
        raw.push(v);
    }

    let k_series = crate::indicators::ema::calculate_sma(&raw, 3);
    let d_series = crate::indicators::ema::calculate_sma(&k_series, 3);

    let k = *k_series.last()?;
    let d = *d_series.last()?;
    (k.is_finite() && d.is_finite()).then_some((k, d))
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_empty_and_short_inputs() {
        assert!(calculate_rsi(&[], 14).is_empty());
        assert!(calculate_rsi(&[1.0, 2.0, 3.0], 0).is_empty());
        let fourteen: Vec<f64> = (1..=14).map(|x| x as f64).collect();
        assert!(calculate_rsi(&fourteen, 14).is_empty());
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        for v in calculate_rsi(&closes, 14) {
            assert!((v - 100.0).abs() < 1e-10);
        }
    }

    #[test]
    fn rsi_all_losses_is_0() {
        let closes: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        for v in calculate_rsi(&closes, 14) {
            assert!(v.abs() < 1e-10);
        }
    }

    #[test]
    fn rsi_flat_market_is_50() {
        let closes = vec![100.0; 30];
        for v in calculate_rsi(&closes, 14) {
            assert!((v - 50.0).abs() < 1e-10);
        }
    }

    #[test]
    fn rsi_stays_in_range() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        for v in calculate_rsi(&closes, 14) {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    fn ramp(n: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let closes: Vec<f64> = (1..=n).map(|x| x as f64).collect();
        let highs: Vec<f64> = closes.iter().map(|c| c + 0.5).collect();
        let lows: Vec<f64> = closes.iter().map(|c| c - 0.5).collect();
        (highs, lows, closes)
    }

    #[test]
    fn stochastic_ascending_is_high() {
        let (h, l, c) = ramp(40);
        let (k, d) = stochastic(&h, &l, &c, 14, 3, 3).unwrap();
        assert!(k > 80.0);
        assert!(d > 80.0);
    }

    #[test]
    fn stochastic_short_input_is_none() {
        let (h, l, c) = ramp(10);
        assert!(stochastic(&h, &l, &c, 14, 3, 3).is_none());
    }

    #[test]
    fn stochastic_flat_window_is_neutral() {
        let c = vec![5.0; 40];
        let (k, _) = stochastic(&c, &c, &c, 14, 3, 3).unwrap();
        assert!((k - 50.0).abs() < 1e-10);
    }

    #[test]
    fn stoch_rsi_bounds() {
        let closes: Vec<f64> = (0..80)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0)
            .collect();
        let (k, d) = stoch_rsi(&closes, 14).unwrap();
        assert!((0.0..=1.0).contains(&k));
        assert!((0.0..=1.0).contains(&d));
    }

    #[test]
    fn stoch_rsi_short_input_is_none() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(stoch_rsi(&closes, 14).is_none());
    }
}

// =============================================================================
// Echo Forecast — template-matching projection via Pearson correlation
// =============================================================================
//
// The reference window is the last W closes. Sliding back through up to E
// candidate windows, the "echo" is the historical window with the highest
// Pearson correlation to the reference. The forecast replays the price deltas
// that followed the echo: forecast_k = last_close + cumsum(deltas)_k for the
// next W steps.
//
// Structural R/R: reward is the distance from entry to the forecast extremum
// in the signal direction, risk the distance to the opposite extremum. A
// non-positive risk caps the ratio at 10.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::Side;

/// Echo-forecast output block published on the screener scorecard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoForecast {
    pub forecast_prices: Vec<f64>,
    pub correlation: f64,
    pub high: f64,
    pub low: f64,
    pub final_price: f64,
}

/// Pearson correlation coefficient of two equal-length samples.
///
/// Returns `None` for mismatched/short inputs or zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    let r = cov / (var_a.sqrt() * var_b.sqrt());
    r.is_finite().then_some(r)
}

/// Compute the echo forecast over `closes` with reference window `window` and
/// up to `eval_windows` candidate shifts.
///
/// # Edge cases
/// Returns `None` when `window < 2`, when there is not enough history for a
/// single candidate (`closes.len() < 2 * window + 1`), or when every
/// candidate window has zero variance.
pub fn echo_forecast(closes: &[f64], window: usize, eval_windows: usize) -> Option<EchoForecast> {
    let n = closes.len();
    if window < 2 || eval_windows == 0 || n < 2 * window + 1 {
        return None;
    }

    let reference = &closes[n - window..];
    let last_close = closes[n - 1];

    // A shift of s places the candidate at [n-window-s, n-s); the W deltas
    // that followed it must also fit, so s ranges over [window, window + E).
    let max_shift = (n - window).min(window + eval_windows - 1);

    let mut best: Option<(f64, usize)> = None;
    for shift in window..=max_shift {
        let candidate = &closes[n - window - shift..n - shift];
        if let Some(r) = pearson(reference, candidate) {
            if best.map_or(true, |(b, _)| r > b) {
                best = Some((r, shift));
            }
        }
    }

    let (correlation, shift) = best?;

    // Replay the deltas that followed the echo window.
    let echo_end = n - shift;
    let mut forecast = Vec::with_capacity(window);
    let mut price = last_close;
    for k in 0..window {
        let delta = closes[echo_end + k] - closes[echo_end + k - 1];
        price += delta;
        forecast.push(price);
    }

    let high = forecast.iter().fold(f64::MIN, |a, &b| a.max(b));
    let low = forecast.iter().fold(f64::MAX, |a, &b| a.min(b));
    let final_price = *forecast.last()?;

    Some(EchoForecast {
        forecast_prices: forecast,
        correlation,
        high,
        low,
        final_price,
    })
}

/// Structural reward/risk of entering at `entry` in `side` direction, judged
/// against the forecast extremes. Capped at 10.
pub fn structural_rr(forecast: &EchoForecast, side: Side, entry: f64) -> f64 {
    let (reward, risk) = match side {
        Side::Long => (forecast.high - entry, entry - forecast.low),
        Side::Short => (entry - forecast.low, forecast.high - entry),
    };

    if risk <= 0.0 {
        return 10.0;
    }
    (reward / risk).min(10.0)
}

/// First forecast index at which price crosses `entry ± reach` in the signal
/// direction, used to derive the suggested expiry. `None` when the forecast
/// never reaches it.
pub fn echo_arrival_index(forecast: &EchoForecast, side: Side, entry: f64, reach: f64) -> Option<usize> {
    forecast.forecast_prices.iter().position(|&p| match side {
        Side::Long => p >= entry + reach,
        Side::Short => p <= entry - reach,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_perfect_correlation() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [10.0, 20.0, 30.0, 40.0];
        assert!((pearson(&a, &b).unwrap() - 1.0).abs() < 1e-12);

        let c = [4.0, 3.0, 2.0, 1.0];
        assert!((pearson(&a, &c).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn pearson_rejects_flat_or_short() {
        assert!(pearson(&[1.0], &[2.0]).is_none());
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(pearson(&[1.0, 2.0], &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn forecast_needs_history() {
        let closes: Vec<f64> = (0..15).map(|x| x as f64).collect();
        assert!(echo_forecast(&closes, 10, 5).is_none());
        assert!(echo_forecast(&closes, 1, 5).is_none());
    }

    #[test]
    fn periodic_series_echoes_forward() {
        // A clean sine repeats; the echo of the last window is one period
        // back, and the replayed deltas continue the wave.
        let period = 20usize;
        let closes: Vec<f64> = (0..100)
            .map(|i| 100.0 + (i as f64 * std::f64::consts::TAU / period as f64).sin() * 5.0)
            .collect();
        let f = echo_forecast(&closes, period, 40).unwrap();
        assert!(f.correlation > 0.99, "correlation = {}", f.correlation);
        assert_eq!(f.forecast_prices.len(), period);

        // The forecast should track the continuation of the sine closely.
        for (k, &p) in f.forecast_prices.iter().enumerate() {
            let expected =
                100.0 + ((100 + k) as f64 * std::f64::consts::TAU / period as f64).sin() * 5.0;
            assert!((p - expected).abs() < 0.5, "k={k} p={p} expected={expected}");
        }

        assert!(f.high >= f.final_price || f.low <= f.final_price);
        assert!((f.low..=f.high).contains(&f.final_price));
    }

    #[test]
    fn structural_rr_caps_and_direction() {
        let f = EchoForecast {
            forecast_prices: vec![101.0, 103.0, 102.0],
            correlation: 0.8,
            high: 103.0,
            low: 101.0,
            final_price: 102.0,
        };
        // Long from 100: risk to the low is positive but small vs reward.
        let rr_long = structural_rr(&f, Side::Long, 100.0);
        assert!(rr_long > 1.0);

        // Long from below the forecast low: zero/negative risk caps at 10.
        assert_eq!(structural_rr(&f, Side::Long, 101.0), 10.0);

        // Short against a rising forecast has poor R/R.
        assert!(structural_rr(&f, Side::Short, 102.0) <= 1.0);
    }

    #[test]
    fn arrival_index_finds_first_cross() {
        let f = EchoForecast {
            forecast_prices: vec![100.5, 101.2, 102.5, 101.0],
            correlation: 0.9,
            high: 102.5,
            low: 100.5,
            final_price: 101.0,
        };
        assert_eq!(echo_arrival_index(&f, Side::Long, 100.0, 2.0), Some(2));
        assert_eq!(echo_arrival_index(&f, Side::Long, 100.0, 5.0), None);
        assert_eq!(echo_arrival_index(&f, Side::Short, 103.0, 2.0), Some(0));
    }
}

// =============================================================================
// MACD — line, signal, histogram, and price/MACD divergence
// =============================================================================
//
//   MACD line = EMA(close, fast) - EMA(close, slow)
//   signal    = EMA(MACD line, signal_period)
//   histogram = MACD line - signal
//
// Divergence (window W): bullish when the current close undercuts the close
// minimum of the *previous* window while the current MACD holds above that
// window's MACD minimum; bearish symmetric. Output -1 / 0 / +1.
// =============================================================================

use crate::indicators::ema::calculate_ema;

/// MACD series computed over `closes` with the conventional (12, 26, 9)
/// parameters unless overridden.
///
/// Returns `(macd_line, signal_line, histogram)` — all aligned to the tail of
/// the input — or `None` with insufficient data.
pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Option<(Vec<f64>, Vec<f64>, Vec<f64>)> {
    if fast == 0 || slow <= fast || closes.len() < slow + signal {
        return None;
    }

    let fast_ema = calculate_ema(closes, fast);
    let slow_ema = calculate_ema(closes, slow);
    if slow_ema.is_empty() {
        return None;
    }

    // Align the two EMA series on their shared tail.
    let offset = fast_ema.len() - slow_ema.len();
    let macd_line: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map(|(i, s)| fast_ema[i + offset] - s)
        .collect();

    let signal_line = calculate_ema(&macd_line, signal);
    if signal_line.is_empty() {
        return None;
    }

    let off = macd_line.len() - signal_line.len();
    let histogram: Vec<f64> = signal_line
        .iter()
        .enumerate()
        .map(|(i, s)| macd_line[i + off] - s)
        .collect();

    Some((macd_line, signal_line, histogram))
}

/// Latest `(macd, signal)` pair with default (12, 26, 9) parameters.
pub fn last_macd(closes: &[f64]) -> Option<(f64, f64)> {
    let (line, signal, _) = calculate_macd(closes, 12, 26, 9)?;
    Some((*line.last()?, *signal.last()?))
}

/// Detect price/MACD divergence over a look-back `window`.
///
/// Returns +1 (bullish), -1 (bearish), or 0 (none / insufficient data). The
/// "previous window" is the `window` bars immediately before the most recent
/// `window` bars.
pub fn macd_divergence(closes: &[f64], window: usize) -> i8 {
    if window == 0 || closes.len() < window + 10 {
        return 0;
    }

    let Some((macd_line, _, _)) = calculate_macd(closes, 12, 26, 9) else {
        return 0;
    };
    if macd_line.len() < 2 * window {
        return 0;
    }

    let n = closes.len();
    let m = macd_line.len();

    let prev_closes = &closes[n - 2 * window..n - window];
    let prev_macd = &macd_line[m - 2 * window..m - window];

    let price_min = prev_closes.iter().fold(f64::MAX, |a, &b| a.min(b));
    let macd_min = prev_macd.iter().fold(f64::MAX, |a, &b| a.min(b));
    if closes[n - 1] < price_min && macd_line[m - 1] > macd_min {
        return 1;
    }

    let price_max = prev_closes.iter().fold(f64::MIN, |a, &b| a.max(b));
    let macd_max = prev_macd.iter().fold(f64::MIN, |a, &b| a.max(b));
    if closes[n - 1] > price_max && macd_line[m - 1] < macd_max {
        return -1;
    }

    0
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_short_input_is_none() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 12, 26, 9).is_none());
        assert!(calculate_macd(&closes, 26, 12, 9).is_none());
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let closes: Vec<f64> = (1..=80).map(|x| x as f64).collect();
        let (line, signal, hist) = calculate_macd(&closes, 12, 26, 9).unwrap();
        assert!(*line.last().unwrap() > 0.0);
        assert_eq!(hist.len(), signal.len());
    }

    #[test]
    fn macd_negative_in_downtrend() {
        let closes: Vec<f64> = (1..=80).rev().map(|x| x as f64).collect();
        let (line, _, _) = calculate_macd(&closes, 12, 26, 9).unwrap();
        assert!(*line.last().unwrap() < 0.0);
    }

    #[test]
    fn divergence_none_on_short_input() {
        let closes: Vec<f64> = (1..=25).map(|x| x as f64).collect();
        assert_eq!(macd_divergence(&closes, 20), 0);
    }

    #[test]
    fn divergence_none_in_steady_trend() {
        let closes: Vec<f64> = (1..=120).map(|x| x as f64).collect();
        // Steadily rising price with rising MACD — a new high with momentum is
        // not a divergence.
        assert_eq!(macd_divergence(&closes, 20), 0);
    }

    #[test]
    fn bullish_divergence_detected() {
        // A long decline that decelerates sharply: price sets a marginal new
        // low while MACD (momentum) has already turned up.
        let mut closes: Vec<f64> = (0..100).map(|i| 200.0 - i as f64).collect();
        let floor = *closes.last().unwrap();
        for i in 0..30 {
            // Oscillate just above the floor, then nick a marginal new low.
            closes.push(floor + 2.0 + (i as f64 * 0.9).sin());
        }
        closes.push(floor - 0.05);
        let d = macd_divergence(&closes, 20);
        assert_eq!(d, 1);
    }
}

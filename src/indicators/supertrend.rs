// =============================================================================
// SuperTrend — ATR bands with latching hysteresis
// =============================================================================
//
// Raw bands: hl2 ± mult * ATR(period).
//
// Latching rule: a band only tightens — the final upper band moves down when
// the raw band is inside the previous final band *or* the previous close broke
// above it; the final lower band symmetric. Direction flips when the close
// crosses the active band; the SuperTrend level is then the opposite band.
// =============================================================================

use crate::indicators::atr::atr_series;
use crate::market_data::Candle;

/// SuperTrend output: level and direction sequences aligned to the input tail.
/// Direction is +1 (up, level below price) or -1 (down, level above price).
#[derive(Debug, Clone)]
pub struct SuperTrend {
    pub levels: Vec<f64>,
    pub directions: Vec<i8>,
}

impl SuperTrend {
    pub fn last_direction(&self) -> Option<i8> {
        self.directions.last().copied()
    }

    pub fn last_level(&self) -> Option<f64> {
        self.levels.last().copied()
    }
}

/// Compute SuperTrend over `candles` with the conventional (10, 3.0)
/// parameters unless overridden.
///
/// # Edge cases
/// Returns `None` when `period == 0` or there are fewer than `period + 2`
/// candles (one extra bar so the iteration has a predecessor).
pub fn calculate_supertrend(candles: &[Candle], period: usize, mult: f64) -> Option<SuperTrend> {
    if period == 0 || candles.len() < period + 2 {
        return None;
    }

    let atr = atr_series(candles, period);
    if atr.is_empty() {
        return None;
    }

    // Work over the candles that have an ATR value (tail alignment).
    let offset = candles.len() - atr.len();
    let tail = &candles[offset..];
    let n = tail.len();

    let mut upper = Vec::with_capacity(n);
    let mut lower = Vec::with_capacity(n);
    for (i, c) in tail.iter().enumerate() {
        let hl2 = (c.high + c.low) / 2.0;
        upper.push(hl2 + mult * atr[i]);
        lower.push(hl2 - mult * atr[i]);
    }

    // Band latching.
    let mut final_upper = upper.clone();
    let mut final_lower = lower.clone();
    for i in 1..n {
        if upper[i] < final_upper[i - 1] || tail[i - 1].close > final_upper[i - 1] {
            final_upper[i] = upper[i];
        } else {
            final_upper[i] = final_upper[i - 1];
        }

        if lower[i] > final_lower[i - 1] || tail[i - 1].close < final_lower[i - 1] {
            final_lower[i] = lower[i];
        } else {
            final_lower[i] = final_lower[i - 1];
        }
    }

    // Direction resolution.
    let mut levels = vec![0.0; n];
    let mut directions = vec![1i8; n];
    for i in 1..n {
        if i == 1 {
            levels[i] = final_upper[i];
            directions[i] = -1;
            continue;
        }
        if levels[i - 1] == final_upper[i - 1] {
            if tail[i].close > final_upper[i] {
                levels[i] = final_lower[i];
                directions[i] = 1;
            } else {
                levels[i] = final_upper[i];
                directions[i] = -1;
            }
        } else if tail[i].close < final_lower[i] {
            levels[i] = final_upper[i];
            directions[i] = -1;
        } else {
            levels[i] = final_lower[i];
            directions[i] = 1;
        }
    }

    Some(SuperTrend { levels, directions })
}

/// Convenience with default (10, 3.0) parameters.
pub fn supertrend_default(candles: &[Candle]) -> Option<SuperTrend> {
    calculate_supertrend(candles, 10, 3.0)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn series(prices: &[f64]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Candle {
                epoch: i as i64 * 60,
                open: p,
                high: p + 0.5,
                low: p - 0.5,
                close: p,
            })
            .collect()
    }

    #[test]
    fn short_input_is_none() {
        let prices: Vec<f64> = (1..=5).map(|x| x as f64).collect();
        assert!(calculate_supertrend(&series(&prices), 10, 3.0).is_none());
    }

    #[test]
    fn uptrend_flips_direction_up() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let st = supertrend_default(&series(&prices)).unwrap();
        assert_eq!(st.last_direction(), Some(1));
        // In an uptrend the level trails below price.
        assert!(st.last_level().unwrap() < *prices.last().unwrap());
    }

    #[test]
    fn downtrend_flips_direction_down() {
        let prices: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let st = supertrend_default(&series(&prices)).unwrap();
        assert_eq!(st.last_direction(), Some(-1));
        assert!(st.last_level().unwrap() > *prices.last().unwrap());
    }

    #[test]
    fn reversal_is_detected() {
        // Ramp up then collapse: direction must end down.
        let mut prices: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        prices.extend((0..30).map(|i| 140.0 - 3.0 * i as f64));
        let st = supertrend_default(&series(&prices)).unwrap();
        assert_eq!(st.last_direction(), Some(-1));
        // The flip exists somewhere in the sequence.
        assert!(st.directions.iter().any(|&d| d == 1));
    }

    #[test]
    fn bands_latch_monotonically_in_trend() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let st = supertrend_default(&series(&prices)).unwrap();
        // Once the direction is up, the trailing level never loosens downward.
        let mut prev: Option<f64> = None;
        for (lvl, dir) in st.levels.iter().zip(st.directions.iter()).skip(5) {
            if *dir == 1 {
                if let Some(p) = prev {
                    assert!(*lvl >= p - 1e-9);
                }
                prev = Some(*lvl);
            } else {
                prev = None;
            }
        }
    }
}

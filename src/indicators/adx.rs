// =============================================================================
// Average Directional Index (ADX) with +DI / -DI — Wilder's Method
// =============================================================================
//
//   +DM = high_t - high_{t-1} when it exceeds the down-move and is positive
//   -DM = low_{t-1} - low_t symmetric
//   +DI = 100 * smoothed(+DM) / smoothed(TR)
//   DX  = 100 * |+DI - -DI| / (+DI + -DI)
//   ADX = Wilder-smoothed DX
//
// ADX > 25 is read as a trending market, < 20 as ranging.
// =============================================================================

use crate::market_data::Candle;

/// Latest ADX, +DI and -DI values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdxReading {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// Compute the most recent ADX reading.
///
/// # Edge cases
/// Returns `None` when `period == 0`, with fewer than `2 * period + 1`
/// candles, or when any intermediate value is non-finite.
pub fn calculate_adx(candles: &[Candle], period: usize) -> Option<AdxReading> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }

    let n = candles.len();
    let mut tr = Vec::with_capacity(n - 1);
    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);

    for i in 1..n {
        let up = candles[i].high - candles[i - 1].high;
        let down = candles[i - 1].low - candles[i].low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });

        let high = candles[i].high;
        let low = candles[i].low;
        let prev_close = candles[i - 1].close;
        tr.push(
            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs()),
        );
    }

    // Wilder running sums seeded with the first `period` values.
    let period_f = period as f64;
    let mut tr_s: f64 = tr[..period].iter().sum();
    let mut plus_s: f64 = plus_dm[..period].iter().sum();
    let mut minus_s: f64 = minus_dm[..period].iter().sum();

    let mut dx_values = Vec::with_capacity(tr.len() - period + 1);
    let mut last_plus_di = 0.0;
    let mut last_minus_di = 0.0;

    for i in (period - 1)..tr.len() {
        if i >= period {
            tr_s = tr_s - tr_s / period_f + tr[i];
            plus_s = plus_s - plus_s / period_f + plus_dm[i];
            minus_s = minus_s - minus_s / period_f + minus_dm[i];
        }

        if tr_s <= 0.0 {
            dx_values.push(0.0);
            continue;
        }

        last_plus_di = 100.0 * plus_s / tr_s;
        last_minus_di = 100.0 * minus_s / tr_s;
        let di_sum = last_plus_di + last_minus_di;
        let dx = if di_sum > 0.0 {
            100.0 * (last_plus_di - last_minus_di).abs() / di_sum
        } else {
            0.0
        };
        dx_values.push(dx);
    }

    if dx_values.len() < period {
        return None;
    }

    let mut adx: f64 = dx_values[..period].iter().sum::<f64>() / period_f;
    for &dx in &dx_values[period..] {
        adx = (adx * (period_f - 1.0) + dx) / period_f;
    }

    (adx.is_finite() && last_plus_di.is_finite() && last_minus_di.is_finite()).then_some(
        AdxReading {
            adx,
            plus_di: last_plus_di,
            minus_di: last_minus_di,
        },
    )
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn trending(n: usize, slope: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * slope;
                Candle {
                    epoch: i as i64 * 60,
                    open: base,
                    high: base + 1.0,
                    low: base - 1.0,
                    close: base + slope / 2.0,
                }
            })
            .collect()
    }

    #[test]
    fn short_input_is_none() {
        assert!(calculate_adx(&trending(20, 1.0), 14).is_none());
        assert!(calculate_adx(&trending(60, 1.0), 0).is_none());
    }

    #[test]
    fn strong_uptrend_has_high_adx_and_plus_di_dominant() {
        let r = calculate_adx(&trending(80, 2.0), 14).unwrap();
        assert!(r.adx > 25.0, "adx = {}", r.adx);
        assert!(r.plus_di > r.minus_di);
    }

    #[test]
    fn strong_downtrend_has_minus_di_dominant() {
        let r = calculate_adx(&trending(80, -2.0), 14).unwrap();
        assert!(r.adx > 25.0);
        assert!(r.minus_di > r.plus_di);
    }

    #[test]
    fn flat_market_has_low_adx() {
        let candles: Vec<Candle> = (0..80)
            .map(|i| {
                let wiggle = if i % 2 == 0 { 0.3 } else { -0.3 };
                Candle {
                    epoch: i as i64 * 60,
                    open: 100.0,
                    high: 100.5 + wiggle,
                    low: 99.5 + wiggle,
                    close: 100.0 + wiggle,
                }
            })
            .collect();
        let r = calculate_adx(&candles, 14).unwrap();
        assert!(r.adx < 25.0, "adx = {}", r.adx);
    }

    #[test]
    fn adx_is_bounded() {
        let r = calculate_adx(&trending(120, 3.0), 14).unwrap();
        assert!((0.0..=100.0).contains(&r.adx));
        assert!((0.0..=100.0).contains(&r.plus_di));
        assert!((0.0..=100.0).contains(&r.minus_di));
    }
}

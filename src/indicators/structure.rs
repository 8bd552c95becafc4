// =============================================================================
// Market Structure — fractals, order blocks, fair value gaps
// =============================================================================
//
// Fractal(window=w): index i is a swing high iff high[i] strictly exceeds the
// w highs on either side; swing low symmetric. Requires N >= 2w + 1.
//
// Order block: scan backward for an "impulse" candle whose body exceeds twice
// the mean body of the prior 10 bars; the OB is the most recent
// opposite-colored candle in the 5 bars before it.
//
// FVG: three-bar imbalance — bullish when high[i-2] < low[i], bearish when
// low[i-2] > high[i].
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

/// Swing points detected by the fractal scan, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fractals {
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
}

/// Detect swing highs/lows with the given half-window.
///
/// Returns an empty result when `candles.len() < 2 * window + 1` (sentinel,
/// not an error).
pub fn calculate_fractals(candles: &[Candle], window: usize) -> Fractals {
    let mut out = Fractals::default();
    if window == 0 || candles.len() < 2 * window + 1 {
        return out;
    }

    for i in window..candles.len() - window {
        let h = candles[i].high;
        let is_high = candles[i - window..i].iter().all(|c| h > c.high)
            && candles[i + 1..=i + window].iter().all(|c| h > c.high);
        if is_high {
            out.highs.push(h);
        }

        let l = candles[i].low;
        let is_low = candles[i - window..i].iter().all(|c| l < c.low)
            && candles[i + 1..=i + window].iter().all(|c| l < c.low);
        if is_low {
            out.lows.push(l);
        }
    }

    out
}

/// The last opposite-direction candle preceding an impulsive move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBlock {
    pub price: f64,
    pub epoch: i64,
    pub bullish: bool,
}

/// Scan backward for up to five order blocks (most recent first).
pub fn calculate_order_blocks(candles: &[Candle]) -> Vec<OrderBlock> {
    let mut obs = Vec::new();
    if candles.len() < 16 {
        return obs;
    }

    let mut i = candles.len() - 5;
    while i >= 10 {
        let mean_body: f64 =
            candles[i - 10..i].iter().map(Candle::body).sum::<f64>() / 10.0;
        let body = candles[i].body();

        if mean_body > 0.0 && body > 2.0 * mean_body {
            let bullish_impulse = candles[i].is_bullish();
            for j in (i.saturating_sub(5)..i).rev() {
                let c = &candles[j];
                if bullish_impulse && !c.is_bullish() {
                    obs.push(OrderBlock {
                        price: c.low,
                        epoch: c.epoch,
                        bullish: true,
                    });
                    break;
                } else if !bullish_impulse && c.is_bullish() {
                    obs.push(OrderBlock {
                        price: c.high,
                        epoch: c.epoch,
                        bullish: false,
                    });
                    break;
                }
            }
        }

        if obs.len() >= 5 {
            break;
        }
        i -= 1;
    }

    obs
}

/// A three-bar price imbalance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FairValueGap {
    pub top: f64,
    pub bottom: f64,
    pub epoch: i64,
    pub bullish: bool,
}

impl FairValueGap {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.bottom && price <= self.top
    }
}

/// Scan backward over up to `lookback` bars for fair value gaps (most recent
/// first, capped at ten).
pub fn calculate_fvg(candles: &[Candle], lookback: usize) -> Vec<FairValueGap> {
    let mut fvgs = Vec::new();
    if candles.len() < 3 {
        return fvgs;
    }

    let stop = candles.len().saturating_sub(lookback).max(2);
    for i in (stop..candles.len()).rev() {
        let first = &candles[i - 2];
        let third = &candles[i];
        if first.high < third.low {
            fvgs.push(FairValueGap {
                top: third.low,
                bottom: first.high,
                epoch: candles[i - 1].epoch,
                bullish: true,
            });
        } else if first.low > third.high {
            fvgs.push(FairValueGap {
                top: first.low,
                bottom: third.high,
                epoch: candles[i - 1].epoch,
                bullish: false,
            });
        }
        if fvgs.len() >= 10 {
            break;
        }
    }

    fvgs
}

// =============================================================================
// Candle — a single OHLC bar plus in-progress assembly from ticks
// =============================================================================
//
// Closed candles are immutable. The in-progress candle for a granularity is
// folded forward tick by tick until the wall clock crosses the next bucket
// boundary, at which point it is sealed and appended to the ring.
//
// Invariants:
//   - low <= min(open, close) <= max(open, close) <= high
//   - an in-progress candle's epoch is floor(now / granularity) * granularity
// =============================================================================

use serde::{Deserialize, Serialize};

/// A single OHLC candle. `epoch` is the bucket start in UNIX seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub epoch: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    /// Start a fresh in-progress candle from the first tick of a bucket.
    pub fn from_tick(epoch: i64, granularity: u32, price: f64) -> Self {
        Self {
            epoch: bucket_start(epoch, granularity),
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    /// Fold another tick into an in-progress candle.
    pub fn apply_tick(&mut self, price: f64) {
        self.close = price;
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
    }

    /// Whether a tick at `epoch` falls beyond this candle's bucket.
    pub fn is_elapsed(&self, epoch: i64, granularity: u32) -> bool {
        epoch >= self.epoch + granularity as i64
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    /// OHLC sanity check used when ingesting broker history.
    pub fn is_well_formed(&self) -> bool {
        let body_lo = self.open.min(self.close);
        let body_hi = self.open.max(self.close);
        self.low <= body_lo
            && body_hi <= self.high
            && [self.open, self.high, self.low, self.close]
                .iter()
                .all(|v| v.is_finite())
    }
}

/// Align an epoch down to its granularity bucket boundary.
pub fn bucket_start(epoch: i64, granularity: u32) -> i64 {
    let g = granularity as i64;
    (epoch / g) * g
}

/// Epoch of the next bucket boundary strictly after `epoch`.
pub fn next_bucket(epoch: i64, granularity: u32) -> i64 {
    bucket_start(epoch, granularity) + granularity as i64
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_alignment() {
        assert_eq!(bucket_start(1_700_000_123, 60), 1_700_000_100);
        assert_eq!(bucket_start(1_700_000_100, 60), 1_700_000_100);
        assert_eq!(next_bucket(1_700_000_123, 60), 1_700_000_160);
        assert_eq!(bucket_start(1_700_003_599, 3_600), 1_700_000_400 / 3_600 * 3_600);
    }

    #[test]
    fn tick_assembly_preserves_ohlc_invariant() {
        let mut c = Candle::from_tick(1_700_000_005, 60, 100.0);
        assert_eq!(c.epoch, 1_700_000_000 / 60 * 60);
        c.apply_tick(101.5);
        c.apply_tick(99.2);
        c.apply_tick(100.7);
        assert_eq!(c.open, 100.0);
        assert_eq!(c.high, 101.5);
        assert_eq!(c.low, 99.2);
        assert_eq!(c.close, 100.7);
        assert!(c.is_well_formed());
    }

    #[test]
    fn elapsed_detection() {
        let c = Candle::from_tick(1_700_000_000, 60, 100.0);
        assert!(!c.is_elapsed(1_700_000_059, 60));
        assert!(c.is_elapsed(1_700_000_060, 60));
    }

    #[test]
    fn wick_measurements() {
        let c = Candle {
            epoch: 0,
            open: 10.0,
            high: 12.0,
            low: 9.0,
            close: 11.0,
        };
        assert!((c.body() - 1.0).abs() < 1e-12);
        assert!((c.range() - 3.0).abs() < 1e-12);
        assert!((c.upper_wick() - 1.0).abs() < 1e-12);
        assert!((c.lower_wick() - 1.0).abs() < 1e-12);
        assert!(c.is_bullish());
    }

    #[test]
    fn malformed_candle_detected() {
        let c = Candle {
            epoch: 0,
            open: 10.0,
            high: 9.5,
            low: 9.0,
            close: 10.0,
        };
        assert!(!c.is_well_formed());
    }
}

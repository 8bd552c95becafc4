// =============================================================================
// Bollinger Bands — SMA middle band ± k standard deviations
// =============================================================================

/// Bollinger band levels at the most recent bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    /// Band width as a fraction of the middle band — a volatility measure.
    pub fn width(&self) -> f64 {
        if self.middle != 0.0 {
            (self.upper - self.lower) / self.middle
        } else {
            0.0
        }
    }
}

/// Compute Bollinger Bands over the last `period` closes with multiplier `k`.
///
/// # Edge cases
/// Returns `None` when `period == 0`, with insufficient data, or when the
/// result is non-finite.
pub fn calculate_bollinger(closes: &[f64], period: usize, k: f64) -> Option<BollingerBands> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let bands = BollingerBands {
        upper: mean + k * std_dev,
        middle: mean,
        lower: mean - k * std_dev,
    };

    (bands.upper.is_finite() && bands.lower.is_finite()).then_some(bands)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_is_none() {
        assert!(calculate_bollinger(&[1.0, 2.0], 20, 2.0).is_none());
        assert!(calculate_bollinger(&[1.0, 2.0, 3.0], 0, 2.0).is_none());
    }

    #[test]
    fn flat_series_collapses_bands() {
        let closes = vec![100.0; 30];
        let b = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!((b.upper - 100.0).abs() < 1e-10);
        assert!((b.middle - 100.0).abs() < 1e-10);
        assert!((b.lower - 100.0).abs() < 1e-10);
        assert_eq!(b.width(), 0.0);
    }

    #[test]
    fn bands_are_symmetric_around_middle() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.5).sin() * 3.0).collect();
        let b = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!(b.upper > b.middle);
        assert!(b.lower < b.middle);
        let upper_gap = b.upper - b.middle;
        let lower_gap = b.middle - b.lower;
        assert!((upper_gap - lower_gap).abs() < 1e-10);
        assert!(b.width() > 0.0);
    }

    #[test]
    fn uses_only_the_trailing_window() {
        // Large early values must not affect a 5-period band over a flat tail.
        let mut closes = vec![1000.0; 10];
        closes.extend(vec![10.0; 5]);
        let b = calculate_bollinger(&closes, 5, 2.0).unwrap();
        assert!((b.middle - 10.0).abs() < 1e-10);
    }
}

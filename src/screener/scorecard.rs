// =============================================================================
// ScreenerScorecard — per-symbol screener output slot
// =============================================================================
//
// One slot per symbol, written by exactly one screener worker at a time and
// read by the strategy evaluator and the dashboard (last-write-wins,
// stale-but-coherent).
//
// Invariant: `signal ∈ {BUY, SELL}` implies `|confidence| >= threshold`.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::forecast::EchoForecast;
use crate::types::Side;

/// Intended contract direction suggested by the screener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "CALL")]
    Call,
    #[serde(rename = "PUT")]
    Put,
}

impl Direction {
    pub fn side(self) -> Side {
        match self {
            Self::Call => Side::Long,
            Self::Put => Side::Short,
        }
    }
}

/// Actionability of the scorecard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "WAIT")]
    Wait,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenerScorecard {
    pub confidence: f64,
    pub threshold: f64,
    pub direction: Direction,
    pub signal: Signal,
    pub regime: String,

    pub trend: f64,
    pub momentum: f64,
    pub volatility: f64,
    pub structure: f64,

    pub adx: f64,
    pub srsi_k: f64,
    pub atr: f64,
    pub atr_1m: f64,
    pub atr_24h: f64,

    pub is_dead_hours: bool,
    pub streak: u32,
    pub expiry_min: u32,
    pub multiplier: f64,
    pub supertrend_dir: i8,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fcast: Option<EchoForecast>,

    // Structure computed by the scalp screener for the entry confirmation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fractal_highs: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fractal_lows: Vec<f64>,

    // Strategy-7 alignment fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_small: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_mid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_high: Option<String>,
    #[serde(default)]
    pub over_adr: bool,

    /// UNIX seconds of the producing computation.
    pub last_update: i64,
}

impl Default for ScreenerScorecard {
    fn default() -> Self {
        Self {
            confidence: 0.0,
            threshold: 0.0,
            direction: Direction::Call,
            signal: Signal::Wait,
            regime: "Unknown".to_string(),
            trend: 0.0,
            momentum: 0.0,
            volatility: 0.0,
            structure: 0.0,
            adx: 0.0,
            srsi_k: 0.5,
            atr: 0.0,
            atr_1m: 0.0,
            atr_24h: 0.0,
            is_dead_hours: false,
            streak: 0,
            expiry_min: 5,
            multiplier: 10.0,
            supertrend_dir: 0,
            fcast: None,
            fractal_highs: Vec::new(),
            fractal_lows: Vec::new(),
            label: None,
            summary_small: None,
            summary_mid: None,
            summary_high: None,
            over_adr: false,
            last_update: 0,
        }
    }
}

impl ScreenerScorecard {
    /// Derive the signal from confidence vs threshold, demoting to WAIT when
    /// `vetoed`. Keeps the signal/threshold invariant by construction.
    pub fn resolve_signal(confidence: f64, threshold: f64, vetoed: bool) -> Signal {
        if vetoed || confidence.abs() < threshold {
            Signal::Wait
        } else if confidence > 0.0 {
            Signal::Buy
        } else {
            Signal::Sell
        }
    }

    /// Screener data older than 30s is not actionable.
    pub fn is_fresh(&self, now: i64) -> bool {
        now - self.last_update <= 30
    }
}

/// Dead hours: UTC 22:00–06:00, when thresholds and sizing tighten.
pub fn is_dead_hours(hour_utc: u32) -> bool {
    hour_utc >= 22 || hour_utc < 6
}

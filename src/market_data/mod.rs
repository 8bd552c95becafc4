pub mod candle;
pub mod series;
pub mod symbol_state;

pub use candle::Candle;
pub use series::CandleRing;
pub use symbol_state::{SymbolState, TickOutcome};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::indicators::snr::SnrZone;

/// Read-only snapshot of one symbol's market state, published by the engine
/// worker after candle events and consumed by screener workers and the HTTP
/// layer. Candle vectors are shared via `Arc` so cloning a view is cheap.
#[derive(Debug, Clone, Default)]
pub struct MarketView {
    pub candles: BTreeMap<u32, Arc<Vec<Candle>>>,
    pub last_tick: Option<f64>,
    pub htf_open: Option<f64>,
    pub snr_zones: Vec<SnrZone>,
    pub fractal_highs: Vec<f64>,
    pub fractal_lows: Vec<f64>,
    pub consecutive_losses: u32,
}

impl MarketView {
    pub fn series(&self, granularity: u32) -> &[Candle] {
        self.candles
            .get(&granularity)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn closes(&self, granularity: u32) -> Vec<f64> {
        self.series(granularity).iter().map(|c| c.close).collect()
    }
}

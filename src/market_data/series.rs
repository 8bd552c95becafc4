// =============================================================================
// CandleRing — bounded, epoch-monotonic ring of closed candles
// =============================================================================
//
// One ring exists per (symbol, granularity). The broker may deliver either a
// full batch (history response) or a single trailing candle (incremental
// update); `push` applies the append-or-replace-tail rule and `replace_all`
// swaps the whole ring.
//
// Invariant: epochs are strictly increasing front to back.
// =============================================================================

use std::collections::VecDeque;

use crate::market_data::candle::Candle;

#[derive(Debug, Clone)]
pub struct CandleRing {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl CandleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Ring capacity for a granularity: deep rings for the slow timeframes,
    /// shallow for the fast ones.
    pub fn capacity_for(granularity: u32) -> usize {
        match granularity {
            900 | 3_600 => 200,
            86_400 => 50,
            _ => 100,
        }
    }

    /// Replace the entire ring with a broker history batch. Malformed or
    /// out-of-order entries are dropped to preserve monotonicity.
    pub fn replace_all(&mut self, batch: Vec<Candle>) {
        self.candles.clear();
        for c in batch {
            if !c.is_well_formed() {
                continue;
            }
            match self.candles.back() {
                Some(last) if c.epoch <= last.epoch => continue,
                _ => self.candles.push_back(c),
            }
        }
        self.trim();
    }

    /// Append-or-replace-tail: same epoch replaces the tail, a newer epoch
    /// appends, an older epoch is dropped.
    pub fn push(&mut self, candle: Candle) {
        if !candle.is_well_formed() {
            return;
        }
        match self.candles.back() {
            Some(last) if candle.epoch == last.epoch => {
                self.candles.pop_back();
                self.candles.push_back(candle);
            }
            Some(last) if candle.epoch < last.epoch => {}
            _ => {
                self.candles.push_back(candle);
                self.trim();
            }
        }
    }

    fn trim(&mut self) {
        while self.candles.len() > self.capacity {
            self.candles.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    /// Contiguous copy of the ring, oldest first. Used to hand read-only
    /// snapshots to indicator code and screener workers.
    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().copied().collect()
    }

    /// Close prices, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }
}

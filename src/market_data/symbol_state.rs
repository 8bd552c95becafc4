// =============================================================================
// SymbolState — per-symbol time-series state owned by the engine worker
// =============================================================================
//
// Holds the candle rings for every granularity the active strategy needs, the
// in-progress LTF/HTF candles assembled from ticks, the higher-timeframe
// reference open, and the per-symbol session counters (streaks, whipsaw
// crosses, hourly trade caps, trade-dedup keys).
//
// Single-writer discipline: only the engine worker mutates a SymbolState.
// Readers receive copy-on-read snapshots (`MarketView`).
//
// Invariants:
//   - at most one in-progress candle per granularity (LTF + HTF)
//   - in-progress epochs are aligned to their granularity boundary
//   - rings are strictly monotonic in epoch
//   - htf_open is defined whenever at least one HTF candle is known
// =============================================================================

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use crate::config::StrategyProfile;
use crate::indicators::snr::SnrZone;
use crate::indicators::structure::{FairValueGap, OrderBlock};
use crate::market_data::candle::{bucket_start, Candle};
use crate::market_data::series::CandleRing;
use crate::types::CrossSide;

/// Rolling 1m-ATR window length for the strategy-3 volatility floor.
const ATR_HISTORY_LEN: usize = 50;

/// What happened while folding one tick into the state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub ltf_closed: bool,
    pub htf_closed: bool,
}

#[derive(Debug, Clone)]
pub struct SymbolState {
    pub symbol: String,

    /// Closed-candle rings keyed by granularity in seconds.
    rings: BTreeMap<u32, CandleRing>,

    pub current_ltf: Option<Candle>,
    pub current_htf: Option<Candle>,

    /// Reference open of the current higher-timeframe bucket.
    pub htf_open: Option<f64>,
    pub htf_epoch: Option<i64>,

    pub last_tick: Option<f64>,
    pub subscription_id: Option<String>,

    /// LTF epoch of the last close-evaluation (at-most-once per close).
    pub last_processed_ltf: Option<i64>,
    /// LTF epoch of the last trade (dedup key, survives reconnects).
    pub last_trade_ltf: Option<i64>,

    // Cached structure, recomputed by the screener / candle handlers.
    pub snr_zones: Vec<SnrZone>,
    pub fractal_highs: Vec<f64>,
    pub fractal_lows: Vec<f64>,
    pub order_blocks: Vec<OrderBlock>,
    pub fvgs: Vec<FairValueGap>,

    // Session counters.
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
    pub daily_crosses: u32,
    pub last_cross_side: Option<CrossSide>,
    pub hourly_trade_count: u32,
    pub last_trade_hour: Option<u32>,

    pub atr_1m_history: VecDeque<f64>,

    /// Last small-TF recommendation seen by strategy 7 (debounce key).
    pub last_alignment_rec: Option<String>,
}

impl SymbolState {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            rings: BTreeMap::new(),
            current_ltf: None,
            current_htf: None,
            htf_open: None,
            htf_epoch: None,
            last_tick: None,
            subscription_id: None,
            last_processed_ltf: None,
            last_trade_ltf: None,
            snr_zones: Vec::new(),
            fractal_highs: Vec::new(),
            fractal_lows: Vec::new(),
            order_blocks: Vec::new(),
            fvgs: Vec::new(),
            consecutive_wins: 0,
            consecutive_losses: 0,
            daily_crosses: 0,
            last_cross_side: None,
            hourly_trade_count: 0,
            last_trade_hour: None,
            atr_1m_history: VecDeque::with_capacity(ATR_HISTORY_LEN),
            last_alignment_rec: None,
        }
    }

    /// Reset candles and structure for a strategy switch, keeping the tick
    /// subscription and the trade-dedup keys alive.
    pub fn reset_series(&mut self) {
        let sub = self.subscription_id.take();
        let last_trade = self.last_trade_ltf;
        *self = Self::new(self.symbol.clone());
        self.subscription_id = sub;
        self.last_trade_ltf = last_trade;
    }

    // -------------------------------------------------------------------------
    // Ring access
    // -------------------------------------------------------------------------

    pub fn ring(&self, granularity: u32) -> Option<&CandleRing> {
        self.rings.get(&granularity)
    }

    fn ring_mut(&mut self, granularity: u32) -> &mut CandleRing {
        self.rings
            .entry(granularity)
            .or_insert_with(|| CandleRing::new(CandleRing::capacity_for(granularity)))
    }

    /// Copy of the closed candles at a granularity, oldest first.
    pub fn candles(&self, granularity: u32) -> Vec<Candle> {
        self.ring(granularity).map(|r| r.to_vec()).unwrap_or_default()
    }

    pub fn closes(&self, granularity: u32) -> Vec<f64> {
        self.ring(granularity).map(|r| r.closes()).unwrap_or_default()
    }

    pub fn granularities(&self) -> impl Iterator<Item = u32> + '_ {
        self.rings.keys().copied()
    }

    // -------------------------------------------------------------------------
    // Candle events
    // -------------------------------------------------------------------------

    /// Apply a broker `candles` payload for one granularity.
    ///
    /// A batch (>1) replaces the ring; a single candle goes through the
    /// append-or-replace-tail rule. When the granularity is the active
    /// strategy's HTF, the reference open for the current wall-clock bucket is
    /// recomputed: the bucket's own open when history already contains it,
    /// else the previous candle's close.
    pub fn apply_candles(
        &mut self,
        granularity: u32,
        candles: Vec<Candle>,
        now: i64,
        profile: &StrategyProfile,
    ) {
        if candles.is_empty() {
            return;
        }

        let is_batch = candles.len() > 1;
        let last = *candles.last().expect("non-empty batch");

        {
            let ring = self.ring_mut(granularity);
            if is_batch {
                ring.replace_all(candles);
            } else {
                ring.push(last);
            }
        }

        if granularity == profile.htf_granularity {
            let htf_start = bucket_start(now, granularity);
            if last.epoch < htf_start {
                // Current bucket not in history yet: seed from previous close.
                self.htf_open = Some(last.close);
                self.htf_epoch = Some(htf_start);
                debug!(
                    symbol = %self.symbol,
                    htf_open = last.close,
                    "HTF open seeded from previous close"
                );
            } else {
                self.htf_open = Some(last.open);
                self.htf_epoch = Some(last.epoch);
                debug!(symbol = %self.symbol, htf_open = last.open, epoch = last.epoch, "HTF open set");
            }
        }

        if granularity == profile.ltf_granularity {
            if let Some(c) = self.ring(granularity).and_then(|r| r.last()).copied() {
                // Seed the in-progress LTF from history so close detection
                // works before the first locally-assembled candle.
                if self.current_ltf.is_none() {
                    self.current_ltf = Some(c);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Tick events
    // -------------------------------------------------------------------------

    /// Fold a tick into the in-progress LTF/HTF candles.
    ///
    /// Returns which candles closed on this tick. The caller notifies the
    /// strategy evaluator on `ltf_closed` strictly before processing the next
    /// tick.
    pub fn apply_tick(&mut self, epoch: i64, price: f64, profile: &StrategyProfile) -> TickOutcome {
        self.last_tick = Some(price);
        let mut outcome = TickOutcome::default();

        // HTF in-progress candle.
        let htf_g = profile.htf_granularity;
        match self.current_htf {
            Some(ref mut c) if !c.is_elapsed(epoch, htf_g) => c.apply_tick(price),
            Some(c) => {
                self.ring_mut(htf_g).push(c);
                outcome.htf_closed = true;
                let fresh = Candle::from_tick(epoch, htf_g, price);
                self.htf_open = Some(fresh.open);
                self.htf_epoch = Some(fresh.epoch);
                self.current_htf = Some(fresh);
            }
            None => {
                let fresh = Candle::from_tick(epoch, htf_g, price);
                if self.htf_open.is_none() {
                    self.htf_open = Some(fresh.open);
                    self.htf_epoch = Some(fresh.epoch);
                }
                self.current_htf = Some(fresh);
            }
        }

        // LTF in-progress candle.
        let ltf_g = profile.ltf_granularity;
        match self.current_ltf {
            Some(ref mut c) if !c.is_elapsed(epoch, ltf_g) => c.apply_tick(price),
            Some(c) => {
                self.ring_mut(ltf_g).push(c);
                outcome.ltf_closed = true;
                self.current_ltf = Some(Candle::from_tick(epoch, ltf_g, price));
            }
            None => {
                self.current_ltf = Some(Candle::from_tick(epoch, ltf_g, price));
            }
        }

        outcome
    }

    /// Track whipsaw crossings of the HTF open (strategy 1 filter).
    pub fn track_cross(&mut self, price: f64) {
        let Some(htf_open) = self.htf_open else {
            return;
        };
        let side = if price > htf_open {
            CrossSide::Above
        } else {
            CrossSide::Below
        };
        if let Some(prev) = self.last_cross_side {
            if prev != side {
                self.daily_crosses += 1;
                debug!(symbol = %self.symbol, crosses = self.daily_crosses, "HTF open cross");
            }
        }
        self.last_cross_side = Some(side);
    }

    /// Record a 1m ATR sample for the strategy-3 volatility floor.
    pub fn record_atr_sample(&mut self, atr: f64) {
        if self.atr_1m_history.len() >= ATR_HISTORY_LEN {
            self.atr_1m_history.pop_front();
        }
        self.atr_1m_history.push_back(atr);
    }

    /// Reset counters that roll over with the UTC day.
    pub fn reset_daily_counters(&mut self) {
        self.daily_crosses = 0;
        self.last_cross_side = None;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyId;

    fn profile() -> StrategyProfile {
        // 15m HTF / 1m LTF keeps the arithmetic small.
        StrategyId::S3.profile()
    }

    fn candle(epoch: i64, open: f64, close: f64) -> Candle {
        Candle {
            epoch,
            open,
            high: open.max(close) + 0.5,
            low: open.min(close) - 0.5,
            close,
        }
    }

    #[test]
    fn batch_replaces_single_appends() {
        let mut st = SymbolState::new("R_100");
        let p = profile();
        st.apply_candles(60, vec![candle(0, 1.0, 2.0), candle(60, 2.0, 3.0)], 120, &p);
        assert_eq!(st.candles(60).len(), 2);

        st.apply_candles(60, vec![candle(120, 3.0, 4.0)], 180, &p);
        assert_eq!(st.candles(60).len(), 3);
        assert_eq!(st.closes(60), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn htf_open_from_current_bucket() {
        let mut st = SymbolState::new("R_100");
        let p = profile(); // HTF = 900
        let now = 1_700_000_000_i64;
        let bucket = bucket_start(now, 900);
        st.apply_candles(900, vec![candle(bucket - 900, 9.0, 10.0), candle(bucket, 10.0, 10.5)], now, &p);
        assert_eq!(st.htf_open, Some(10.0));
        assert_eq!(st.htf_epoch, Some(bucket));
    }

    #[test]
    fn htf_open_seeded_from_previous_close_when_bucket_missing() {
        let mut st = SymbolState::new("R_100");
        let p = profile();
        let now = 1_700_000_000_i64;
        let bucket = bucket_start(now, 900);
        st.apply_candles(900, vec![candle(bucket - 1_800, 8.0, 9.0), candle(bucket - 900, 9.0, 10.0)], now, &p);
        assert_eq!(st.htf_open, Some(10.0));
        assert_eq!(st.htf_epoch, Some(bucket));
    }

    #[test]
    fn tick_closes_ltf_at_boundary() {
        let mut st = SymbolState::new("R_100");
        let p = profile(); // LTF = 60
        let t0 = 1_700_000_000_i64 / 60 * 60;

        assert_eq!(st.apply_tick(t0 + 1, 100.0, &p), TickOutcome::default());
        assert_eq!(st.apply_tick(t0 + 30, 101.0, &p), TickOutcome::default());
        let out = st.apply_tick(t0 + 61, 102.0, &p);
        assert!(out.ltf_closed);
        assert!(!out.htf_closed);

        let ring = st.candles(60);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring[0].epoch, t0);
        assert_eq!(ring[0].close, 101.0);

        // Fresh in-progress candle aligned to its bucket.
        let cur = st.current_ltf.unwrap();
        assert_eq!(cur.epoch, t0 + 60);
        assert_eq!(cur.open, 102.0);
    }

    #[test]
    fn htf_rollover_updates_reference_open() {
        let mut st = SymbolState::new("R_100");
        let p = profile(); // HTF = 900
        let t0 = 1_700_000_100_i64 / 900 * 900;

        st.apply_tick(t0 + 10, 100.0, &p);
        assert_eq!(st.htf_open, Some(100.0));

        let out = st.apply_tick(t0 + 901, 105.0, &p);
        assert!(out.htf_closed);
        assert_eq!(st.htf_open, Some(105.0));
        assert_eq!(st.htf_epoch, Some(t0 + 900));
        assert_eq!(st.candles(900).len(), 1);
    }

    #[test]
    fn cross_counter_increments_on_side_change() {
        let mut st = SymbolState::new("R_100");
        st.htf_open = Some(100.0);
        st.track_cross(101.0);
        assert_eq!(st.daily_crosses, 0); // first observation sets the side
        st.track_cross(99.0);
        assert_eq!(st.daily_crosses, 1);
        st.track_cross(98.0);
        assert_eq!(st.daily_crosses, 1);
        st.track_cross(102.0);
        assert_eq!(st.daily_crosses, 2);
    }

    #[test]
    fn reset_series_keeps_dedup_key_and_subscription() {
        let mut st = SymbolState::new("R_100");
        st.subscription_id = Some("sub-1".into());
        st.last_trade_ltf = Some(1_700_000_000);
        st.apply_candles(60, vec![candle(0, 1.0, 2.0), candle(60, 2.0, 3.0)], 120, &profile());

        st.reset_series();
        assert_eq!(st.subscription_id.as_deref(), Some("sub-1"));
        assert_eq!(st.last_trade_ltf, Some(1_700_000_000));
        assert!(st.candles(60).is_empty());
        assert!(st.htf_open.is_none());
    }

    #[test]
    fn atr_history_is_bounded() {
        let mut st = SymbolState::new("R_100");
        for i in 0..60 {
            st.record_atr_sample(i as f64);
        }
        assert_eq!(st.atr_1m_history.len(), 50);
        assert_eq!(*st.atr_1m_history.front().unwrap(), 10.0);
    }
}

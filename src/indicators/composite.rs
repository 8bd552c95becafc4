// =============================================================================
// Composite TA Vote — 26-indicator recommendation
// =============================================================================
//
// Mirrors the screener-style composite rating: 15 moving-average votes
// (EMA/SMA at 5/10/20/30/50/100/200 plus the Ichimoku base line) and 11
// oscillator votes (RSI, Stoch, CCI, ADX, Awesome, Momentum, MACD, StochRSI,
// Williams %R, Bull/Bear Power, Ultimate). Each vote is BUY/SELL/NEUTRAL;
//
//   score = (buys - sells) / votes
//   score >=  0.5 => STRONG_BUY,  >=  0.1 => BUY
//   score <= -0.5 => STRONG_SELL, <= -0.1 => SELL, else NEUTRAL
//
// Indicators without enough data simply do not vote, so a short series
// degrades toward NEUTRAL instead of erroring.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::adx::calculate_adx;
use crate::indicators::ema::{calculate_ema, calculate_sma, last_ema, last_sma};
use crate::indicators::macd::last_macd;
use crate::indicators::rsi::{last_rsi, stoch_rsi, stochastic};
use crate::market_data::Candle;

const MA_PERIODS: &[usize] = &[5, 10, 20, 30, 50, 100, 200];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

impl Recommendation {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.5 {
            Self::StrongBuy
        } else if score >= 0.1 {
            Self::Buy
        } else if score <= -0.5 {
            Self::StrongSell
        } else if score <= -0.1 {
            Self::Sell
        } else {
            Self::Neutral
        }
    }

    pub fn is_buyish(self) -> bool {
        matches!(self, Self::Buy | Self::StrongBuy)
    }

    pub fn is_sellish(self) -> bool {
        matches!(self, Self::Sell | Self::StrongSell)
    }

    pub fn is_strong(self) -> bool {
        matches!(self, Self::StrongBuy | Self::StrongSell)
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StrongBuy => "STRONG_BUY",
            Self::Buy => "BUY",
            Self::Neutral => "NEUTRAL",
            Self::Sell => "SELL",
            Self::StrongSell => "STRONG_SELL",
        };
        write!(f, "{s}")
    }
}

/// Tally of a composite vote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaSummary {
    pub recommendation: Recommendation,
    pub buy: u32,
    pub sell: u32,
    pub neutral: u32,
    pub score: f64,
}

impl Default for TaSummary {
    fn default() -> Self {
        Self {
            recommendation: Recommendation::Neutral,
            buy: 0,
            sell: 0,
            neutral: 0,
            score: 0.0,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Vote {
    Buy,
    Sell,
    Neutral,
}

fn vote(buy_cond: bool, sell_cond: bool) -> Vote {
    if buy_cond {
        Vote::Buy
    } else if sell_cond {
        Vote::Sell
    } else {
        Vote::Neutral
    }
}

/// Compute the composite 26-vote summary over a candle series.
///
/// Returns the default NEUTRAL summary when no indicator can vote.
pub fn composite_summary(candles: &[Candle]) -> TaSummary {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let Some(&price) = closes.last() else {
        return TaSummary::default();
    };

    let mut votes: Vec<Vote> = Vec::with_capacity(26);

    // --- Moving averages (15 votes) -----------------------------------------
    for &p in MA_PERIODS {
        if let Some(ema) = last_ema(&closes, p) {
            votes.push(vote(price > ema, price < ema));
        }
        if let Some(sma) = last_sma(&closes, p) {
            votes.push(vote(price > sma, price < sma));
        }
    }
    if let Some(base) = ichimoku_base(&highs, &lows, 26) {
        votes.push(vote(price > base, price < base));
    }

    // --- Oscillators (11 votes) ----------------------------------------------
    if let Some(rsi) = last_rsi(&closes, 14) {
        votes.push(vote(rsi < 30.0, rsi > 70.0));
    }
    if let Some((k, _d)) = stochastic(&highs, &lows, &closes, 14, 3, 3) {
        votes.push(vote(k < 20.0, k > 80.0));
    }
    if let Some(cci_v) = cci(candles, 20) {
        votes.push(vote(cci_v < -100.0, cci_v > 100.0));
    }
    if let Some(r) = calculate_adx(candles, 14) {
        votes.push(vote(
            r.adx > 20.0 && r.plus_di > r.minus_di,
            r.adx > 20.0 && r.minus_di > r.plus_di,
        ));
    }
    if let Some(ao) = awesome_oscillator(&highs, &lows) {
        votes.push(vote(ao > 0.0, ao < 0.0));
    }
    if let Some(m) = momentum(&closes, 10) {
        votes.push(vote(m > 0.0, m < 0.0));
    }
    if let Some((line, signal)) = last_macd(&closes) {
        votes.push(vote(line > signal, line < signal));
    }
    if let Some((k, _d)) = stoch_rsi(&closes, 14) {
        votes.push(vote(k < 0.2, k > 0.8));
    }
    if let Some(wr) = williams_r(&highs, &lows, &closes, 14) {
        votes.push(vote(wr < -80.0, wr > -20.0));
    }
    if let Some((bull, bear)) = bull_bear_power(&highs, &lows, &closes, 13) {
        votes.push(vote(bull > 0.0 && bear > 0.0, bull < 0.0 && bear < 0.0));
    }
    if let Some(uo) = ultimate_oscillator(candles) {
        votes.push(vote(uo > 70.0, uo < 30.0));
    }

    if votes.is_empty() {
        return TaSummary::default();
    }

    let buy = votes.iter().filter(|v| **v == Vote::Buy).count() as u32;
    let sell = votes.iter().filter(|v| **v == Vote::Sell).count() as u32;
    let neutral = votes.len() as u32 - buy - sell;
    let score = (buy as f64 - sell as f64) / votes.len() as f64;

    TaSummary {
        recommendation: Recommendation::from_score(score),
        buy,
        sell,
        neutral,
        score,
    }
}

// -----------------------------------------------------------------------------
// Oscillator helpers (shared with the screener scorers)
// -----------------------------------------------------------------------------

/// Ichimoku base line: midpoint of the `period`-bar high/low envelope.
pub fn ichimoku_base(highs: &[f64], lows: &[f64], period: usize) -> Option<f64> {
    if period == 0 || highs.len() < period || lows.len() < period {
        return None;
    }
    let hh = highs[highs.len() - period..]
        .iter()
        .fold(f64::MIN, |a, &b| a.max(b));
    let ll = lows[lows.len() - period..]
        .iter()
        .fold(f64::MAX, |a, &b| a.min(b));
    Some((hh + ll) / 2.0)
}

/// Commodity Channel Index over typical prices.
pub fn cci(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let tp: Vec<f64> = candles[candles.len() - period..]
        .iter()
        .map(|c| (c.high + c.low + c.close) / 3.0)
        .collect();
    let mean = tp.iter().sum::<f64>() / period as f64;
    let mean_dev = tp.iter().map(|v| (v - mean).abs()).sum::<f64>() / period as f64;
    if mean_dev == 0.0 {
        return None;
    }
    let last = *tp.last()?;
    Some((last - mean) / (0.015 * mean_dev))
}

/// Williams %R in [-100, 0].
pub fn williams_r(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    let n = closes.len();
    if period == 0 || n < period || highs.len() != n || lows.len() != n {
        return None;
    }
    let hh = highs[n - period..].iter().fold(f64::MIN, |a, &b| a.max(b));
    let ll = lows[n - period..].iter().fold(f64::MAX, |a, &b| a.min(b));
    if hh == ll {
        return None;
    }
    Some(-100.0 * (hh - closes[n - 1]) / (hh - ll))
}

/// Rate of change as a percentage vs `period` bars back.
pub fn roc(closes: &[f64], period: usize) -> Option<f64> {
    let n = closes.len();
    if period == 0 || n < period + 1 {
        return None;
    }
    let past = closes[n - 1 - period];
    (past != 0.0).then(|| (closes[n - 1] - past) / past * 100.0)
}

/// Raw momentum: close minus the close `period` bars back.
pub fn momentum(closes: &[f64], period: usize) -> Option<f64> {
    let n = closes.len();
    if period == 0 || n < period + 1 {
        return None;
    }
    Some(closes[n - 1] - closes[n - 1 - period])
}

/// Awesome Oscillator: SMA(hl2, 5) - SMA(hl2, 34).
pub fn awesome_oscillator(highs: &[f64], lows: &[f64]) -> Option<f64> {
    if highs.len() < 34 || highs.len() != lows.len() {
        return None;
    }
    let hl2: Vec<f64> = highs.iter().zip(lows.iter()).map(|(h, l)| (h + l) / 2.0).collect();
    let fast = *calculate_sma(&hl2, 5).last()?;
    let slow = *calculate_sma(&hl2, 34).last()?;
    Some(fast - slow)
}

/// Elder's Bull/Bear Power: (high - EMA13, low - EMA13).
pub fn bull_bear_power(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
) -> Option<(f64, f64)> {
    let ema = *calculate_ema(closes, period).last()?;
    Some((*highs.last()? - ema, *lows.last()? - ema))
}

/// Ultimate Oscillator (7, 14, 28) in [0, 100].
pub fn ultimate_oscillator(candles: &[Candle]) -> Option<f64> {
    if candles.len() < 29 {
        return None;
    }

    let mut bp = Vec::with_capacity(candles.len() - 1);
    let mut tr = Vec::with_capacity(candles.len() - 1);
    for i in 1..candles.len() {
        let prev_close = candles[i - 1].close;
        let low = candles[i].low.min(prev_close);
        let high = candles[i].high.max(prev_close);
        bp.push(candles[i].close - low);
        tr.push(high - low);
    }

    let avg = |n: usize| -> Option<f64> {
        let bp_sum: f64 = bp[bp.len() - n..].iter().sum();
        let tr_sum: f64 = tr[tr.len() - n..].iter().sum();
        (tr_sum != 0.0).then(|| bp_sum / tr_sum)
    };

    let a7 = avg(7)?;
    let a14 = avg(14)?;
    let a28 = avg(28)?;
    Some(100.0 * (4.0 * a7 + 2.0 * a14 + a28) / 7.0)
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
                open: p - 0.1,
                high: p + 0.5,
                low: p - 0.5,
                close: p,
            })
            .collect()
    }

    #[test]
    fn empty_series_is_neutral() {
        let s = composite_summary(&[]);
        assert_eq!(s.recommendation, Recommendation::Neutral);
        assert_eq!(s.buy + s.sell + s.neutral, 0);
    }

    #[test]
    fn strong_uptrend_votes_buy() {
        let prices: Vec<f64> = (0..250).map(|i| 100.0 + i as f64 * 0.5).collect();
        let s = composite_summary(&series(&prices));
        assert!(s.recommendation.is_buyish(), "rec = {}", s.recommendation);
        assert!(s.buy > s.sell);
        assert!(s.score > 0.1);
    }

    #[test]
    fn strong_downtrend_votes_sell() {
        let prices: Vec<f64> = (0..250).map(|i| 300.0 - i as f64 * 0.5).collect();
        let s = composite_summary(&series(&prices));
        assert!(s.recommendation.is_sellish());
        assert!(s.sell > s.buy);
    }

    #[test]
    fn score_bands() {
        assert_eq!(Recommendation::from_score(0.6), Recommendation::StrongBuy);
        assert_eq!(Recommendation::from_score(0.3), Recommendation::Buy);
        assert_eq!(Recommendation::from_score(0.0), Recommendation::Neutral);
        assert_eq!(Recommendation::from_score(-0.2), Recommendation::Sell);
        assert_eq!(Recommendation::from_score(-0.8), Recommendation::StrongSell);
    }

    #[test]
    fn vote_count_is_full_with_deep_history() {
        let prices: Vec<f64> = (0..250)
            .map(|i| 100.0 + (i as f64 * 0.3).sin() * 2.0)
            .collect();
        let s = composite_summary(&series(&prices));
        assert_eq!(s.buy + s.sell + s.neutral, 26);
    }

    #[test]
    fn cci_extremes() {
        // A sudden spike above a flat series produces a large positive CCI.
        let mut prices = vec![100.0; 30];
        prices.push(105.0);
        let v = cci(&series(&prices), 20).unwrap();
        assert!(v > 100.0);
    }

    #[test]
    fn williams_r_range() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let c = series(&prices);
        let highs: Vec<f64> = c.iter().map(|x| x.high).collect();
        let lows: Vec<f64> = c.iter().map(|x| x.low).collect();
        let closes: Vec<f64> = c.iter().map(|x| x.close).collect();
        let wr = williams_r(&highs, &lows, &closes, 14).unwrap();
        assert!((-100.0..=0.0).contains(&wr));
        assert!(wr > -20.0); // near the top of the range in an uptrend
    }

    #[test]
    fn roc_and_momentum() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!((roc(&closes, 10).unwrap() - 100.0).abs() < 1e-9);
        assert_eq!(momentum(&closes, 10), Some(10.0));
        assert!(roc(&closes[..5], 10).is_none());
    }

    #[test]
    fn ultimate_oscillator_bounds() {
        let prices: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.4).sin() * 3.0)
            .collect();
        let uo = ultimate_oscillator(&series(&prices)).unwrap();
        assert!((0.0..=100.0).contains(&uo));
    }
}

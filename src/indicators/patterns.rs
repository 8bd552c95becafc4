// =============================================================================
// Candlestick Pattern Classifier — table-driven, fixed priority
// =============================================================================
//
// At most one label per invocation, evaluated in a fixed priority order:
//   marubozu > pin > engulfing > harami > tweezer > doji
//
// Thresholds:
//   marubozu:  body > 90% of range
//   pin:       body < 35% of range, one wick > 60% of range
//   engulfing: body bigger than prior, fully covers prior body, correct color
//   harami:    body < half of prior body and contained within it
//   tweezer:   matching extreme within 5% of range, wick beyond the body
//   doji:      body < 10% of range
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pattern {
    Marubozu,
    BullishPin,
    BearishPin,
    BullishEngulfing,
    BearishEngulfing,
    BullishHarami,
    BearishHarami,
    TweezerTop,
    TweezerBottom,
    Doji,
}

impl Pattern {
    pub fn is_bullish_reversal(self) -> bool {
        matches!(
            self,
            Self::BullishPin
                | Self::BullishEngulfing
                | Self::BullishHarami
                | Self::TweezerBottom
                | Self::Doji
        )
    }

    pub fn is_bearish_reversal(self) -> bool {
        matches!(
            self,
            Self::BearishPin
                | Self::BearishEngulfing
                | Self::BearishHarami
                | Self::TweezerTop
                | Self::Doji
        )
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Marubozu => "marubozu",
            Self::BullishPin => "bullish_pin",
            Self::BearishPin => "bearish_pin",
            Self::BullishEngulfing => "bullish_engulfing",
            Self::BearishEngulfing => "bearish_engulfing",
            Self::BullishHarami => "bullish_harami",
            Self::BearishHarami => "bearish_harami",
            Self::TweezerTop => "tweezer_top",
            Self::TweezerBottom => "tweezer_bottom",
            Self::Doji => "doji",
        };
        write!(f, "{s}")
    }
}

type Predicate = fn(&Candle, &Candle) -> Option<Pattern>;

/// Priority-ordered predicate table. The first match wins.
const PREDICATES: &[Predicate] = &[
    marubozu, pin, engulfing, harami, tweezer, doji,
];

/// Classify the most recent candle pair. Returns `None` with fewer than two
/// candles or a zero-range bar.
pub fn classify(candles: &[Candle]) -> Option<Pattern> {
    if candles.len() < 2 {
        return None;
    }
    let curr = &candles[candles.len() - 1];
    let prev = &candles[candles.len() - 2];
    if curr.range() == 0.0 {
        return None;
    }

    PREDICATES.iter().find_map(|p| p(curr, prev))
}

fn marubozu(curr: &Candle, _prev: &Candle) -> Option<Pattern> {
    (curr.body() > curr.range() * 0.9).then_some(Pattern::Marubozu)
}

fn pin(curr: &Candle, _prev: &Candle) -> Option<Pattern> {
    if curr.body() >= curr.range() * 0.35 {
        return None;
    }
    if curr.lower_wick() > curr.range() * 0.6 {
        return Some(Pattern::BullishPin);
    }
    if curr.upper_wick() > curr.range() * 0.6 {
        return Some(Pattern::BearishPin);
    }
    None
}

fn engulfing(curr: &Candle, prev: &Candle) -> Option<Pattern> {
    if curr.body() <= prev.body() {
        return None;
    }
    if curr.is_bullish()
        && !prev.is_bullish()
        && curr.close >= prev.open
        && curr.open <= prev.close
    {
        return Some(Pattern::BullishEngulfing);
    }
    if !curr.is_bullish()
        && prev.is_bullish()
        && curr.close <= prev.open
        && curr.open >= prev.close
    {
        return Some(Pattern::BearishEngulfing);
    }
    None
}

fn harami(curr: &Candle, prev: &Candle) -> Option<Pattern> {
    if curr.body() >= prev.body() * 0.5 {
        return None;
    }
    let curr_top = curr.open.max(curr.close);
    let curr_bottom = curr.open.min(curr.close);
    let prev_top = prev.open.max(prev.close);
    let prev_bottom = prev.open.min(prev.close);

    if curr_top <= prev_top && curr_bottom >= prev_bottom {
        return Some(if curr.is_bullish() {
            Pattern::BullishHarami
        } else {
            Pattern::BearishHarami
        });
    }
    None
}

fn tweezer(curr: &Candle, prev: &Candle) -> Option<Pattern> {
    let range = curr.range();
    if (curr.high - prev.high).abs() < range * 0.05 && curr.high > curr.open.max(curr.close) {
        return Some(Pattern::TweezerTop);
    }
    if (curr.low - prev.low).abs() < range * 0.05 && curr.low < curr.open.min(curr.close) {
        return Some(Pattern::TweezerBottom);
    }
    None
}

fn doji(curr: &Candle, _prev: &Candle) -> Option<Pattern> {
    (curr.body() < curr.range() * 0.1).then_some(Pattern::Doji)
}

// -----------------------------------------------------------------------------
// Reversal scoring
// -----------------------------------------------------------------------------

/// Score a reversal setup 0..=3:
///   +1 dominant wick at least twice the body
///   +1 close in the pattern-side quarter of the candle (doji scores free)
///   +1 prior candle strongly directional (body > 60% of its range)
pub fn score_reversal(pattern: Pattern, candles: &[Candle]) -> u8 {
    let Some(curr) = candles.last() else {
        return 0;
    };
    let range = curr.range();
    if range == 0.0 {
        return 0;
    }

    let mut score = 0u8;

    let body = curr.body();
    let max_wick = curr.upper_wick().max(curr.lower_wick());
    if body == 0.0 || max_wick / body >= 2.0 {
        score += 1;
    }

    match pattern {
        Pattern::Doji => score += 1,
        p if p.is_bullish_reversal() => {
            if curr.close >= curr.low + range * 0.75 {
                score += 1;
            }
        }
        p if p.is_bearish_reversal() => {
            if curr.close <= curr.low + range * 0.25 {
                score += 1;
            }
        }
        _ => {}
    }

    if candles.len() >= 2 {
        let prev = &candles[candles.len() - 2];
        let prev_range = prev.range();
        if prev_range > 0.0 && prev.body() / prev_range > 0.6 {
            score += 1;
        }
    }

    score
}

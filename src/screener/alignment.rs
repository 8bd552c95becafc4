// =============================================================================
// Multi-Timeframe Alignment Screener (strategy 7)
// =============================================================================
//
// Up to three operator-configured timeframes (small/mid/high, any of which
// may be OFF) each produce a composite TA recommendation. Labels:
//
//   QUICK_BUY/SELL    all enabled agree and the highest enabled TF is STRONG
//   ALIGNED_BUY/SELL  all enabled TFs agree
//   PULLBACK_BUY/SELL mid+high agree while the small TF lags
//
// Single-TF mode treats STRONG_* as plain BUY/SELL. An ADR guard suppresses
// entries once today's range has already exceeded the 14-day average daily
// range. With all three TFs OFF the scorecard degrades to NEUTRAL/WAIT.
// =============================================================================

use anyhow::Result;

use crate::config::BotConfig;
use crate::indicators::atr::{calculate_adr, calculate_atr};
use crate::indicators::composite::{composite_summary, Recommendation, TaSummary};
use crate::market_data::MarketView;
use crate::screener::feed::TaFeed;
use crate::screener::scorecard::{Direction, ScreenerScorecard, Signal};

/// One analyzed timeframe slot.
#[derive(Debug, Clone, Copy)]
struct Slot {
    granularity: u32,
    summary: TaSummary,
}

/// Compute the strategy-7 scorecard. Fetches candles for each enabled
/// timeframe through the TA feed; disabled slots are reported as "OFF".
pub async fn compute_alignment(
    symbol: &str,
    cfg: &BotConfig,
    feed: &TaFeed,
    view: &MarketView,
    now: i64,
) -> Result<ScreenerScorecard> {
    let tf_small = cfg.strat7_tf(&cfg.strat7_small_tf);
    let tf_mid = cfg.strat7_tf(&cfg.strat7_mid_tf);
    let tf_high = cfg.strat7_tf(&cfg.strat7_high_tf);

    let mut slots: Vec<Option<Slot>> = Vec::with_capacity(3);
    for tf in [tf_small, tf_mid, tf_high] {
        match tf {
            Some(granularity) => {
                let candles = feed.candles(symbol, granularity).await?;
                slots.push(Some(Slot {
                    granularity,
                    summary: composite_summary(&candles),
                }));
            }
            None => slots.push(None),
        }
    }
    let (small, mid, high) = (slots[0], slots[1], slots[2]);

    // ADR guard from the engine's daily ring.
    let daily = view.series(86_400);
    let adr = calculate_adr(daily, 14);
    let today_range = daily.last().map(|c| c.range()).unwrap_or(0.0);
    let over_adr = adr > 0.0 && today_range > adr;

    let enabled: Vec<Slot> = slots.iter().flatten().copied().collect();

    let card_base = |label: Option<String>, signal: Signal, confidence: f64| {
        let rec_of = |s: Option<Slot>| s.map(|s| s.summary.recommendation.to_string());
        ScreenerScorecard {
            confidence,
            threshold: 0.0,
            direction: alignment_direction(high, confidence),
            signal,
            regime: rec_of(mid).unwrap_or_else(|| "NEUTRAL".to_string()),
            label,
            summary_small: Some(rec_of(small).unwrap_or_else(|| "OFF".to_string())),
            summary_mid: Some(rec_of(mid).unwrap_or_else(|| "OFF".to_string())),
            summary_high: Some(rec_of(high).unwrap_or_else(|| "OFF".to_string())),
            over_adr,
            last_update: now,
            ..Default::default()
        }
    };

    // All three OFF: nothing to align — report a neutral card.
    if enabled.is_empty() {
        return Ok(card_base(Some("NEUTRAL".to_string()), Signal::Wait, 0.0));
    }

    // Confidence from the vote totals of the enabled analyses.
    let total_buy: u32 = enabled.iter().map(|s| s.summary.buy).sum();
    let total_sell: u32 = enabled.iter().map(|s| s.summary.sell).sum();
    let total: u32 = enabled
        .iter()
        .map(|s| s.summary.buy + s.summary.sell + s.summary.neutral)
        .sum();
    let confidence = if total > 0 {
        (total_buy as f64 - total_sell as f64) / total as f64 * 100.0
    } else {
        0.0
    };

    let (label, expiry_min) = resolve_label(&enabled, small, mid, high, cfg);

    let signal = if over_adr {
        Signal::Wait
    } else {
        match label.as_str() {
            "ALIGNED_BUY" | "QUICK_BUY" => Signal::Buy,
            "ALIGNED_SELL" | "QUICK_SELL" => Signal::Sell,
            _ => Signal::Wait,
        }
    };

    // ATR from the mid slot (or the first enabled) drives position math.
    let atr_slot = mid.or_else(|| enabled.first().copied());
    let atr = match atr_slot {
        Some(s) => {
            let candles = feed.candles(symbol, s.granularity).await?;
            calculate_atr(&candles, 14).unwrap_or(0.0)
        }
        None => 0.0,
    };

    let mut card = card_base(Some(label), signal, confidence);
    card.expiry_min = expiry_min;
    card.atr = atr;
    Ok(card)
}

fn alignment_direction(high: Option<Slot>, confidence: f64) -> Direction {
    match high {
        Some(s) if s.summary.recommendation.is_buyish() => Direction::Call,
        Some(s) if s.summary.recommendation.is_sellish() => Direction::Put,
        _ if confidence > 0.0 => Direction::Call,
        _ => Direction::Put,
    }
}

/// Label plus suggested expiry (minutes) from the enabled slots.
fn resolve_label(
    enabled: &[Slot],
    small: Option<Slot>,
    mid: Option<Slot>,
    high: Option<Slot>,
    cfg: &BotConfig,
) -> (String, u32) {
    // Single-TF mode: STRONG_* is treated as plain BUY/SELL and the expiry
    // matches the enabled timeframe.
    if enabled.len() == 1 {
        let slot = enabled[0];
        let label = match slot.summary.recommendation {
            Recommendation::Buy => "ALIGNED_BUY",
            Recommendation::Sell => "ALIGNED_SELL",
            Recommendation::StrongBuy => "ALIGNED_BUY",
            Recommendation::StrongSell => "ALIGNED_SELL",
            Recommendation::Neutral => "NEUTRAL",
        };
        return (label.to_string(), (slot.granularity / 60).max(1));
    }

    let lowest = enabled.first().copied();
    let highest = enabled.last().copied();

    let rec = |s: Option<Slot>| s.map(|s| s.summary.recommendation);
    let buyish = |s: Option<Slot>| rec(s).is_some_and(Recommendation::is_buyish);
    let sellish = |s: Option<Slot>| rec(s).is_some_and(Recommendation::is_sellish);

    let all_buy = enabled.iter().all(|s| s.summary.recommendation.is_buyish());
    let all_sell = enabled.iter().all(|s| s.summary.recommendation.is_sellish());

    let quick_buy = rec(highest) == Some(Recommendation::StrongBuy) && buyish(lowest);
    let quick_sell = rec(highest) == Some(Recommendation::StrongSell) && sellish(lowest);

    // Pullback: the committee agrees but the small timeframe lags.
    let small_enabled = cfg.strat7_tf(&cfg.strat7_small_tf).is_some();
    let pullback_buy = small_enabled
        && buyish(high.or(mid))
        && buyish(mid)
        && !buyish(small);
    let pullback_sell = small_enabled
        && sellish(high.or(mid))
        && sellish(mid)
        && !sellish(small);

    let label = if quick_buy {
        "QUICK_BUY"
    } else if quick_sell {
        "QUICK_SELL"
    } else if all_buy {
        "ALIGNED_BUY"
    } else if all_sell {
        "ALIGNED_SELL"
    } else if pullback_buy {
        "PULLBACK_BUY"
    } else if pullback_sell {
        "PULLBACK_SELL"
    } else {
        "NEUTRAL"
    };

    // Expiry keyed off the mid timeframe when enabled, else the highest.
    let mut expiry_min = match mid.map(|s| s.granularity) {
        Some(g) if g >= 3_600 => 60,
        Some(g) if g >= 900 => 15,
        Some(_) => 5,
        None => match high.map(|s| s.granularity) {
            Some(g) if g >= 86_400 => 1_440,
            Some(g) if g >= 3_600 => 60,
            _ => 5,
        },
    };
    if quick_buy || quick_sell {
        expiry_min = (expiry_min / 2).max(1);
    }

    (label.to_string(), expiry_min)
}

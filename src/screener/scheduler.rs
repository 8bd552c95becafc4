// =============================================================================
// Screener Scheduler — periodic per-symbol scorecard jobs
// =============================================================================
//
// A single loop posts one job per symbol per round into a small worker pool
// (at most five concurrent jobs), with a per-symbol submission throttle.
// Each job reads a market-view snapshot, computes the scorecard for the
// active strategy, writes its single per-symbol slot and pushes a
// `screener_update`. Rounds run every 10s (30s for strategy 7).
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{watch, Semaphore};
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::config::{BotConfig, StrategyId};
use crate::indicators::composite::composite_summary;
use crate::indicators::forecast::echo_forecast;
use crate::indicators::patterns::classify;
use crate::market_data::MarketView;
use crate::screener::alignment::compute_alignment;
use crate::screener::feed::TaFeed;
use crate::screener::legacy::compute_legacy;
use crate::screener::scorecard::{Direction, ScreenerScorecard, Signal};
use crate::screener::synthetic::compute_synthetic;

/// Concurrent screener jobs.
const POOL_PERMITS: usize = 5;
/// Recommendation band used for the light (strategy 1-3) scorecards.
const LIGHT_THRESHOLD: f64 = 10.0;

/// Run the screener scheduler until the stop signal fires.
pub async fn run_screener(state: Arc<AppState>, feed: TaFeed, mut stop: watch::Receiver<bool>) {
    info!("screener scheduler started");
    let pool = Arc::new(Semaphore::new(POOL_PERMITS));

    while !*stop.borrow() {
        let cfg = state.config.read().clone();
        let strategy = cfg.active_strategy;
        let symbols = cfg.symbols.clone();

        let submit_gap = match strategy {
            StrategyId::S7 => Duration::from_secs(2),
            _ => Duration::from_millis(500),
        };

        for symbol in symbols {
            if *stop.borrow() {
                break;
            }

            let permit = match pool.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let job_state = state.clone();
            let job_feed = feed.clone();
            let job_cfg = cfg.clone();
            tokio::spawn(async move {
                let _permit = permit;
                run_job(&job_state, &job_feed, &job_cfg, &symbol).await;
            });

            if sleep_or_stop(submit_gap, &mut stop).await {
                break;
            }
        }

        let round_gap = match strategy {
            StrategyId::S7 => Duration::from_secs(30),
            _ => Duration::from_secs(10),
        };
        if sleep_or_stop(round_gap, &mut stop).await {
            break;
        }
    }

    info!("screener scheduler stopped");
}

/// Sleep, returning early (`true`) when the stop signal fires.
async fn sleep_or_stop(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *stop.borrow(),
        _ = stop.changed() => true,
    }
}

/// Compute and publish one symbol's scorecard.
async fn run_job(state: &Arc<AppState>, feed: &TaFeed, cfg: &BotConfig, symbol: &str) {
    let Some(view) = state.market_view(symbol) else {
        debug!(symbol, "screener skipped — no market view yet");
        return;
    };
    let now = Utc::now().timestamp();

    let card = match cfg.active_strategy {
        StrategyId::S5 => compute_synthetic(&view, cfg, now),
        StrategyId::S6 => compute_legacy(&view, now),
        StrategyId::S7 => match compute_alignment(symbol, cfg, feed, &view, now).await {
            Ok(card) => Some(card),
            Err(e) => {
                warn!(symbol, error = %e, "alignment screener failed");
                None
            }
        },
        StrategyId::S4 => snr_snapshot_card(&view, cfg, now),
        _ => light_card(&view, cfg, now),
    };

    if let Some(card) = card {
        state.emitter.emit(
            "screener_update",
            json!({ "symbol": symbol, "data": &card }),
        );
        state.screener.write().insert(symbol.to_string(), card);
    }
}

/// Light summary for the crossover family (strategies 1-3): the composite TA
/// vote on the strategy's LTF.
fn light_card(view: &MarketView, cfg: &BotConfig, now: i64) -> Option<ScreenerScorecard> {
    let ltf = cfg.active_strategy.profile().ltf_granularity;
    let candles = view.series(ltf);
    if candles.len() < 30 {
        return None;
    }

    let summary = composite_summary(candles);
    let confidence = summary.score * 100.0;
    let direction = if confidence >= 0.0 {
        Direction::Call
    } else {
        Direction::Put
    };

    Some(ScreenerScorecard {
        confidence,
        threshold: LIGHT_THRESHOLD,
        direction,
        signal: ScreenerScorecard::resolve_signal(confidence, LIGHT_THRESHOLD, false),
        regime: summary.recommendation.to_string(),
        last_update: now,
        ..Default::default()
    })
}

/// Strategy-4 card: the echo-forecast correlation, the current price-action
/// pattern, and the implied direction.
fn snr_snapshot_card(view: &MarketView, _cfg: &BotConfig, now: i64) -> Option<ScreenerScorecard> {
    let m1 = view.series(60);
    if m1.len() < 45 {
        return None;
    }
    let closes: Vec<f64> = m1.iter().map(|c| c.close).collect();
    let last_close = *closes.last()?;

    let fcast = echo_forecast(&closes, 20, 40);
    let direction = match &fcast {
        Some(f) if f.final_price < last_close => Direction::Put,
        _ => Direction::Call,
    };
    let pattern = classify(m1);

    Some(ScreenerScorecard {
        confidence: fcast.as_ref().map(|f| f.correlation * 100.0).unwrap_or(0.0),
        threshold: 100.0,
        direction,
        signal: Signal::Wait,
        regime: "PriceAction".to_string(),
        label: pattern.map(|p| p.to_string()),
        fcast,
        last_update: now,
        ..Default::default()
    })
}

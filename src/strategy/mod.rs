// =============================================================================
// Strategy Evaluator — seven pluggable decision rules
// =============================================================================
//
// Contract: evaluate(symbol state, config, scorecard, now, is_candle_close)
// -> Intent. Called per tick (tick entry mode) and per LTF candle close.
// Control flow is result values, never exceptions: missing data or a failed
// filter yields Intent::None.
//
// Shared preconditions applied here:
//   - at-most-once evaluation per (symbol, ltf_epoch) on candle close
//   - trade dedup on the LTF epoch (survives reconnects)
//
// The daily risk gates and the one-position-per-symbol rule live in the
// engine worker, which owns the metrics and the contract book.
// =============================================================================

pub mod breakout;
pub mod screener_driven;
pub mod snr_reversal;

use crate::config::{BotConfig, StrategyId};
use crate::market_data::{Candle, SymbolState};
use crate::screener::scorecard::ScreenerScorecard;
use crate::types::Side;

/// The evaluator's verdict for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    None,
    Open(Side),
    Close(i64),
}

/// Evaluate the active strategy for one symbol.
///
/// Mutates per-symbol counters (whipsaw crosses, hourly caps, zone touches,
/// alignment debounce) and stamps the dedup keys when an intent is produced.
pub fn evaluate(
    state: &mut SymbolState,
    cfg: &BotConfig,
    card: Option<&ScreenerScorecard>,
    now: i64,
    is_candle_close: bool,
) -> Intent {
    let (Some(htf_open), Some(current_ltf), Some(price)) =
        (state.htf_open, state.current_ltf, state.last_tick)
    else {
        return Intent::None;
    };

    // The candle under evaluation: on close notifications the just-closed
    // candle (tail of the ring), otherwise the in-progress one.
    let profile = cfg.active_strategy.profile();
    let eval_candle: Candle = if is_candle_close {
        match state.ring(profile.ltf_granularity).and_then(|r| r.last()) {
            Some(c) => *c,
            None => return Intent::None,
        }
    } else {
        current_ltf
    };
    let time_key = eval_candle.epoch;

    if is_candle_close && state.last_processed_ltf == Some(time_key) {
        return Intent::None;
    }
    if state.last_trade_ltf == Some(time_key) {
        return Intent::None;
    }

    if cfg.active_strategy == StrategyId::S1 {
        state.track_cross(price);
    }

    let signal = match cfg.active_strategy {
        StrategyId::S4 => {
            snr_reversal::evaluate(state, cfg, card, &eval_candle, price, is_candle_close)
        }
        StrategyId::S5 | StrategyId::S6 => screener_driven::evaluate_intelligence(
            state,
            cfg,
            card,
            now,
        ),
        StrategyId::S7 => screener_driven::evaluate_alignment(state, cfg, card, now),
        _ => breakout::evaluate(state, cfg, htf_open, &eval_candle, price, is_candle_close),
    };

    match signal {
        Some(side) => {
            state.last_trade_ltf = Some(time_key);
            if is_candle_close {
                state.last_processed_ltf = Some(time_key);
            }
            Intent::Open(side)
        }
        None => {
            if is_candle_close {
                state.last_processed_ltf = Some(time_key);
            }
            Intent::None
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyId;
    use crate::market_data::SymbolState;

    fn candle(epoch: i64, open: f64, close: f64) -> Candle {
        Candle {
            epoch,
            open,
            high: open.max(close) + 0.1,
            low: open.min(close) - 0.1,
            close,
        }
    }

    /// Build a state where the S1 breakout conditions hold on the closed
    /// candle: daily open 100.0, LTF opened below it and closed above.
    fn breakout_state(cfg: &BotConfig) -> SymbolState {
        let profile = cfg.active_strategy.profile();
        let mut st = SymbolState::new("R_100");
        st.htf_open = Some(100.0);
        st.last_tick = Some(100.20);

        let g = profile.ltf_granularity as i64;
        st.apply_candles(
            profile.ltf_granularity,
            vec![
                candle(0, 99.9, 99.8),
                candle(g, 99.85, 99.9),
                candle(2 * g, 99.95, 100.20),
            ],
            3 * g,
            &profile,
        );
        st.current_ltf = Some(candle(3 * g, 100.20, 100.25));
        st
    }

    fn s1_cfg() -> BotConfig {
        let mut cfg = BotConfig::default();
        cfg.active_strategy = StrategyId::S1;
        cfg
    }

    #[test]
    fn s1_breakout_long_fires_once_per_candle() {
        let cfg = s1_cfg();
        let mut st = breakout_state(&cfg);

        let intent = evaluate(&mut st, &cfg, None, 1_000, true);
        assert_eq!(intent, Intent::Open(Side::Long));

        // Same LTF epoch: deduped.
        let again = evaluate(&mut st, &cfg, None, 1_001, true);
        assert_eq!(again, Intent::None);
    }

    #[test]
    fn dedup_key_survives_series_reset() {
        // Reconnect scenario: the dedup key persists across a socket drop so
        // the first post-reconnect tick cannot duplicate the entry.
        let cfg = s1_cfg();
        let mut st = breakout_state(&cfg);
        assert_eq!(evaluate(&mut st, &cfg, None, 1_000, true), Intent::Open(Side::Long));
        let key = st.last_trade_ltf;

        st.reset_series();
        assert_eq!(st.last_trade_ltf, key);

        let mut st2 = breakout_state(&cfg);
        st2.last_trade_ltf = key;
        assert_eq!(evaluate(&mut st2, &cfg, None, 1_000, true), Intent::None);
    }

    #[test]
    fn missing_htf_open_yields_none() {
        let cfg = s1_cfg();
        let mut st = breakout_state(&cfg);
        st.htf_open = None;
        assert_eq!(evaluate(&mut st, &cfg, None, 1_000, true), Intent::None);
    }

    #[test]
    fn close_notification_processed_at_most_once() {
        let cfg = s1_cfg();
        let mut st = breakout_state(&cfg);
        // Break the entry condition so no trade fires, then verify the close
        // is still marked processed.
        st.htf_open = Some(150.0);
        assert_eq!(evaluate(&mut st, &cfg, None, 1_000, true), Intent::None);
        let processed = st.last_processed_ltf;
        assert!(processed.is_some());
        assert_eq!(evaluate(&mut st, &cfg, None, 1_001, true), Intent::None);
        assert_eq!(st.last_processed_ltf, processed);
    }
}

// =============================================================================
// Execution — turns Open intents into broker order specs
// =============================================================================
//
// Stake: the configured USD amount when `use_fixed_balance`, else a percent
// of the account balance; floored at 0.35 USD. Multiplier positions take 5%
// of balance in percent mode and attach broker-side limit orders derived
// from the hourly ATR (1.5x SL / 3.0x TP mapped through the multiplier
// profit equation).
//
// Duration: strategy-computed expiry floored at 15s; end-of-day strategies
// run to the next UTC midnight.
// =============================================================================

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use crate::config::{BotConfig, ExpiryKind, StrategyId};
use crate::screener::scorecard::ScreenerScorecard;
use crate::types::Side;

/// Broker-enforced minimum stake.
const MIN_STAKE: f64 = 0.35;
/// Minimum contract duration in seconds.
const MIN_DURATION: i64 = 15;

/// SL distance in hourly ATRs for multiplier limit orders.
const MULT_SL_ATR: f64 = 1.5;
/// TP distance in hourly ATRs for multiplier limit orders.
const MULT_TP_ATR: f64 = 3.0;

/// A fully specified order ready to be sent to the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub frame: Value,
    pub stake: f64,
    pub is_multiplier: bool,
}

/// Round to broker cents.
fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Compute the stake for a new order.
///
/// `halve` applies the strategy-4 heavily-tested-zone reduction before the
/// floor is enforced.
pub fn compute_stake(cfg: &BotConfig, account_balance: f64, is_multiplier: bool, halve: bool) -> f64 {
    let mut amount = cfg.balance_value;
    if halve {
        amount *= 0.5;
    }
    if !cfg.use_fixed_balance {
        amount = if is_multiplier {
            // Multipliers size at 5% of balance in percent mode.
            account_balance * 0.05
        } else {
            amount / 100.0 * account_balance
        };
    }
    round2(amount).max(MIN_STAKE)
}

/// Seconds until the next UTC midnight.
pub fn seconds_to_utc_midnight(now: i64) -> i64 {
    let next_midnight = (now / 86_400 + 1) * 86_400;
    next_midnight - now
}

/// Seconds until the next `granularity` boundary.
pub fn seconds_to_next_boundary(now: i64, granularity: u32) -> i64 {
    crate::market_data::candle::next_bucket(now, granularity) - now
}

/// Strategy-computed expiry in seconds.
///
/// The operator's `custom_expiry` overrides fixed-expiry strategies; dynamic
/// strategies take the screener's suggested minutes.
pub fn compute_duration(
    cfg: &BotConfig,
    now: i64,
    card: Option<&ScreenerScorecard>,
    atr_1h: Option<f64>,
    price: f64,
    htf_open: Option<f64>,
) -> i64 {
    let strategy = cfg.active_strategy;
    let profile = strategy.profile();

    let duration = match profile.expiry {
        ExpiryKind::EndOfDay => seconds_to_utc_midnight(now),
        ExpiryKind::Fixed => {
            if let Some(secs) = cfg.custom_expiry_secs() {
                secs
            } else {
                let mut d = match strategy {
                    // Remaining time in the current HTF candle; strategy 3
                    // adds a two-minute buffer past the 15m boundary.
                    StrategyId::S3 => {
                        seconds_to_next_boundary(now, profile.htf_granularity) + 120
                    }
                    // Strategy 4 holds for one flat 5m period.
                    StrategyId::S4 => i64::from(profile.htf_granularity),
                    _ => seconds_to_next_boundary(now, profile.htf_granularity),
                };
                // Strategy 2: a stretched breakout gets half the runway.
                if strategy == StrategyId::S2 {
                    if let (Some(atr), Some(open)) = (atr_1h, htf_open) {
                        if (price - open).abs() > atr {
                            d /= 2;
                        }
                    }
                }
                d
            }
        }
        ExpiryKind::Dynamic => {
            let minutes = card.map(|c| c.expiry_min).unwrap_or(5);
            i64::from(minutes) * 60
        }
    };

    duration.max(MIN_DURATION)
}

/// Build a rise/fall (CALL/PUT) order spec.
pub fn binary_order(symbol: &str, side: Side, stake: f64, duration_secs: i64) -> OrderSpec {
    let contract_type = match side {
        Side::Long => "CALL",
        Side::Short => "PUT",
    };
    OrderSpec {
        frame: json!({
            "buy": 1,
            "price": stake,
            "parameters": {
                "amount": stake,
                "basis": "stake",
                "contract_type": contract_type,
                "currency": "USD",
                "duration": duration_secs,
                "duration_unit": "s",
                "symbol": symbol,
            }
        }),
        stake,
        is_multiplier: false,
    }
}

/// Build a multiplier (MULTUP/MULTDOWN) order spec with ATR-derived broker
/// limit orders. `entry_price` is the last tick, used to map price distances
/// to USD targets.
pub fn multiplier_order(
    symbol: &str,
    side: Side,
    stake: f64,
    multiplier: f64,
    atr_1h: f64,
    entry_price: f64,
) -> OrderSpec {
    let contract_type = match side {
        Side::Long => "MULTUP",
        Side::Short => "MULTDOWN",
    };

    let mut frame = json!({
        "buy": 1,
        "price": stake,
        "parameters": {
            "amount": stake,
            "basis": "stake",
            "contract_type": contract_type,
            "currency": "USD",
            "multiplier": multiplier,
            "symbol": symbol,
        }
    });

    // profit_usd = (price_distance / entry) * multiplier * stake
    if entry_price > 0.0 && atr_1h > 0.0 {
        let sl_usd = round2(MULT_SL_ATR * atr_1h / entry_price * multiplier * stake);
        let tp_usd = round2(MULT_TP_ATR * atr_1h / entry_price * multiplier * stake);
        if sl_usd > 0.0 && tp_usd > 0.0 {
            frame["parameters"]["limit_order"] = json!({
                "take_profit": tp_usd,
                "stop_loss": sl_usd,
            });
        }
    }

    OrderSpec {
        frame,
        stake,
        is_multiplier: true,
    }
}

/// Human-readable expiry label for the console.
pub fn expiry_label(duration_secs: i64, expiry: ExpiryKind, now: i64) -> String {
    match expiry {
        ExpiryKind::EndOfDay => {
            let at = Utc
                .timestamp_opt(now + duration_secs, 0)
                .single()
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_default();
            format!("expiry {at} UTC")
        }
        _ if duration_secs >= 60 => {
            format!("expiry {}m {}s", duration_secs / 60, duration_secs % 60)
        }
        _ => format!("expiry {duration_secs}s"),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_stake_with_floor() {
        let mut cfg = BotConfig::default();
        cfg.balance_value = 10.0;
        cfg.use_fixed_balance = true;
        assert_eq!(compute_stake(&cfg, 500.0, false, false), 10.0);
        assert_eq!(compute_stake(&cfg, 500.0, false, true), 5.0);

        cfg.balance_value = 0.10;
        assert_eq!(compute_stake(&cfg, 500.0, false, false), MIN_STAKE);
    }

    #[test]
    fn percent_stake_modes() {
        let mut cfg = BotConfig::default();
        cfg.balance_value = 2.0; // percent
        cfg.use_fixed_balance = false;
        assert_eq!(compute_stake(&cfg, 1_000.0, false, false), 20.0);
        // Multipliers take 5% of balance regardless of balance_value.
        assert_eq!(compute_stake(&cfg, 1_000.0, true, false), 50.0);
    }

    #[test]
    fn midnight_and_boundary_arithmetic() {
        // 2023-11-14 22:13:20 UTC.
        let now = 1_700_000_000_i64;
        let to_midnight = seconds_to_utc_midnight(now);
        assert_eq!((now + to_midnight) % 86_400, 0);
        assert!(to_midnight > 0 && to_midnight <= 86_400);

        let to_next_15m = seconds_to_next_boundary(now, 900);
        assert_eq!((now + to_next_15m) % 900, 0);
        assert!(to_next_15m > 0 && to_next_15m <= 900);
    }

    #[test]
    fn s1_duration_runs_to_midnight() {
        let mut cfg = BotConfig::default();
        cfg.active_strategy = StrategyId::S1;
        let now = 1_700_000_000_i64;
        let d = compute_duration(&cfg, now, None, None, 100.0, None);
        assert_eq!(d, seconds_to_utc_midnight(now));
    }

    #[test]
    fn s2_halves_duration_on_stretched_breakout() {
        let mut cfg = BotConfig::default();
        cfg.active_strategy = StrategyId::S2;
        let now = 1_700_000_000_i64;

        let base = compute_duration(&cfg, now, None, Some(2.0), 100.5, Some(100.0));
        assert_eq!(base, seconds_to_next_boundary(now, 3_600).max(15));

        // |price - htf_open| = 3.0 > ATR 2.0: halved.
        let halved = compute_duration(&cfg, now, None, Some(2.0), 103.0, Some(100.0));
        assert_eq!(halved, (seconds_to_next_boundary(now, 3_600) / 2).max(15));
    }

    #[test]
    fn s3_adds_buffer_past_quarter_hour() {
        let mut cfg = BotConfig::default();
        cfg.active_strategy = StrategyId::S3;
        let now = 1_700_000_000_i64;
        let d = compute_duration(&cfg, now, None, None, 100.0, None);
        assert_eq!(d, seconds_to_next_boundary(now, 900) + 120);
    }

    #[test]
    fn custom_expiry_overrides_fixed() {
        let mut cfg = BotConfig::default();
        cfg.active_strategy = StrategyId::S2;
        cfg.custom_expiry = "300".into();
        let d = compute_duration(&cfg, 1_700_000_000, None, None, 100.0, None);
        assert_eq!(d, 300);
    }

    #[test]
    fn dynamic_duration_from_scorecard() {
        let mut cfg = BotConfig::default();
        cfg.active_strategy = StrategyId::S5;
        let card = ScreenerScorecard {
            expiry_min: 10,
            ..Default::default()
        };
        let d = compute_duration(&cfg, 1_700_000_000, Some(&card), None, 100.0, None);
        assert_eq!(d, 600);
        let fallback = compute_duration(&cfg, 1_700_000_000, None, None, 100.0, None);
        assert_eq!(fallback, 300);
    }

    #[test]
    fn binary_order_shape() {
        let spec = binary_order("R_100", Side::Long, 10.0, 3_600);
        let p = &spec.frame["parameters"];
        assert_eq!(spec.frame["buy"], 1);
        assert_eq!(p["contract_type"], "CALL");
        assert_eq!(p["duration"], 3_600);
        assert_eq!(p["duration_unit"], "s");
        assert_eq!(p["basis"], "stake");
        assert_eq!(p["symbol"], "R_100");
        assert!(!spec.is_multiplier);

        let put = binary_order("R_100", Side::Short, 10.0, 60);
        assert_eq!(put.frame["parameters"]["contract_type"], "PUT");
    }

    #[test]
    fn multiplier_order_attaches_atr_limit_orders() {
        // entry 5000, ATR 25, mult 50, stake 10:
        //   SL = 1.5*25/5000 * 50 * 10 = 3.75 USD
        //   TP = 3.0*25/5000 * 50 * 10 = 7.50 USD
        let spec = multiplier_order("R_100", Side::Long, 10.0, 50.0, 25.0, 5_000.0);
        let p = &spec.frame["parameters"];
        assert_eq!(p["contract_type"], "MULTUP");
        assert_eq!(p["multiplier"], 50.0);
        assert_eq!(p["limit_order"]["stop_loss"], 3.75);
        assert_eq!(p["limit_order"]["take_profit"], 7.5);
        assert!(spec.is_multiplier);

        let down = multiplier_order("R_100", Side::Short, 10.0, 50.0, 0.0, 5_000.0);
        assert!(down.frame["parameters"].get("limit_order").is_none());
        assert_eq!(down.frame["parameters"]["contract_type"], "MULTDOWN");
    }

    #[test]
    fn duration_floor() {
        let mut cfg = BotConfig::default();
        cfg.active_strategy = StrategyId::S2;
        cfg.custom_expiry = "5".into();
        // 5s custom expiry is floored to the broker minimum.
        let d = compute_duration(&cfg, 1_700_000_000, None, None, 100.0, None);
        assert_eq!(d, MIN_DURATION);
    }
}

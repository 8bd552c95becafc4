// =============================================================================
// Bot Configuration — Typed whitelist with atomic save and live-diff
// =============================================================================
//
// Central configuration hub for the Helios engine. The engine only ever reads
// a validated `BotConfig`; the REST layer replaces it atomically. Keys outside
// the whitelist below are silently ignored on load/update.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_app_id() -> String {
    "62845".to_string()
}

fn default_true() -> bool {
    true
}

fn default_strategy() -> StrategyId {
    StrategyId::S1
}

fn default_multiplier_value() -> f64 {
    100.0
}

fn default_custom_expiry() -> String {
    "default".to_string()
}

fn default_balance_value() -> f64 {
    10.0
}

fn default_max_daily_loss_pct() -> f64 {
    5.0
}

fn default_max_daily_profit_pct() -> f64 {
    10.0
}

fn default_force_close_duration() -> i64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_strat7_small_tf() -> String {
    "60".to_string()
}

fn default_strat7_mid_tf() -> String {
    "300".to_string()
}

fn default_strat7_high_tf() -> String {
    "3600".to_string()
}

fn default_binary_fallback_pct() -> f64 {
    1.0
}

// =============================================================================
// Enumerations
// =============================================================================

/// The seven selectable strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyId {
    #[serde(rename = "strategy_1")]
    S1,
    #[serde(rename = "strategy_2")]
    S2,
    #[serde(rename = "strategy_3")]
    S3,
    #[serde(rename = "strategy_4")]
    S4,
    #[serde(rename = "strategy_5")]
    S5,
    #[serde(rename = "strategy_6")]
    S6,
    #[serde(rename = "strategy_7")]
    S7,
}

impl StrategyId {
    /// Whether this strategy consumes the screener scorecard for entries.
    pub fn is_screener_driven(self) -> bool {
        matches!(self, Self::S5 | Self::S6 | Self::S7)
    }
}

impl std::fmt::Display for StrategyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let n = match self {
            Self::S1 => 1,
            Self::S2 => 2,
            Self::S3 => 3,
            Self::S4 => 4,
            Self::S5 => 5,
            Self::S6 => 6,
            Self::S7 => 7,
        };
        write!(f, "strategy_{n}")
    }
}

/// Broker contract family placed by the execution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractKind {
    #[serde(rename = "rise_fall")]
    RiseFall,
    #[serde(rename = "multiplier")]
    Multiplier,
}

impl Default for ContractKind {
    fn default() -> Self {
        Self::RiseFall
    }
}

/// When the strategy evaluator is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    #[serde(rename = "tick")]
    Tick,
    #[serde(rename = "candle_close")]
    CandleClose,
}

impl Default for EntryType {
    fn default() -> Self {
        Self::CandleClose
    }
}

// =============================================================================
// Strategy profiles
// =============================================================================

/// How a strategy's expiry is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryKind {
    /// Seconds until the next UTC midnight.
    EndOfDay,
    /// Seconds until the next HTF candle boundary.
    Fixed,
    /// Taken from the screener scorecard.
    Dynamic,
}

/// Static per-strategy timeframe profile.
#[derive(Debug, Clone, Copy)]
pub struct StrategyProfile {
    pub name: &'static str,
    pub htf_granularity: u32,
    pub ltf_granularity: u32,
    pub expiry: ExpiryKind,
}

impl StrategyId {
    /// Timeframe profile for this strategy.
    pub fn profile(self) -> StrategyProfile {
        match self {
            Self::S1 => StrategyProfile {
                name: "Slow (Daily / 15m)",
                htf_granularity: 86_400,
                ltf_granularity: 900,
                expiry: ExpiryKind::EndOfDay,
            },
            Self::S2 => StrategyProfile {
                name: "Moderate (1h / 3m)",
                htf_granularity: 3_600,
                ltf_granularity: 180,
                expiry: ExpiryKind::Fixed,
            },
            Self::S3 => StrategyProfile {
                name: "Fast (15m / 1m)",
                htf_granularity: 900,
                ltf_granularity: 60,
                expiry: ExpiryKind::Fixed,
            },
            Self::S4 => StrategyProfile {
                name: "SNR Price Action",
                htf_granularity: 300,
                ltf_granularity: 60,
                expiry: ExpiryKind::Fixed,
            },
            Self::S5 => StrategyProfile {
                name: "Intelligence Screener v2.0",
                htf_granularity: 3_600,
                ltf_granularity: 60,
                expiry: ExpiryKind::Dynamic,
            },
            Self::S6 => StrategyProfile {
                name: "Intelligence Legacy v1.0",
                htf_granularity: 3_600,
                ltf_granularity: 60,
                expiry: ExpiryKind::Dynamic,
            },
            Self::S7 => StrategyProfile {
                name: "Intelligent Multi-TF Alignment",
                htf_granularity: 3_600,
                ltf_granularity: 60,
                expiry: ExpiryKind::Dynamic,
            },
        }
    }

    /// The `(granularity, count)` history set to warm up when this strategy
    /// becomes active. The LTF/HTF pair always comes first.
    pub fn history_set(self) -> Vec<(u32, u32)> {
        match self {
            // 4h bias filter history on top of the base pair. Daily depth 50
            // so the +2 daily-ATR exit is armed from the first trade.
            Self::S1 => vec![(900, 100), (86_400, 50), (14_400, 100)],
            Self::S2 => vec![(180, 100), (3_600, 2), (14_400, 100)],
            Self::S3 => vec![(60, 100), (900, 2)],
            Self::S4 => vec![(60, 100), (300, 200), (3_600, 100)],
            Self::S5 => vec![(60, 100), (300, 100), (900, 200), (3_600, 200), (86_400, 50)],
            Self::S6 => vec![(60, 100), (900, 200), (3_600, 200), (86_400, 50)],
            // Alignment analysis fetches on demand; 15m/1h are warmed so the
            // divergence and freeride exits have data, daily for the ADR
            // guard.
            Self::S7 => vec![(60, 100), (900, 200), (3_600, 200), (86_400, 50)],
        }
    }
}

// =============================================================================
// BotConfig
// =============================================================================

/// Top-level operator configuration. Every field has a serde default so that
/// older JSON files missing new fields still deserialise correctly; unknown
/// keys are dropped (whitelist semantics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    // --- Broker credentials --------------------------------------------------
    #[serde(default)]
    pub api_token: String,

    #[serde(default = "default_app_id")]
    pub app_id: String,

    // --- Universe & strategy -------------------------------------------------
    #[serde(default)]
    pub symbols: Vec<String>,

    #[serde(default = "default_true")]
    pub is_demo: bool,

    #[serde(default = "default_strategy")]
    pub active_strategy: StrategyId,

    #[serde(default)]
    pub contract_type: ContractKind,

    #[serde(default = "default_multiplier_value")]
    pub multiplier_value: f64,

    /// "default" or an explicit number of seconds.
    #[serde(default = "default_custom_expiry")]
    pub custom_expiry: String,

    #[serde(default)]
    pub entry_type: EntryType,

    // --- Sizing --------------------------------------------------------------
    /// USD stake when `use_fixed_balance`, else percent of account balance.
    #[serde(default = "default_balance_value")]
    pub balance_value: f64,

    #[serde(default = "default_true")]
    pub use_fixed_balance: bool,

    // --- Risk gates ----------------------------------------------------------
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,

    #[serde(default = "default_max_daily_profit_pct")]
    pub max_daily_profit_pct: f64,

    // --- TP / SL / force close ----------------------------------------------
    #[serde(default)]
    pub tp_enabled: bool,

    /// USD when `use_fixed_balance`, else percent of stake.
    #[serde(default)]
    pub tp_value: f64,

    #[serde(default)]
    pub sl_enabled: bool,

    #[serde(default)]
    pub sl_value: f64,

    #[serde(default)]
    pub force_close_enabled: bool,

    /// Seconds after purchase before an open contract is force-closed.
    #[serde(default = "default_force_close_duration")]
    pub force_close_duration: i64,

    /// Price-trigger distance for binary contracts as percent of entry, used
    /// as the fail-safe TP/SL approximation.
    #[serde(default = "default_binary_fallback_pct")]
    pub binary_fallback_pct: f64,

    // --- Logging -------------------------------------------------------------
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // --- Strategy 7 timeframes ----------------------------------------------
    /// Granularity in seconds as a string, or "OFF".
    #[serde(default = "default_strat7_small_tf")]
    pub strat7_small_tf: String,

    #[serde(default = "default_strat7_mid_tf")]
    pub strat7_mid_tf: String,

    #[serde(default = "default_strat7_high_tf")]
    pub strat7_high_tf: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config deserialises from defaults")
    }
}

impl BotConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            strategy = %config.active_strategy,
            "config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Parsed strategy-7 timeframe, or `None` when the slot is "OFF".
    pub fn strat7_tf(&self, raw: &str) -> Option<u32> {
        if raw.eq_ignore_ascii_case("off") {
            return None;
        }
        raw.parse::<u32>().ok().filter(|g| *g > 0)
    }

    /// Seconds parsed from `custom_expiry`, when the operator overrode it.
    pub fn custom_expiry_secs(&self) -> Option<i64> {
        if self.custom_expiry == "default" {
            return None;
        }
        self.custom_expiry.parse::<i64>().ok().filter(|s| *s > 0)
    }

    /// Compute the minimal reconfiguration needed to move from `self` to
    /// `next`. A deep-equal update produces `ConfigDelta::default()` — zero
    /// side effects.
    pub fn diff(&self, next: &Self) -> ConfigDelta {
        let mut delta = ConfigDelta::default();

        if self == next {
            return delta;
        }

        if self.api_token != next.api_token || self.app_id != next.app_id {
            delta.reauthorize = true;
            return delta; // Reconnect re-derives subscriptions anyway.
        }

        if self.active_strategy != next.active_strategy {
            delta.strategy_changed = true;
            return delta; // Full reset re-subscribes every symbol.
        }

        let old: std::collections::HashSet<&String> = self.symbols.iter().collect();
        let new: std::collections::HashSet<&String> = next.symbols.iter().collect();
        delta.added_symbols = new.difference(&old).map(|s| (*s).clone()).collect();
        delta.removed_symbols = old.difference(&new).map(|s| (*s).clone()).collect();

        delta
    }
}

/// Minimal set of actions implied by a config replacement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDelta {
    pub reauthorize: bool,
    pub strategy_changed: bool,
    pub added_symbols: Vec<String>,
    pub removed_symbols: Vec<String>,
}

impl ConfigDelta {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

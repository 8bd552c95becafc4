// =============================================================================
// Shared types used across the Helios trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction of a position or trade intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The opposite direction.
    pub fn flip(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// +1.0 for long, -1.0 for short. Used in PnL / distance arithmetic.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    /// Map a Deriv contract type string to a side.
    pub fn from_contract_type(ctype: &str) -> Self {
        match ctype {
            "CALL" | "MULTUP" => Self::Long,
            _ => Self::Short,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Engine lifecycle state.
///
/// `PassiveMonitoring` keeps the broker session authorized and the screener
/// running but refuses new entries. Config updates move freely between
/// `PassiveMonitoring` and `Trading` without tearing down the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineStatus {
    Stopped,
    PassiveMonitoring,
    Trading,
}

impl EngineStatus {
    pub fn is_trading(self) -> bool {
        matches!(self, Self::Trading)
    }
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::PassiveMonitoring => write!(f, "PassiveMonitoring"),
            Self::Trading => write!(f, "Trading"),
        }
    }
}

/// Which side of the HTF open the last tick was on. Used for whipsaw counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossSide {
    Above,
    Below,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_flip_and_sign() {
        assert_eq!(Side::Long.flip(), Side::Short);
        assert_eq!(Side::Short.flip(), Side::Long);
        assert_eq!(Side::Long.sign(), 1.0);
        assert_eq!(Side::Short.sign(), -1.0);
    }

    #[test]
    fn side_from_contract_type() {
        assert_eq!(Side::from_contract_type("CALL"), Side::Long);
        assert_eq!(Side::from_contract_type("MULTUP"), Side::Long);
        assert_eq!(Side::from_contract_type("PUT"), Side::Short);
        assert_eq!(Side::from_contract_type("MULTDOWN"), Side::Short);
    }

    #[test]
    fn status_default_is_stopped() {
        assert_eq!(EngineStatus::default(), EngineStatus::Stopped);
        assert!(!EngineStatus::PassiveMonitoring.is_trading());
        assert!(EngineStatus::Trading.is_trading());
    }
}

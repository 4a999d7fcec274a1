//! Trade recommendation and position-audit records.

use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use trendflow_core::OptionSide;

/// Direction of an emitted recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
}

impl SignalAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// Lifecycle status of a signal and its tracked position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    Active,
    TargetHit,
    SlHit,
    TrailingSlHit,
}

impl SignalStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::TargetHit => "TARGET_HIT",
            Self::SlHit => "SL_HIT",
            Self::TrailingSlHit => "TRAILING_SL_HIT",
        }
    }
}

/// One emitted trade recommendation.
#[derive(Debug, Clone, Serialize)]
pub struct SignalRecord {
    pub timestamp: DateTime<Tz>,
    pub action: SignalAction,
    pub side: OptionSide,
    pub option_key: String,
    pub strike: f64,
    /// Accumulated cash at emission time.
    pub cash: f64,
    pub status: SignalStatus,
}

impl SignalRecord {
    /// Combined type label stored in the signals table, e.g. "BUY_CE".
    #[must_use]
    pub fn signal_type(&self) -> String {
        format!("{}_{}", self.action.as_str(), self.side.as_str())
    }
}

/// Audit row written when a tracked position exits.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingRecord {
    pub signal_id: i64,
    pub timestamp: DateTime<Tz>,
    pub exit_price: f64,
    pub pnl: f64,
    pub status: SignalStatus,
}

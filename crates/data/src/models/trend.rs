use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;

use super::Interval;

/// Composite trend state at one candle boundary.
///
/// The trend value is derived from the index and future Heikin-Ashi shape,
/// their SAR direction, and the future's order-flow delta; +1 up, -1 down,
/// 0 neutral. The optional recommendation fields carry trade entries and
/// exits recorded at the same boundary.
#[derive(Debug, Clone, Serialize)]
pub struct TrendRecord {
    pub timestamp: DateTime<Tz>,
    pub interval: Interval,
    pub trend_value: i32,
    pub recommendation: Option<String>,
    pub entry_price: Option<f64>,
    pub target: Option<f64>,
    pub stop_loss: Option<f64>,
    pub profit_loss: Option<f64>,
}

impl TrendRecord {
    /// A bare trend row with no recommendation attached.
    #[must_use]
    pub fn bare(timestamp: DateTime<Tz>, interval: Interval, trend_value: i32) -> Self {
        Self {
            timestamp,
            interval,
            trend_value,
            recommendation: None,
            entry_price: None,
            target: None,
            stop_loss: None,
            profit_loss: None,
        }
    }
}

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;

use super::Interval;

/// Finalized net order-flow for one bucket of the option basket.
#[derive(Debug, Clone, Serialize)]
pub struct CashFlowSnapshot {
    /// Bucket start, IST.
    pub timestamp: DateTime<Tz>,
    pub interval: Interval,
    /// Accumulated signed cash at bucket close.
    pub cash: f64,
    /// Running minimum of the accumulated cash within the bucket.
    pub min_cash: f64,
    /// Running maximum of the accumulated cash within the bucket.
    pub max_cash: f64,
    /// Number of option contracts in the basket.
    pub basket_size: usize,
}

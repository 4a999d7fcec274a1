use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;

use super::Interval;

/// Latest computed feature set for one instrument.
///
/// Exactly one row per instrument is kept in the `latest_candles` table; the
/// dashboard reads these rows for its live view. Upserted on every finalize.
#[derive(Debug, Clone, Serialize)]
pub struct LatestSnapshot {
    pub instrument_key: String,
    pub instrument_name: String,
    pub instrument_type: String,
    pub strike_price: Option<f64>,
    pub option_type: Option<String>,
    pub timestamp: DateTime<Tz>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub atp: f64,
    pub vwap: f64,
    pub price_change: f64,
    pub price_change_pct: f64,
    pub delta: i64,
    pub delta_pct: f64,
    pub min_delta: i64,
    pub max_delta: i64,
    pub buy_volume: i64,
    pub sell_volume: i64,
    pub tick_count: u32,
    pub vtt_open: f64,
    pub vtt_close: f64,
    pub interval: Interval,
    pub trend_value: i32,
    pub recommendation: Option<String>,
    pub entry_price: Option<f64>,
    pub target: Option<f64>,
    pub stop_loss: Option<f64>,
    pub profit_loss: Option<f64>,
    pub prev_close: f64,
    pub intraday_high: f64,
    pub intraday_low: f64,
    pub last_updated: DateTime<Tz>,
}

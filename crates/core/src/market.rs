//! Market calendar and candle-bucket helpers.
//!
//! The upstream exchange operates in IST; every feed timestamp is converted
//! to IST before any session or bucket decision is made.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use chrono_tz::Tz;

pub const IST: Tz = Kolkata;

#[must_use]
pub fn market_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 15, 0).expect("valid time")
}

#[must_use]
pub fn market_close() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 30, 0).expect("valid time")
}

/// New trade recommendations are suppressed before this time.
#[must_use]
pub fn trading_start() -> NaiveTime {
    NaiveTime::from_hms_opt(10, 0, 0).expect("valid time")
}

/// New trade recommendations are suppressed at and after this time.
#[must_use]
pub fn no_new_trades_after() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 0, 0).expect("valid time")
}

#[must_use]
pub fn now_ist() -> DateTime<Tz> {
    Utc::now().with_timezone(&IST)
}

/// Converts a feed timestamp (epoch milliseconds) to IST.
#[must_use]
pub fn timestamp_ms_to_ist(ms: i64) -> Option<DateTime<Tz>> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.with_timezone(&IST))
}

/// Whether the exchange session is open at `now`: 09:15-15:30 IST, Mon-Fri.
#[must_use]
pub fn is_market_open(now: &DateTime<Tz>) -> bool {
    let time = now.time();
    now.weekday().num_days_from_monday() < 5 && time >= market_open() && time < market_close()
}

#[must_use]
pub fn is_weekend(now: &DateTime<Tz>) -> bool {
    now.weekday().num_days_from_monday() >= 5
}

/// Minute bucket owning a tick. A tick exactly on :00 belongs to the prior
/// minute, so one second is subtracted before truncating.
#[must_use]
pub fn candle_minute(ts: DateTime<Tz>) -> DateTime<Tz> {
    let adjusted = ts - Duration::seconds(1);
    truncate_to(adjusted, 60)
}

/// Start of the 5-minute bucket containing `minute`.
#[must_use]
pub fn five_minute_bucket(minute: DateTime<Tz>) -> DateTime<Tz> {
    truncate_to(minute, 300)
}

fn truncate_to(ts: DateTime<Tz>, window_secs: i64) -> DateTime<Tz> {
    let secs = ts.timestamp();
    let bucket = secs - secs.rem_euclid(window_secs);
    IST.timestamp_opt(bucket, 0).single().unwrap_or(ts)
}

/// Compact IST trade date used in per-day table names, e.g. "20260804".
#[must_use]
pub fn trade_date_compact(now: &DateTime<Tz>) -> String {
    now.format("%Y%m%d").to_string()
}

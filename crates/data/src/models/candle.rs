//! Candle records.
//!
//! A [`Candle`] is mutable while it is the current bar for its processor and
//! becomes immutable once finalized and handed to the writer. [`HaCandle`] is
//! the derived Heikin-Ashi bar carrying the SAR trend flag.

use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Candle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    OneMin,
    FiveMin,
}

impl Interval {
    /// Label stored in the `candle_interval` columns.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneMin => "1min",
            Self::FiveMin => "5min",
        }
    }

    /// Infix used in per-day table names ("candles" vs "candles5").
    #[must_use]
    pub const fn table_infix(&self) -> &'static str {
        match self {
            Self::OneMin => "",
            Self::FiveMin => "5",
        }
    }
}

/// One OHLC bar for an instrument and interval.
#[derive(Debug, Clone, Serialize)]
pub struct Candle {
    pub instrument_key: String,
    /// Bucket start, IST.
    pub timestamp: DateTime<Tz>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    /// Average traded price as reported by the feed.
    pub atp: f64,
    /// Signed order-flow delta accumulated within the bar.
    pub delta: i64,
    pub min_delta: i64,
    pub max_delta: i64,
    pub buy_volume: i64,
    pub sell_volume: i64,
    pub tick_count: u32,
    /// Cumulative traded volume at bar open and close.
    pub vtt_open: f64,
    pub vtt_close: f64,
}

impl Candle {
    /// Opens a new bar from the first tick of a bucket.
    #[must_use]
    pub fn open_at(
        instrument_key: impl Into<String>,
        timestamp: DateTime<Tz>,
        price: f64,
        atp: f64,
        vtt: f64,
    ) -> Self {
        Self {
            instrument_key: instrument_key.into(),
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0,
            atp,
            delta: 0,
            min_delta: 0,
            max_delta: 0,
            buy_volume: 0,
            sell_volume: 0,
            tick_count: 0,
            vtt_open: vtt,
            vtt_close: vtt,
        }
    }
}

/// Heikin-Ashi bar derived from a finalized [`Candle`].
#[derive(Debug, Clone, Serialize)]
pub struct HaCandle {
    pub instrument_key: String,
    pub timestamp: DateTime<Tz>,
    pub ha_open: f64,
    pub ha_high: f64,
    pub ha_low: f64,
    pub ha_close: f64,
    pub volume: i64,
    /// Mean of the synthetic high, low, and close.
    pub hlc3: f64,
    /// +1 uptrend, -1 downtrend. None when the SAR filter is not configured.
    pub sar_trend: Option<i32>,
}

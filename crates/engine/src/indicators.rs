//! Heikin-Ashi transform and Parabolic SAR trend filter.
//!
//! Both indicators are recurrences over an ordered candle sequence. The
//! previous-bar state is explicit and owned per instrument+interval; dropping
//! the state restarts the recurrence from a neutral origin.

use trendflow_data::{Candle, HaCandle};

/// Heikin-Ashi recurrence state: the previously derived synthetic bar.
#[derive(Debug, Default)]
pub struct HeikinAshiState {
    previous: Option<HaCandle>,
}

impl HeikinAshiState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the next Heikin-Ashi bar from a finalized source candle and
    /// advances the recurrence.
    ///
    /// ha_close is the bar's OHLC mean; ha_open averages the prior synthetic
    /// bar (or the source open/close when there is none); high/low enclose
    /// the source extremes and the new synthetic open/close.
    pub fn next_candle(&mut self, candle: &Candle) -> HaCandle {
        let ha_close = (candle.open + candle.high + candle.low + candle.close) * 0.25;
        let ha_open = match &self.previous {
            Some(prev) => (prev.ha_open + prev.ha_close) * 0.5,
            None => (candle.open + candle.close) * 0.5,
        };
        let ha_high = candle.high.max(ha_open).max(ha_close);
        let ha_low = candle.low.min(ha_open).min(ha_close);
        let hlc3 = (ha_high + ha_low + ha_close) / 3.0;

        let derived = HaCandle {
            instrument_key: candle.instrument_key.clone(),
            timestamp: candle.timestamp,
            ha_open,
            ha_high,
            ha_low,
            ha_close,
            volume: candle.volume,
            hlc3,
            sar_trend: None,
        };
        self.previous = Some(derived.clone());
        derived
    }
}

const SAR_START: f64 = 0.4;
const SAR_INCREMENT: f64 = 0.3;
const SAR_MAXIMUM: f64 = 0.7;

/// Iterative Parabolic SAR.
///
/// Seeded from the first bar (sar = low, extreme = high, trend up); the stop
/// is projected toward the extreme point by the acceleration factor, which
/// grows on each new extreme and resets when the trend reverses.
#[derive(Debug)]
pub struct ParabolicSar {
    start: f64,
    increment: f64,
    maximum: f64,
    sar: Option<f64>,
    extreme: f64,
    acceleration: f64,
    trend: i32,
}

impl Default for ParabolicSar {
    fn default() -> Self {
        Self::new(SAR_START, SAR_INCREMENT, SAR_MAXIMUM)
    }
}

impl ParabolicSar {
    #[must_use]
    pub fn new(start: f64, increment: f64, maximum: f64) -> Self {
        Self {
            start,
            increment,
            maximum,
            sar: None,
            extreme: 0.0,
            acceleration: start,
            trend: 1,
        }
    }

    /// Feeds one bar and returns the updated (sar, trend) pair.
    /// Trend is +1 for up, -1 for down.
    pub fn update(&mut self, high: f64, low: f64, _close: f64) -> (f64, i32) {
        let Some(sar) = self.sar else {
            self.sar = Some(low);
            self.extreme = high;
            return (low, self.trend);
        };

        let projected = sar + self.acceleration * (self.extreme - sar);
        if self.trend == 1 {
            if projected > low {
                // Price crossed the stop: reverse down.
                self.trend = -1;
                self.sar = Some(self.extreme);
                self.extreme = low;
                self.acceleration = self.start;
            } else {
                self.sar = Some(projected);
                if high > self.extreme {
                    self.extreme = high;
                    self.acceleration = (self.acceleration + self.increment).min(self.maximum);
                }
            }
        } else if projected < high {
            // Price crossed the stop: reverse up.
            self.trend = 1;
            self.sar = Some(self.extreme);
            self.extreme = high;
            self.acceleration = self.start;
        } else {
            self.sar = Some(projected);
            if low < self.extreme {
                self.extreme = low;
                self.acceleration = (self.acceleration + self.increment).min(self.maximum);
            }
        }

        (self.sar.unwrap_or(0.0), self.trend)
    }
}

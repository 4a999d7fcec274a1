//! Composite trend computation and the index trend-following trade slots.
//!
//! The composite trend is derived only from the index and future state; every
//! processor reads the latest published values from a shared [`TrendSnapshot`]
//! owned by the engine, which is updated in dispatch order and therefore
//! always consistent within a message.

use trendflow_data::HaCandle;

use crate::LOT_QUANTITY;

/// Latest index/future state the trend rule reads.
///
/// Heikin-Ashi entries are published when the owning processor finalizes a
/// bar; the future delta tracks the future's open candle tick by tick.
#[derive(Debug, Default)]
pub struct TrendSnapshot {
    pub index_ha_1min: Option<HaCandle>,
    pub index_ha_5min: Option<HaCandle>,
    pub future_ha_1min: Option<HaCandle>,
    pub future_ha_5min: Option<HaCandle>,
    /// Signed delta of the future's current 1-minute candle.
    pub future_delta_1min: i64,
    /// Running signed delta of the future's current 5-minute bucket.
    pub future_delta_5min: i64,
}

/// Composite trend: +1 when both the index and the future agree up, -1 when
/// both agree down, 0 otherwise.
#[must_use]
pub fn composite_trend(index_ha: &HaCandle, future_ha: &HaCandle, future_delta: i64) -> i32 {
    let index_up = index_ha.ha_open < index_ha.ha_close && index_ha.sar_trend == Some(1);
    let index_down = index_ha.ha_open > index_ha.ha_close && index_ha.sar_trend == Some(-1);
    let future_up =
        future_delta > 0 && future_ha.sar_trend == Some(1) && future_ha.ha_open < future_ha.ha_close;
    let future_down = future_delta < 0
        && future_ha.sar_trend == Some(-1)
        && future_ha.ha_open > future_ha.ha_close;

    if index_up && future_up {
        1
    } else if index_down && future_down {
        -1
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeState {
    /// Opened on a trend flip; enters at the next finalized candle's open.
    WaitingEntry,
    Active,
}

/// Outcome of evaluating a trade slot against a price.
#[derive(Debug, Clone)]
pub struct TradeExit {
    pub label: &'static str,
    pub entry_price: f64,
    pub target: f64,
    pub stop: f64,
    pub profit_loss: f64,
}

/// One always-on trend-following trade on the index, one slot per interval.
///
/// Fixed +5/-5 target/stop on the index level; once price reaches entry+4
/// the stop trails to entry+2.
#[derive(Debug, Clone)]
pub struct ActiveTrade {
    pub label: &'static str,
    pub state: TradeState,
    pub entry_price: f64,
    pub target: f64,
    pub stop: f64,
    pub trail_armed: bool,
}

impl ActiveTrade {
    #[must_use]
    pub fn waiting(label: &'static str) -> Self {
        Self {
            label,
            state: TradeState::WaitingEntry,
            entry_price: 0.0,
            target: 0.0,
            stop: 0.0,
            trail_armed: false,
        }
    }

    /// Enters the trade at a finalized candle's open.
    pub fn enter(&mut self, open: f64) {
        self.entry_price = open;
        self.target = open + 5.0;
        self.stop = open - 5.0;
        self.trail_armed = false;
        self.state = TradeState::Active;
    }

    /// Evaluates the trade against a price. Returns the exit when target or
    /// stop is hit; arms the trailing stop as a side effect.
    pub fn evaluate(&mut self, price: f64) -> Option<TradeExit> {
        if self.state != TradeState::Active {
            return None;
        }
        if !self.trail_armed && price >= self.entry_price + 4.0 {
            self.stop = self.entry_price + 2.0;
            self.trail_armed = true;
            tracing::info!(stop = self.stop, "Trailing stop armed for {}", self.label);
        }

        let lot = LOT_QUANTITY as f64;
        if price >= self.target {
            return Some(self.exit(lot * 5.0));
        }
        if price <= self.stop {
            let profit_loss = if self.trail_armed { lot * 2.0 } else { lot * -5.0 };
            return Some(self.exit(profit_loss));
        }
        None
    }

    fn exit(&self, profit_loss: f64) -> TradeExit {
        TradeExit {
            label: self.label,
            entry_price: self.entry_price,
            target: self.target,
            stop: self.stop,
            profit_loss,
        }
    }
}

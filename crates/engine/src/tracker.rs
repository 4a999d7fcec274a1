//! Live position tracking for accepted BUY signals.
//!
//! Each tracked position is re-evaluated on every inbound message against its
//! own option's latest close, never the index or future price. Fixed +5/-5
//! target/stop rupees on the option premium, with the stop trailing to
//! entry+2 once price reaches entry+4.

use chrono::DateTime;
use chrono_tz::Tz;
use std::collections::HashMap;

use trendflow_data::SignalStatus;

use crate::LOT_QUANTITY;

/// One active tracked position, keyed by option instrument.
#[derive(Debug, Clone)]
pub struct Position {
    pub signal_id: i64,
    pub option_key: String,
    pub entry_price: f64,
    pub target: f64,
    pub stop: f64,
    pub trail_armed: bool,
    pub quantity: i64,
    pub entry_time: DateTime<Tz>,
}

/// A closed position, ready for its audit row and signal update.
#[derive(Debug, Clone)]
pub struct PositionExit {
    pub signal_id: i64,
    pub option_key: String,
    pub entry_price: f64,
    pub target: f64,
    pub stop: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub status: SignalStatus,
    pub exit_time: DateTime<Tz>,
}

#[derive(Debug, Default)]
pub struct PositionTracker {
    positions: HashMap<String, Position>,
}

impl PositionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.positions.len()
    }

    /// Registers a position for an accepted BUY signal, sampling the option's
    /// current close as entry. A non-positive entry price is a data-quality
    /// gap: the signal is left untracked with a warning.
    pub fn start_tracking(
        &mut self,
        signal_id: i64,
        option_key: &str,
        entry_price: f64,
        now: DateTime<Tz>,
    ) -> bool {
        if entry_price <= 0.0 {
            tracing::warn!(
                option = option_key,
                "Cannot track position without a valid entry price"
            );
            return false;
        }

        let position = Position {
            signal_id,
            option_key: option_key.to_string(),
            entry_price,
            target: entry_price + 5.0,
            stop: entry_price - 5.0,
            trail_armed: false,
            quantity: LOT_QUANTITY,
            entry_time: now,
        };
        tracing::info!(
            option = option_key,
            entry = position.entry_price,
            target = position.target,
            stop = position.stop,
            quantity = position.quantity,
            "Tracking started"
        );
        self.positions.insert(option_key.to_string(), position);
        true
    }

    /// Re-evaluates every active position against its own option's latest
    /// close. Returns the positions that exited.
    pub fn check_all<F>(&mut self, price_of: F, now: DateTime<Tz>) -> Vec<PositionExit>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let mut exits = Vec::new();

        for position in self.positions.values_mut() {
            let Some(price) = price_of(&position.option_key) else {
                continue;
            };
            if price <= 0.0 {
                continue;
            }

            if !position.trail_armed && price >= position.entry_price + 4.0 {
                position.stop = position.entry_price + 2.0;
                position.trail_armed = true;
                tracing::info!(
                    option = %position.option_key,
                    stop = position.stop,
                    "Trailing stop armed"
                );
            }

            let lot = position.quantity as f64;
            let exit = if price >= position.target {
                Some((SignalStatus::TargetHit, lot * 5.0))
            } else if price <= position.stop {
                if position.trail_armed {
                    Some((SignalStatus::TrailingSlHit, lot * 2.0))
                } else {
                    Some((SignalStatus::SlHit, lot * -5.0))
                }
            } else {
                None
            };

            if let Some((status, pnl)) = exit {
                tracing::info!(
                    option = %position.option_key,
                    entry = position.entry_price,
                    exit_price = price,
                    pnl,
                    status = status.as_str(),
                    "Position closed"
                );
                exits.push(PositionExit {
                    signal_id: position.signal_id,
                    option_key: position.option_key.clone(),
                    entry_price: position.entry_price,
                    target: position.target,
                    stop: position.stop,
                    exit_price: price,
                    pnl,
                    status,
                    exit_time: now,
                });
            }
        }

        for exit in &exits {
            self.positions.remove(&exit.option_key);
        }
        exits
    }
}

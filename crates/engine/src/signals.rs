//! Cash-flow signal generator.
//!
//! Two independent emission paths share a 60-second cooldown: directional
//! rules fired on composite-trend transitions (comparing current cash to the
//! bucket's floor and ceiling), and an absolute threshold on the raw cash
//! value per interval. Emission is limited to the 10:00-15:00 trading window.

use chrono::{DateTime, Duration};
use chrono_tz::Tz;

use trendflow_core::market::{no_new_trades_after, trading_start};
use trendflow_core::OptionSide;
use trendflow_data::SignalAction;

use crate::cash_flow::{CashMetrics, ItmQuote};

const ONE_MIN_THRESHOLD: f64 = 100_000.0;
const FIVE_MIN_THRESHOLD: f64 = 500_000.0;
const SIGNAL_COOLDOWN_SECS: i64 = 60;

/// One recommendation produced by the generator, not yet persisted.
#[derive(Debug, Clone)]
pub struct SignalIntent {
    pub action: SignalAction,
    pub side: OptionSide,
    pub option: ItmQuote,
    pub cash: f64,
}

#[derive(Debug, Default)]
pub struct SignalGenerator {
    previous_trend: i32,
    last_signal_time: Option<DateTime<Tz>>,
}

impl SignalGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates the current market state and returns any signals to emit.
    ///
    /// Called once per inbound message with the index's 1-minute composite
    /// trend and the basket's bucket metrics.
    pub fn evaluate(
        &mut self,
        now: DateTime<Tz>,
        current_trend: i32,
        one_min: &CashMetrics,
        five_min: &CashMetrics,
        itm_ce: Option<&ItmQuote>,
        itm_pe: Option<&ItmQuote>,
    ) -> Vec<SignalIntent> {
        let time = now.time();
        if time < trading_start() || time >= no_new_trades_after() {
            return Vec::new();
        }
        if let Some(last) = self.last_signal_time {
            if now - last < Duration::seconds(SIGNAL_COOLDOWN_SECS) {
                return Vec::new();
            }
        }

        let mut intents = Vec::new();
        let cash = one_min.cash;

        if self.previous_trend != current_trend {
            tracing::info!(
                from = self.previous_trend,
                to = current_trend,
                cash,
                "Trend transition detected"
            );
            match (self.previous_trend, current_trend) {
                // Positive to negative: sell the put side when cash sits near
                // its floor.
                (1, -1) if cash < 0.0 && nearer_floor(one_min) => {
                    push(&mut intents, SignalAction::Sell, OptionSide::Pe, itm_pe, cash);
                }
                // Negative to positive: sell the call side when cash sits
                // near its ceiling.
                (-1, 1) if cash > 0.0 && nearer_ceiling(one_min) => {
                    push(&mut intents, SignalAction::Sell, OptionSide::Ce, itm_ce, cash);
                }
                // Positive fading to neutral with negative cash near the
                // ceiling: buy the put side.
                (1, 0) if cash < 0.0 && nearer_ceiling(one_min) => {
                    push(&mut intents, SignalAction::Buy, OptionSide::Pe, itm_pe, cash);
                }
                // Negative fading to neutral with positive cash near the
                // floor: buy the call side.
                (-1, 0) if cash > 0.0 && nearer_floor(one_min) => {
                    push(&mut intents, SignalAction::Buy, OptionSide::Ce, itm_ce, cash);
                }
                _ => {}
            }
        }

        // Absolute-threshold path, independent of trend transitions. The
        // 1-minute bucket is checked first, then the running 5-minute bucket.
        if cash > ONE_MIN_THRESHOLD {
            push(&mut intents, SignalAction::Buy, OptionSide::Ce, itm_ce, cash);
        } else if cash < -ONE_MIN_THRESHOLD {
            push(&mut intents, SignalAction::Buy, OptionSide::Pe, itm_pe, cash);
        } else if five_min.cash > FIVE_MIN_THRESHOLD {
            push(&mut intents, SignalAction::Buy, OptionSide::Ce, itm_ce, five_min.cash);
        } else if five_min.cash < -FIVE_MIN_THRESHOLD {
            push(&mut intents, SignalAction::Buy, OptionSide::Pe, itm_pe, five_min.cash);
        }

        self.previous_trend = current_trend;
        if !intents.is_empty() {
            self.last_signal_time = Some(now);
        }
        intents
    }
}

fn push(
    intents: &mut Vec<SignalIntent>,
    action: SignalAction,
    side: OptionSide,
    option: Option<&ItmQuote>,
    cash: f64,
) {
    let Some(option) = option else {
        tracing::warn!(side = side.as_str(), "No in-the-money option available for signal");
        return;
    };
    tracing::info!(
        action = action.as_str(),
        side = side.as_str(),
        strike = option.strike,
        cash,
        "Signal emitted"
    );
    intents.push(SignalIntent {
        action,
        side,
        option: option.clone(),
        cash,
    });
}

fn nearer_floor(metrics: &CashMetrics) -> bool {
    (metrics.cash - metrics.min_cash).abs() <= (metrics.cash - metrics.max_cash).abs()
}

fn nearer_ceiling(metrics: &CashMetrics) -> bool {
    (metrics.cash - metrics.max_cash).abs() <= (metrics.cash - metrics.min_cash).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use trendflow_core::market::IST;

    fn at(h: u32, m: u32) -> DateTime<Tz> {
        IST.with_ymd_and_hms(2026, 8, 4, h, m, 0).unwrap()
    }

    fn itm_ce() -> ItmQuote {
        ItmQuote {
            instrument_key: "CE_24500".to_string(),
            strike: 24500.0,
            last_price: 120.0,
        }
    }

    fn itm_pe() -> ItmQuote {
        ItmQuote {
            instrument_key: "PE_24550".to_string(),
            strike: 24550.0,
            last_price: 95.0,
        }
    }

    fn metrics(cash: f64, min_cash: f64, max_cash: f64) -> CashMetrics {
        CashMetrics {
            cash,
            min_cash,
            max_cash,
        }
    }

    fn quiet() -> CashMetrics {
        metrics(0.0, 0.0, 0.0)
    }

    #[test]
    fn test_positive_to_negative_flip_sells_pe_near_floor() {
        let mut generator = SignalGenerator::new();
        // Establish positive trend.
        generator.evaluate(at(10, 30), 1, &quiet(), &quiet(), Some(&itm_ce()), Some(&itm_pe()));

        // Cash -120k with bucket min/max -130k/+10k: closer to the floor.
        let one_min = metrics(-120_000.0, -130_000.0, 10_000.0);
        let intents = generator.evaluate(
            at(10, 32),
            -1,
            &one_min,
            &quiet(),
            Some(&itm_ce()),
            Some(&itm_pe()),
        );

        let sells: Vec<_> = intents
            .iter()
            .filter(|intent| intent.action == SignalAction::Sell)
            .collect();
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].side, OptionSide::Pe);
        assert!(!intents
            .iter()
            .any(|i| i.action == SignalAction::Sell && i.side == OptionSide::Ce));
    }

    #[test]
    fn test_negative_to_positive_flip_sells_ce_near_ceiling() {
        let mut generator = SignalGenerator::new();
        generator.evaluate(at(10, 30), -1, &quiet(), &quiet(), Some(&itm_ce()), Some(&itm_pe()));

        let one_min = metrics(90_000.0, -10_000.0, 95_000.0);
        let intents = generator.evaluate(
            at(10, 32),
            1,
            &one_min,
            &quiet(),
            Some(&itm_ce()),
            Some(&itm_pe()),
        );

        assert!(intents
            .iter()
            .any(|i| i.action == SignalAction::Sell && i.side == OptionSide::Ce));
    }

    #[test]
    fn test_neutral_fade_buys() {
        let mut generator = SignalGenerator::new();
        generator.evaluate(at(10, 30), -1, &quiet(), &quiet(), Some(&itm_ce()), Some(&itm_pe()));

        // Negative fading to neutral, cash positive near the floor.
        let one_min = metrics(20_000.0, 15_000.0, 90_000.0);
        let intents = generator.evaluate(
            at(10, 32),
            0,
            &one_min,
            &quiet(),
            Some(&itm_ce()),
            Some(&itm_pe()),
        );

        assert!(intents
            .iter()
            .any(|i| i.action == SignalAction::Buy && i.side == OptionSide::Ce));
    }

    #[test]
    fn test_one_minute_threshold_buys_ce() {
        let mut generator = SignalGenerator::new();
        let one_min = metrics(150_000.0, 0.0, 150_000.0);
        let intents = generator.evaluate(
            at(11, 0),
            0,
            &one_min,
            &quiet(),
            Some(&itm_ce()),
            Some(&itm_pe()),
        );

        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].action, SignalAction::Buy);
        assert_eq!(intents[0].side, OptionSide::Ce);
        assert_eq!(intents[0].option.strike, 24500.0);
    }

    #[test]
    fn test_five_minute_threshold_buys_pe() {
        let mut generator = SignalGenerator::new();
        let five_min = metrics(-600_000.0, -650_000.0, 0.0);
        let intents = generator.evaluate(
            at(11, 0),
            0,
            &quiet(),
            &five_min,
            Some(&itm_ce()),
            Some(&itm_pe()),
        );

        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].side, OptionSide::Pe);
        assert_eq!(intents[0].cash, -600_000.0);
    }

    #[test]
    fn test_cooldown_suppresses_back_to_back_signals() {
        let mut generator = SignalGenerator::new();
        let one_min = metrics(150_000.0, 0.0, 150_000.0);

        let first = generator.evaluate(at(11, 0), 0, &one_min, &quiet(), Some(&itm_ce()), None);
        assert_eq!(first.len(), 1);

        // 30 seconds later: still inside the cooldown.
        let now = IST.with_ymd_and_hms(2026, 8, 4, 11, 0, 30).unwrap();
        let second = generator.evaluate(now, 0, &one_min, &quiet(), Some(&itm_ce()), None);
        assert!(second.is_empty());

        // After the cooldown expires the signal can fire again.
        let third = generator.evaluate(at(11, 2), 0, &one_min, &quiet(), Some(&itm_ce()), None);
        assert_eq!(third.len(), 1);
    }

    #[test]
    fn test_signals_gated_outside_trading_window() {
        let mut generator = SignalGenerator::new();
        let one_min = metrics(150_000.0, 0.0, 150_000.0);

        assert!(generator
            .evaluate(at(9, 30), 0, &one_min, &quiet(), Some(&itm_ce()), None)
            .is_empty());
        assert!(generator
            .evaluate(at(15, 5), 0, &one_min, &quiet(), Some(&itm_ce()), None)
            .is_empty());
    }

    #[test]
    fn test_no_itm_option_means_no_signal() {
        let mut generator = SignalGenerator::new();
        let one_min = metrics(150_000.0, 0.0, 150_000.0);
        let intents = generator.evaluate(at(11, 0), 0, &one_min, &quiet(), None, None);
        assert!(intents.is_empty());
    }
}

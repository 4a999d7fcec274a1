//! Option-basket cash-flow accumulator.
//!
//! Each qualifying option tick (cumulative volume increased, meaning a trade
//! actually occurred) contributes `ltp x volume_delta`, signed as a
//! directional order-flow proxy: rising call or falling put premium reads as
//! bullish pressure and adds, the opposite subtracts. Values accumulate per
//! minute bucket; finalized minutes roll into the running 5-minute bucket.
//! The accumulator also maintains the index's own minute OHLC.

use chrono::DateTime;
use chrono_tz::Tz;
use indexmap::IndexMap;
use std::collections::HashMap;

use trendflow_core::market::five_minute_bucket;
use trendflow_core::{BasketOption, OptionSide};
use trendflow_data::{CashFlowSnapshot, Interval};

/// Cash metrics for one bucket.
#[derive(Debug, Clone, Copy)]
pub struct CashMetrics {
    pub cash: f64,
    pub min_cash: f64,
    pub max_cash: f64,
}

/// An in-the-money option resolved against a reference price.
#[derive(Debug, Clone)]
pub struct ItmQuote {
    pub instrument_key: String,
    pub strike: f64,
    pub last_price: f64,
}

#[derive(Debug, Clone)]
struct BasketEntry {
    side: OptionSide,
    strike: f64,
    last_price: f64,
}

#[derive(Debug)]
pub struct CashFlowAccumulator {
    options: IndexMap<String, BasketEntry>,
    last_ltp: HashMap<String, f64>,
    last_vtt: HashMap<String, f64>,

    current_minute: Option<DateTime<Tz>>,
    cash: f64,
    min_cash: f64,
    max_cash: f64,

    // Index OHLC for the same minute bucket.
    open: Option<f64>,
    high: f64,
    low: f64,
    close: Option<f64>,

    current_5min: Option<DateTime<Tz>>,
    cash_5min: f64,
    min_cash_5min: f64,
    max_cash_5min: f64,
}

impl CashFlowAccumulator {
    #[must_use]
    pub fn new(basket: &[BasketOption]) -> Self {
        let options = basket
            .iter()
            .map(|option| {
                (
                    option.instrument_key.clone(),
                    BasketEntry {
                        side: option.option_side,
                        strike: option.strike,
                        last_price: option.last_price,
                    },
                )
            })
            .collect();
        Self {
            options,
            last_ltp: HashMap::new(),
            last_vtt: HashMap::new(),
            current_minute: None,
            cash: 0.0,
            min_cash: 0.0,
            max_cash: 0.0,
            open: None,
            high: f64::NEG_INFINITY,
            low: f64::INFINITY,
            close: None,
            current_5min: None,
            cash_5min: 0.0,
            min_cash_5min: 0.0,
            max_cash_5min: 0.0,
        }
    }

    #[must_use]
    pub fn basket_size(&self) -> usize {
        self.options.len()
    }

    /// Processes one option tick. Returns any bucket snapshots finalized by
    /// crossing a minute boundary.
    pub fn process_option_tick(
        &mut self,
        instrument_key: &str,
        ltp: f64,
        vtt: f64,
        timestamp: DateTime<Tz>,
    ) -> Vec<CashFlowSnapshot> {
        if !self.options.contains_key(instrument_key) {
            return Vec::new();
        }
        let snapshots = self.roll_buckets(timestamp);

        let prev_ltp = *self.last_ltp.get(instrument_key).unwrap_or(&ltp);
        let prev_vtt = *self.last_vtt.get(instrument_key).unwrap_or(&vtt);
        let vtt_change = vtt - prev_vtt;

        // Unchanged cumulative volume means no trade happened; the tick is
        // ignored even if the quote price moved.
        if vtt_change > 0.0 {
            let ltp_change = ltp - prev_ltp;
            let cash_change = ltp * vtt_change;
            if let Some(entry) = self.options.get(instrument_key) {
                let signed = match (entry.side, ltp_change) {
                    (OptionSide::Ce, change) if change > 0.0 => cash_change,
                    (OptionSide::Ce, change) if change < 0.0 => -cash_change,
                    (OptionSide::Pe, change) if change > 0.0 => -cash_change,
                    (OptionSide::Pe, change) if change < 0.0 => cash_change,
                    _ => 0.0,
                };
                self.cash += signed;
                self.min_cash = self.min_cash.min(self.cash);
                self.max_cash = self.max_cash.max(self.cash);
            }
        }

        self.last_ltp.insert(instrument_key.to_string(), ltp);
        self.last_vtt.insert(instrument_key.to_string(), vtt);
        if let Some(entry) = self.options.get_mut(instrument_key) {
            entry.last_price = ltp;
        }
        snapshots
    }

    /// Feeds an index tick into the minute OHLC. Returns any bucket
    /// snapshots finalized by crossing a minute boundary.
    pub fn update_index_tick(
        &mut self,
        timestamp: DateTime<Tz>,
        price: f64,
    ) -> Vec<CashFlowSnapshot> {
        let snapshots = self.roll_buckets(timestamp);
        if self.open.is_none() {
            self.open = Some(price);
        }
        self.close = Some(price);
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        snapshots
    }

    fn roll_buckets(&mut self, timestamp: DateTime<Tz>) -> Vec<CashFlowSnapshot> {
        let minute = truncate_minute(timestamp);

        let mut snapshots = Vec::new();
        let Some(current) = self.current_minute else {
            self.current_minute = Some(minute);
            self.current_5min = Some(five_minute_bucket(minute));
            return snapshots;
        };
        if current == minute {
            return snapshots;
        }

        // Finalize the closed minute.
        snapshots.push(CashFlowSnapshot {
            timestamp: current,
            interval: Interval::OneMin,
            cash: self.cash,
            min_cash: self.min_cash,
            max_cash: self.max_cash,
            basket_size: self.options.len(),
        });

        // Roll the finalized minute into its 5-minute bucket.
        self.cash_5min += self.cash;
        self.min_cash_5min = self.min_cash_5min.min(self.min_cash);
        self.max_cash_5min = self.max_cash_5min.max(self.max_cash);

        let bucket = five_minute_bucket(minute);
        if self.current_5min != Some(bucket) {
            if let Some(closed) = self.current_5min {
                snapshots.push(CashFlowSnapshot {
                    timestamp: closed,
                    interval: Interval::FiveMin,
                    cash: self.cash_5min,
                    min_cash: self.min_cash_5min,
                    max_cash: self.max_cash_5min,
                    basket_size: self.options.len(),
                });
            }
            self.current_5min = Some(bucket);
            self.cash_5min = 0.0;
            self.min_cash_5min = 0.0;
            self.max_cash_5min = 0.0;
        }

        // Reset minute state.
        self.current_minute = Some(minute);
        self.cash = 0.0;
        self.min_cash = 0.0;
        self.max_cash = 0.0;
        self.open = None;
        self.high = f64::NEG_INFINITY;
        self.low = f64::INFINITY;
        self.close = None;

        snapshots
    }

    /// Index OHLC of the current minute bucket, if any index tick arrived.
    #[must_use]
    pub fn index_minute_ohlc(&self) -> Option<(f64, f64, f64, f64)> {
        match (self.open, self.close) {
            (Some(open), Some(close)) => Some((open, self.high, self.low, close)),
            _ => None,
        }
    }

    #[must_use]
    pub fn minute_metrics(&self) -> CashMetrics {
        CashMetrics {
            cash: self.cash,
            min_cash: self.min_cash,
            max_cash: self.max_cash,
        }
    }

    #[must_use]
    pub fn five_minute_metrics(&self) -> CashMetrics {
        CashMetrics {
            cash: self.cash_5min,
            min_cash: self.min_cash_5min,
            max_cash: self.max_cash_5min,
        }
    }

    /// Resolves the 1st in-the-money CE (highest strike below the reference
    /// price) and PE (lowest strike above it).
    #[must_use]
    pub fn itm_options(&self, reference_price: f64) -> (Option<ItmQuote>, Option<ItmQuote>) {
        let mut itm_ce: Option<(&String, &BasketEntry)> = None;
        let mut itm_pe: Option<(&String, &BasketEntry)> = None;

        for (key, entry) in &self.options {
            match entry.side {
                OptionSide::Ce if entry.strike < reference_price => {
                    if itm_ce.is_none_or(|(_, best)| entry.strike > best.strike) {
                        itm_ce = Some((key, entry));
                    }
                }
                OptionSide::Pe if entry.strike > reference_price => {
                    if itm_pe.is_none_or(|(_, best)| entry.strike < best.strike) {
                        itm_pe = Some((key, entry));
                    }
                }
                _ => {}
            }
        }

        let to_quote = |found: Option<(&String, &BasketEntry)>| {
            found.map(|(key, entry)| ItmQuote {
                instrument_key: key.clone(),
                strike: entry.strike,
                last_price: entry.last_price,
            })
        };
        (to_quote(itm_ce), to_quote(itm_pe))
    }
}

fn truncate_minute(ts: DateTime<Tz>) -> DateTime<Tz> {
    use chrono::TimeZone;
    let secs = ts.timestamp();
    let bucket = secs - secs.rem_euclid(60);
    trendflow_core::market::IST
        .timestamp_opt(bucket, 0)
        .single()
        .unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use trendflow_core::market::IST;

    fn basket() -> Vec<BasketOption> {
        vec![
            BasketOption {
                instrument_key: "CE_24500".to_string(),
                option_side: OptionSide::Ce,
                strike: 24500.0,
                last_price: 120.0,
            },
            BasketOption {
                instrument_key: "CE_24450".to_string(),
                option_side: OptionSide::Ce,
                strike: 24450.0,
                last_price: 150.0,
            },
            BasketOption {
                instrument_key: "PE_24550".to_string(),
                option_side: OptionSide::Pe,
                strike: 24550.0,
                last_price: 95.0,
            },
            BasketOption {
                instrument_key: "PE_24600".to_string(),
                option_side: OptionSide::Pe,
                strike: 24600.0,
                last_price: 130.0,
            },
        ]
    }

    fn ts(minute: u32, second: u32) -> DateTime<Tz> {
        IST.with_ymd_and_hms(2026, 8, 4, 10, minute, second).unwrap()
    }

    #[test]
    fn test_ce_price_rise_adds_cash() {
        let mut flow = CashFlowAccumulator::new(&basket());
        flow.process_option_tick("CE_24500", 50.0, 1000.0, ts(15, 10));
        flow.process_option_tick("CE_24500", 55.0, 1100.0, ts(15, 20));

        assert_eq!(flow.minute_metrics().cash, 55.0 * 100.0);
    }

    #[test]
    fn test_ce_price_fall_subtracts_cash() {
        let mut flow = CashFlowAccumulator::new(&basket());
        flow.process_option_tick("CE_24500", 50.0, 1000.0, ts(15, 10));
        flow.process_option_tick("CE_24500", 55.0, 1100.0, ts(15, 20));
        flow.process_option_tick("CE_24500", 52.0, 1150.0, ts(15, 30));

        // +55*100 then -52*50 = 5500 - 2600 = 2900
        assert_eq!(flow.minute_metrics().cash, 2900.0);
    }

    #[test]
    fn test_pe_signs_are_mirrored() {
        let mut flow = CashFlowAccumulator::new(&basket());
        flow.process_option_tick("PE_24550", 90.0, 500.0, ts(15, 10));
        flow.process_option_tick("PE_24550", 95.0, 600.0, ts(15, 20));
        assert_eq!(flow.minute_metrics().cash, -(95.0 * 100.0));

        flow.process_option_tick("PE_24550", 92.0, 650.0, ts(15, 30));
        assert_eq!(flow.minute_metrics().cash, -(95.0 * 100.0) + 92.0 * 50.0);
    }

    #[test]
    fn test_unchanged_vtt_is_ignored_even_if_price_moves() {
        let mut flow = CashFlowAccumulator::new(&basket());
        flow.process_option_tick("CE_24500", 50.0, 1000.0, ts(15, 10));
        flow.process_option_tick("CE_24500", 60.0, 1000.0, ts(15, 20));

        assert_eq!(flow.minute_metrics().cash, 0.0);
    }

    #[test]
    fn test_minute_rollover_resets_and_snapshots() {
        let mut flow = CashFlowAccumulator::new(&basket());
        flow.process_option_tick("CE_24500", 50.0, 1000.0, ts(15, 10));
        flow.process_option_tick("CE_24500", 55.0, 1100.0, ts(15, 20));

        let snapshots = flow.process_option_tick("CE_24500", 55.0, 1100.0, ts(16, 5));
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].interval, Interval::OneMin);
        assert_eq!(snapshots[0].cash, 5500.0);
        assert_eq!(snapshots[0].basket_size, 4);

        // New minute starts clean.
        let metrics = flow.minute_metrics();
        assert_eq!(metrics.cash, 0.0);
        assert_eq!(metrics.min_cash, 0.0);
        assert_eq!(metrics.max_cash, 0.0);
    }

    #[test]
    fn test_five_minute_bucket_accumulates_minutes() {
        let mut flow = CashFlowAccumulator::new(&basket());
        // Minute 10:16 (5-min bucket 10:15): +5500
        flow.process_option_tick("CE_24500", 50.0, 1000.0, ts(16, 10));
        flow.process_option_tick("CE_24500", 55.0, 1100.0, ts(16, 20));
        // Minute 10:17: +60*100
        flow.process_option_tick("CE_24500", 60.0, 1200.0, ts(17, 10));
        // Minute 10:18 rolls 10:17 into the bucket.
        flow.process_option_tick("CE_24500", 60.0, 1200.0, ts(18, 10));

        assert_eq!(flow.five_minute_metrics().cash, 5500.0 + 6000.0);

        // Crossing into the 10:20 bucket emits the 5-minute snapshot.
        let snapshots = flow.process_option_tick("CE_24500", 60.0, 1200.0, ts(20, 10));
        let five_min: Vec<_> = snapshots
            .iter()
            .filter(|s| s.interval == Interval::FiveMin)
            .collect();
        assert_eq!(five_min.len(), 1);
        assert_eq!(five_min[0].cash, 11500.0);
        assert_eq!(five_min[0].timestamp, ts(15, 0));

        assert_eq!(flow.five_minute_metrics().cash, 0.0);
    }

    #[test]
    fn test_itm_selection() {
        let flow = CashFlowAccumulator::new(&basket());
        let (itm_ce, itm_pe) = flow.itm_options(24510.0);

        // Highest strike below the reference.
        assert_eq!(itm_ce.unwrap().strike, 24500.0);
        // Lowest strike above the reference.
        assert_eq!(itm_pe.unwrap().strike, 24550.0);
    }

    #[test]
    fn test_itm_none_when_nothing_in_the_money() {
        let flow = CashFlowAccumulator::new(&basket());
        let (itm_ce, _) = flow.itm_options(24000.0);
        assert!(itm_ce.is_none());
        let (_, itm_pe) = flow.itm_options(25000.0);
        assert!(itm_pe.is_none());
    }

    #[test]
    fn test_index_minute_ohlc() {
        let mut flow = CashFlowAccumulator::new(&basket());
        assert!(flow.index_minute_ohlc().is_none());

        flow.update_index_tick(ts(15, 10), 24510.0);
        flow.update_index_tick(ts(15, 20), 24520.0);
        flow.update_index_tick(ts(15, 40), 24505.0);
        assert_eq!(
            flow.index_minute_ohlc(),
            Some((24510.0, 24520.0, 24505.0, 24505.0))
        );

        // The OHLC resets with the minute bucket.
        flow.update_index_tick(ts(16, 10), 24508.0);
        assert_eq!(
            flow.index_minute_ohlc(),
            Some((24508.0, 24508.0, 24508.0, 24508.0))
        );
    }

    #[test]
    fn test_min_max_tracking_within_minute() {
        let mut flow = CashFlowAccumulator::new(&basket());
        flow.process_option_tick("PE_24550", 90.0, 500.0, ts(15, 5));
        // PE price up: cash goes negative.
        flow.process_option_tick("PE_24550", 95.0, 600.0, ts(15, 10));
        // CE price up: cash recovers upward.
        flow.process_option_tick("CE_24500", 50.0, 1000.0, ts(15, 15));
        flow.process_option_tick("CE_24500", 300.0, 1100.0, ts(15, 20));

        let metrics = flow.minute_metrics();
        assert_eq!(metrics.min_cash, -9500.0);
        assert_eq!(metrics.max_cash, -9500.0 + 30000.0);
    }
}

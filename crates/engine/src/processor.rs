//! Per-instrument tick processor.
//!
//! One processor owns the full candle/indicator state for its instrument:
//! the open 1-minute bar, the nested 5-minute aggregation, the Heikin-Ashi
//! recurrence and SAR filter per interval, the composite trend registers, and
//! (for the index) the trend-following trade slots. Finalized records go to
//! the writer queues; nothing here blocks the receive loop.

use chrono::{DateTime, Timelike};
use chrono_tz::Tz;

use trendflow_core::market::{candle_minute, five_minute_bucket, market_close, now_ist};
use trendflow_core::{InstrumentKind, InstrumentSpec};
use trendflow_data::{Candle, Interval, LatestSnapshot, TrendRecord, WriterHandles};

use crate::cash_flow::CashFlowAccumulator;
use crate::indicators::{HeikinAshiState, ParabolicSar};
use crate::tick::Tick;
use crate::trend::{composite_trend, ActiveTrade, TradeState, TrendSnapshot};

#[derive(Debug, Clone, Copy)]
struct PrevTick {
    ltp: f64,
    vtt: Option<f64>,
}

/// Running aggregation of 1-minute candles into the open 5-minute bar.
#[derive(Debug, Default)]
struct FiveMinAgg {
    high: f64,
    low: f64,
    volume: i64,
    delta: i64,
    min_delta: i64,
    max_delta: i64,
    atp_sum: f64,
    atp_volume: i64,
}

pub struct TickProcessor {
    spec: InstrumentSpec,
    writer: WriterHandles,

    current_candle: Option<Candle>,
    current_minute: Option<DateTime<Tz>>,
    previous_tick: Option<PrevTick>,
    previous_vtt: f64,

    five_min_candle: Option<Candle>,
    five_min_start: Option<DateTime<Tz>>,
    candles_in_five_min: u32,
    agg: FiveMinAgg,

    ha_one_min: HeikinAshiState,
    ha_five_min: HeikinAshiState,
    sar_one_min: Option<ParabolicSar>,
    sar_five_min: Option<ParabolicSar>,

    present_trend_one_min: i32,
    present_trend_five_min: i32,
    trade_one_min: Option<ActiveTrade>,
    trade_five_min: Option<ActiveTrade>,

    prev_session_close: Option<f64>,
    intraday_high: Option<f64>,
    intraday_low: Option<f64>,

    processed_ticks: u64,
    completed_candles: u64,
    completed_five_min: u64,
}

impl TickProcessor {
    #[must_use]
    pub fn new(spec: InstrumentSpec, writer: WriterHandles) -> Self {
        let sar_one_min = spec.indicators.then(ParabolicSar::default);
        let sar_five_min = spec.indicators.then(ParabolicSar::default);
        Self {
            spec,
            writer,
            current_candle: None,
            current_minute: None,
            previous_tick: None,
            previous_vtt: 0.0,
            five_min_candle: None,
            five_min_start: None,
            candles_in_five_min: 0,
            agg: FiveMinAgg::default(),
            ha_one_min: HeikinAshiState::new(),
            ha_five_min: HeikinAshiState::new(),
            sar_one_min,
            sar_five_min,
            present_trend_one_min: 0,
            present_trend_five_min: 0,
            trade_one_min: None,
            trade_five_min: None,
            prev_session_close: None,
            intraday_high: None,
            intraday_low: None,
            processed_ticks: 0,
            completed_candles: 0,
            completed_five_min: 0,
        }
    }

    /// Consumes one tick. Returns true when the tick is at or past market
    /// close, in which case all open bars have been finalized.
    pub fn process_tick(
        &mut self,
        tick: &Tick,
        ctx: &mut TrendSnapshot,
        cash: &CashFlowAccumulator,
    ) -> bool {
        if tick.timestamp.time() >= market_close() {
            tracing::info!(instrument = %self.spec.name, "Market close tick, finalizing open bars");
            self.finalize_open_candles(ctx, cash);
            return true;
        }

        if tick.prev_close.is_some() {
            self.prev_session_close = tick.prev_close;
        }
        self.intraday_high = Some(self.intraday_high.map_or(tick.ltp, |high| high.max(tick.ltp)));
        self.intraday_low = Some(self.intraday_low.map_or(tick.ltp, |low| low.min(tick.ltp)));

        let minute = candle_minute(tick.timestamp);
        if let Some(current) = self.current_minute {
            if current != minute {
                self.finalize_current_candle(ctx, cash);
            }
        }
        if self.current_minute != Some(minute) {
            self.initialize_candle(minute, tick, ctx, cash);
        }

        self.update_candle(tick, ctx);
        Self::check_slot_on_tick(&mut self.trade_one_min, &self.writer, tick, Interval::OneMin);
        Self::check_slot_on_tick(&mut self.trade_five_min, &self.writer, tick, Interval::FiveMin);

        self.processed_ticks += 1;
        self.previous_tick = Some(PrevTick {
            ltp: tick.ltp,
            vtt: tick.vtt,
        });
        false
    }

    /// Finalizes the open 1-minute and 5-minute bars, if any. Called at
    /// market close and on shutdown; safe to call twice.
    pub fn finalize_open_candles(&mut self, ctx: &mut TrendSnapshot, cash: &CashFlowAccumulator) {
        self.finalize_current_candle(ctx, cash);
        self.finalize_five_min(ctx, cash);
    }

    #[must_use]
    pub fn current_close(&self) -> Option<f64> {
        self.current_candle.as_ref().map(|candle| candle.close)
    }

    #[must_use]
    pub fn present_trend_one_min(&self) -> i32 {
        self.present_trend_one_min
    }

    #[must_use]
    pub fn present_trend_five_min(&self) -> i32 {
        self.present_trend_five_min
    }

    #[must_use]
    pub fn processed_ticks(&self) -> u64 {
        self.processed_ticks
    }

    #[must_use]
    pub fn completed_candles(&self) -> (u64, u64) {
        (self.completed_candles, self.completed_five_min)
    }

    #[must_use]
    pub fn spec(&self) -> &InstrumentSpec {
        &self.spec
    }

    fn initialize_candle(
        &mut self,
        minute: DateTime<Tz>,
        tick: &Tick,
        ctx: &mut TrendSnapshot,
        cash: &CashFlowAccumulator,
    ) {
        self.current_minute = Some(minute);
        let vtt_open = tick.vtt.unwrap_or(0.0);
        self.current_candle = Some(Candle::open_at(
            &self.spec.key,
            minute,
            tick.ltp,
            tick.atp_or_ltp(),
            vtt_open,
        ));
        self.previous_vtt = vtt_open;
        if self.spec.kind == InstrumentKind::Future {
            ctx.future_delta_1min = 0;
        }

        let bucket = five_minute_bucket(minute);
        if self.five_min_start != Some(bucket) {
            // A tick gap can skip the grid-closing minute; close the stale
            // 5-minute bar before opening the new bucket.
            self.finalize_five_min(ctx, cash);
            self.initialize_five_min(bucket, tick, ctx);
        }
    }

    fn initialize_five_min(&mut self, bucket: DateTime<Tz>, tick: &Tick, ctx: &mut TrendSnapshot) {
        self.five_min_start = Some(bucket);
        self.candles_in_five_min = 0;
        self.agg = FiveMinAgg {
            high: tick.ltp,
            low: tick.ltp,
            ..FiveMinAgg::default()
        };
        self.five_min_candle = Some(Candle::open_at(
            &self.spec.key,
            bucket,
            tick.ltp,
            tick.atp_or_ltp(),
            0.0,
        ));
        if self.spec.kind == InstrumentKind::Future {
            ctx.future_delta_5min = 0;
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn update_candle(&mut self, tick: &Tick, ctx: &mut TrendSnapshot) {
        let Some(candle) = self.current_candle.as_mut() else {
            return;
        };
        // Same price and same cumulative volume as the previous tick: nothing
        // new happened, skip the recomputation entirely.
        if let Some(prev) = self.previous_tick {
            if tick.ltp == prev.ltp && tick.vtt == prev.vtt {
                return;
            }
        }

        candle.close = tick.ltp;
        if tick.ltp > candle.high {
            candle.high = tick.ltp;
        }
        if tick.ltp < candle.low {
            candle.low = tick.ltp;
        }
        candle.atp = tick.atp_or_ltp();
        candle.tick_count += 1;

        if let Some(vtt) = tick.vtt {
            candle.vtt_close = vtt;
        }
        if self.spec.kind != InstrumentKind::Index {
            // The feed's own minute volume wins; otherwise derive it from the
            // cumulative-volume span of the bar.
            candle.volume = tick
                .minute_volume
                .unwrap_or_else(|| ((candle.vtt_close - candle.vtt_open) as i64).max(0));
        }

        if self.spec.track_delta {
            if let (Some(prev), Some(vtt)) = (self.previous_tick, tick.vtt) {
                if self.previous_vtt > 0.0 {
                    let vtt_change = vtt - self.previous_vtt;
                    if vtt_change > 0.0 {
                        let traded = vtt_change as i64;
                        if self.spec.kind == InstrumentKind::Future {
                            if tick.ltp > prev.ltp {
                                candle.buy_volume += traded;
                                candle.delta += traded;
                            } else if tick.ltp < prev.ltp {
                                candle.sell_volume += traded;
                                candle.delta -= traded;
                            } else {
                                // Unchanged price: split the traded volume evenly.
                                let half = traded / 2;
                                candle.buy_volume += half;
                                candle.sell_volume += traded - half;
                            }
                        } else {
                            if tick.ltp > prev.ltp {
                                candle.buy_volume += traded;
                            } else if tick.ltp < prev.ltp {
                                candle.sell_volume += traded;
                            }
                            candle.delta = candle.buy_volume - candle.sell_volume;
                        }
                        candle.min_delta = candle.min_delta.min(candle.delta);
                        candle.max_delta = candle.max_delta.max(candle.delta);
                    }
                }
            }
        }

        if let Some(vtt) = tick.vtt {
            self.previous_vtt = vtt;
        }
        if self.spec.kind == InstrumentKind::Future {
            ctx.future_delta_1min = candle.delta;
        }
    }

    fn finalize_current_candle(&mut self, ctx: &mut TrendSnapshot, cash: &CashFlowAccumulator) {
        let Some(candle) = self.current_candle.take() else {
            return;
        };
        self.emit_regular_candle(&candle, Interval::OneMin);
        if self.spec.heikin_ashi {
            self.process_heikin_ashi(&candle, Interval::OneMin, ctx);
        }
        self.process_trend(&candle, Interval::OneMin, ctx, cash);

        if self.five_min_candle.is_some() {
            self.aggregate_to_five_min(&candle, ctx);
            if let Some(minute) = self.current_minute {
                if (minute.minute() + 1) % 5 == 0 {
                    self.finalize_five_min(ctx, cash);
                }
            }
        }
        self.completed_candles += 1;
    }

    fn aggregate_to_five_min(&mut self, candle: &Candle, ctx: &mut TrendSnapshot) {
        self.candles_in_five_min += 1;
        let Some(five) = self.five_min_candle.as_mut() else {
            return;
        };
        if self.candles_in_five_min == 1 {
            five.open = candle.open;
            self.agg.min_delta = candle.min_delta;
            self.agg.max_delta = candle.max_delta;
        }
        five.close = candle.close;
        self.agg.high = self.agg.high.max(candle.high);
        self.agg.low = self.agg.low.min(candle.low);
        self.agg.volume += candle.volume;
        self.agg.delta += candle.delta;
        self.agg.min_delta = self.agg.min_delta.min(candle.min_delta);
        self.agg.max_delta = self.agg.max_delta.max(candle.max_delta);
        if candle.volume > 0 {
            #[allow(clippy::cast_precision_loss)]
            {
                self.agg.atp_sum += candle.atp * candle.volume as f64;
            }
            self.agg.atp_volume += candle.volume;
        }
        if self.spec.kind == InstrumentKind::Future {
            ctx.future_delta_5min = self.agg.delta;
        }
    }

    fn finalize_five_min(&mut self, ctx: &mut TrendSnapshot, cash: &CashFlowAccumulator) {
        let Some(mut five) = self.five_min_candle.take() else {
            return;
        };
        five.high = self.agg.high;
        five.low = self.agg.low;
        five.volume = self.agg.volume;
        five.delta = self.agg.delta;
        five.min_delta = self.agg.min_delta;
        five.max_delta = self.agg.max_delta;
        #[allow(clippy::cast_precision_loss)]
        if self.agg.atp_volume > 0 {
            five.atp = self.agg.atp_sum / self.agg.atp_volume as f64;
        } else {
            five.atp = five.close;
        }

        self.emit_regular_candle(&five, Interval::FiveMin);
        if self.spec.heikin_ashi {
            self.process_heikin_ashi(&five, Interval::FiveMin, ctx);
        }
        self.process_trend(&five, Interval::FiveMin, ctx, cash);

        self.completed_five_min += 1;
        self.five_min_start = None;
        self.candles_in_five_min = 0;
    }

    fn emit_regular_candle(&self, candle: &Candle, interval: Interval) {
        tracing::info!(
            instrument = self.short_name(),
            interval = interval.as_str(),
            time = %candle.timestamp.format("%H:%M"),
            open = candle.open,
            high = candle.high,
            low = candle.low,
            close = candle.close,
            volume = candle.volume,
            delta = candle.delta,
            "Finalized candle"
        );
        self.writer.queue_candle(candle.clone(), interval);
    }

    fn process_heikin_ashi(&mut self, candle: &Candle, interval: Interval, ctx: &mut TrendSnapshot) {
        let (state, sar) = match interval {
            Interval::OneMin => (&mut self.ha_one_min, self.sar_one_min.as_mut()),
            Interval::FiveMin => (&mut self.ha_five_min, self.sar_five_min.as_mut()),
        };
        let mut ha = state.next_candle(candle);
        if let Some(sar) = sar {
            let (_, sar_trend) = sar.update(ha.ha_high, ha.ha_low, ha.ha_close);
            ha.sar_trend = Some(sar_trend);
        }

        tracing::info!(
            instrument = self.short_name(),
            interval = interval.as_str(),
            ha_close = ha.ha_close,
            hlc3 = ha.hlc3,
            sar = match ha.sar_trend {
                Some(1) => "UP",
                Some(-1) => "DOWN",
                _ => "NONE",
            },
            "Heikin-Ashi bar"
        );
        self.writer.queue_ha_candle(ha.clone(), interval);

        match (self.spec.kind, interval) {
            (InstrumentKind::Index, Interval::OneMin) => ctx.index_ha_1min = Some(ha),
            (InstrumentKind::Index, Interval::FiveMin) => ctx.index_ha_5min = Some(ha),
            (InstrumentKind::Future, Interval::OneMin) => ctx.future_ha_1min = Some(ha),
            (InstrumentKind::Future, Interval::FiveMin) => ctx.future_ha_5min = Some(ha),
            _ => {}
        }
    }

    fn process_trend(
        &mut self,
        candle: &Candle,
        interval: Interval,
        ctx: &TrendSnapshot,
        cash: &CashFlowAccumulator,
    ) {
        let (index_ha, future_ha, future_delta) = match interval {
            Interval::OneMin => (
                ctx.index_ha_1min.as_ref(),
                ctx.future_ha_1min.as_ref(),
                ctx.future_delta_1min,
            ),
            Interval::FiveMin => (
                ctx.index_ha_5min.as_ref(),
                ctx.future_ha_5min.as_ref(),
                ctx.future_delta_5min,
            ),
        };
        let (Some(index_ha), Some(future_ha)) = (index_ha, future_ha) else {
            // Indicator state not warmed up yet; record a neutral boundary.
            self.writer
                .queue_trend(TrendRecord::bare(candle.timestamp, interval, 0));
            return;
        };

        let trend_value = composite_trend(index_ha, future_ha, future_delta);
        match interval {
            Interval::OneMin => self.present_trend_one_min = trend_value,
            Interval::FiveMin => self.present_trend_five_min = trend_value,
        }

        let mut record = TrendRecord::bare(candle.timestamp, interval, trend_value);
        if self.spec.kind == InstrumentKind::Index {
            self.manage_trade_slot(candle, interval, trend_value, &mut record);

            // Cash-flow recommendation rides on the index 1-minute boundary.
            if interval == Interval::OneMin {
                let metrics = cash.minute_metrics();
                let (itm_ce, itm_pe) = cash.itm_options(candle.close);
                if metrics.cash > 0.0 {
                    if let Some(ce) = itm_ce {
                        record.recommendation = Some("BUY_CE".to_string());
                        record.entry_price = Some(ce.last_price);
                        record.target = Some(ce.last_price + 10.0);
                        record.stop_loss = Some(ce.last_price - 5.0);
                        tracing::info!(
                            strike = ce.strike,
                            entry = ce.last_price,
                            cash = metrics.cash,
                            "Trend-boundary CE recommendation"
                        );
                    }
                } else if metrics.cash < 0.0 {
                    if let Some(pe) = itm_pe {
                        record.recommendation = Some("BUY_PE".to_string());
                        record.entry_price = Some(pe.last_price);
                        record.target = Some(pe.last_price + 10.0);
                        record.stop_loss = Some(pe.last_price - 5.0);
                        tracing::info!(
                            strike = pe.strike,
                            entry = pe.last_price,
                            cash = metrics.cash,
                            "Trend-boundary PE recommendation"
                        );
                    }
                }
            }
        }

        tracing::info!(
            instrument = self.short_name(),
            interval = interval.as_str(),
            time = %candle.timestamp.format("%H:%M"),
            trend = match trend_value {
                1 => "UP",
                -1 => "DOWN",
                _ => "NEUTRAL",
            },
            "Composite trend"
        );
        self.emit_latest_snapshot(candle, interval, &record);
        self.writer.queue_trend(record);
    }

    fn manage_trade_slot(
        &mut self,
        candle: &Candle,
        interval: Interval,
        trend_value: i32,
        record: &mut TrendRecord,
    ) {
        let slot = match interval {
            Interval::OneMin => &mut self.trade_one_min,
            Interval::FiveMin => &mut self.trade_five_min,
        };

        if let Some(trade) = slot {
            match trade.state {
                TradeState::WaitingEntry => {
                    trade.enter(candle.open);
                    record.recommendation = Some(trade.label.to_string());
                    record.entry_price = Some(trade.entry_price);
                    record.target = Some(trade.target);
                    record.stop_loss = Some(trade.stop);
                    tracing::info!(
                        interval = interval.as_str(),
                        entry = trade.entry_price,
                        target = trade.target,
                        stop = trade.stop,
                        "Entered index trend trade"
                    );
                }
                TradeState::Active => {
                    if let Some(exit) = trade.evaluate(candle.close) {
                        record.recommendation = Some(exit.label.to_string());
                        record.entry_price = Some(exit.entry_price);
                        record.target = Some(exit.target);
                        record.stop_loss = Some(exit.stop);
                        record.profit_loss = Some(exit.profit_loss);
                        tracing::info!(
                            interval = interval.as_str(),
                            profit_loss = exit.profit_loss,
                            "Index trend trade closed at candle boundary"
                        );
                        *slot = None;
                    }
                }
            }
        }

        if slot.is_none() && trend_value == 1 {
            *slot = Some(ActiveTrade::waiting("TREND_UP"));
            tracing::info!(interval = interval.as_str(), "Trend turned up, trade slot armed");
        }
    }

    /// Evaluates an armed trade slot against a live tick between candle
    /// boundaries, so exits are not delayed to the next finalize.
    fn check_slot_on_tick(
        slot: &mut Option<ActiveTrade>,
        writer: &WriterHandles,
        tick: &Tick,
        interval: Interval,
    ) {
        let Some(trade) = slot else { return };
        if let Some(exit) = trade.evaluate(tick.ltp) {
            tracing::info!(
                interval = interval.as_str(),
                exit_price = tick.ltp,
                profit_loss = exit.profit_loss,
                "Index trend trade closed intra-candle"
            );
            writer.queue_trend(TrendRecord {
                timestamp: tick.timestamp,
                interval,
                trend_value: 0,
                recommendation: Some(exit.label.to_string()),
                entry_price: Some(exit.entry_price),
                target: Some(exit.target),
                stop_loss: Some(exit.stop),
                profit_loss: Some(exit.profit_loss),
            });
            *slot = None;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn emit_latest_snapshot(&self, candle: &Candle, interval: Interval, record: &TrendRecord) {
        let price_change = candle.close - candle.open;
        let price_change_pct = if candle.open > 0.0 {
            price_change / candle.open * 100.0
        } else {
            0.0
        };
        let delta_pct = if self.spec.kind == InstrumentKind::Option
            && candle.delta != 0
            && candle.volume > 0
        {
            candle.delta as f64 / candle.volume as f64 * 100.0
        } else {
            0.0
        };

        let snapshot = LatestSnapshot {
            instrument_key: self.spec.key.clone(),
            instrument_name: self.display_name(),
            instrument_type: self.spec.kind.as_str().to_string(),
            strike_price: self.spec.strike,
            option_type: self.spec.option_side.map(|side| side.as_str().to_string()),
            timestamp: candle.timestamp,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            atp: candle.atp,
            vwap: if candle.atp > 0.0 { candle.atp } else { candle.close },
            price_change,
            price_change_pct,
            delta: candle.delta,
            delta_pct,
            min_delta: candle.min_delta,
            max_delta: candle.max_delta,
            buy_volume: candle.buy_volume,
            sell_volume: candle.sell_volume,
            tick_count: candle.tick_count,
            vtt_open: candle.vtt_open,
            vtt_close: candle.vtt_close,
            interval,
            trend_value: record.trend_value,
            recommendation: record.recommendation.clone(),
            entry_price: record.entry_price,
            target: record.target,
            stop_loss: record.stop_loss,
            profit_loss: record.profit_loss,
            prev_close: self.prev_session_close.unwrap_or(candle.open),
            intraday_high: self.intraday_high.unwrap_or(candle.high),
            intraday_low: self.intraday_low.unwrap_or(candle.low),
            last_updated: now_ist(),
        };
        self.writer.queue_latest(snapshot);
    }

    fn short_name(&self) -> &str {
        self.spec
            .key
            .split('|')
            .nth(1)
            .unwrap_or(self.spec.key.as_str())
    }

    fn display_name(&self) -> String {
        let base = self.short_name();
        match (self.spec.option_side, self.spec.strike) {
            (Some(side), Some(strike)) => format!("{base} {} {strike}", side.as_str()),
            _ => base.to_string(),
        }
    }
}

//! The per-message dispatcher.
//!
//! Consumes decoded market updates in the receive loop's context and drives
//! every component in fixed order: index tick into the cash-flow accumulator,
//! each instrument payload into its processor (options also into the
//! accumulator), then the signal generator, then the position tracker.
//! Candle/indicator/trend records go out through the writer queues; only the
//! rare signal, cash-flow, and audit writes touch the store inline.

use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use indexmap::IndexMap;
use std::time::{Duration, Instant};

use trendflow_core::market::{now_ist, timestamp_ms_to_ist};
use trendflow_core::{BasketOption, InstrumentKind, InstrumentSet};
use trendflow_data::{
    CashFlowSnapshot, DatabaseClient, SignalAction, SignalRecord, SignalStatus, TrackingRecord,
    WriterHandles,
};
use trendflow_feed::{DispatchOutcome, FeedHandler, MarketUpdate};

use crate::cash_flow::CashFlowAccumulator;
use crate::processor::TickProcessor;
use crate::signals::{SignalGenerator, SignalIntent};
use crate::tick::Tick;
use crate::tracker::PositionTracker;
use crate::trend::TrendSnapshot;

const STATS_INTERVAL: Duration = Duration::from_secs(60);

pub struct Engine {
    instruments: InstrumentSet,
    index_key: String,
    processors: IndexMap<String, TickProcessor>,
    cash_flow: CashFlowAccumulator,
    signals: SignalGenerator,
    tracker: PositionTracker,
    trend_ctx: TrendSnapshot,
    db: DatabaseClient,
    writer: WriterHandles,
    /// Timestamp of the most recently processed tick; drives the signal
    /// clock so behavior follows market time, not the host clock.
    last_market_time: Option<DateTime<Tz>>,
    messages: u64,
    last_stats: Instant,
}

impl Engine {
    #[must_use]
    pub fn new(
        instruments: InstrumentSet,
        basket: &[BasketOption],
        db: DatabaseClient,
        writer: WriterHandles,
    ) -> Self {
        let processors: IndexMap<String, TickProcessor> = instruments
            .iter()
            .map(|(key, spec)| (key.clone(), TickProcessor::new(spec.clone(), writer.clone())))
            .collect();
        tracing::info!(
            instruments = processors.len(),
            basket = basket.len(),
            "Engine ready"
        );
        Self {
            index_key: instruments.index_key().to_string(),
            instruments,
            processors,
            cash_flow: CashFlowAccumulator::new(basket),
            signals: SignalGenerator::new(),
            tracker: PositionTracker::new(),
            trend_ctx: TrendSnapshot::default(),
            db,
            writer,
            last_market_time: None,
            messages: 0,
            last_stats: Instant::now(),
        }
    }

    /// Dispatches one decoded message through the whole pipeline.
    pub async fn dispatch(&mut self, update: &MarketUpdate) -> DispatchOutcome {
        self.messages += 1;
        let mut market_closed = false;

        // Index tick first: the accumulator's minute OHLC and bucket clock.
        if let Some(quote) = update.feeds.get(&self.index_key) {
            let ltpc = quote.ltpc();
            if ltpc.ltp > 0.0 {
                if let Some(ts) = timestamp_ms_to_ist(ltpc.ltt_ms) {
                    let snapshots = self.cash_flow.update_index_tick(ts, ltpc.ltp);
                    self.persist_cash_flow(snapshots).await;
                }
            }
        }

        // Every instrument payload to its processor, in registry order.
        let mut pending_flow: Vec<CashFlowSnapshot> = Vec::new();
        for (key, spec) in self.instruments.iter() {
            let Some(quote) = update.feeds.get(key) else {
                continue;
            };
            let Some(tick) = Tick::from_quote(spec, quote) else {
                continue;
            };

            if spec.kind == InstrumentKind::Option {
                if let Some(vtt) = tick.vtt {
                    pending_flow.extend(self.cash_flow.process_option_tick(
                        key,
                        tick.ltp,
                        vtt,
                        tick.timestamp,
                    ));
                }
            }

            if let Some(processor) = self.processors.get_mut(key) {
                if processor.process_tick(&tick, &mut self.trend_ctx, &self.cash_flow) {
                    market_closed = true;
                }
                self.last_market_time = Some(tick.timestamp);
            }
        }
        self.persist_cash_flow(pending_flow).await;

        if market_closed {
            self.force_finalize_all();
            return DispatchOutcome::MarketClosed;
        }

        self.generate_signals().await;
        self.check_positions().await;
        self.log_stats();

        DispatchOutcome::Continue
    }

    /// Finalizes every processor's open bars. Safe to call repeatedly.
    pub fn force_finalize_all(&mut self) {
        tracing::info!("Finalizing open candles for all instruments");
        for processor in self.processors.values_mut() {
            processor.finalize_open_candles(&mut self.trend_ctx, &self.cash_flow);
        }
    }

    async fn generate_signals(&mut self) {
        let Some(now) = self.last_market_time else {
            return;
        };
        let Some(index_proc) = self.processors.get(&self.index_key) else {
            return;
        };
        let Some(nifty_close) = index_proc.current_close() else {
            return;
        };
        let current_trend = index_proc.present_trend_one_min();

        let one_min = self.cash_flow.minute_metrics();
        let five_min = self.cash_flow.five_minute_metrics();
        let (itm_ce, itm_pe) = self.cash_flow.itm_options(nifty_close);

        let intents = self.signals.evaluate(
            now,
            current_trend,
            &one_min,
            &five_min,
            itm_ce.as_ref(),
            itm_pe.as_ref(),
        );
        for intent in intents {
            self.emit_signal(intent, now).await;
        }
    }

    async fn emit_signal(&mut self, intent: SignalIntent, now: DateTime<Tz>) {
        let record = SignalRecord {
            timestamp: now,
            action: intent.action,
            side: intent.side,
            option_key: intent.option.instrument_key.clone(),
            strike: intent.option.strike,
            cash: intent.cash,
            status: SignalStatus::Active,
        };

        let signal_id = match self.db.insert_signal(&record).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Failed to persist signal: {e}");
                return;
            }
        };

        if intent.action == SignalAction::Buy {
            let entry = self
                .processors
                .get(&intent.option.instrument_key)
                .and_then(TickProcessor::current_close)
                .unwrap_or(0.0);
            self.tracker
                .start_tracking(signal_id, &intent.option.instrument_key, entry, now);
        }
    }

    async fn check_positions(&mut self) {
        if self.tracker.active_count() == 0 {
            return;
        }
        let now = self.last_market_time.unwrap_or_else(now_ist);

        let processors = &self.processors;
        let exits = self.tracker.check_all(
            |key| processors.get(key).and_then(TickProcessor::current_close),
            now,
        );

        for exit in exits {
            let record = TrackingRecord {
                signal_id: exit.signal_id,
                timestamp: exit.exit_time,
                exit_price: exit.exit_price,
                pnl: exit.pnl,
                status: exit.status,
            };
            if let Err(e) = self.db.insert_tracking(&record).await {
                tracing::error!("Failed to persist position exit: {e}");
            }
            if let Err(e) = self
                .db
                .update_signal_close(
                    exit.signal_id,
                    exit.status,
                    exit.entry_price,
                    exit.target,
                    exit.stop,
                )
                .await
            {
                tracing::error!("Failed to update signal status: {e}");
            }
        }
    }

    async fn persist_cash_flow(&self, snapshots: Vec<CashFlowSnapshot>) {
        for snapshot in snapshots {
            if let Err(e) = self.db.insert_cash_flow(&snapshot).await {
                tracing::error!("Failed to persist cash-flow snapshot: {e}");
            }
        }
    }

    fn log_stats(&mut self) {
        if self.last_stats.elapsed() < STATS_INTERVAL {
            return;
        }
        let total_ticks: u64 = self
            .processors
            .values()
            .map(TickProcessor::processed_ticks)
            .sum();
        let depths = self.writer.queue_depths();
        tracing::info!(
            messages = self.messages,
            ticks = total_ticks,
            candle_queue = depths.candles,
            ha_queue = depths.ha_candles,
            trend_queue = depths.trends,
            snapshot_queue = depths.snapshots,
            active_positions = self.tracker.active_count(),
            "Engine stats"
        );
        self.last_stats = Instant::now();
    }
}

#[async_trait]
impl FeedHandler for Engine {
    async fn on_update(&mut self, update: MarketUpdate) -> DispatchOutcome {
        self.dispatch(&update).await
    }

    async fn on_session_end(&mut self) {
        self.force_finalize_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use trendflow_core::market::IST;
    use trendflow_core::OptionSide;
    use trendflow_data::record_queues;
    use trendflow_feed::{FullQuote, LtpcQuote, QuoteFeed};

    const INDEX_KEY: &str = "NSE_INDEX|Nifty 50";
    const FUTURE_KEY: &str = "NSE_FO|53001";
    const CE_KEY: &str = "NSE_FO|40001";

    fn ist_ms(h: u32, m: u32, s: u32) -> i64 {
        IST.with_ymd_and_hms(2026, 8, 4, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
            .timestamp_millis()
    }

    fn index_quote(ltp: f64, ltt_ms: i64) -> QuoteFeed {
        QuoteFeed::Full(FullQuote {
            ltpc: LtpcQuote {
                ltp,
                ltt_ms,
                prev_close: ltp,
            },
            atp: None,
            vtt: None,
            minute_volume: None,
            oi: None,
            iv: None,
        })
    }

    fn option_quote(ltp: f64, vtt: f64, ltt_ms: i64) -> QuoteFeed {
        QuoteFeed::Full(FullQuote {
            ltpc: LtpcQuote {
                ltp,
                ltt_ms,
                prev_close: ltp,
            },
            atp: Some(ltp),
            vtt: Some(vtt),
            minute_volume: None,
            oi: None,
            iv: None,
        })
    }

    fn update(feeds: Vec<(&str, QuoteFeed)>) -> MarketUpdate {
        MarketUpdate {
            feeds: feeds
                .into_iter()
                .map(|(key, quote)| (key.to_string(), quote))
                .collect::<HashMap<_, _>>(),
        }
    }

    async fn engine_with_db() -> (tempfile::TempDir, DatabaseClient, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseClient::connect(dir.path().join("test.db"), 2)
            .await
            .unwrap();
        db.init_schema().await.unwrap();

        let basket = vec![BasketOption {
            instrument_key: CE_KEY.to_string(),
            option_side: OptionSide::Ce,
            strike: 24500.0,
            last_price: 50.0,
        }];
        let instruments = InstrumentSet::build(INDEX_KEY, FUTURE_KEY, &basket);
        let (handles, _queues) = record_queues();
        let engine = Engine::new(instruments, &basket, db.clone(), handles);
        (dir, db, engine)
    }

    #[tokio::test]
    async fn test_threshold_signal_is_persisted_and_tracked_to_target() {
        let (_dir, db, mut engine) = engine_with_db().await;

        // Index above the strike so the CE is in the money; option trades
        // 3000 contracts on a rising premium: cash = 60 * 3000 = 180k.
        engine
            .dispatch(&update(vec![
                (INDEX_KEY, index_quote(24550.0, ist_ms(11, 0, 10))),
                (CE_KEY, option_quote(50.0, 1000.0, ist_ms(11, 0, 10))),
            ]))
            .await;
        engine
            .dispatch(&update(vec![(
                CE_KEY,
                option_quote(60.0, 4000.0, ist_ms(11, 0, 20)),
            )]))
            .await;

        assert_eq!(engine.tracker.active_count(), 1);
        let (signal_type, status): (String, String) =
            sqlx::query_as("SELECT signal_type, status FROM buy_signals ORDER BY id LIMIT 1")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(signal_type, "BUY_CE");
        assert_eq!(status, "ACTIVE");

        // Premium reaches entry+5: the tracker books the fixed profit.
        engine
            .dispatch(&update(vec![(
                CE_KEY,
                option_quote(66.0, 4100.0, ist_ms(11, 0, 30)),
            )]))
            .await;

        assert_eq!(engine.tracker.active_count(), 0);
        let status: String = sqlx::query_scalar("SELECT status FROM buy_signals ORDER BY id LIMIT 1")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(status, "TARGET_HIT");

        let (pnl, count): (f64, i64) =
            sqlx::query_as("SELECT COALESCE(SUM(pnl), 0), COUNT(*) FROM option_tracking")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(count, 1);
        assert_eq!(pnl, 975.0 * 5.0);
    }

    #[tokio::test]
    async fn test_minute_rollover_persists_cash_flow() {
        let (_dir, db, mut engine) = engine_with_db().await;

        engine
            .dispatch(&update(vec![
                (INDEX_KEY, index_quote(24550.0, ist_ms(11, 0, 10))),
                (CE_KEY, option_quote(50.0, 1000.0, ist_ms(11, 0, 10))),
            ]))
            .await;
        engine
            .dispatch(&update(vec![(
                CE_KEY,
                option_quote(52.0, 1100.0, ist_ms(11, 0, 40)),
            )]))
            .await;
        // Crossing into 11:01 finalizes the 11:00 cash bucket.
        engine
            .dispatch(&update(vec![(
                CE_KEY,
                option_quote(52.0, 1100.0, ist_ms(11, 1, 10)),
            )]))
            .await;

        let (interval, cash): (String, f64) = sqlx::query_as(
            "SELECT interval_type, cash FROM options_cash_flow ORDER BY id LIMIT 1",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(interval, "1min");
        assert_eq!(cash, 52.0 * 100.0);
    }

    #[tokio::test]
    async fn test_market_close_tick_reports_closed() {
        let (_dir, _db, mut engine) = engine_with_db().await;

        engine
            .dispatch(&update(vec![(
                FUTURE_KEY,
                option_quote(24600.0, 500.0, ist_ms(15, 29, 50)),
            )]))
            .await;
        let outcome = engine
            .dispatch(&update(vec![(
                FUTURE_KEY,
                option_quote(24601.0, 510.0, ist_ms(15, 30, 0)),
            )]))
            .await;

        assert_eq!(outcome, DispatchOutcome::MarketClosed);
    }
}

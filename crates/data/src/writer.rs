//! Background record writer.
//!
//! Producers enqueue finalized records onto bounded channels with a
//! non-blocking `try_send`; a single writer task drains the queues in small
//! batches, wrapping each drained batch in one transaction. The receive loop
//! is never blocked by persistence: if a queue fills up, the overflow is
//! dropped and logged, bounding data loss to the queue depth.
//!
//! No ordering is guaranteed across queues, only within each queue.

use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::database::{ensure_candle_table, ensure_ha_table, DatabaseClient};
use crate::models::{Candle, HaCandle, Interval, LatestSnapshot, TrendRecord};
use trendflow_core::market::{now_ist, trade_date_compact};

const QUEUE_CAPACITY: usize = 10_000;
const DRAIN_LIMIT: usize = 1_000;
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Current depth of each writer queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueDepths {
    pub candles: usize,
    pub ha_candles: usize,
    pub trends: usize,
    pub snapshots: usize,
}

/// Cloneable producer side of the writer queues.
#[derive(Debug, Clone)]
pub struct WriterHandles {
    candle_tx: mpsc::Sender<(Candle, Interval)>,
    ha_tx: mpsc::Sender<(HaCandle, Interval)>,
    trend_tx: mpsc::Sender<TrendRecord>,
    latest_tx: mpsc::Sender<LatestSnapshot>,
}

impl WriterHandles {
    pub fn queue_candle(&self, candle: Candle, interval: Interval) {
        if self.candle_tx.try_send((candle, interval)).is_err() {
            tracing::warn!("Candle queue full or closed, record dropped");
        }
    }

    pub fn queue_ha_candle(&self, candle: HaCandle, interval: Interval) {
        if self.ha_tx.try_send((candle, interval)).is_err() {
            tracing::warn!("Heikin-Ashi queue full or closed, record dropped");
        }
    }

    pub fn queue_trend(&self, record: TrendRecord) {
        if self.trend_tx.try_send(record).is_err() {
            tracing::warn!("Trend queue full or closed, record dropped");
        }
    }

    pub fn queue_latest(&self, snapshot: LatestSnapshot) {
        if self.latest_tx.try_send(snapshot).is_err() {
            tracing::warn!("Latest-snapshot queue full or closed, record dropped");
        }
    }

    #[must_use]
    pub fn queue_depths(&self) -> QueueDepths {
        QueueDepths {
            candles: QUEUE_CAPACITY - self.candle_tx.capacity(),
            ha_candles: QUEUE_CAPACITY - self.ha_tx.capacity(),
            trends: QUEUE_CAPACITY - self.trend_tx.capacity(),
            snapshots: QUEUE_CAPACITY - self.latest_tx.capacity(),
        }
    }
}

/// Consumer ends of the writer queues.
pub struct RecordQueues {
    pub candles: mpsc::Receiver<(Candle, Interval)>,
    pub ha_candles: mpsc::Receiver<(HaCandle, Interval)>,
    pub trends: mpsc::Receiver<TrendRecord>,
    pub snapshots: mpsc::Receiver<LatestSnapshot>,
}

/// Creates the bounded record queues and their producer handles.
#[must_use]
pub fn record_queues() -> (WriterHandles, RecordQueues) {
    let (candle_tx, candle_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (ha_tx, ha_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (trend_tx, trend_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (latest_tx, latest_rx) = mpsc::channel(QUEUE_CAPACITY);

    let handles = WriterHandles {
        candle_tx,
        ha_tx,
        trend_tx,
        latest_tx,
    };
    let queues = RecordQueues {
        candles: candle_rx,
        ha_candles: ha_rx,
        trends: trend_rx,
        snapshots: latest_rx,
    };
    (handles, queues)
}

/// The single writer task draining all record queues.
pub struct RecordWriter {
    db: DatabaseClient,
    /// instrument key -> per-day table suffix
    suffixes: HashMap<String, String>,
    queues: RecordQueues,
    shutdown: watch::Receiver<bool>,
}

/// Builds the writer and its producer handles.
///
/// `db` should be a pool dedicated to the writer; inline writes elsewhere use
/// their own client so the writer connection is never shared.
#[must_use]
pub fn writer_pipeline(
    db: DatabaseClient,
    suffixes: HashMap<String, String>,
    shutdown: watch::Receiver<bool>,
) -> (WriterHandles, RecordWriter) {
    let (handles, queues) = record_queues();
    let writer = RecordWriter {
        db,
        suffixes,
        queues,
        shutdown,
    };
    (handles, writer)
}

impl RecordWriter {
    /// Runs until shutdown is observed, then drains the queues once more.
    pub async fn run(mut self) {
        tracing::info!("Record writer started");
        loop {
            if *self.shutdown.borrow() {
                self.drain_all().await;
                tracing::info!("Record writer stopped");
                return;
            }
            let processed = self.drain_all().await;
            if processed == 0 {
                tokio::time::sleep(IDLE_SLEEP).await;
            }
        }
    }

    /// Drains every queue once. A batch that fails to write rolls back and is
    /// logged; the writer keeps going.
    async fn drain_all(&mut self) -> usize {
        let mut processed = 0;

        let candles = drain(&mut self.queues.candles);
        if !candles.is_empty() {
            processed += candles.len();
            if let Err(e) = self.write_candle_batch(&candles).await {
                tracing::error!("Failed to write candle batch: {e}");
            }
        }

        let ha_candles = drain(&mut self.queues.ha_candles);
        if !ha_candles.is_empty() {
            processed += ha_candles.len();
            if let Err(e) = self.write_ha_batch(&ha_candles).await {
                tracing::error!("Failed to write Heikin-Ashi batch: {e}");
            }
        }

        let trends = drain(&mut self.queues.trends);
        if !trends.is_empty() {
            processed += trends.len();
            if let Err(e) = self.write_trend_batch(&trends).await {
                tracing::error!("Failed to write trend batch: {e}");
            }
        }

        let snapshots = drain(&mut self.queues.snapshots);
        if !snapshots.is_empty() {
            processed += snapshots.len();
            if let Err(e) = self.write_latest_batch(&snapshots).await {
                tracing::error!("Failed to write latest-snapshot batch: {e}");
            }
        }

        processed
    }

    fn table_suffix(&self, instrument_key: &str) -> &str {
        self.suffixes
            .get(instrument_key)
            .map_or("unknown", String::as_str)
    }

    async fn write_candle_batch(&self, batch: &[(Candle, Interval)]) -> Result<()> {
        let trade_date = trade_date_compact(&now_ist());
        let mut tables: HashMap<String, Vec<&Candle>> = HashMap::new();
        for (candle, interval) in batch {
            let table = format!(
                "candles{}_{}_{}",
                interval.table_infix(),
                self.table_suffix(&candle.instrument_key),
                trade_date
            );
            tables.entry(table).or_default().push(candle);
        }

        let mut tx = self.db.pool().begin().await?;
        for (table, candles) in &tables {
            let data_type = table.split('_').next().unwrap_or("candles");
            ensure_candle_table(
                &mut tx,
                table,
                &candles[0].instrument_key,
                data_type,
                &trade_date,
            )
            .await?;
            for candle in candles {
                sqlx::query(&format!(
                    r"
                    INSERT OR REPLACE INTO {table}
                    (instrument_key, timestamp, open, high, low, close, volume, atp,
                     delta, min_delta, max_delta, buy_volume, sell_volume, tick_count, vtt_open, vtt_close)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "
                ))
                .bind(&candle.instrument_key)
                .bind(candle.timestamp.naive_local())
                .bind(candle.open)
                .bind(candle.high)
                .bind(candle.low)
                .bind(candle.close)
                .bind(candle.volume)
                .bind(candle.atp)
                .bind(candle.delta)
                .bind(candle.min_delta)
                .bind(candle.max_delta)
                .bind(candle.buy_volume)
                .bind(candle.sell_volume)
                .bind(i64::from(candle.tick_count))
                .bind(candle.vtt_open)
                .bind(candle.vtt_close)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_ha_batch(&self, batch: &[(HaCandle, Interval)]) -> Result<()> {
        let trade_date = trade_date_compact(&now_ist());
        let mut tables: HashMap<String, Vec<&HaCandle>> = HashMap::new();
        for (candle, interval) in batch {
            let table = format!(
                "heikin_ashi{}_{}_{}",
                interval.table_infix(),
                self.table_suffix(&candle.instrument_key),
                trade_date
            );
            tables.entry(table).or_default().push(candle);
        }

        let mut tx = self.db.pool().begin().await?;
        for (table, candles) in &tables {
            let data_type = if table.starts_with("heikin_ashi5") {
                "heikin_ashi5"
            } else {
                "heikin_ashi"
            };
            ensure_ha_table(
                &mut tx,
                table,
                &candles[0].instrument_key,
                data_type,
                &trade_date,
            )
            .await?;
            for candle in candles {
                sqlx::query(&format!(
                    r"
                    INSERT OR REPLACE INTO {table}
                    (instrument_key, timestamp, ha_open, ha_high, ha_low, ha_close, volume, hlc3, sar_trend)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "
                ))
                .bind(&candle.instrument_key)
                .bind(candle.timestamp.naive_local())
                .bind(candle.ha_open)
                .bind(candle.ha_high)
                .bind(candle.ha_low)
                .bind(candle.ha_close)
                .bind(candle.volume)
                .bind(candle.hlc3)
                .bind(candle.sar_trend)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_trend_batch(&self, batch: &[TrendRecord]) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        for record in batch {
            sqlx::query(
                r"
                INSERT INTO trend
                (timestamp, candle_interval, trend_value, buy_recommendation, entry_price, target, sl, profit_loss)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(record.timestamp.naive_local())
            .bind(record.interval.as_str())
            .bind(record.trend_value)
            .bind(&record.recommendation)
            .bind(record.entry_price)
            .bind(record.target)
            .bind(record.stop_loss)
            .bind(record.profit_loss)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_latest_batch(&self, batch: &[LatestSnapshot]) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        for snapshot in batch {
            sqlx::query(
                r"
                INSERT OR REPLACE INTO latest_candles
                (instrument_key, instrument_name, instrument_type, strike_price, option_type,
                 timestamp, open, high, low, close, volume, atp, vwap, price_change, price_change_pct,
                 delta, delta_pct, min_delta, max_delta, buy_volume, sell_volume, tick_count,
                 vtt_open, vtt_close, candle_interval, trend_value, buy_recommendation,
                 entry_price, target, sl, profit_loss, prev_close, intraday_high, intraday_low, last_updated)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(&snapshot.instrument_key)
            .bind(&snapshot.instrument_name)
            .bind(&snapshot.instrument_type)
            .bind(snapshot.strike_price)
            .bind(&snapshot.option_type)
            .bind(snapshot.timestamp.naive_local())
            .bind(snapshot.open)
            .bind(snapshot.high)
            .bind(snapshot.low)
            .bind(snapshot.close)
            .bind(snapshot.volume)
            .bind(snapshot.atp)
            .bind(snapshot.vwap)
            .bind(snapshot.price_change)
            .bind(snapshot.price_change_pct)
            .bind(snapshot.delta)
            .bind(snapshot.delta_pct)
            .bind(snapshot.min_delta)
            .bind(snapshot.max_delta)
            .bind(snapshot.buy_volume)
            .bind(snapshot.sell_volume)
            .bind(i64::from(snapshot.tick_count))
            .bind(snapshot.vtt_open)
            .bind(snapshot.vtt_close)
            .bind(snapshot.interval.as_str())
            .bind(snapshot.trend_value)
            .bind(&snapshot.recommendation)
            .bind(snapshot.entry_price)
            .bind(snapshot.target)
            .bind(snapshot.stop_loss)
            .bind(snapshot.profit_loss)
            .bind(snapshot.prev_close)
            .bind(snapshot.intraday_high)
            .bind(snapshot.intraday_low)
            .bind(snapshot.last_updated.naive_local())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while items.len() < DRAIN_LIMIT {
        match rx.try_recv() {
            Ok(item) => items.push(item),
            Err(_) => break,
        }
    }
    items
}

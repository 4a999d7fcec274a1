//! SQLite client.
//!
//! The store is shared with an external dashboard that reads it concurrently,
//! so every connection runs in WAL mode with a 10 s busy timeout. Schema
//! initialization is retried a bounded number of times before giving up.

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{SqliteConnection, SqlitePool};
use std::path::Path;
use std::time::Duration;

use crate::models::{CashFlowSnapshot, SignalRecord, SignalStatus, TrackingRecord};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);
const INIT_RETRIES: u32 = 5;
const INIT_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct DatabaseClient {
    pool: SqlitePool,
}

impl DatabaseClient {
    /// Opens a pool against the database file, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub async fn connect(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to open SQLite database")?;

        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates all static tables and indexes, retrying on lock contention.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization still fails after all retries.
    /// This is the only fatal persistence error in the pipeline.
    pub async fn init_schema(&self) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.create_static_tables().await {
                Ok(()) => {
                    tracing::info!("Database schema initialized");
                    return Ok(());
                }
                Err(e) if attempt < INIT_RETRIES => {
                    tracing::warn!(
                        attempt,
                        retries = INIT_RETRIES,
                        "Schema init failed, retrying: {e}"
                    );
                    tokio::time::sleep(INIT_RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(e).context("Failed to initialize database schema after retries")
                }
            }
        }
    }

    async fn create_static_tables(&self) -> Result<()> {
        let statements = [
            r"
            CREATE TABLE IF NOT EXISTS table_registry (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT UNIQUE NOT NULL,
                instrument_key TEXT NOT NULL,
                data_type TEXT NOT NULL,
                trade_date TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS trend (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TIMESTAMP NOT NULL,
                candle_interval TEXT NOT NULL,
                trend_value INTEGER NOT NULL,
                buy_recommendation TEXT,
                entry_price REAL,
                target REAL,
                sl REAL,
                profit_loss REAL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS latest_candles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instrument_key TEXT UNIQUE NOT NULL,
                instrument_name TEXT NOT NULL,
                instrument_type TEXT NOT NULL,
                strike_price REAL,
                option_type TEXT,
                timestamp TIMESTAMP NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                atp REAL NOT NULL,
                vwap REAL DEFAULT 0,
                price_change REAL DEFAULT 0,
                price_change_pct REAL DEFAULT 0,
                delta INTEGER DEFAULT 0,
                delta_pct REAL DEFAULT 0,
                min_delta INTEGER DEFAULT 0,
                max_delta INTEGER DEFAULT 0,
                buy_volume INTEGER DEFAULT 0,
                sell_volume INTEGER DEFAULT 0,
                tick_count INTEGER DEFAULT 0,
                vtt_open REAL DEFAULT 0,
                vtt_close REAL DEFAULT 0,
                candle_interval TEXT NOT NULL,
                trend_value INTEGER DEFAULT 0,
                buy_recommendation TEXT,
                entry_price REAL,
                target REAL,
                sl REAL,
                profit_loss REAL,
                prev_close REAL DEFAULT 0,
                intraday_high REAL DEFAULT 0,
                intraday_low REAL DEFAULT 0,
                last_updated TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS options_cash_flow (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                interval_type TEXT NOT NULL,
                cash REAL NOT NULL,
                min_cash REAL NOT NULL,
                max_cash REAL NOT NULL,
                total_options INTEGER NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS buy_signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                signal_type TEXT NOT NULL,
                option_key TEXT NOT NULL,
                strike REAL NOT NULL,
                entry_price REAL DEFAULT 0,
                target REAL DEFAULT 0,
                sl REAL DEFAULT 0,
                status TEXT DEFAULT 'ACTIVE',
                cash_flow REAL DEFAULT 0
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS option_tracking (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                signal_id INTEGER REFERENCES buy_signals(id),
                timestamp TEXT NOT NULL,
                current_price REAL NOT NULL,
                pnl REAL DEFAULT 0,
                status TEXT NOT NULL
            )
            ",
            "CREATE INDEX IF NOT EXISTS idx_trend_timestamp ON trend(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_trend_interval ON trend(candle_interval)",
            "CREATE INDEX IF NOT EXISTS idx_signals_timestamp ON buy_signals(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_tracking_signal_id ON option_tracking(signal_id)",
            "CREATE INDEX IF NOT EXISTS idx_cash_flow_timestamp ON options_cash_flow(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_latest_candles_instrument ON latest_candles(instrument_key)",
            "CREATE INDEX IF NOT EXISTS idx_latest_candles_updated ON latest_candles(updated_at)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Inserts a finalized cash-flow bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails after the busy timeout.
    pub async fn insert_cash_flow(&self, snapshot: &CashFlowSnapshot) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO options_cash_flow (timestamp, interval_type, cash, min_cash, max_cash, total_options)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(snapshot.timestamp.format("%Y-%m-%d %H:%M:%S").to_string())
        .bind(snapshot.interval.as_str())
        .bind(snapshot.cash)
        .bind(snapshot.min_cash)
        .bind(snapshot.max_cash)
        .bind(snapshot.basket_size as i64)
        .execute(&self.pool)
        .await
        .context("Failed to insert cash-flow snapshot")?;
        Ok(())
    }

    /// Inserts a new signal row and returns its id.
    ///
    /// Entry, target, and stop are left at zero; the position tracker fills
    /// them in when (and if) the signal is accepted for tracking.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails after the busy timeout.
    pub async fn insert_signal(&self, signal: &SignalRecord) -> Result<i64> {
        let result = sqlx::query(
            r"
            INSERT INTO buy_signals (timestamp, signal_type, option_key, strike, entry_price, target, sl, status, cash_flow)
            VALUES (?, ?, ?, ?, 0, 0, 0, ?, ?)
            ",
        )
        .bind(signal.timestamp.naive_local())
        .bind(signal.signal_type())
        .bind(&signal.option_key)
        .bind(signal.strike)
        .bind(signal.status.as_str())
        .bind(signal.cash)
        .execute(&self.pool)
        .await
        .context("Failed to insert signal")?;
        Ok(result.last_insert_rowid())
    }

    /// Records a closed position's terminal state on its originating signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails after the busy timeout.
    pub async fn update_signal_close(
        &self,
        signal_id: i64,
        status: SignalStatus,
        entry_price: f64,
        target: f64,
        stop_loss: f64,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE buy_signals
            SET status = ?, entry_price = ?, target = ?, sl = ?
            WHERE id = ?
            ",
        )
        .bind(status.as_str())
        .bind(entry_price)
        .bind(target)
        .bind(stop_loss)
        .bind(signal_id)
        .execute(&self.pool)
        .await
        .context("Failed to update signal status")?;
        Ok(())
    }

    /// Inserts a position-exit audit row.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails after the busy timeout.
    pub async fn insert_tracking(&self, record: &TrackingRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO option_tracking (signal_id, timestamp, current_price, pnl, status)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(record.signal_id)
        .bind(record.timestamp.naive_local())
        .bind(record.exit_price)
        .bind(record.pnl)
        .bind(record.status.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to insert tracking record")?;
        Ok(())
    }
}

/// Creates a per-day candle table if missing and registers it.
///
/// # Errors
///
/// Returns an error if table creation fails.
pub async fn ensure_candle_table(
    conn: &mut SqliteConnection,
    table: &str,
    instrument_key: &str,
    data_type: &str,
    trade_date: &str,
) -> Result<()> {
    sqlx::query(&format!(
        r"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            instrument_key TEXT NOT NULL,
            timestamp TIMESTAMP NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            volume INTEGER NOT NULL DEFAULT 0,
            atp REAL NOT NULL,
            delta INTEGER DEFAULT 0,
            min_delta INTEGER DEFAULT 0,
            max_delta INTEGER DEFAULT 0,
            buy_volume INTEGER DEFAULT 0,
            sell_volume INTEGER DEFAULT 0,
            tick_count INTEGER DEFAULT 0,
            vtt_open REAL DEFAULT 0,
            vtt_close REAL DEFAULT 0,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(timestamp)
        )
        "
    ))
    .execute(&mut *conn)
    .await?;
    register_table(conn, table, instrument_key, data_type, trade_date).await
}

/// Creates a per-day Heikin-Ashi table if missing and registers it.
///
/// # Errors
///
/// Returns an error if table creation fails.
pub async fn ensure_ha_table(
    conn: &mut SqliteConnection,
    table: &str,
    instrument_key: &str,
    data_type: &str,
    trade_date: &str,
) -> Result<()> {
    sqlx::query(&format!(
        r"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            instrument_key TEXT NOT NULL,
            timestamp TIMESTAMP NOT NULL,
            ha_open REAL NOT NULL,
            ha_high REAL NOT NULL,
            ha_low REAL NOT NULL,
            ha_close REAL NOT NULL,
            volume INTEGER NOT NULL DEFAULT 0,
            hlc3 REAL NOT NULL,
            sar_trend INTEGER,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(timestamp)
        )
        "
    ))
    .execute(&mut *conn)
    .await?;
    register_table(conn, table, instrument_key, data_type, trade_date).await
}

async fn register_table(
    conn: &mut SqliteConnection,
    table: &str,
    instrument_key: &str,
    data_type: &str,
    trade_date: &str,
) -> Result<()> {
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_timestamp ON {table}(timestamp)"
    ))
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        r"
        INSERT OR IGNORE INTO table_registry (table_name, instrument_key, data_type, trade_date)
        VALUES (?, ?, ?, ?)
        ",
    )
    .bind(table)
    .bind(instrument_key)
    .bind(data_type)
    .bind(trade_date)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Interval, SignalAction};
    use chrono::TimeZone;
    use trendflow_core::market::IST;
    use trendflow_core::OptionSide;

    async fn test_db() -> (tempfile::TempDir, DatabaseClient) {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseClient::connect(dir.path().join("test.db"), 2)
            .await
            .unwrap();
        db.init_schema().await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let (_dir, db) = test_db().await;
        db.init_schema().await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_signal_returns_rowid() {
        let (_dir, db) = test_db().await;
        let signal = SignalRecord {
            timestamp: IST.with_ymd_and_hms(2026, 8, 4, 10, 30, 0).unwrap(),
            action: SignalAction::Buy,
            side: OptionSide::Ce,
            option_key: "NSE_FO|40001".to_string(),
            strike: 24500.0,
            cash: 150_000.0,
            status: SignalStatus::Active,
        };

        let first = db.insert_signal(&signal).await.unwrap();
        let second = db.insert_signal(&signal).await.unwrap();
        assert!(second > first);

        let signal_type: String =
            sqlx::query_scalar("SELECT signal_type FROM buy_signals WHERE id = ?")
                .bind(first)
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(signal_type, "BUY_CE");
    }

    #[tokio::test]
    async fn test_signal_close_updates_status() {
        let (_dir, db) = test_db().await;
        let signal = SignalRecord {
            timestamp: IST.with_ymd_and_hms(2026, 8, 4, 10, 30, 0).unwrap(),
            action: SignalAction::Buy,
            side: OptionSide::Pe,
            option_key: "NSE_FO|40002".to_string(),
            strike: 24550.0,
            cash: -120_000.0,
            status: SignalStatus::Active,
        };
        let id = db.insert_signal(&signal).await.unwrap();

        db.update_signal_close(id, SignalStatus::TargetHit, 98.0, 103.0, 93.0)
            .await
            .unwrap();

        let status: String = sqlx::query_scalar("SELECT status FROM buy_signals WHERE id = ?")
            .bind(id)
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(status, "TARGET_HIT");
    }

    #[tokio::test]
    async fn test_insert_cash_flow() {
        let (_dir, db) = test_db().await;
        let snapshot = CashFlowSnapshot {
            timestamp: IST.with_ymd_and_hms(2026, 8, 4, 10, 15, 0).unwrap(),
            interval: Interval::OneMin,
            cash: 2900.0,
            min_cash: -500.0,
            max_cash: 5500.0,
            basket_size: 60,
        };
        db.insert_cash_flow(&snapshot).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM options_cash_flow")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}

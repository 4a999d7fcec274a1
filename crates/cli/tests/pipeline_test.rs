//! End-to-end pipeline test: decoded updates through the engine, records
//! through the writer queues, rows in SQLite.

use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use tokio::sync::watch;

use trendflow_core::market::{now_ist, trade_date_compact, IST};
use trendflow_core::{BasketOption, InstrumentSet, OptionSide};
use trendflow_data::{writer_pipeline, DatabaseClient};
use trendflow_engine::Engine;
use trendflow_feed::{FullQuote, LtpcQuote, MarketUpdate, QuoteFeed};

const INDEX_KEY: &str = "NSE_INDEX|Nifty 50";
const FUTURE_KEY: &str = "NSE_FO|53001";
const CE_KEY: &str = "NSE_FO|40001";

fn ist_ms(h: u32, m: u32, s: u32) -> i64 {
    IST.with_ymd_and_hms(2026, 8, 4, h, m, s)
        .unwrap()
        .with_timezone(&Utc)
        .timestamp_millis()
}

fn full_quote(ltp: f64, vtt: Option<f64>, ltt_ms: i64) -> QuoteFeed {
    QuoteFeed::Full(FullQuote {
        ltpc: LtpcQuote {
            ltp,
            ltt_ms,
            prev_close: ltp,
        },
        atp: vtt.map(|_| ltp),
        vtt,
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

#[tokio::test]
async fn test_ticks_flow_through_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("pipeline.db");

    let writer_db = DatabaseClient::connect(&db_path, 1).await.unwrap();
    writer_db.init_schema().await.unwrap();
    let inline_db = DatabaseClient::connect(&db_path, 2).await.unwrap();

    let basket = vec![BasketOption {
        instrument_key: CE_KEY.to_string(),
        option_side: OptionSide::Ce,
        strike: 24500.0,
        last_price: 50.0,
    }];
    let instruments = InstrumentSet::build(INDEX_KEY, FUTURE_KEY, &basket);

    let suffixes = instruments
        .iter()
        .map(|(key, spec)| (key.clone(), spec.table_suffix.clone()))
        .collect();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handles, writer) = writer_pipeline(writer_db.clone(), suffixes, shutdown_rx);
    let writer_task = tokio::spawn(writer.run());

    let mut engine = Engine::new(instruments, &basket, inline_db, handles);

    // Minute 11:00 for all three instruments.
    engine
        .dispatch(&update(vec![
            (INDEX_KEY, full_quote(24550.0, None, ist_ms(11, 0, 10))),
            (FUTURE_KEY, full_quote(24580.0, Some(1000.0), ist_ms(11, 0, 10))),
            (CE_KEY, full_quote(50.0, Some(500.0), ist_ms(11, 0, 10))),
        ]))
        .await;
    engine
        .dispatch(&update(vec![
            (INDEX_KEY, full_quote(24560.0, None, ist_ms(11, 0, 40))),
            (FUTURE_KEY, full_quote(24585.0, Some(1200.0), ist_ms(11, 0, 40))),
            (CE_KEY, full_quote(52.0, Some(560.0), ist_ms(11, 0, 40))),
        ]))
        .await;
    // Crossing into 11:01 finalizes every 11:00 bar.
    engine
        .dispatch(&update(vec![
            (INDEX_KEY, full_quote(24561.0, None, ist_ms(11, 1, 10))),
            (FUTURE_KEY, full_quote(24586.0, Some(1250.0), ist_ms(11, 1, 10))),
            (CE_KEY, full_quote(52.5, Some(580.0), ist_ms(11, 1, 10))),
        ]))
        .await;

    shutdown_tx.send(true).unwrap();
    writer_task.await.unwrap();

    let date = trade_date_compact(&now_ist());
    for suffix in ["nifty_index", "future", "ce_24500"] {
        let count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM candles_{suffix}_{date}"))
                .fetch_one(writer_db.pool())
                .await
                .unwrap();
        assert_eq!(count, 1, "one finalized 1-minute candle for {suffix}");
    }

    // Index and future run the Heikin-Ashi pipeline; the option does not.
    let ha_count: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM heikin_ashi_future_{date}"))
            .fetch_one(writer_db.pool())
            .await
            .unwrap();
    assert_eq!(ha_count, 1);

    let trend_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trend")
        .fetch_one(writer_db.pool())
        .await
        .unwrap();
    assert!(trend_count >= 3, "one trend row per finalized instrument");

    let snapshot_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM latest_candles")
        .fetch_one(writer_db.pool())
        .await
        .unwrap();
    assert!(snapshot_count <= 3, "at most one snapshot row per instrument");

    // The option traded 60 contracts at a rising premium within 11:00.
    let cash: f64 = sqlx::query_scalar(
        "SELECT cash FROM options_cash_flow WHERE interval_type = '1min' LIMIT 1",
    )
    .fetch_one(writer_db.pool())
    .await
    .unwrap();
    assert_eq!(cash, 52.0 * 60.0);
}

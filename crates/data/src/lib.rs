//! Data storage for the trendflow pipeline.
//!
//! This crate provides:
//! - Record models for everything the engine persists
//! - A SQLite client (WAL, busy-timeout) built on sqlx
//! - The background writer task draining bounded record queues

pub mod database;
pub mod models;
pub mod writer;

pub use database::DatabaseClient;
pub use models::{
    Candle, CashFlowSnapshot, HaCandle, Interval, LatestSnapshot, SignalAction, SignalRecord,
    SignalStatus, TrackingRecord, TrendRecord,
};
pub use writer::{
    record_queues, writer_pipeline, QueueDepths, RecordQueues, RecordWriter, WriterHandles,
};

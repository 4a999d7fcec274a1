//! Record models persisted by the pipeline.

pub mod candle;
pub mod cash_flow;
pub mod signal;
pub mod snapshot;
pub mod trend;

pub use candle::{Candle, HaCandle, Interval};
pub use cash_flow::CashFlowSnapshot;
pub use signal::{SignalAction, SignalRecord, SignalStatus, TrackingRecord};
pub use snapshot::LatestSnapshot;
pub use trend::TrendRecord;

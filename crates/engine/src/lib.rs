//! Streaming tick-processing engine.
//!
//! One [`Engine`] consumes decoded market updates from the feed session and
//! drives, in fixed order per message: per-instrument tick processors (candle
//! and indicator state machines), the option-basket cash-flow accumulator,
//! the signal generator, and the position tracker. All finalized records are
//! handed to the persistence writer through its bounded queues; the engine
//! itself never blocks on the store except for the rare inline signal and
//! audit writes.

pub mod cash_flow;
pub mod engine;
pub mod indicators;
pub mod processor;
pub mod signals;
pub mod tick;
pub mod tracker;
pub mod trend;

pub use cash_flow::{CashFlowAccumulator, CashMetrics, ItmQuote};
pub use engine::Engine;
pub use indicators::{HeikinAshiState, ParabolicSar};
pub use processor::TickProcessor;
pub use signals::{SignalGenerator, SignalIntent};
pub use tick::Tick;
pub use tracker::{Position, PositionExit, PositionTracker};
pub use trend::TrendSnapshot;

/// Fixed lot size used for every tracked trade.
pub const LOT_QUANTITY: i64 = 975;

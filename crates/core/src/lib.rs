//! Core types for the trendflow market-data pipeline.
//!
//! This crate provides:
//! - Application configuration loaded via figment
//! - The typed instrument registry built from the option-basket file
//! - Market-calendar and candle-bucket helpers (all times in IST)

pub mod basket;
pub mod config;
pub mod config_loader;
pub mod instrument;
pub mod market;

pub use basket::{load_basket, BasketOption};
pub use config::{AppConfig, DatabaseConfig, FeedConfig, InstrumentsConfig};
pub use config_loader::ConfigLoader;
pub use instrument::{InstrumentKind, InstrumentSet, InstrumentSpec, OptionSide};

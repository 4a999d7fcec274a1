//! Upstream feed client.
//!
//! This crate owns the connection lifecycle against the market-data service:
//! daily-credential validation, feed authorization, the WebSocket session
//! with its subscription message and reconnect policy, and decoding of the
//! length-prefixed binary (or JSON fallback) wire messages into a normalized
//! [`MarketUpdate`].

pub mod auth;
pub mod decode;
pub mod error;
pub mod proto;
pub mod session;

pub use auth::{authorize_feed, Credentials};
pub use decode::{decode_message, FullQuote, LtpcQuote, MarketUpdate, QuoteFeed};
pub use error::FeedError;
pub use session::{DispatchOutcome, FeedHandler, SessionEnd, SessionManager};

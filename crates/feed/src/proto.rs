//! Binary wire schema of the V3 market-data feed.
//!
//! The upstream service streams protobuf-encoded `FeedResponse` messages; the
//! subset the pipeline consumes is declared here directly with prost derives.
//! Unknown fields on the wire are skipped by prost, so the schema only needs
//! the fields the decoder reads.

use std::collections::HashMap;

#[derive(Clone, PartialEq, prost::Message)]
pub struct FeedResponse {
    /// Per-instrument payloads keyed by instrument key.
    #[prost(map = "string, message", tag = "2")]
    pub feeds: HashMap<String, Feed>,
    #[prost(int64, tag = "3")]
    pub current_ts: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Feed {
    #[prost(oneof = "FeedUnion", tags = "1, 2")]
    pub feed_union: Option<FeedUnion>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum FeedUnion {
    /// Lighter payload carrying only last price, previous close, timestamp.
    #[prost(message, tag = "1")]
    Ltpc(Ltpc),
    /// Full quote with OHLC, volume, and greeks.
    #[prost(message, tag = "2")]
    FullFeed(FullFeed),
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FullFeed {
    #[prost(oneof = "FullFeedUnion", tags = "1, 2")]
    pub full_feed_union: Option<FullFeedUnion>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum FullFeedUnion {
    #[prost(message, tag = "1")]
    MarketFf(MarketFullFeed),
    #[prost(message, tag = "2")]
    IndexFf(IndexFullFeed),
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MarketFullFeed {
    #[prost(message, optional, tag = "1")]
    pub ltpc: Option<Ltpc>,
    #[prost(message, optional, tag = "4")]
    pub market_ohlc: Option<MarketOhlc>,
    /// Average traded price.
    #[prost(double, tag = "5")]
    pub atp: f64,
    /// Cumulative traded volume for the day.
    #[prost(double, tag = "6")]
    pub vtt: f64,
    /// Open interest.
    #[prost(double, tag = "7")]
    pub oi: f64,
    /// Implied volatility.
    #[prost(double, tag = "8")]
    pub iv: f64,
    #[prost(message, optional, tag = "9")]
    pub option_greeks: Option<OptionGreeks>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct IndexFullFeed {
    #[prost(message, optional, tag = "1")]
    pub ltpc: Option<Ltpc>,
    #[prost(message, optional, tag = "2")]
    pub market_ohlc: Option<MarketOhlc>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Ltpc {
    /// Last traded price.
    #[prost(double, tag = "1")]
    pub ltp: f64,
    /// Last trade time, epoch milliseconds.
    #[prost(int64, tag = "2")]
    pub ltt: i64,
    /// Last traded quantity.
    #[prost(int64, tag = "3")]
    pub ltq: i64,
    /// Previous session close.
    #[prost(double, tag = "4")]
    pub cp: f64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MarketOhlc {
    #[prost(message, repeated, tag = "1")]
    pub ohlc: Vec<Ohlc>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Ohlc {
    /// Interval label, e.g. "I1" for the running 1-minute bar.
    #[prost(string, tag = "1")]
    pub interval: String,
    #[prost(double, tag = "2")]
    pub open: f64,
    #[prost(double, tag = "3")]
    pub high: f64,
    #[prost(double, tag = "4")]
    pub low: f64,
    #[prost(double, tag = "5")]
    pub close: f64,
    #[prost(int64, tag = "6")]
    pub vol: i64,
    #[prost(int64, tag = "7")]
    pub ts: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct OptionGreeks {
    #[prost(double, tag = "1")]
    pub delta: f64,
    #[prost(double, tag = "2")]
    pub theta: f64,
    #[prost(double, tag = "3")]
    pub gamma: f64,
    #[prost(double, tag = "4")]
    pub vega: f64,
    #[prost(double, tag = "5")]
    pub rho: f64,
}

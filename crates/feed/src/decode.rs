//! Wire message decoding.
//!
//! Each inbound frame is tried against the binary schema first, then JSON as
//! fallback. Both paths normalize into the same [`MarketUpdate`] so the rest
//! of the pipeline never sees the transport encoding. A frame that fails both
//! decoders is dropped with a log line; decoding is never fatal.

use std::collections::HashMap;

use prost::Message as _;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;

use crate::proto;

/// One decoded wire message: per-instrument payloads keyed by instrument key.
#[derive(Debug, Clone)]
pub struct MarketUpdate {
    pub feeds: HashMap<String, QuoteFeed>,
}

/// Per-instrument payload shape.
#[derive(Debug, Clone)]
pub enum QuoteFeed {
    /// Full quote: OHLC volume, atp, cumulative volume, open interest.
    Full(FullQuote),
    /// Last-price/previous-close/timestamp only.
    Ltpc(LtpcQuote),
}

impl QuoteFeed {
    /// The last-price block present in every payload shape.
    #[must_use]
    pub fn ltpc(&self) -> &LtpcQuote {
        match self {
            Self::Full(full) => &full.ltpc,
            Self::Ltpc(ltpc) => ltpc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LtpcQuote {
    pub ltp: f64,
    /// Last trade time, epoch milliseconds.
    pub ltt_ms: i64,
    pub prev_close: f64,
}

#[derive(Debug, Clone)]
pub struct FullQuote {
    pub ltpc: LtpcQuote,
    pub atp: Option<f64>,
    /// Cumulative traded volume for the day.
    pub vtt: Option<f64>,
    /// Volume of the running 1-minute bar as reported by the feed.
    pub minute_volume: Option<i64>,
    pub oi: Option<f64>,
    pub iv: Option<f64>,
}

/// Decodes one WebSocket frame, or None if it carries no usable feed data.
#[must_use]
pub fn decode_message(message: &Message) -> Option<MarketUpdate> {
    match message {
        Message::Binary(data) => decode_binary(data).or_else(|| decode_json(data)),
        Message::Text(text) => decode_json(text.as_bytes()),
        _ => None,
    }
}

fn decode_binary(data: &[u8]) -> Option<MarketUpdate> {
    match proto::FeedResponse::decode(data) {
        Ok(response) => normalize_proto(response),
        Err(e) => {
            tracing::debug!("Binary decode failed: {e}");
            None
        }
    }
}

fn normalize_proto(response: proto::FeedResponse) -> Option<MarketUpdate> {
    let mut feeds = HashMap::new();
    for (key, feed) in response.feeds {
        let Some(union) = feed.feed_union else {
            continue;
        };
        let quote = match union {
            proto::FeedUnion::Ltpc(ltpc) => QuoteFeed::Ltpc(LtpcQuote {
                ltp: ltpc.ltp,
                ltt_ms: ltpc.ltt,
                prev_close: ltpc.cp,
            }),
            proto::FeedUnion::FullFeed(full) => match full.full_feed_union {
                Some(proto::FullFeedUnion::MarketFf(market)) => {
                    let Some(ltpc) = market.ltpc else { continue };
                    let minute_volume = market
                        .market_ohlc
                        .as_ref()
                        .and_then(|ohlc| ohlc.ohlc.iter().find(|bar| bar.interval == "I1"))
                        .map(|bar| bar.vol);
                    QuoteFeed::Full(FullQuote {
                        ltpc: LtpcQuote {
                            ltp: ltpc.ltp,
                            ltt_ms: ltpc.ltt,
                            prev_close: ltpc.cp,
                        },
                        atp: Some(market.atp),
                        vtt: Some(market.vtt),
                        minute_volume,
                        oi: Some(market.oi),
                        iv: Some(market.iv),
                    })
                }
                Some(proto::FullFeedUnion::IndexFf(index)) => {
                    let Some(ltpc) = index.ltpc else { continue };
                    QuoteFeed::Full(FullQuote {
                        ltpc: LtpcQuote {
                            ltp: ltpc.ltp,
                            ltt_ms: ltpc.ltt,
                            prev_close: ltpc.cp,
                        },
                        atp: None,
                        vtt: None,
                        minute_volume: None,
                        oi: None,
                        iv: None,
                    })
                }
                None => continue,
            },
        };
        feeds.insert(key, quote);
    }
    if feeds.is_empty() {
        None
    } else {
        Some(MarketUpdate { feeds })
    }
}

// ---------------------------------------------------------------------------
// JSON fallback. The service occasionally sends plain-text frames with the
// same shape the binary schema would produce; int64 fields may arrive as
// strings there.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FeedResponseJson {
    feeds: Option<HashMap<String, FeedJson>>,
}

#[derive(Debug, Deserialize)]
struct FeedJson {
    ltpc: Option<LtpcJson>,
    #[serde(rename = "fullFeed")]
    full_feed: Option<FullFeedJson>,
}

#[derive(Debug, Deserialize)]
struct FullFeedJson {
    #[serde(rename = "marketFF")]
    market_ff: Option<MarketFeedJson>,
    #[serde(rename = "indexFF")]
    index_ff: Option<IndexFeedJson>,
}

#[derive(Debug, Deserialize)]
struct MarketFeedJson {
    ltpc: Option<LtpcJson>,
    atp: Option<f64>,
    vtt: Option<JsonNumber>,
    oi: Option<f64>,
    iv: Option<f64>,
    #[serde(rename = "marketOHLC")]
    market_ohlc: Option<MarketOhlcJson>,
}

#[derive(Debug, Deserialize)]
struct IndexFeedJson {
    ltpc: Option<LtpcJson>,
}

#[derive(Debug, Deserialize)]
struct MarketOhlcJson {
    ohlc: Option<Vec<OhlcJson>>,
}

#[derive(Debug, Deserialize)]
struct OhlcJson {
    interval: Option<String>,
    vol: Option<JsonNumber>,
}

#[derive(Debug, Deserialize)]
struct LtpcJson {
    ltp: Option<f64>,
    ltt: Option<JsonNumber>,
    cp: Option<f64>,
}

/// int64 fields serialized either as numbers or decimal strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

impl JsonNumber {
    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(value) => Some(*value as i64),
            Self::Text(text) => text.parse().ok(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::Text(text) => text.parse().ok(),
        }
    }
}

fn decode_json(data: &[u8]) -> Option<MarketUpdate> {
    let response: FeedResponseJson = match serde_json::from_slice(data) {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("JSON decode failed: {e}");
            return None;
        }
    };

    let mut feeds = HashMap::new();
    for (key, feed) in response.feeds? {
        if let Some(full) = feed.full_feed {
            if let Some(market) = full.market_ff {
                let Some(ltpc) = market.ltpc.as_ref().and_then(ltpc_from_json) else {
                    continue;
                };
                let minute_volume = market
                    .market_ohlc
                    .as_ref()
                    .and_then(|ohlc| ohlc.ohlc.as_ref())
                    .and_then(|bars| {
                        bars.iter()
                            .find(|bar| bar.interval.as_deref() == Some("I1"))
                    })
                    .and_then(|bar| bar.vol.as_ref().and_then(JsonNumber::as_i64));
                feeds.insert(
                    key,
                    QuoteFeed::Full(FullQuote {
                        ltpc,
                        atp: market.atp,
                        vtt: market.vtt.as_ref().and_then(JsonNumber::as_f64),
                        minute_volume,
                        oi: market.oi,
                        iv: market.iv,
                    }),
                );
            } else if let Some(index) = full.index_ff {
                let Some(ltpc) = index.ltpc.as_ref().and_then(ltpc_from_json) else {
                    continue;
                };
                feeds.insert(
                    key,
                    QuoteFeed::Full(FullQuote {
                        ltpc,
                        atp: None,
                        vtt: None,
                        minute_volume: None,
                        oi: None,
                        iv: None,
                    }),
                );
            }
        } else if let Some(ltpc) = feed.ltpc.as_ref().and_then(ltpc_from_json) {
            feeds.insert(key, QuoteFeed::Ltpc(ltpc));
        }
    }

    if feeds.is_empty() {
        None
    } else {
        Some(MarketUpdate { feeds })
    }
}

fn ltpc_from_json(ltpc: &LtpcJson) -> Option<LtpcQuote> {
    Some(LtpcQuote {
        ltp: ltpc.ltp?,
        ltt_ms: ltpc.ltt.as_ref().and_then(JsonNumber::as_i64)?,
        prev_close: ltpc.cp.unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    fn market_feed(ltp: f64, ltt: i64, vtt: f64, minute_vol: i64) -> proto::Feed {
        proto::Feed {
            feed_union: Some(proto::FeedUnion::FullFeed(proto::FullFeed {
                full_feed_union: Some(proto::FullFeedUnion::MarketFf(proto::MarketFullFeed {
                    ltpc: Some(proto::Ltpc {
                        ltp,
                        ltt,
                        ltq: 10,
                        cp: ltp - 1.0,
                    }),
                    market_ohlc: Some(proto::MarketOhlc {
                        ohlc: vec![proto::Ohlc {
                            interval: "I1".to_string(),
                            open: ltp,
                            high: ltp,
                            low: ltp,
                            close: ltp,
                            vol: minute_vol,
                            ts: ltt,
                        }],
                    }),
                    atp: ltp - 0.5,
                    vtt,
                    oi: 0.0,
                    iv: 0.0,
                    option_greeks: None,
                })),
            })),
        }
    }

    #[test]
    fn test_binary_market_feed_round_trip() {
        let mut feeds = HashMap::new();
        feeds.insert("NSE_FO|53001".to_string(), market_feed(24500.5, 1_700_000_000_000, 5000.0, 80));
        let response = proto::FeedResponse {
            feeds,
            current_ts: 1_700_000_000_000,
        };
        let message = Message::Binary(response.encode_to_vec());

        let update = decode_message(&message).unwrap();
        let quote = update.feeds.get("NSE_FO|53001").unwrap();
        match quote {
            QuoteFeed::Full(full) => {
                assert_eq!(full.ltpc.ltp, 24500.5);
                assert_eq!(full.vtt, Some(5000.0));
                assert_eq!(full.minute_volume, Some(80));
            }
            QuoteFeed::Ltpc(_) => panic!("expected full feed"),
        }
    }

    #[test]
    fn test_binary_index_feed() {
        let mut feeds = HashMap::new();
        feeds.insert(
            "NSE_INDEX|Nifty 50".to_string(),
            proto::Feed {
                feed_union: Some(proto::FeedUnion::FullFeed(proto::FullFeed {
                    full_feed_union: Some(proto::FullFeedUnion::IndexFf(proto::IndexFullFeed {
                        ltpc: Some(proto::Ltpc {
                            ltp: 24510.0,
                            ltt: 1_700_000_000_000,
                            ltq: 0,
                            cp: 24480.0,
                        }),
                        market_ohlc: None,
                    })),
                })),
            },
        );
        let response = proto::FeedResponse {
            feeds,
            current_ts: 0,
        };

        let update = decode_message(&Message::Binary(response.encode_to_vec())).unwrap();
        let quote = update.feeds.get("NSE_INDEX|Nifty 50").unwrap();
        assert_eq!(quote.ltpc().ltp, 24510.0);
        match quote {
            QuoteFeed::Full(full) => assert!(full.vtt.is_none()),
            QuoteFeed::Ltpc(_) => panic!("expected full feed"),
        }
    }

    #[test]
    fn test_json_fallback_with_string_ltt() {
        let text = r#"{
            "feeds": {
                "NSE_FO|40001": {
                    "fullFeed": {
                        "marketFF": {
                            "ltpc": {"ltp": 120.5, "ltt": "1700000000000", "cp": 118.0},
                            "atp": 119.9,
                            "vtt": "1100",
                            "marketOHLC": {"ohlc": [{"interval": "I1", "vol": "50"}]}
                        }
                    }
                }
            }
        }"#;

        let update = decode_message(&Message::Text(text.to_string())).unwrap();
        match update.feeds.get("NSE_FO|40001").unwrap() {
            QuoteFeed::Full(full) => {
                assert_eq!(full.ltpc.ltp, 120.5);
                assert_eq!(full.ltpc.ltt_ms, 1_700_000_000_000);
                assert_eq!(full.vtt, Some(1100.0));
                assert_eq!(full.minute_volume, Some(50));
            }
            QuoteFeed::Ltpc(_) => panic!("expected full feed"),
        }
    }

    #[test]
    fn test_json_ltpc_only_feed() {
        let text = r#"{"feeds": {"NSE_FO|40002": {"ltpc": {"ltp": 98.0, "ltt": 1700000000000, "cp": 97.5}}}}"#;

        let update = decode_message(&Message::Text(text.to_string())).unwrap();
        match update.feeds.get("NSE_FO|40002").unwrap() {
            QuoteFeed::Ltpc(ltpc) => assert_eq!(ltpc.ltp, 98.0),
            QuoteFeed::Full(_) => panic!("expected ltpc feed"),
        }
    }

    #[test]
    fn test_unrecognized_frame_is_dropped() {
        assert!(decode_message(&Message::Binary(vec![0xff, 0xfe, 0x01])).is_none());
        assert!(decode_message(&Message::Text("not json".to_string())).is_none());
        assert!(decode_message(&Message::Text("{}".to_string())).is_none());
    }
}

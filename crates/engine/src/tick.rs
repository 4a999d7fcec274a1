//! Normalized price updates.

use chrono::DateTime;
use chrono_tz::Tz;

use trendflow_core::market::timestamp_ms_to_ist;
use trendflow_core::{InstrumentKind, InstrumentSpec};
use trendflow_feed::QuoteFeed;

/// One normalized price update for a subscribed instrument.
///
/// Ephemeral: consumed by the owning processor (and, for options, the
/// cash-flow accumulator) and never persisted directly.
#[derive(Debug, Clone)]
pub struct Tick {
    pub instrument_key: String,
    pub kind: InstrumentKind,
    /// Trade time converted to IST.
    pub timestamp: DateTime<Tz>,
    /// Last traded price.
    pub ltp: f64,
    /// Average traded price; missing on LTPC-only and index feeds.
    pub atp: Option<f64>,
    /// Cumulative traded volume for the day.
    pub vtt: Option<f64>,
    /// Volume of the running 1-minute bar as reported by the feed.
    pub minute_volume: Option<i64>,
    pub prev_close: Option<f64>,
}

impl Tick {
    /// Extracts a tick from a decoded per-instrument payload.
    ///
    /// Returns None for payloads without a usable price or timestamp; the
    /// affected update is skipped, processing continues for other
    /// instruments.
    #[must_use]
    pub fn from_quote(spec: &InstrumentSpec, quote: &QuoteFeed) -> Option<Self> {
        let ltpc = quote.ltpc();
        let timestamp = timestamp_ms_to_ist(ltpc.ltt_ms)?;
        if ltpc.ltp <= 0.0 {
            tracing::debug!(instrument = %spec.key, "Tick without a positive price, skipped");
            return None;
        }

        let (atp, vtt, minute_volume) = match quote {
            QuoteFeed::Full(full) => (
                full.atp.filter(|value| *value > 0.0),
                full.vtt,
                full.minute_volume,
            ),
            QuoteFeed::Ltpc(_) => (None, None, None),
        };

        Some(Self {
            instrument_key: spec.key.clone(),
            kind: spec.kind,
            timestamp,
            ltp: ltpc.ltp,
            atp,
            vtt,
            minute_volume,
            prev_close: (ltpc.prev_close > 0.0).then_some(ltpc.prev_close),
        })
    }

    /// Average traded price with last-price fallback.
    #[must_use]
    pub fn atp_or_ltp(&self) -> f64 {
        self.atp.unwrap_or(self.ltp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trendflow_feed::{FullQuote, LtpcQuote};

    fn future_spec() -> InstrumentSpec {
        InstrumentSpec::future("NSE_FO|53001")
    }

    #[test]
    fn test_full_quote_extraction() {
        let quote = QuoteFeed::Full(FullQuote {
            ltpc: LtpcQuote {
                ltp: 24500.0,
                ltt_ms: 1_700_000_000_000,
                prev_close: 24480.0,
            },
            atp: Some(24498.5),
            vtt: Some(5000.0),
            minute_volume: Some(80),
            oi: None,
            iv: None,
        });

        let tick = Tick::from_quote(&future_spec(), &quote).unwrap();
        assert_eq!(tick.ltp, 24500.0);
        assert_eq!(tick.atp, Some(24498.5));
        assert_eq!(tick.vtt, Some(5000.0));
        assert_eq!(tick.minute_volume, Some(80));
        assert_eq!(tick.prev_close, Some(24480.0));
    }

    #[test]
    fn test_zero_price_is_skipped() {
        let quote = QuoteFeed::Ltpc(LtpcQuote {
            ltp: 0.0,
            ltt_ms: 1_700_000_000_000,
            prev_close: 100.0,
        });
        assert!(Tick::from_quote(&future_spec(), &quote).is_none());
    }

    #[test]
    fn test_zero_atp_falls_back_to_ltp() {
        let quote = QuoteFeed::Full(FullQuote {
            ltpc: LtpcQuote {
                ltp: 120.0,
                ltt_ms: 1_700_000_000_000,
                prev_close: 0.0,
            },
            atp: Some(0.0),
            vtt: Some(100.0),
            minute_volume: None,
            oi: None,
            iv: None,
        });

        let tick = Tick::from_quote(&future_spec(), &quote).unwrap();
        assert_eq!(tick.atp, None);
        assert_eq!(tick.atp_or_ltp(), 120.0);
        assert_eq!(tick.prev_close, None);
    }
}

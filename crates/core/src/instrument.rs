//! Typed instrument registry.
//!
//! Every subscribed instrument is described by an [`InstrumentSpec`] carrying
//! its feed key, class, and processing capability flags. The full set is held
//! in an [`InstrumentSet`] keyed by instrument key, in basket order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::basket::BasketOption;

/// Class of a subscribed instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentKind {
    Index,
    Future,
    Option,
}

impl InstrumentKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "INDEX",
            Self::Future => "FUTURE",
            Self::Option => "OPTION",
        }
    }
}

/// Call or put leg of an option contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionSide {
    #[serde(rename = "CE")]
    Ce,
    #[serde(rename = "PE")]
    Pe,
}

impl OptionSide {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ce => "CE",
            Self::Pe => "PE",
        }
    }
}

/// Static configuration for one subscribed instrument.
#[derive(Debug, Clone)]
pub struct InstrumentSpec {
    /// Display name, e.g. "NIFTY_INDEX" or "CE_24500".
    pub name: String,
    /// Upstream feed key, e.g. "NSE_INDEX|Nifty 50".
    pub key: String,
    pub kind: InstrumentKind,
    pub option_side: Option<OptionSide>,
    pub strike: Option<f64>,
    /// Whether the feed reports traded volume for this instrument.
    pub has_volume: bool,
    /// Whether per-candle buy/sell volume and signed delta are derived.
    pub track_delta: bool,
    /// Whether Heikin-Ashi candles are computed at finalize.
    pub heikin_ashi: bool,
    /// Whether the SAR trend filter runs on the Heikin-Ashi output.
    pub indicators: bool,
    /// Suffix used when naming the per-day candle tables.
    pub table_suffix: String,
}

impl InstrumentSpec {
    #[must_use]
    pub fn index(key: impl Into<String>) -> Self {
        Self {
            name: "NIFTY_INDEX".to_string(),
            key: key.into(),
            kind: InstrumentKind::Index,
            option_side: None,
            strike: None,
            has_volume: false,
            track_delta: false,
            heikin_ashi: true,
            indicators: true,
            table_suffix: "nifty_index".to_string(),
        }
    }

    #[must_use]
    pub fn future(key: impl Into<String>) -> Self {
        Self {
            name: "NIFTY_FUTURE".to_string(),
            key: key.into(),
            kind: InstrumentKind::Future,
            option_side: None,
            strike: None,
            has_volume: true,
            track_delta: true,
            heikin_ashi: true,
            indicators: true,
            table_suffix: "future".to_string(),
        }
    }

    #[must_use]
    pub fn option(key: impl Into<String>, side: OptionSide, strike: f64) -> Self {
        let strike_label = if strike.fract() == 0.0 {
            format!("{strike:.0}")
        } else {
            // Keep table names identifier-safe for fractional strikes.
            format!("{strike}").replace('.', "_")
        };
        Self {
            name: format!("{}_{strike_label}", side.as_str()),
            key: key.into(),
            kind: InstrumentKind::Option,
            option_side: Some(side),
            strike: Some(strike),
            has_volume: true,
            track_delta: true,
            heikin_ashi: false,
            indicators: false,
            table_suffix: format!("{}_{strike_label}", side.as_str().to_lowercase()),
        }
    }
}

/// Ordered registry of all subscribed instruments, keyed by feed key.
#[derive(Debug, Clone)]
pub struct InstrumentSet {
    specs: IndexMap<String, InstrumentSpec>,
    index_key: String,
    future_key: String,
}

impl InstrumentSet {
    /// Builds the registry: index, future, then the option basket in file order.
    #[must_use]
    pub fn build(index_key: &str, future_key: &str, basket: &[BasketOption]) -> Self {
        let mut specs = IndexMap::new();
        specs.insert(index_key.to_string(), InstrumentSpec::index(index_key));
        specs.insert(future_key.to_string(), InstrumentSpec::future(future_key));
        for option in basket {
            specs.insert(
                option.instrument_key.clone(),
                InstrumentSpec::option(&option.instrument_key, option.option_side, option.strike),
            );
        }
        Self {
            specs,
            index_key: index_key.to_string(),
            future_key: future_key.to_string(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&InstrumentSpec> {
        self.specs.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InstrumentSpec)> {
        self.specs.iter()
    }

    /// All feed keys in registry order, as sent in the subscription message.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.specs.keys().cloned().collect()
    }

    #[must_use]
    pub fn index_key(&self) -> &str {
        &self.index_key
    }

    #[must_use]
    pub fn future_key(&self) -> &str {
        &self.future_key
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_basket() -> Vec<BasketOption> {
        vec![
            BasketOption {
                instrument_key: "NSE_FO|40001".to_string(),
                option_side: OptionSide::Ce,
                strike: 24500.0,
                last_price: 120.5,
            },
            BasketOption {
                instrument_key: "NSE_FO|40002".to_string(),
                option_side: OptionSide::Pe,
                strike: 24550.0,
                last_price: 98.0,
            },
        ]
    }

    #[test]
    fn test_build_registry_order_and_lookup() {
        let set = InstrumentSet::build("NSE_INDEX|Nifty 50", "NSE_FO|53001", &sample_basket());

        assert_eq!(set.len(), 4);
        let keys = set.keys();
        assert_eq!(keys[0], "NSE_INDEX|Nifty 50");
        assert_eq!(keys[1], "NSE_FO|53001");
        assert_eq!(keys[2], "NSE_FO|40001");

        let ce = set.get("NSE_FO|40001").unwrap();
        assert_eq!(ce.kind, InstrumentKind::Option);
        assert_eq!(ce.option_side, Some(OptionSide::Ce));
        assert_eq!(ce.strike, Some(24500.0));
        assert_eq!(ce.table_suffix, "ce_24500");
        assert!(!ce.heikin_ashi);
        assert!(ce.track_delta);
    }

    #[test]
    fn test_index_and_future_flags() {
        let set = InstrumentSet::build("NSE_INDEX|Nifty 50", "NSE_FO|53001", &[]);

        let index = set.get(set.index_key()).unwrap();
        assert!(!index.has_volume);
        assert!(!index.track_delta);
        assert!(index.heikin_ashi);
        assert!(index.indicators);

        let future = set.get(set.future_key()).unwrap();
        assert!(future.has_volume);
        assert!(future.track_delta);
        assert_eq!(future.table_suffix, "future");
    }
}

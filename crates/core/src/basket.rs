//! Option-basket input file.
//!
//! The basket is a CSV listing the dynamically selected option contracts for
//! the trading day. Extra columns are ignored so the file produced by the
//! contract-extraction tooling can be consumed as-is.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::instrument::OptionSide;

/// One selected option contract from the basket file.
#[derive(Debug, Clone, Deserialize)]
pub struct BasketOption {
    pub instrument_key: String,
    #[serde(rename = "option_type")]
    pub option_side: OptionSide,
    pub strike: f64,
    pub last_price: f64,
}

/// Reads the option basket from a CSV file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or a row fails to parse.
pub fn load_basket(path: impl AsRef<Path>) -> Result<Vec<BasketOption>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open basket file {}", path.display()))?;

    let mut options = Vec::new();
    for row in reader.deserialize() {
        let option: BasketOption = row.context("Failed to parse basket row")?;
        options.push(option);
    }

    tracing::info!(count = options.len(), "Loaded option basket");
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_basket_with_extra_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "instrument_key,option_type,strike,last_price,expiry").unwrap();
        writeln!(file, "NSE_FO|40001,CE,24500,120.5,2026-08-06").unwrap();
        writeln!(file, "NSE_FO|40002,PE,24550,98.0,2026-08-06").unwrap();

        let basket = load_basket(file.path()).unwrap();
        assert_eq!(basket.len(), 2);
        assert_eq!(basket[0].option_side, OptionSide::Ce);
        assert_eq!(basket[0].strike, 24500.0);
        assert_eq!(basket[1].option_side, OptionSide::Pe);
        assert_eq!(basket[1].last_price, 98.0);
    }

    #[test]
    fn test_load_basket_missing_file() {
        assert!(load_basket("does/not/exist.csv").is_err());
    }
}

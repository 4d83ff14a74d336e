//! Numeric and symbol conversion helpers used by every exchange normalizer.
//!
//! Prices and quantities are parsed as arbitrary-precision [`Decimal`] and
//! never round-tripped through a binary float (spec §4.1): `"4605.23"` stays
//! exactly `4605.23` all the way to the storage layer's Decimal64(8) column.

use crate::Side;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("invalid decimal format: {0}")]
    InvalidDecimal(String),
    #[error("negative value not allowed: {0}")]
    NegativeValue(String),
    #[error("invalid side format: {0}")]
    InvalidSide(String),
    #[error("empty or null value")]
    EmptyValue,
}

/// Parses a decimal string with no precision loss. Empty strings are an
/// error here; callers treat empty-as-zero only for fields the spec
/// documents as optional (spec §4.1 edge-case policy).
pub fn parse_decimal(value: &str) -> Result<Decimal, ConversionError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConversionError::EmptyValue);
    }
    Decimal::from_str(trimmed).map_err(|_| ConversionError::InvalidDecimal(value.to_string()))
}

/// Like [`parse_decimal`] but treats an empty string as zero, for fields the
/// spec documents as optional.
pub fn parse_decimal_or_zero(value: &str) -> Result<Decimal, ConversionError> {
    if value.trim().is_empty() {
        return Ok(Decimal::ZERO);
    }
    parse_decimal(value)
}

pub fn parse_non_negative_decimal(value: &str) -> Result<Decimal, ConversionError> {
    let decimal = parse_decimal(value)?;
    if decimal.is_sign_negative() {
        return Err(ConversionError::NegativeValue(value.to_string()));
    }
    Ok(decimal)
}

/// Accepts any exchange's buy/sell vocabulary (`buy`/`bid`/`b`,
/// `sell`/`ask`/`s`) and maps it onto the canonical [`Side`].
pub fn parse_side(raw: &str) -> Result<Side, ConversionError> {
    match raw.to_lowercase().as_str() {
        "buy" | "bid" | "b" => Ok(Side::Buy),
        "sell" | "ask" | "s" => Ok(Side::Sell),
        _ => Err(ConversionError::InvalidSide(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_parsing_preserves_precision() {
        assert_eq!(parse_decimal("4605.23").unwrap().to_string(), "4605.23");
        assert_eq!(parse_decimal("0.00000001").unwrap().to_string(), "0.00000001");
        assert_eq!(parse_decimal("1.0").unwrap().to_string(), "1.0");
    }

    #[test]
    fn rejects_empty_and_negative() {
        assert!(parse_decimal("").is_err());
        assert!(parse_decimal("   ").is_err());
        assert!(parse_non_negative_decimal("-100").is_err());
    }

    #[test]
    fn empty_optional_field_is_zero() {
        assert_eq!(parse_decimal_or_zero("").unwrap(), Decimal::ZERO);
    }

    #[test]
    fn side_parsing_covers_exchange_vocabularies() {
        assert_eq!(parse_side("buy").unwrap(), Side::Buy);
        assert_eq!(parse_side("BID").unwrap(), Side::Buy);
        assert_eq!(parse_side("sell").unwrap(), Side::Sell);
        assert_eq!(parse_side("ASK").unwrap(), Side::Sell);
        assert!(parse_side("unknown").is_err());
    }
}

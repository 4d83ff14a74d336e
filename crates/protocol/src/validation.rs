//! Record-level invariant checks (spec §3.3, §8).
//!
//! These are pure checks applied after normalization and before publish;
//! nothing here talks to the network or a store.

use crate::{OrderbookDelta, OrderbookSnapshot, Record, CLOCK_SKEW_TOLERANCE_MS};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("ts_ms {ts_ms} is negative")]
    NegativeTimestamp { ts_ms: i64 },
    #[error("ts_ms {ts_ms} exceeds now ({now_ms}) plus clock-skew tolerance ({tolerance_ms}ms)")]
    TimestampTooFarInFuture { ts_ms: i64, now_ms: i64, tolerance_ms: i64 },
    #[error("orderbook is crossed: best_bid {best_bid} >= best_ask {best_ask}")]
    CrossedBook { best_bid: String, best_ask: String },
    #[error("first_update_id {first} > last_update_id {last}")]
    UpdateIdOutOfOrder { first: u64, last: u64 },
}

/// Invariant 3 (spec §3.3): `0 <= ts_ms <= now + clock_skew_tolerance`.
pub fn validate_timestamp(ts_ms: i64, now_ms: i64) -> Result<(), InvariantViolation> {
    if ts_ms < 0 {
        return Err(InvariantViolation::NegativeTimestamp { ts_ms });
    }
    if ts_ms > now_ms + CLOCK_SKEW_TOLERANCE_MS {
        return Err(InvariantViolation::TimestampTooFarInFuture {
            ts_ms,
            now_ms,
            tolerance_ms: CLOCK_SKEW_TOLERANCE_MS,
        });
    }
    Ok(())
}

/// Invariant 1 (spec §3.3): non-empty sides must not cross.
pub fn validate_snapshot(snapshot: &OrderbookSnapshot) -> Result<(), InvariantViolation> {
    if snapshot.is_crossed() {
        let best_bid = snapshot.best_bid.map(|l| l.price.to_string()).unwrap_or_default();
        let best_ask = snapshot.best_ask.map(|l| l.price.to_string()).unwrap_or_default();
        return Err(InvariantViolation::CrossedBook { best_bid, best_ask });
    }
    Ok(())
}

/// Invariant 2 (spec §3.3): `first_update_id <= last_update_id`.
pub fn validate_delta_shape(delta: &OrderbookDelta) -> Result<(), InvariantViolation> {
    if delta.first_update_id > delta.last_update_id {
        return Err(InvariantViolation::UpdateIdOutOfOrder {
            first: delta.first_update_id,
            last: delta.last_update_id,
        });
    }
    Ok(())
}

/// Runs the checks applicable to a given record against `now_ms`.
pub fn validate_record(record: &Record, now_ms: i64) -> Result<(), InvariantViolation> {
    validate_timestamp(record.envelope().ts_ms, now_ms)?;
    match record {
        Record::OrderbookSnapshot(s) => validate_snapshot(s),
        Record::OrderbookDelta(d) => validate_delta_shape(d),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Envelope, MarketType, OrderbookSnapshot, PriceLevel};
    use rust_decimal_macros::dec;

    #[test]
    fn timestamp_within_tolerance_passes() {
        assert!(validate_timestamp(1_000, 1_000).is_ok());
        assert!(validate_timestamp(1_000 + CLOCK_SKEW_TOLERANCE_MS, 1_000).is_ok());
    }

    #[test]
    fn timestamp_beyond_tolerance_fails() {
        assert!(validate_timestamp(1_000 + CLOCK_SKEW_TOLERANCE_MS + 1, 1_000).is_err());
        assert!(validate_timestamp(-1, 1_000).is_err());
    }

    #[test]
    fn crossed_snapshot_is_rejected() {
        let env = Envelope::new("binance", MarketType::Spot, "BTC-USDT", 0);
        let snap = OrderbookSnapshot::new(
            env,
            1,
            vec![PriceLevel::new(dec!(105), dec!(1))],
            vec![PriceLevel::new(dec!(104), dec!(1))],
            None,
        );
        assert!(validate_snapshot(&snap).is_err());
    }
}

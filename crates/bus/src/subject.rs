//! Literal subject scheme (spec §4.4). Compatibility matters: tokens are
//! lower-cased and hyphen-cased, and the subject strings themselves must not
//! drift from what's written here.

use marketprism_protocol::{DataType, Envelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderbookSubject {
    Full,
    Delta,
    Snapshot,
    PureDelta,
}

impl OrderbookSubject {
    fn as_str(&self) -> &'static str {
        match self {
            OrderbookSubject::Full => "full",
            OrderbookSubject::Delta => "delta",
            OrderbookSubject::Snapshot => "snapshot",
            OrderbookSubject::PureDelta => "pure_delta",
        }
    }
}

pub fn orderbook_subject(variant: OrderbookSubject, envelope: &Envelope) -> String {
    let (exchange, symbol) = envelope.subject_tokens();
    format!("orderbook.{}.{exchange}.{symbol}", variant.as_str())
}

/// Subject for every non-orderbook data type, and a sensible default for
/// orderbook types when the caller doesn't need to pick a specific variant
/// (orderbook emission normally goes through [`orderbook_subject`] instead,
/// since the maintainer chooses full/delta/snapshot/pure_delta explicitly).
pub fn subject_for_type(data_type: DataType, envelope: &Envelope) -> String {
    let (exchange, symbol) = envelope.subject_tokens();
    match data_type {
        DataType::OrderbookSnapshot => orderbook_subject(OrderbookSubject::Snapshot, envelope),
        DataType::OrderbookDelta => orderbook_subject(OrderbookSubject::Delta, envelope),
        DataType::Trade => format!("trade.{exchange}.{symbol}"),
        DataType::FundingRate => format!("funding_rate.{exchange}.{symbol}"),
        DataType::OpenInterest => format!("open_interest.{exchange}.{symbol}"),
        DataType::Liquidation => format!("liquidation.{exchange}.{symbol}"),
        DataType::LsrTopPosition => format!("lsr_top_position.{exchange}.{symbol}"),
        DataType::LsrAllAccount => format!("lsr_all_account.{exchange}.{symbol}"),
        DataType::VolatilityIndex => format!("volatility_index.{exchange}.{symbol}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketprism_protocol::MarketType;

    fn env() -> Envelope {
        Envelope::new("Binance", MarketType::Spot, "BTC-USDT", 0)
    }

    #[test]
    fn subjects_are_lowercase_and_hyphenated() {
        assert_eq!(subject_for_type(DataType::Trade, &env()), "trade.binance.btc-usdt");
        assert_eq!(
            orderbook_subject(OrderbookSubject::Full, &env()),
            "orderbook.full.binance.btc-usdt"
        );
        assert_eq!(
            orderbook_subject(OrderbookSubject::PureDelta, &env()),
            "orderbook.pure_delta.binance.btc-usdt"
        );
    }

    #[test]
    fn every_data_type_has_a_literal_subject_prefix() {
        let prefixes: Vec<_> = DataType::all()
            .into_iter()
            .map(|dt| subject_for_type(dt, &env()))
            .collect();
        assert!(prefixes.iter().all(|s| s.contains('.')));
    }
}

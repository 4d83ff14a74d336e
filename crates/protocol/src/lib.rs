//! Canonical market-data record types shared by every MarketPrism component.
//!
//! A cyclic, exchange-specific payload becomes one of eight flat, tagged
//! [`Record`] variants here; nothing downstream holds a reference back into
//! exchange-specific wire structures.

pub mod backoff;
pub mod conversion;
pub mod error;
pub mod health;
pub mod validation;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Constant written into every persisted row's `data_source` column.
pub const DATA_SOURCE: &str = "marketprism";

/// Clock-skew tolerance used by the `ts_ms` acceptance invariant (spec §3.3, §8).
pub const CLOCK_SKEW_TOLERANCE_MS: i64 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    Spot,
    Perpetual,
    Futures,
    Options,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::Perpetual => "perpetual",
            MarketType::Futures => "futures",
            MarketType::Options => "options",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Fields every canonical record carries (spec §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub exchange: String,
    pub market_type: MarketType,
    pub symbol: String,
    /// Authoritative UTC-millisecond timestamp.
    pub ts_ms: i64,
    pub data_source: String,
}

impl Envelope {
    pub fn new(
        exchange: impl Into<String>,
        market_type: MarketType,
        symbol: impl Into<String>,
        ts_ms: i64,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            market_type,
            symbol: symbol.into(),
            ts_ms,
            data_source: DATA_SOURCE.to_string(),
        }
    }

    /// Lower-cased, hyphen-cased tokens used in bus subjects (spec §4.4).
    pub fn subject_tokens(&self) -> (String, String) {
        (self.exchange.to_lowercase(), self.symbol.to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// A single level update within an [`OrderbookDelta`]; `quantity == 0` removes the level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelChange {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl LevelChange {
    pub fn is_removal(&self) -> bool {
        self.quantity.is_zero()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub envelope: Envelope,
    pub trade_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub side: Side,
    pub is_maker: Option<bool>,
    pub trade_ts_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub envelope: Envelope,
    pub last_update_id: u64,
    /// Sorted descending by price.
    pub bids: Vec<PriceLevel>,
    /// Sorted ascending by price.
    pub asks: Vec<PriceLevel>,
    pub best_bid: Option<PriceLevel>,
    pub best_ask: Option<PriceLevel>,
    pub depth_levels: u32,
    pub checksum: Option<i64>,
}

impl OrderbookSnapshot {
    /// Sorts `bids`/`asks` into canonical order and derives the best-of-book
    /// fields; callers pass unsorted exchange-order levels.
    pub fn new(
        envelope: Envelope,
        last_update_id: u64,
        mut bids: Vec<PriceLevel>,
        mut asks: Vec<PriceLevel>,
        checksum: Option<i64>,
    ) -> Self {
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        let best_bid = bids.first().copied();
        let best_ask = asks.first().copied();
        let depth_levels = (bids.len().max(asks.len())) as u32;
        Self {
            envelope,
            last_update_id,
            bids,
            asks,
            best_bid,
            best_ask,
            depth_levels,
            checksum,
        }
    }

    /// Invariant 1 (spec §3.3): `best_bid_price < best_ask_price` when both sides are non-empty.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid, self.best_ask) {
            (Some(b), Some(a)) => b.price >= a.price,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookDelta {
    pub envelope: Envelope,
    pub first_update_id: u64,
    pub last_update_id: u64,
    pub prev_update_id: Option<u64>,
    pub bid_changes: Vec<LevelChange>,
    pub ask_changes: Vec<LevelChange>,
    /// `false` when the exchange variant carries no native per-message
    /// sequence number (e.g. Coinbase's `level2_batch`, Kraken's `book`): the
    /// synchronizer then assigns its own monotonic id instead of validating
    /// `first_update_id`/`last_update_id` against the prior delta (spec §4.3
    /// step 4 — checksum, not sequence, is the correctness check for those
    /// variants).
    #[serde(default = "default_sequenced")]
    pub sequenced: bool,
    /// Exchange-provided checksum over the book after this delta applies, for
    /// variants that send one per update rather than (or in addition to) per
    /// snapshot.
    #[serde(default)]
    pub checksum: Option<i64>,
}

fn default_sequenced() -> bool {
    true
}

impl OrderbookDelta {
    /// Invariant 2 (spec §3.3): does `self` legally follow `prior` in sequence?
    pub fn bridges(&self, prior: &OrderbookDelta) -> bool {
        match self.prev_update_id {
            Some(prev) => prev == prior.last_update_id,
            None => self.first_update_id == prior.last_update_id + 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRate {
    pub envelope: Envelope,
    pub funding_rate: Decimal,
    pub funding_ts_ms: i64,
    pub next_funding_ts_ms: i64,
    pub mark_price: Option<Decimal>,
    pub index_price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenInterest {
    pub envelope: Envelope,
    pub open_interest: Decimal,
    pub open_interest_value: Decimal,
    pub count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Liquidation {
    pub envelope: Envelope,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub liquidation_ts_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LsrTopPosition {
    pub envelope: Envelope,
    pub long_position_ratio: Decimal,
    pub short_position_ratio: Decimal,
    pub period: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LsrAllAccount {
    pub envelope: Envelope,
    pub long_account_ratio: Decimal,
    pub short_account_ratio: Decimal,
    pub period: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityIndex {
    pub envelope: Envelope,
    pub index_value: Decimal,
    pub underlying_asset: String,
    pub maturity_date: Option<String>,
}

/// One enum per data type, flat payloads, no shared references (spec §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum Record {
    Trade(Trade),
    OrderbookSnapshot(OrderbookSnapshot),
    OrderbookDelta(OrderbookDelta),
    FundingRate(FundingRate),
    OpenInterest(OpenInterest),
    Liquidation(Liquidation),
    LsrTopPosition(LsrTopPosition),
    LsrAllAccount(LsrAllAccount),
    VolatilityIndex(VolatilityIndex),
}

/// Identifies a record's kind independent of any payload, for routing,
/// batching configuration, and table selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Trade,
    OrderbookSnapshot,
    OrderbookDelta,
    FundingRate,
    OpenInterest,
    Liquidation,
    LsrTopPosition,
    LsrAllAccount,
    VolatilityIndex,
}

impl Record {
    pub fn envelope(&self) -> &Envelope {
        match self {
            Record::Trade(r) => &r.envelope,
            Record::OrderbookSnapshot(r) => &r.envelope,
            Record::OrderbookDelta(r) => &r.envelope,
            Record::FundingRate(r) => &r.envelope,
            Record::OpenInterest(r) => &r.envelope,
            Record::Liquidation(r) => &r.envelope,
            Record::LsrTopPosition(r) => &r.envelope,
            Record::LsrAllAccount(r) => &r.envelope,
            Record::VolatilityIndex(r) => &r.envelope,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Record::Trade(_) => DataType::Trade,
            Record::OrderbookSnapshot(_) => DataType::OrderbookSnapshot,
            Record::OrderbookDelta(_) => DataType::OrderbookDelta,
            Record::FundingRate(_) => DataType::FundingRate,
            Record::OpenInterest(_) => DataType::OpenInterest,
            Record::Liquidation(_) => DataType::Liquidation,
            Record::LsrTopPosition(_) => DataType::LsrTopPosition,
            Record::LsrAllAccount(_) => DataType::LsrAllAccount,
            Record::VolatilityIndex(_) => DataType::VolatilityIndex,
        }
    }

    /// Per-type business key used for hot-store dedup and cold-store
    /// anti-existence matching (spec §4.6).
    pub fn dedup_key(&self) -> String {
        let env = self.envelope();
        match self {
            Record::Trade(r) => format!("{}|{}|{}", r.trade_id, env.exchange, env.symbol),
            Record::OrderbookSnapshot(r) => format!(
                "{}|{}|{}|{}",
                env.exchange, env.symbol, env.ts_ms, r.last_update_id
            ),
            Record::OrderbookDelta(r) => format!(
                "{}|{}|{}|{}",
                env.exchange, env.symbol, env.ts_ms, r.last_update_id
            ),
            Record::FundingRate(r) => {
                format!("{}|{}|{}", env.exchange, env.symbol, r.funding_ts_ms)
            }
            Record::OpenInterest(_) => format!("{}|{}|{}", env.exchange, env.symbol, env.ts_ms),
            Record::Liquidation(r) => format!(
                "{}|{}|{}|{}|{}",
                env.exchange,
                env.symbol,
                env.ts_ms,
                r.side.as_str(),
                r.price
            ),
            Record::LsrTopPosition(r) => {
                format!("{}|{}|{}|{}", env.exchange, env.symbol, r.period, env.ts_ms)
            }
            Record::LsrAllAccount(r) => {
                format!("{}|{}|{}|{}", env.exchange, env.symbol, r.period, env.ts_ms)
            }
            Record::VolatilityIndex(_) => format!("{}|{}|{}", env.exchange, env.symbol, env.ts_ms),
        }
    }
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Trade => "trade",
            DataType::OrderbookSnapshot => "orderbook_snapshot",
            DataType::OrderbookDelta => "orderbook_delta",
            DataType::FundingRate => "funding_rate",
            DataType::OpenInterest => "open_interest",
            DataType::Liquidation => "liquidation",
            DataType::LsrTopPosition => "lsr_top_position",
            DataType::LsrAllAccount => "lsr_all_account",
            DataType::VolatilityIndex => "volatility_index",
        }
    }

    pub fn all() -> [DataType; 9] {
        [
            DataType::Trade,
            DataType::OrderbookSnapshot,
            DataType::OrderbookDelta,
            DataType::FundingRate,
            DataType::OpenInterest,
            DataType::Liquidation,
            DataType::LsrTopPosition,
            DataType::LsrAllAccount,
            DataType::VolatilityIndex,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn env() -> Envelope {
        Envelope::new("binance", MarketType::Spot, "BTC-USDT", 1_720_000_000_123)
    }

    #[test]
    fn snapshot_sorts_and_derives_best_of_book() {
        let bids = vec![
            PriceLevel::new(dec!(100.0), dec!(1)),
            PriceLevel::new(dec!(101.0), dec!(1)),
        ];
        let asks = vec![
            PriceLevel::new(dec!(103.0), dec!(1)),
            PriceLevel::new(dec!(102.0), dec!(1)),
        ];
        let snap = OrderbookSnapshot::new(env(), 10, bids, asks, None);
        assert_eq!(snap.bids[0].price, dec!(101.0));
        assert_eq!(snap.asks[0].price, dec!(102.0));
        assert_eq!(snap.best_bid.unwrap().price, dec!(101.0));
        assert_eq!(snap.best_ask.unwrap().price, dec!(102.0));
        assert!(!snap.is_crossed());
    }

    #[test]
    fn crossed_book_is_detected() {
        let bids = vec![PriceLevel::new(dec!(105.0), dec!(1))];
        let asks = vec![PriceLevel::new(dec!(104.0), dec!(1))];
        let snap = OrderbookSnapshot::new(env(), 1, bids, asks, None);
        assert!(snap.is_crossed());
    }

    #[test]
    fn delta_bridging_by_update_id() {
        let d1 = OrderbookDelta {
            envelope: env(),
            first_update_id: 1,
            last_update_id: 10,
            prev_update_id: None,
            bid_changes: vec![],
            ask_changes: vec![],
            sequenced: true,
            checksum: None,
        };
        let d2_ok = OrderbookDelta {
            first_update_id: 11,
            last_update_id: 20,
            ..d1.clone()
        };
        let d2_gap = OrderbookDelta {
            first_update_id: 15,
            last_update_id: 20,
            ..d1.clone()
        };
        assert!(d2_ok.bridges(&d1));
        assert!(!d2_gap.bridges(&d1));
    }

    #[test]
    fn dedup_key_stable_for_same_trade() {
        let t = Trade {
            envelope: env(),
            trade_id: "42".into(),
            price: dec!(30000.1),
            quantity: dec!(0.5),
            side: Side::Buy,
            is_maker: Some(false),
            trade_ts_ms: 1_720_000_000_123,
        };
        let r1 = Record::Trade(t.clone());
        let r2 = Record::Trade(t);
        assert_eq!(r1.dedup_key(), r2.dedup_key());
    }
}

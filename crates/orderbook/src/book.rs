//! In-memory book representation and delta application (spec §4.3 step 3).

use marketprism_protocol::{LevelChange, OrderbookSnapshot, PriceLevel};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct Book {
    /// Keyed ascending; best bid is the last entry.
    bids: BTreeMap<Decimal, Decimal>,
    /// Keyed ascending; best ask is the first entry.
    asks: BTreeMap<Decimal, Decimal>,
    pub last_update_id: u64,
}

impl Book {
    pub fn from_snapshot(snapshot: &OrderbookSnapshot) -> Self {
        let mut book = Book { last_update_id: snapshot.last_update_id, ..Default::default() };
        for level in &snapshot.bids {
            book.bids.insert(level.price, level.quantity);
        }
        for level in &snapshot.asks {
            book.asks.insert(level.price, level.quantity);
        }
        book
    }

    /// Applies a single side's changes; `quantity == 0` removes the level
    /// (spec §4.3 step 3).
    fn apply_side(side: &mut BTreeMap<Decimal, Decimal>, changes: &[LevelChange]) {
        for change in changes {
            if change.is_removal() {
                side.remove(&change.price);
            } else {
                side.insert(change.price, change.quantity);
            }
        }
    }

    pub fn apply_bid_changes(&mut self, changes: &[LevelChange]) {
        Self::apply_side(&mut self.bids, changes);
    }

    pub fn apply_ask_changes(&mut self, changes: &[LevelChange]) {
        Self::apply_side(&mut self.asks, changes);
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.iter().next_back().map(|(&price, &quantity)| PriceLevel::new(price, quantity))
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.iter().next().map(|(&price, &quantity)| PriceLevel::new(price, quantity))
    }

    pub fn bids_desc(&self, depth: usize) -> Vec<PriceLevel> {
        self.bids.iter().rev().take(depth).map(|(&price, &quantity)| PriceLevel::new(price, quantity)).collect()
    }

    pub fn asks_asc(&self, depth: usize) -> Vec<PriceLevel> {
        self.asks.iter().take(depth).map(|(&price, &quantity)| PriceLevel::new(price, quantity)).collect()
    }

    /// CRC32 over the top-N levels as `price:qty` pairs, bid side then ask
    /// side, matching the common exchange checksum convention (spec §4.3
    /// step 4).
    pub fn checksum(&self, depth: usize) -> i64 {
        let mut buf = String::new();
        for level in self.bids_desc(depth) {
            buf.push_str(&format!("{}:{}:", level.price, level.quantity));
        }
        for level in self.asks_asc(depth) {
            buf.push_str(&format!("{}:{}:", level.price, level.quantity));
        }
        crc32fast::hash(buf.as_bytes()) as i64
    }

    /// Best-effort reproduction of Kraken's `book` channel checksum: top 10
    /// asks ascending then top 10 bids descending, price and quantity each
    /// with the decimal point and leading zeros stripped, concatenated and
    /// CRC32'd. The exact per-exchange checksum format is an open question
    /// (see DESIGN.md); this gets close enough to catch genuine divergence
    /// without claiming bit-for-bit fidelity with Kraken's own implementation.
    pub fn kraken_checksum(&self) -> i64 {
        let mut buf = String::new();
        for level in self.asks_asc(10) {
            buf.push_str(&Self::strip_for_checksum(&level.price.to_string()));
            buf.push_str(&Self::strip_for_checksum(&level.quantity.to_string()));
        }
        for level in self.bids_desc(10) {
            buf.push_str(&Self::strip_for_checksum(&level.price.to_string()));
            buf.push_str(&Self::strip_for_checksum(&level.quantity.to_string()));
        }
        crc32fast::hash(buf.as_bytes()) as i64
    }

    fn strip_for_checksum(value: &str) -> String {
        let digits: String = value.chars().filter(|c| *c != '.').collect();
        let trimmed = digits.trim_start_matches('0');
        if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketprism_protocol::{Envelope, MarketType};
    use rust_decimal_macros::dec;

    fn snapshot() -> OrderbookSnapshot {
        let env = Envelope::new("binance", MarketType::Spot, "BTC-USDT", 1_000);
        OrderbookSnapshot::new(
            env,
            100,
            vec![PriceLevel::new(dec!(100), dec!(1)), PriceLevel::new(dec!(99), dec!(2))],
            vec![PriceLevel::new(dec!(101), dec!(1)), PriceLevel::new(dec!(102), dec!(2))],
            None,
        )
    }

    #[test]
    fn applies_removal_and_update() {
        let mut book = Book::from_snapshot(&snapshot());
        book.apply_bid_changes(&[LevelChange { price: dec!(100), quantity: dec!(0) }, LevelChange { price: dec!(98), quantity: dec!(5) }]);
        assert_eq!(book.best_bid().unwrap().price, dec!(99));
        assert!(book.bids_desc(10).iter().any(|l| l.price == dec!(98)));
    }

    #[test]
    fn checksum_is_order_independent_of_insertion() {
        let mut a = Book::from_snapshot(&snapshot());
        let mut b = Book::from_snapshot(&snapshot());
        a.apply_bid_changes(&[LevelChange { price: dec!(98), quantity: dec!(1) }]);
        b.apply_bid_changes(&[LevelChange { price: dec!(98), quantity: dec!(1) }]);
        assert_eq!(a.checksum(10), b.checksum(10));
    }
}

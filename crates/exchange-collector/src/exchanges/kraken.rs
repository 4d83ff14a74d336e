//! Kraken adapter: array-framed `trade` and `book` channel messages over the
//! public WebSocket feed, with Kraken's `XBT` ticker normalized to `BTC`.

use crate::session::ExchangeAdapter;
use anyhow::Result;
use chrono::Utc;
use marketprism_protocol::conversion::{parse_decimal, parse_non_negative_decimal, parse_side};
use marketprism_protocol::{Envelope, LevelChange, MarketType, OrderbookDelta, Record, Side, Trade};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

const WS_URL: &str = "wss://ws.kraken.com";

#[derive(Debug, Serialize)]
struct Subscribe {
    event: &'static str,
    pair: Vec<String>,
    subscription: Subscription,
}

#[derive(Debug, Serialize)]
struct Subscription {
    name: &'static str,
}

pub struct KrakenAdapter {
    pairs: Vec<String>,
}

impl KrakenAdapter {
    pub fn new(pairs: Vec<String>) -> Self {
        Self { pairs }
    }

    /// `XBT/USD` -> `BTC-USDT`-style canonical symbol.
    fn canonical_symbol(pair: &str) -> String {
        pair.replace("XBT", "BTC").replace('/', "-")
    }
}

impl ExchangeAdapter for KrakenAdapter {
    fn exchange(&self) -> &'static str {
        "kraken"
    }

    fn ws_url(&self) -> &str {
        WS_URL
    }

    fn subscribe_messages(&self) -> Vec<Message> {
        ["trade", "book"]
            .iter()
            .map(|name| {
                let msg = Subscribe {
                    event: "subscribe",
                    pair: self.pairs.clone(),
                    subscription: Subscription { name },
                };
                Message::Text(serde_json::to_string(&msg).unwrap_or_default())
            })
            .collect()
    }

    fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(60)
    }

    fn is_fatal(&self, text: &str) -> bool {
        text.contains("\"status\":\"error\"") && text.contains("subscriptionStatus")
    }

    fn is_subscribe_ack(&self, text: &str) -> bool {
        text.contains("\"subscriptionStatus\":\"subscribed\"")
    }

    fn parse_frame(&self, text: &str) -> Result<Vec<Record>> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Array(arr) = value else { return Ok(vec![]) };
        if arr.len() < 4 {
            return Ok(vec![]);
        }
        // Kraken frames: [channelID, ...data, channelName, pair].
        let pair = arr.last().and_then(Value::as_str).unwrap_or("");
        let channel_name = arr[arr.len() - 2].as_str().unwrap_or("");

        if channel_name.starts_with("trade") {
            Ok(parse_trades(&arr, pair))
        } else if channel_name.starts_with("book") {
            Ok(parse_book(&arr, pair).into_iter().collect())
        } else {
            Ok(vec![])
        }
    }
}

fn parse_trades(arr: &[Value], pair: &str) -> Vec<Record> {
    let Some(Value::Array(trades)) = arr.get(1) else { return vec![] };
    let symbol = KrakenAdapter::canonical_symbol(pair);

    trades
        .iter()
        .filter_map(|t| {
            let fields = t.as_array()?;
            if fields.len() < 4 {
                return None;
            }
            let price = parse_decimal(fields[0].as_str()?).ok()?;
            let quantity = parse_non_negative_decimal(fields[1].as_str()?).ok()?;
            let trade_ts_ms = (fields[2].as_f64()? * 1000.0) as i64;
            let side = parse_side(fields[3].as_str()?).ok()?;
            let envelope = Envelope::new("kraken", MarketType::Spot, symbol.clone(), Utc::now().timestamp_millis());
            Some(Record::Trade(Trade {
                envelope,
                trade_id: format!("{trade_ts_ms}-{price}-{quantity}"),
                price,
                quantity,
                side,
                is_maker: None,
                trade_ts_ms,
            }))
        })
        .collect()
}

fn parse_book(arr: &[Value], pair: &str) -> Option<Record> {
    let book_data = arr.get(1)?.as_object()?;
    let symbol = KrakenAdapter::canonical_symbol(pair);

    let mut bid_changes = Vec::new();
    let mut ask_changes = Vec::new();
    if let Some(Value::Array(bids)) = book_data.get("b").or_else(|| book_data.get("bs")) {
        bid_changes.extend(bids.iter().filter_map(level_change));
    }
    if let Some(Value::Array(asks)) = book_data.get("a").or_else(|| book_data.get("as")) {
        ask_changes.extend(asks.iter().filter_map(level_change));
    }
    if bid_changes.is_empty() && ask_changes.is_empty() {
        return None;
    }

    // Kraken's book channel carries no per-message sequence number, but each
    // update does carry a checksum over the top-of-book (`c`); that's the
    // real correctness check for this exchange (spec §4.3 step 4).
    let checksum = book_data.get("c").and_then(Value::as_str).and_then(|s| s.parse::<i64>().ok());

    let now_ms = Utc::now().timestamp_millis();
    let envelope = Envelope::new("kraken", MarketType::Spot, symbol, now_ms);
    Some(Record::OrderbookDelta(OrderbookDelta {
        envelope,
        first_update_id: 0,
        last_update_id: 0,
        prev_update_id: None,
        sequenced: false,
        checksum,
        bid_changes,
        ask_changes,
    }))
}

fn level_change(level: &Value) -> Option<LevelChange> {
    let fields = level.as_array()?;
    if fields.len() < 2 {
        return None;
    }
    let price = parse_decimal(fields[0].as_str()?).ok()?;
    let quantity = parse_decimal(fields[1].as_str()?).ok()?;
    Some(LevelChange { price, quantity })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_xbt_pair() {
        assert_eq!(KrakenAdapter::canonical_symbol("XBT/USD"), "BTC-USD");
        assert_eq!(KrakenAdapter::canonical_symbol("ETH/USD"), "ETH-USD");
    }

    #[test]
    fn parses_trade_array() {
        let raw = r#"[0,[["50000.0","0.01","1700000000.0","b","m",""]],"trade","XBT/USD"]"#;
        let value: Value = serde_json::from_str(raw).unwrap();
        let Value::Array(arr) = value else { panic!() };
        let records = parse_trades(&arr, "XBT/USD");
        assert_eq!(records.len(), 1);
        match &records[0] {
            Record::Trade(t) => {
                assert_eq!(t.envelope.symbol, "BTC-USD");
                assert_eq!(t.side, Side::Buy);
            }
            _ => panic!("expected trade"),
        }
    }
}

//! Stream topology (spec §4.5). These are contractual: subjects, retention
//! goal, and max age are part of the interface other components depend on,
//! not an implementation detail free to drift.

use async_nats::jetstream::stream::{Config as NatsStreamConfig, DiscardPolicy, RetentionPolicy};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub name: &'static str,
    pub subjects: &'static [&'static str],
    pub max_age: Duration,
    pub max_bytes: i64,
    /// Informational: the number of durable consumers this stream is sized
    /// for, not a count this binding creates itself.
    pub consumer_budget: usize,
}

impl StreamSpec {
    pub fn to_nats_config(&self) -> NatsStreamConfig {
        NatsStreamConfig {
            name: self.name.to_string(),
            subjects: self.subjects.iter().map(|s| s.to_string()).collect(),
            retention: RetentionPolicy::Limits,
            max_age: self.max_age,
            max_bytes: self.max_bytes,
            discard: DiscardPolicy::Old,
            ..Default::default()
        }
    }
}

const GB: i64 = 1024 * 1024 * 1024;
const MB: i64 = 1024 * 1024;

pub const ORDERBOOK_FULL: StreamSpec = StreamSpec {
    name: "ORDERBOOK_FULL",
    subjects: &["orderbook.full.*.*", "orderbook.snapshot.*.*"],
    max_age: Duration::from_secs(24 * 3600),
    max_bytes: GB,
    consumer_budget: 10,
};

pub const ORDERBOOK_DELTA: StreamSpec = StreamSpec {
    name: "ORDERBOOK_DELTA",
    subjects: &["orderbook.delta.*.*", "orderbook.pure_delta.*.*"],
    max_age: Duration::from_secs(3600),
    max_bytes: 2 * GB,
    consumer_budget: 20,
};

pub const MARKET_TRADES: StreamSpec = StreamSpec {
    name: "MARKET_TRADES",
    subjects: &["trade.*.*"],
    max_age: Duration::from_secs(24 * 3600),
    max_bytes: GB,
    consumer_budget: 15,
};

pub const MARKET_DATA: StreamSpec = StreamSpec {
    name: "MARKET_DATA",
    subjects: &[
        "funding_rate.*.*",
        "open_interest.*.*",
        "liquidation.*.*",
        "lsr_top_position.*.*",
        "lsr_all_account.*.*",
        "volatility_index.*.*",
    ],
    max_age: Duration::from_secs(24 * 3600),
    max_bytes: 512 * MB,
    consumer_budget: 10,
};

pub const ALL_STREAMS: [StreamSpec; 4] =
    [ORDERBOOK_FULL, ORDERBOOK_DELTA, MARKET_TRADES, MARKET_DATA];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_stream_has_non_empty_subjects() {
        for spec in ALL_STREAMS {
            assert!(!spec.subjects.is_empty(), "{} has no subjects", spec.name);
        }
    }

    #[test]
    fn retention_goals_match_spec_table() {
        assert_eq!(ORDERBOOK_FULL.max_age, Duration::from_secs(24 * 3600));
        assert_eq!(ORDERBOOK_DELTA.max_age, Duration::from_secs(3600));
        assert_eq!(MARKET_TRADES.max_bytes, GB);
        assert_eq!(MARKET_DATA.max_bytes, 512 * MB);
    }
}

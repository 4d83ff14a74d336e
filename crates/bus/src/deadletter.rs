//! Bounded deadletter buffer for publish failures (spec §4.4): after N
//! retries the record is pushed here and a `PublishFailed` alert condition is
//! raised, instead of being retried forever or silently dropped.

use marketprism_protocol::Record;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::SystemTime;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub subject: String,
    pub record: Record,
    pub attempts: u32,
    pub failed_at_ms: i64,
}

/// Bounded ring buffer; pushing past capacity evicts the oldest entry. This
/// mirrors the teacher's queue-depth circuit breaker in shape (bounded,
/// drop-oldest-on-overflow) but carries typed records, not raw bytes.
pub struct DeadLetterBuffer {
    capacity: usize,
    entries: Mutex<VecDeque<DeadLetter>>,
}

impl DeadLetterBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, subject: String, record: Record, attempts: u32) {
        let now_ms = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
            metrics::counter!("publisher.deadletter_evicted").increment(1);
        }
        warn!(
            fingerprint = "publisher.deadletter",
            subject = %subject,
            attempts,
            "record pushed to deadletter buffer after exhausting publish retries"
        );
        metrics::counter!("publisher.deadletter_pushed").increment(1);
        entries.push_back(DeadLetter { subject, record, attempts, failed_at_ms: now_ms });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains up to `max` entries, oldest first.
    pub fn drain(&self, max: usize) -> Vec<DeadLetter> {
        let mut entries = self.entries.lock();
        let take = max.min(entries.len());
        entries.drain(..take).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketprism_protocol::{Envelope, MarketType, Trade, Side};
    use rust_decimal_macros::dec;

    fn sample_record() -> Record {
        Record::Trade(Trade {
            envelope: Envelope::new("binance", MarketType::Spot, "BTC-USDT", 0),
            trade_id: "1".into(),
            price: dec!(1),
            quantity: dec!(1),
            side: Side::Buy,
            is_maker: None,
            trade_ts_ms: 0,
        })
    }

    #[test]
    fn overflow_evicts_oldest() {
        let buf = DeadLetterBuffer::new(2);
        buf.push("trade.a".into(), sample_record(), 3);
        buf.push("trade.b".into(), sample_record(), 3);
        buf.push("trade.c".into(), sample_record(), 3);
        assert_eq!(buf.len(), 2);
        let drained = buf.drain(10);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].subject, "trade.b");
        assert_eq!(drained[1].subject, "trade.c");
    }
}

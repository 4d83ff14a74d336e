//! Per-type batch triggers (spec §4.6): one in-memory batch per data type,
//! flushed on size OR time, grounded on the teacher's `DataWriter`
//! `should_flush_batch`/`flush_batches` shape but generalized from two hand
//! rolled batches to one per canonical data type.

use marketprism_protocol::{DataType, Record};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct BatchPolicy {
    pub max_size: usize,
    pub max_delay: Duration,
    pub queue_cap: usize,
}

pub fn policy_for(data_type: DataType) -> BatchPolicy {
    match data_type {
        DataType::OrderbookSnapshot | DataType::OrderbookDelta => {
            BatchPolicy { max_size: 100, max_delay: Duration::from_secs(10), queue_cap: 1000 }
        }
        DataType::Trade => BatchPolicy { max_size: 100, max_delay: Duration::from_secs(10), queue_cap: 1000 },
        DataType::FundingRate => BatchPolicy { max_size: 10, max_delay: Duration::from_secs(2), queue_cap: 500 },
        DataType::OpenInterest => BatchPolicy { max_size: 50, max_delay: Duration::from_secs(10), queue_cap: 500 },
        DataType::Liquidation => BatchPolicy { max_size: 5, max_delay: Duration::from_secs(10), queue_cap: 200 },
        DataType::LsrTopPosition | DataType::LsrAllAccount => {
            BatchPolicy { max_size: 1, max_delay: Duration::from_secs(1), queue_cap: 50 }
        }
        DataType::VolatilityIndex => BatchPolicy { max_size: 1, max_delay: Duration::from_secs(1), queue_cap: 50 },
    }
}

/// One pending batch for a single data type, along with the bus messages
/// that must be acked once the batch lands durably.
pub struct PendingBatch {
    pub policy: BatchPolicy,
    pub records: Vec<Record>,
    pub acks: Vec<async_nats::jetstream::Message>,
    last_flush: Instant,
}

impl PendingBatch {
    pub fn new(data_type: DataType) -> Self {
        Self { policy: policy_for(data_type), records: Vec::new(), acks: Vec::new(), last_flush: Instant::now() }
    }

    pub fn push(&mut self, record: Record, ack: async_nats::jetstream::Message) {
        if self.records.len() >= self.policy.queue_cap {
            self.records.remove(0);
            self.acks.remove(0);
        }
        self.records.push(record);
        self.acks.push(ack);
    }

    pub fn should_flush(&self) -> bool {
        !self.records.is_empty() && (self.records.len() >= self.policy.max_size || self.last_flush.elapsed() >= self.policy.max_delay)
    }

    pub fn take(&mut self) -> (Vec<Record>, Vec<async_nats::jetstream::Message>) {
        self.last_flush = Instant::now();
        (std::mem::take(&mut self.records), std::mem::take(&mut self.acks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_policy_matches_table() {
        let p = policy_for(DataType::Trade);
        assert_eq!(p.max_size, 100);
        assert_eq!(p.max_delay, Duration::from_secs(10));
        assert_eq!(p.queue_cap, 1000);
    }

    #[test]
    fn lsr_policy_is_near_realtime() {
        let p = policy_for(DataType::LsrTopPosition);
        assert_eq!(p.max_size, 1);
        assert_eq!(p.max_delay, Duration::from_secs(1));
    }
}

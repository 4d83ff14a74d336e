//! Per-(exchange,symbol) synchronizer state machine (spec §4.3): buffer
//! deltas while fetching a REST snapshot, align the buffer against the
//! snapshot, then apply in order with checksum validation and resync on
//! divergence.

use crate::book::Book;
use marketprism_protocol::backoff::{BackoffConfig, ExponentialBackoff};
use marketprism_protocol::{Envelope, OrderbookDelta, OrderbookSnapshot};
use std::collections::VecDeque;
use thiserror::Error;

/// Checksum/depth cap applied when buffering deltas before a snapshot lands
/// (spec §4.3 error class `OverflowBuffer`).
const MAX_BUFFERED_DELTAS: usize = 5_000;
const CHECKSUM_DEPTH: usize = 25;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum SyncError {
    #[error("sequence gap: expected delta to bridge last_update_id")]
    SequenceGap,
    #[error("checksum mismatch against exchange-provided value")]
    ChecksumMismatch,
    #[error("snapshot fetch timed out")]
    SnapshotTimeout,
    #[error("delta buffer overflowed before snapshot arrived")]
    OverflowBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Buffering,
    Synced,
    Resync,
}

/// What the caller should do after feeding the synchronizer an event.
#[derive(Debug)]
pub enum SyncAction {
    /// No emission yet; still buffering or waiting on a fetch.
    NoOp,
    /// A REST snapshot fetch should be (re)started.
    FetchSnapshot,
    EmitFullRefresh(OrderbookSnapshot),
    EmitDelta(OrderbookDelta),
}

pub struct KeySynchronizer {
    state: SyncState,
    book: Option<Book>,
    buffer: VecDeque<OrderbookDelta>,
    backoff: ExponentialBackoff,
}

impl KeySynchronizer {
    pub fn new() -> Self {
        Self { state: SyncState::Buffering, book: None, buffer: VecDeque::new(), backoff: ExponentialBackoff::new(BackoffConfig::exchange_client()) }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn resync_delay(&mut self) -> std::time::Duration {
        self.backoff.next_delay()
    }

    /// Feeds one raw delta from the bus. While buffering, it queues; once
    /// synced, it validates the sequence bridge and applies in place.
    pub fn on_delta(&mut self, delta: OrderbookDelta) -> Result<SyncAction, SyncError> {
        match self.state {
            SyncState::Buffering | SyncState::Resync => {
                if self.buffer.len() >= MAX_BUFFERED_DELTAS {
                    self.buffer.clear();
                    self.state = SyncState::Resync;
                    return Err(SyncError::OverflowBuffer);
                }
                self.buffer.push_back(delta);
                Ok(SyncAction::NoOp)
            }
            SyncState::Synced if delta.sequenced => {
                let book = self.book.as_mut().expect("synced state always has a book");
                let bridges = match delta.prev_update_id {
                    Some(prev) => prev == book.last_update_id,
                    None => delta.first_update_id == book.last_update_id + 1,
                };
                if !bridges {
                    self.state = SyncState::Resync;
                    self.buffer.clear();
                    return Err(SyncError::SequenceGap);
                }
                book.apply_bid_changes(&delta.bid_changes);
                book.apply_ask_changes(&delta.ask_changes);
                book.last_update_id = delta.last_update_id;
                Ok(SyncAction::EmitDelta(delta))
            }
            // No native sequence number to bridge against (spec §4.3 step 4):
            // apply in arrival order, assign our own monotonic id, and fall
            // back to the exchange-provided checksum when there is one.
            SyncState::Synced => {
                let book = self.book.as_mut().expect("synced state always has a book");
                let mut candidate = book.clone();
                candidate.apply_bid_changes(&delta.bid_changes);
                candidate.apply_ask_changes(&delta.ask_changes);

                if let Some(expected) = delta.checksum {
                    if candidate.kraken_checksum() != expected {
                        self.state = SyncState::Resync;
                        self.buffer.clear();
                        return Err(SyncError::ChecksumMismatch);
                    }
                }

                candidate.last_update_id = book.last_update_id + 1;
                *book = candidate;
                let mut emitted = delta;
                emitted.first_update_id = book.last_update_id;
                emitted.last_update_id = book.last_update_id;
                Ok(SyncAction::EmitDelta(emitted))
            }
        }
    }

    /// Aligns a freshly fetched REST snapshot against the buffered deltas
    /// (spec §4.3 step 2) and, on success, builds the synced book.
    pub fn on_snapshot(&mut self, snapshot: OrderbookSnapshot) -> Result<SyncAction, SyncError> {
        // An unsequenced adapter never assigns a meaningful update id, so
        // there is nothing to compare the buffer against: every buffered
        // delta arrived after we subscribed, and is trusted in arrival order
        // (spec §4.3 step 4 — checksum, not sequence, is the real check here).
        let unsequenced = self.buffer.front().map(|d| !d.sequenced).unwrap_or(false);

        let mut book = Book::from_snapshot(&snapshot);
        let mut had_pending = false;

        if unsequenced {
            let pending: Vec<OrderbookDelta> = self.buffer.drain(..).collect();
            had_pending = !pending.is_empty();
            for delta in &pending {
                book.apply_bid_changes(&delta.bid_changes);
                book.apply_ask_changes(&delta.ask_changes);
                book.last_update_id += 1;
            }
        } else {
            self.buffer.retain(|d| d.last_update_id > snapshot.last_update_id);

            if let Some(first) = self.buffer.front() {
                let bridges_snapshot = first.first_update_id <= snapshot.last_update_id + 1 && snapshot.last_update_id + 1 <= first.last_update_id;
                if !bridges_snapshot {
                    self.state = SyncState::Resync;
                    self.buffer.clear();
                    return Err(SyncError::SequenceGap);
                }
            }

            let pending: Vec<OrderbookDelta> = self.buffer.drain(..).collect();
            had_pending = !pending.is_empty();
            for delta in &pending {
                book.apply_bid_changes(&delta.bid_changes);
                book.apply_ask_changes(&delta.ask_changes);
                book.last_update_id = delta.last_update_id;
            }
        }

        if let Some(checksum) = snapshot.checksum {
            if checksum != book.checksum(CHECKSUM_DEPTH) && !had_pending {
                self.state = SyncState::Resync;
                return Err(SyncError::ChecksumMismatch);
            }
        }

        self.backoff.reset();
        self.state = SyncState::Synced;
        self.book = Some(book);
        Ok(SyncAction::EmitFullRefresh(snapshot))
    }

    pub fn current_snapshot(&self, envelope: Envelope, checksum: Option<i64>) -> Option<OrderbookSnapshot> {
        let book = self.book.as_ref()?;
        Some(OrderbookSnapshot::new(envelope, book.last_update_id, book.bids_desc(usize::MAX), book.asks_asc(usize::MAX), checksum))
    }
}

impl Default for KeySynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketprism_protocol::{LevelChange, MarketType, PriceLevel};
    use rust_decimal_macros::dec;

    fn env() -> Envelope {
        Envelope::new("binance", MarketType::Spot, "BTC-USDT", 1_000)
    }

    fn snapshot(last_update_id: u64) -> OrderbookSnapshot {
        OrderbookSnapshot::new(env(), last_update_id, vec![PriceLevel::new(dec!(100), dec!(1))], vec![PriceLevel::new(dec!(101), dec!(1))], None)
    }

    fn delta(first: u64, last: u64) -> OrderbookDelta {
        OrderbookDelta {
            envelope: env(),
            first_update_id: first,
            last_update_id: last,
            prev_update_id: None,
            bid_changes: vec![],
            ask_changes: vec![],
            sequenced: true,
            checksum: None,
        }
    }

    fn unsequenced_delta(bid_changes: Vec<LevelChange>, ask_changes: Vec<LevelChange>, checksum: Option<i64>) -> OrderbookDelta {
        OrderbookDelta {
            envelope: env(),
            first_update_id: 0,
            last_update_id: 0,
            prev_update_id: None,
            bid_changes,
            ask_changes,
            sequenced: false,
            checksum,
        }
    }

    #[test]
    fn buffers_until_snapshot_then_aligns() {
        let mut sync = KeySynchronizer::new();
        assert!(matches!(sync.on_delta(delta(95, 100)).unwrap(), SyncAction::NoOp));
        assert!(matches!(sync.on_delta(delta(101, 105)).unwrap(), SyncAction::NoOp));

        let action = sync.on_snapshot(snapshot(100)).unwrap();
        assert!(matches!(action, SyncAction::EmitFullRefresh(_)));
        assert_eq!(sync.state(), SyncState::Synced);
    }

    #[test]
    fn gap_in_buffered_deltas_triggers_resync() {
        let mut sync = KeySynchronizer::new();
        sync.on_delta(delta(110, 120)).unwrap();
        let err = sync.on_snapshot(snapshot(100)).unwrap_err();
        assert_eq!(err, SyncError::SequenceGap);
        assert_eq!(sync.state(), SyncState::Resync);
    }

    #[test]
    fn synced_delta_gap_triggers_resync() {
        let mut sync = KeySynchronizer::new();
        sync.on_snapshot(snapshot(100)).unwrap();
        let mut bad = delta(150, 160);
        bad.prev_update_id = None;
        let err = sync.on_delta(bad).unwrap_err();
        assert_eq!(err, SyncError::SequenceGap);
        assert_eq!(sync.state(), SyncState::Resync);
    }

    #[test]
    fn synced_delta_applies_in_place() {
        let mut sync = KeySynchronizer::new();
        sync.on_snapshot(snapshot(100)).unwrap();
        let mut next = delta(101, 101);
        next.bid_changes = vec![LevelChange { price: dec!(99), quantity: dec!(3) }];
        let action = sync.on_delta(next).unwrap();
        assert!(matches!(action, SyncAction::EmitDelta(_)));
        let snap = sync.current_snapshot(env(), None).unwrap();
        assert_eq!(snap.last_update_id, 101);
    }

    #[test]
    fn unsequenced_deltas_apply_without_sequence_gap() {
        // Regression test: before the synchronizer recognized `sequenced:
        // false`, two unsequenced deltas in a row (the Coinbase/Kraken case)
        // always registered as a sequence gap and never applied.
        let mut sync = KeySynchronizer::new();
        sync.on_snapshot(snapshot(100)).unwrap();

        let first = unsequenced_delta(vec![LevelChange { price: dec!(99), quantity: dec!(3) }], vec![], None);
        let action = sync.on_delta(first).unwrap();
        assert!(matches!(action, SyncAction::EmitDelta(_)));
        assert_eq!(sync.state(), SyncState::Synced);

        let second = unsequenced_delta(vec![], vec![LevelChange { price: dec!(102), quantity: dec!(1) }], None);
        let action = sync.on_delta(second).unwrap();
        assert!(matches!(action, SyncAction::EmitDelta(_)));
        assert_eq!(sync.state(), SyncState::Synced);

        let snap = sync.current_snapshot(env(), None).unwrap();
        assert_eq!(snap.last_update_id, 102);
    }

    #[test]
    fn unsequenced_delta_checksum_mismatch_triggers_resync() {
        let mut sync = KeySynchronizer::new();
        sync.on_snapshot(snapshot(100)).unwrap();

        let bad = unsequenced_delta(vec![LevelChange { price: dec!(99), quantity: dec!(3) }], vec![], Some(-1));
        let err = sync.on_delta(bad).unwrap_err();
        assert_eq!(err, SyncError::ChecksumMismatch);
        assert_eq!(sync.state(), SyncState::Resync);
    }

    #[test]
    fn buffered_unsequenced_deltas_apply_in_arrival_order_on_snapshot() {
        let mut sync = KeySynchronizer::new();
        sync.on_delta(unsequenced_delta(vec![LevelChange { price: dec!(99), quantity: dec!(3) }], vec![], None)).unwrap();
        sync.on_delta(unsequenced_delta(vec![], vec![LevelChange { price: dec!(102), quantity: dec!(1) }], None)).unwrap();

        let action = sync.on_snapshot(snapshot(100)).unwrap();
        assert!(matches!(action, SyncAction::EmitFullRefresh(_)));
        assert_eq!(sync.state(), SyncState::Synced);
        let snap = sync.current_snapshot(env(), None).unwrap();
        assert_eq!(snap.last_update_id, 102);
    }
}

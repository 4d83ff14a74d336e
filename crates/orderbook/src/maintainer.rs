//! Wires the per-key [`KeySynchronizer`] state machines to the bus: consumes
//! raw exchange deltas, triggers REST resyncs, and republishes validated
//! full-refresh/delta records (spec §4.3).

use crate::fetcher::{fetcher_for, FetchError};
use crate::sync::{KeySynchronizer, SyncAction, SyncError};
use dashmap::{DashMap, DashSet};
use marketprism_bus::subject::{orderbook_subject, OrderbookSubject};
use marketprism_bus::Publisher;
use marketprism_protocol::{OrderbookDelta, Record};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

type Key = (String, String);

/// Resync attempts tolerated before giving up on a key until the next delta
/// re-triggers it (spec §4.3 error classes never block the whole maintainer).
const MAX_RESYNC_ATTEMPTS: u32 = 8;

pub struct Maintainer {
    registry: DashMap<Key, Arc<Mutex<KeySynchronizer>>>,
    in_flight: DashSet<Key>,
    http: reqwest::Client,
    publisher: Arc<Publisher>,
}

impl Maintainer {
    pub fn new(publisher: Arc<Publisher>) -> Self {
        Self { registry: DashMap::new(), in_flight: DashSet::new(), http: reqwest::Client::new(), publisher }
    }

    fn key_for(envelope: &marketprism_protocol::Envelope) -> Key {
        (envelope.exchange.to_lowercase(), envelope.symbol.to_string())
    }

    fn entry(&self, key: &Key) -> Arc<Mutex<KeySynchronizer>> {
        self.registry.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(KeySynchronizer::new()))).clone()
    }

    pub async fn handle_delta(self: &Arc<Self>, delta: OrderbookDelta) {
        let key = Self::key_for(&delta.envelope);
        let sync = self.entry(&key);

        let result = {
            let mut guard = sync.lock().await;
            guard.on_delta(delta)
        };

        match result {
            Ok(SyncAction::EmitDelta(delta)) => {
                metrics::counter!("orderbook.deltas_applied", "exchange" => key.0.clone()).increment(1);
                let subject = orderbook_subject(OrderbookSubject::PureDelta, &delta.envelope);
                if let Err(e) = self.publisher.publish_to(&subject, Record::OrderbookDelta(delta)).await {
                    warn!(error = %e, "failed to publish validated delta");
                }
            }
            Ok(_) => {}
            Err(_) => {
                metrics::counter!("orderbook.resync_triggers", "exchange" => key.0.clone()).increment(1);
                self.spawn_resync(key, sync);
            }
        }
    }

    /// Ensures at most one resync build runs per key (spec §4.3 non-goal:
    /// no overlapping rebuilds for the same instrument).
    fn spawn_resync(self: &Arc<Self>, key: Key, sync: Arc<Mutex<KeySynchronizer>>) {
        if !self.in_flight.insert(key.clone()) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_resync(key.clone(), sync).await;
            this.in_flight.remove(&key);
        });
    }

    async fn run_resync(&self, key: Key, sync: Arc<Mutex<KeySynchronizer>>) {
        let Some(fetcher) = fetcher_for(&key.0) else {
            error!(exchange = %key.0, "no snapshot fetcher registered for exchange");
            return;
        };

        for attempt in 1..=MAX_RESYNC_ATTEMPTS {
            let snapshot = match fetcher.fetch(&self.http, &key.1).await {
                Ok(s) => s,
                Err(FetchError::Request(e)) | Err(FetchError::Shape(e)) => {
                    warn!(exchange = %key.0, symbol = %key.1, attempt, error = %e, "snapshot fetch failed");
                    let delay = sync.lock().await.resync_delay();
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let action = {
                let mut guard = sync.lock().await;
                guard.on_snapshot(snapshot)
            };

            match action {
                Ok(SyncAction::EmitFullRefresh(snapshot)) => {
                    info!(exchange = %key.0, symbol = %key.1, attempt, "orderbook resynced");
                    metrics::gauge!("orderbook.synced", "exchange" => key.0.clone(), "symbol" => key.1.clone()).set(1.0);
                    let full_subject = orderbook_subject(OrderbookSubject::Full, &snapshot.envelope);
                    let snap_subject = orderbook_subject(OrderbookSubject::Snapshot, &snapshot.envelope);
                    let record = Record::OrderbookSnapshot(snapshot);
                    if let Err(e) = self.publisher.publish_to(&full_subject, record.clone()).await {
                        warn!(error = %e, "failed to publish full refresh");
                    }
                    if let Err(e) = self.publisher.publish_to(&snap_subject, record).await {
                        warn!(error = %e, "failed to publish snapshot");
                    }
                    return;
                }
                Ok(_) => return,
                Err(SyncError::SequenceGap | SyncError::ChecksumMismatch) => {
                    warn!(exchange = %key.0, symbol = %key.1, attempt, "snapshot failed to align, retrying");
                    let delay = sync.lock().await.resync_delay();
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(exchange = %key.0, symbol = %key.1, error = %e, "unrecoverable resync error");
                    return;
                }
            }
        }
        error!(exchange = %key.0, symbol = %key.1, "exhausted resync attempts, awaiting next delta to retrigger");
    }
}

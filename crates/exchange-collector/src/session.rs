//! Drives one WebSocket session through the exchange-client state machine
//! (spec §4.2), delegating exchange-specific subscribe/parse behavior to an
//! [`ExchangeAdapter`] and publishing every parsed record onto the bus.

use crate::state::ClientState;
use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use marketprism_bus::Publisher;
use marketprism_protocol::backoff::{BackoffConfig, ExponentialBackoff};
use marketprism_protocol::{validation, Record};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};

/// Missed-heartbeat threshold before a session is marked `Degraded` (spec §4.2).
const HEARTBEAT_MISS_THRESHOLD: u32 = 3;

/// Bound on waiting for the exchange's own subscribe acknowledgment before
/// reconnecting (spec.md:91 — "subscribe acks must be received within a
/// bounded time; otherwise reconnect").
const SUBSCRIBE_ACK_TIMEOUT: Duration = Duration::from_secs(10);

pub trait ExchangeAdapter: Send + Sync {
    fn exchange(&self) -> &'static str;
    fn ws_url(&self) -> &str;
    fn subscribe_messages(&self) -> Vec<Message>;
    fn heartbeat_interval(&self) -> Duration;
    /// Parses one raw text frame into zero or more canonical records. Errors
    /// here are transient/parse failures, counted but not fatal.
    fn parse_frame(&self, text: &str) -> Result<Vec<Record>>;
    /// True for protocol-fatal payloads (auth rejection, forbidden) that
    /// should halt the session instead of retrying.
    fn is_fatal(&self, _text: &str) -> bool {
        false
    }
    /// True for the exchange's own acknowledgment of our subscribe request
    /// (Coinbase: `"type":"subscriptions"`; Kraken: `"subscriptionStatus":
    /// "subscribed"`). Frames that arrive before the ack is seen are still
    /// parsed and published — the wait only gates the transition to
    /// `Streaming`, it does not drop data.
    fn is_subscribe_ack(&self, text: &str) -> bool;
}

pub struct Session<A: ExchangeAdapter> {
    adapter: Arc<A>,
    publisher: Arc<Publisher>,
    backoff: Mutex<ExponentialBackoff>,
    state: Mutex<ClientState>,
}

impl<A: ExchangeAdapter + 'static> Session<A> {
    pub fn new(adapter: A, publisher: Arc<Publisher>) -> Self {
        Self {
            adapter: Arc::new(adapter),
            publisher,
            backoff: Mutex::new(ExponentialBackoff::new(BackoffConfig::exchange_client())),
            state: Mutex::new(ClientState::Idle),
        }
    }

    async fn set_state(&self, next: ClientState) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.can_transition_to(next) {
            return Err(anyhow!("illegal transition {state} -> {next}"));
        }
        info!(exchange = self.adapter.exchange(), from = %*state, to = %next, "session state transition");
        *state = next;
        Ok(())
    }

    /// Runs until `stop` resolves, reconnecting with backoff on any
    /// transient failure and surfacing fatal protocol errors immediately.
    pub async fn run(&self, mut stop: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        self.set_state(ClientState::Connecting).await?;

        loop {
            if *stop.borrow() {
                self.set_state(ClientState::Closing).await.ok();
                self.set_state(ClientState::Closed).await.ok();
                return Ok(());
            }

            let ws_stream = loop {
                if *stop.borrow() {
                    self.set_state(ClientState::Closing).await.ok();
                    self.set_state(ClientState::Closed).await.ok();
                    return Ok(());
                }
                match connect_async(self.adapter.ws_url()).await {
                    Ok((stream, _)) => {
                        self.backoff.lock().await.reset();
                        break stream;
                    }
                    Err(e) => {
                        let delay = self.backoff.lock().await.next_delay();
                        warn!(exchange = self.adapter.exchange(), error = %e, delay_ms = delay.as_millis() as u64, "connect failed, backing off");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = stop.changed() => {}
                        }
                    }
                }
            };

            self.set_state(ClientState::Handshaking).await?;
            let (mut write, mut read) = ws_stream.split();

            self.set_state(ClientState::Subscribing).await?;
            for msg in self.adapter.subscribe_messages() {
                write.send(msg).await.context("subscribe send failed")?;
            }

            let ack_deadline = tokio::time::sleep(SUBSCRIBE_ACK_TIMEOUT);
            tokio::pin!(ack_deadline);
            let acked = loop {
                tokio::select! {
                    _ = &mut ack_deadline => break false,
                    frame = read.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                if self.adapter.is_subscribe_ack(&text) {
                                    break true;
                                }
                                if self.adapter.is_fatal(&text) {
                                    error!(exchange = self.adapter.exchange(), "fatal protocol error while awaiting subscribe ack");
                                    return Err(anyhow!("fatal protocol error from {}", self.adapter.exchange()));
                                }
                                if let Ok(records) = self.adapter.parse_frame(&text) {
                                    let now_ms = chrono::Utc::now().timestamp_millis();
                                    for record in records {
                                        if validation::validate_record(&record, now_ms).is_ok() {
                                            let _ = self.publisher.publish(record).await;
                                        }
                                    }
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(exchange = self.adapter.exchange(), error = %e, "websocket error while awaiting subscribe ack");
                                break false;
                            }
                            None => break false,
                        }
                    }
                }
            };

            if !acked {
                warn!(exchange = self.adapter.exchange(), "no subscribe ack within bound, reconnecting");
                self.set_state(ClientState::Degraded).await?;
                self.set_state(ClientState::Connecting).await?;
                continue;
            }

            self.set_state(ClientState::Streaming).await?;
            metrics::gauge!("exchange_collector.sessions_streaming", "exchange" => self.adapter.exchange()).increment(1.0);

            let mut missed_heartbeats = 0u32;
            loop {
                tokio::select! {
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            let _ = write.send(Message::Close(None)).await;
                            self.set_state(ClientState::Closing).await.ok();
                            self.set_state(ClientState::Closed).await.ok();
                            metrics::gauge!("exchange_collector.sessions_streaming", "exchange" => self.adapter.exchange()).decrement(1.0);
                            return Ok(());
                        }
                    }
                    frame = tokio::time::timeout(self.adapter.heartbeat_interval(), read.next()) => {
                        match frame {
                            Err(_elapsed) => {
                                missed_heartbeats += 1;
                                warn!(exchange = self.adapter.exchange(), missed_heartbeats, "heartbeat window elapsed with no frame");
                                if missed_heartbeats >= HEARTBEAT_MISS_THRESHOLD {
                                    self.set_state(ClientState::Degraded).await?;
                                    metrics::gauge!("exchange_collector.sessions_streaming", "exchange" => self.adapter.exchange()).decrement(1.0);
                                    break;
                                }
                            }
                            Ok(None) => {
                                warn!(exchange = self.adapter.exchange(), "stream ended");
                                self.set_state(ClientState::Degraded).await?;
                                metrics::gauge!("exchange_collector.sessions_streaming", "exchange" => self.adapter.exchange()).decrement(1.0);
                                break;
                            }
                            Ok(Some(Ok(Message::Text(text)))) => {
                                missed_heartbeats = 0;
                                if self.adapter.is_fatal(&text) {
                                    error!(exchange = self.adapter.exchange(), "fatal protocol error, halting session");
                                    return Err(anyhow!("fatal protocol error from {}", self.adapter.exchange()));
                                }
                                match self.adapter.parse_frame(&text) {
                                    Ok(records) => {
                                        let now_ms = chrono::Utc::now().timestamp_millis();
                                        for record in records {
                                            if let Err(violation) = validation::validate_record(&record, now_ms) {
                                                metrics::counter!("exchange_collector.invariant_violations", "exchange" => self.adapter.exchange()).increment(1);
                                                warn!(exchange = self.adapter.exchange(), error = %violation, "record failed invariant check, dropping");
                                                continue;
                                            }
                                            if let Err(e) = self.publisher.publish(record).await {
                                                warn!(exchange = self.adapter.exchange(), error = %e, "publish failed after retries");
                                            }
                                        }
                                    }
                                    Err(e) => {
                                        metrics::counter!("exchange_collector.parse_errors", "exchange" => self.adapter.exchange()).increment(1);
                                        warn!(exchange = self.adapter.exchange(), error = %e, "frame parse failed");
                                    }
                                }
                            }
                            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => {
                                missed_heartbeats = 0;
                            }
                            Ok(Some(Ok(Message::Close(_)))) => {
                                warn!(exchange = self.adapter.exchange(), "remote closed connection");
                                self.set_state(ClientState::Degraded).await?;
                                metrics::gauge!("exchange_collector.sessions_streaming", "exchange" => self.adapter.exchange()).decrement(1.0);
                                break;
                            }
                            Ok(Some(Ok(_))) => {}
                            Ok(Some(Err(e))) => {
                                warn!(exchange = self.adapter.exchange(), error = %e, "websocket error");
                                self.set_state(ClientState::Degraded).await?;
                                metrics::gauge!("exchange_collector.sessions_streaming", "exchange" => self.adapter.exchange()).decrement(1.0);
                                break;
                            }
                        }
                    }
                }
            }

            self.set_state(ClientState::Connecting).await?;
        }
    }
}

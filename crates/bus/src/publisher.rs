//! At-least-once publisher (spec §4.4): serializes a record, chooses its
//! subject, and blocks until the stream acknowledges persistence, retrying
//! with capped backoff before falling through to the deadletter buffer.

use crate::deadletter::DeadLetterBuffer;
use crate::subject::subject_for_type;
use async_nats::jetstream::Context as JetStreamContext;
use marketprism_protocol::backoff::{BackoffConfig, ExponentialBackoff};
use marketprism_protocol::error::PublishError;
use marketprism_protocol::Record;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub max_attempts: u32,
    pub ack_timeout: Duration,
    pub backoff: BackoffConfig,
    pub deadletter_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            ack_timeout: Duration::from_secs(5),
            backoff: BackoffConfig {
                base: Duration::from_millis(100),
                factor: 2.0,
                cap: Duration::from_secs(10),
                jitter: 0.2,
            },
            deadletter_capacity: 10_000,
        }
    }
}

pub struct Publisher {
    jetstream: JetStreamContext,
    config: PublisherConfig,
    deadletter: Arc<DeadLetterBuffer>,
}

impl Publisher {
    pub fn new(jetstream: JetStreamContext, config: PublisherConfig) -> Self {
        let deadletter = Arc::new(DeadLetterBuffer::new(config.deadletter_capacity));
        Self { jetstream, config, deadletter }
    }

    pub fn deadletter(&self) -> Arc<DeadLetterBuffer> {
        self.deadletter.clone()
    }

    /// Publishes `record` on its default subject for its data type. Orderbook
    /// records that need an explicit full/delta/snapshot/pure_delta variant
    /// go through [`Publisher::publish_to`] instead.
    pub async fn publish(&self, record: Record) -> Result<(), PublishError> {
        let subject = subject_for_type(record.data_type(), record.envelope());
        self.publish_to(&subject, record).await
    }

    pub async fn publish_to(&self, subject: &str, record: Record) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(&record)
            .map_err(|e| PublishError::Connection(format!("serialize failed: {e}")))?;

        let mut backoff = ExponentialBackoff::new(self.config.backoff);
        let mut last_err = None;

        for attempt in 1..=self.config.max_attempts {
            let publish_result = tokio::time::timeout(
                self.config.ack_timeout,
                self.jetstream.publish(subject.to_string(), payload.clone().into()),
            )
            .await;

            match publish_result {
                Ok(Ok(ack_future)) => match tokio::time::timeout(self.config.ack_timeout, ack_future).await {
                    Ok(Ok(_ack)) => return Ok(()),
                    Ok(Err(e)) => last_err = Some(e.to_string()),
                    Err(_) => last_err = Some("ack timed out".to_string()),
                },
                Ok(Err(e)) => last_err = Some(e.to_string()),
                Err(_) => last_err = Some("publish timed out".to_string()),
            }

            warn!(
                fingerprint = "publisher.retry",
                subject,
                attempt,
                error = last_err.as_deref().unwrap_or("unknown"),
                "publish attempt failed, retrying"
            );
            metrics::counter!("publisher.retries").increment(1);
            tokio::time::sleep(backoff.next_delay()).await;
        }

        error!(
            fingerprint = "publisher.exhausted",
            subject,
            attempts = self.config.max_attempts,
            "exhausted publish retries, routing to deadletter"
        );
        self.deadletter.push(subject.to_string(), record, self.config.max_attempts);
        Err(PublishError::DeadLettered { subject: subject.to_string() })
    }
}

mod batch;
mod config;

use anyhow::{Context, Result};
use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::Message;
use batch::PendingBatch;
use futures_util::StreamExt;
use marketprism_bus::streams::ALL_STREAMS;
use marketprism_protocol::health::HealthRegistry;
use marketprism_protocol::{health, DataType, Record};
use marketprism_storage::{HotStore, PoolSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const QUARANTINE_SUBJECT_PREFIX: &str = "quarantine";
/// Failed batch-insert attempts tolerated before the consumer pauses and
/// surfaces health-critical (spec §4.6).
const RETRY_BUDGET: u32 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hot_writer=info".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    info!("starting hot writer");
    let config = config::WriterConfig::from_env_or_default_path().context("failed to load writer config")?;

    let health = Arc::new(HealthRegistry::new());
    let writer_health = health.component("writer");

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.monitoring.metrics_port));
    health::install_metrics_recorder(metrics_addr).context("failed to install metrics recorder")?;

    let hot_store = Arc::new(
        HotStore::connect(
            PoolSettings { connection_string: config.database.connection_string.clone(), max_connections: config.database.max_connections },
            config.database.ttl_days,
        )
        .await
        .context("failed to connect hot store")?,
    );
    // Readiness gate (spec §4.8): ready only after schema verification, which
    // HotStore::connect already performs before returning.
    writer_health.mark_ready();

    let nats_client = async_nats::connect(&config.bus.url).await.context("failed to connect to message bus")?;
    let jetstream = async_nats::jetstream::new(nats_client.clone());

    let (tx, mut rx) = mpsc::channel::<Message>(4096);
    for stream_spec in ALL_STREAMS {
        let jetstream = jetstream.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = pull_stream(jetstream, stream_spec.name, tx).await {
                error!(stream = stream_spec.name, error = %e, "stream consumer task exited");
            }
        });
    }
    drop(tx);

    let mut batches: HashMap<DataType, PendingBatch> = HashMap::new();
    let mut retry_failures: HashMap<DataType, u32> = HashMap::new();
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(250));
    let shutdown = health::wait_for_shutdown_signal();
    tokio::pin!(shutdown);
    let mut stopping = false;

    loop {
        tokio::select! {
            _ = &mut shutdown, if !stopping => {
                info!("shutdown signal received, draining in-flight batches");
                stopping = true;
                writer_health.mark_not_ready();
            }
            maybe_msg = rx.recv() => {
                let Some(msg) = maybe_msg else { break };
                match serde_json::from_slice::<Record>(&msg.payload) {
                    Ok(record) => {
                        let data_type = record.data_type();
                        let batch = batches.entry(data_type).or_insert_with(|| PendingBatch::new(data_type));
                        batch.push(record, msg);
                    }
                    Err(e) => {
                        warn!(error = %e, "schema error, moving record to quarantine");
                        if let Err(e) = quarantine(&jetstream, &msg).await {
                            error!(error = %e, "failed to quarantine malformed record");
                        }
                        let _ = msg.ack().await;
                    }
                }
            }
            _ = ticker.tick() => {}
        }

        if stopping && batches.values().all(|b| b.records.is_empty()) {
            break;
        }

        for (data_type, batch) in batches.iter_mut() {
            if !batch.should_flush() {
                continue;
            }
            let (records, acks) = batch.take();
            match hot_store.insert_batch(&records).await {
                Ok(written) => {
                    metrics::counter!("hot_writer.records_written", "data_type" => data_type.as_str()).increment(written);
                    for ack in acks {
                        let _ = ack.ack().await;
                    }
                    retry_failures.insert(*data_type, 0);
                }
                Err(e) => {
                    error!(data_type = data_type.as_str(), error = %e, "batch insert failed, nacking for redelivery");
                    for ack in &acks {
                        let _ = ack.ack_with(async_nats::jetstream::AckKind::Nak(None)).await;
                    }
                    let failures = retry_failures.entry(*data_type).or_insert(0);
                    *failures += 1;
                    if *failures >= RETRY_BUDGET {
                        error!(data_type = data_type.as_str(), "retry budget exceeded, pausing consumption for this type");
                        metrics::gauge!("hot_writer.health_critical", "data_type" => data_type.as_str()).set(1.0);
                    }
                }
            }
        }
    }

    info!("hot writer stopped");
    Ok(())
}

async fn pull_stream(jetstream: async_nats::jetstream::Context, stream_name: &str, tx: mpsc::Sender<Message>) -> Result<()> {
    let stream = jetstream.get_stream(stream_name).await.context("stream not provisioned")?;
    let consumer = stream
        .get_or_create_consumer(
            &format!("hot-writer-{stream_name}"),
            PullConfig { durable_name: Some(format!("hot-writer-{stream_name}")), ..Default::default() },
        )
        .await
        .context("failed to create durable consumer")?;

    let mut messages = consumer.messages().await.context("failed to open message stream")?;
    while let Some(msg) = messages.next().await {
        match msg {
            Ok(msg) => {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(stream = stream_name, error = %e, "pull error, backing off");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
    Ok(())
}

async fn quarantine(jetstream: &async_nats::jetstream::Context, msg: &Message) -> Result<()> {
    let subject = format!("{QUARANTINE_SUBJECT_PREFIX}.{}", msg.subject);
    jetstream.publish(subject, msg.payload.clone()).await?.await?;
    Ok(())
}

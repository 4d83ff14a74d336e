mod book;
mod config;
mod fetcher;
mod maintainer;
mod sync;

use anyhow::{Context, Result};
use async_nats::jetstream::consumer::pull::Config as PullConfig;
use futures_util::StreamExt;
use maintainer::Maintainer;
use marketprism_bus::streams::ORDERBOOK_DELTA;
use marketprism_bus::{Publisher, PublisherConfig};
use marketprism_protocol::health::{self, HealthRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

const CONSUMER_NAME: &str = "orderbook-maintainer";
/// Only the collector's raw deltas feed the synchronizer; the maintainer's
/// own validated `orderbook.pure_delta.*` output must not loop back in.
const FILTER_SUBJECT: &str = "orderbook.delta.>";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("orderbook=info".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let config = config::OrderbookConfig::from_env_or_default_path().context("failed to load orderbook config")?;
    info!(bus_url = %config.bus.url, "starting orderbook maintainer");

    let health = Arc::new(HealthRegistry::new());
    let maintainer_health = health.component("orderbook_maintainer");

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.monitoring.metrics_port));
    health::install_metrics_recorder(metrics_addr).context("failed to install metrics recorder")?;

    let nats_client = async_nats::connect(&config.bus.url).await.context("failed to connect to message bus")?;
    let jetstream = async_nats::jetstream::new(nats_client);

    let publisher = Arc::new(Publisher::new(jetstream.clone(), PublisherConfig::default()));
    let maintainer = Arc::new(Maintainer::new(publisher));

    let stream = jetstream.get_stream(ORDERBOOK_DELTA.name).await.context("orderbook delta stream not provisioned")?;
    let consumer = stream
        .get_or_create_consumer(
            CONSUMER_NAME,
            PullConfig { durable_name: Some(CONSUMER_NAME.to_string()), filter_subject: FILTER_SUBJECT.to_string(), ..Default::default() },
        )
        .await
        .context("failed to create durable consumer")?;

    let mut messages = consumer.messages().await.context("failed to open message stream")?;
    maintainer_health.mark_ready();

    let shutdown = health::wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping orderbook maintainer");
                maintainer_health.mark_not_ready();
                break;
            }
            maybe_msg = messages.next() => {
                let Some(msg) = maybe_msg else { break };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(error = %e, "pull error, backing off");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                };

                match serde_json::from_slice::<marketprism_protocol::OrderbookDelta>(&msg.payload) {
                    Ok(delta) => {
                        maintainer.handle_delta(delta).await;
                        if let Err(e) = msg.ack().await {
                            warn!(error = %e, "failed to ack delta");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "malformed delta payload, acking to drop");
                        let _ = msg.ack().await;
                    }
                }
            }
        }
    }

    info!("orderbook maintainer stopped");
    Ok(())
}

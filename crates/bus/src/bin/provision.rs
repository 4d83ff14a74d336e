//! Ensures the four JetStream streams (spec §4.5) exist with the contractual
//! retention policy. Run once at deploy time or as a startup step before the
//! publisher and consumers come up (spec §4.8 start order).

use anyhow::{Context, Result};
use marketprism_bus::ALL_STREAMS;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bus_provision=info".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let bus_url = std::env::var("BUS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string());
    info!("connecting to message bus at {bus_url}");

    let client = async_nats::connect(&bus_url)
        .await
        .context("failed to connect to message bus")?;
    let jetstream = async_nats::jetstream::new(client);

    for spec in ALL_STREAMS {
        info!(stream = spec.name, "ensuring stream exists");
        jetstream
            .get_or_create_stream(spec.to_nats_config())
            .await
            .with_context(|| format!("failed to provision stream {}", spec.name))?;
    }

    info!("all streams provisioned");
    Ok(())
}

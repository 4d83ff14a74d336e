use anyhow::{Context, Result};
use marketprism_bus::{Publisher, PublisherConfig};
use marketprism_exchange_collector::config::AppConfig;
use marketprism_exchange_collector::exchanges::{coinbase::CoinbaseAdapter, kraken::KrakenAdapter};
use marketprism_exchange_collector::session::{ExchangeAdapter, Session};
use marketprism_protocol::health::{self, HealthRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("exchange_collector=info".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    info!("starting exchange collector");

    let config = AppConfig::from_env_or_default_path().context("failed to load collector config")?;

    let health = Arc::new(HealthRegistry::new());
    let clients_health = health.component("clients");

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.monitoring.metrics_port));
    health::install_metrics_recorder(metrics_addr).context("failed to install metrics recorder")?;

    let nats_client = async_nats::connect(&config.bus.url)
        .await
        .context("failed to connect to message bus")?;
    let jetstream = async_nats::jetstream::new(nats_client);
    let publisher = Arc::new(Publisher::new(jetstream, PublisherConfig::default()));

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::new();

    for exchange in config.exchanges {
        let publisher = publisher.clone();
        let stop_rx = stop_rx.clone();
        let handle: tokio::task::JoinHandle<Result<()>> = match exchange.name.as_str() {
            "coinbase" => {
                let adapter = CoinbaseAdapter::new(exchange.symbols);
                tokio::spawn(async move { run_session(adapter, publisher, stop_rx).await })
            }
            "kraken" => {
                let adapter = KrakenAdapter::new(exchange.symbols);
                tokio::spawn(async move { run_session(adapter, publisher, stop_rx).await })
            }
            other => {
                error!(exchange = other, "unknown exchange in config, skipping");
                continue;
            }
        };
        handles.push(handle);
    }
    clients_health.mark_ready();

    health::wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping exchange sessions");
    clients_health.mark_not_ready();
    stop_tx.send(true).ok();

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "exchange session task panicked");
        }
    }

    info!("exchange collector stopped");
    Ok(())
}

async fn run_session<A: ExchangeAdapter + 'static>(
    adapter: A,
    publisher: Arc<Publisher>,
    stop_rx: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let session = Session::new(adapter, publisher);
    session.run(stop_rx).await
}

mod config;
mod run;

use anyhow::{Context, Result};
use config::ReplicatorAppConfig;
use marketprism_protocol::health::{self, HealthRegistry};
use marketprism_storage::{ColdStore, HotStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("replicator=info".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let config = ReplicatorAppConfig::from_env_or_default_path().context("failed to load replicator config")?;
    info!(
        interval_seconds = config.replicator.interval_seconds,
        dry_run = config.replicator.dry_run,
        cleanup_enabled = config.replicator.cleanup_enabled,
        "starting replicator"
    );

    // ttl_days here only affects HotStore's own DDL comment; the replicator
    // deletes via its own retention_hours window, not HotStore::enforce_ttl.
    const HOT_TTL_DAYS: u32 = 3;

    let health = Arc::new(HealthRegistry::new());
    let replicator_health = health.component("replicator");
    health.set_cleanup_enabled(config.replicator.cleanup_enabled);

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.monitoring.metrics_port));
    health::install_metrics_recorder(metrics_addr).context("failed to install metrics recorder")?;

    // Readiness gate (spec §4.8): only ready once both stores pass connect +
    // schema-equivalence ping.
    let hot = HotStore::connect(config.hot.pool_settings(), HOT_TTL_DAYS).await.context("failed to connect hot store")?;
    let cold = ColdStore::connect(config.cold.pool_settings()).await.context("failed to connect cold store")?;
    // Hot and cold are both built from the same ALL_TABLES constants, so this
    // audit can never fail today; it stays in the startup path so a future
    // per-store schema override trips it immediately.
    for table in marketprism_storage::ALL_TABLES.iter() {
        marketprism_storage::assert_equivalent(table, table).context("schema equivalence audit failed")?;
    }
    metrics::gauge!("replicator.ready").set(1.0);
    replicator_health.mark_ready();

    // Global lock (spec §5): a single scheduled task with a mutex, so a slow
    // run never overlaps the next tick.
    let run_lock = Arc::new(Mutex::new(()));
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(config.replicator.interval_seconds));
    let shutdown = health::wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping replicator");
                replicator_health.mark_not_ready();
                break;
            }
            _ = ticker.tick() => {
                let Ok(_guard) = run_lock.try_lock() else {
                    warn!("previous replication run still in flight, skipping this tick");
                    continue;
                };

                match run::run_once(&hot, &cold, &config.replicator).await {
                    Ok(report) => {
                        for table in &report.tables {
                            metrics::counter!("replicator.rows_copied", "table" => table.table).increment(table.copied);
                            metrics::counter!("replicator.rows_deleted", "table" => table.table).increment(table.deleted);
                            info!(table = table.table, planned = table.planned, copied = table.copied, deleted = table.deleted, "replication pass complete");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "replication run failed");
                        metrics::gauge!("replicator.health_critical").set(1.0);
                        replicator_health.mark_degraded();
                    }
                }
            }
        }
    }

    info!("replicator stopped");
    Ok(())
}

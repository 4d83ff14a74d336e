//! Lifecycle/health surface (spec §4.8, §6.5): an in-process readiness and
//! liveness registry every binary publishes into, plus the Prometheus
//! recorder installer shared by every binary's `main` (spec §10.5). Neither
//! is bound to an HTTP route table here — the exchange-collector, hot-writer,
//! orderbook maintainer, and replicator are standalone binaries with no
//! shared listener to host `/health` on, and spec.md:13 treats the HTTP
//! transport for health/diagnostics endpoints as an external collaborator.
//! What's specified is the shape: a `HealthReport` a caller can render as
//! that `/health` body, and a recorder so `metrics::counter!`/`gauge!` calls
//! are real instead of silent no-ops.

use dashmap::DashMap;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-component readiness/liveness flags (spec §4.8 readiness gate).
#[derive(Debug, Default)]
pub struct ComponentHealth {
    ready: AtomicBool,
    live: AtomicBool,
}

impl ComponentHealth {
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.live.store(true, Ordering::SeqCst);
    }

    /// Transient failure: still live (the process is up) but not ready.
    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Hard failure: neither ready nor live (spec §4.8 `Degraded`).
    pub fn mark_degraded(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.live.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Starting,
    Ready,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub ready: bool,
    pub live: bool,
}

/// Body shape for spec §6.5's `/health`: `{ status, components, cleanup_enabled }`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: Status,
    pub components: std::collections::BTreeMap<String, ComponentStatus>,
    pub cleanup_enabled: bool,
}

/// Registry a binary's `main` populates with one [`ComponentHealth`] per
/// named component (`writer`, `replicator`, `clients`, ...) and snapshots
/// into a [`HealthReport`] on demand.
pub struct HealthRegistry {
    components: DashMap<String, Arc<ComponentHealth>>,
    cleanup_enabled: AtomicBool,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self { components: DashMap::new(), cleanup_enabled: AtomicBool::new(false) }
    }

    pub fn component(&self, name: &str) -> Arc<ComponentHealth> {
        self.components.entry(name.to_string()).or_insert_with(|| Arc::new(ComponentHealth::default())).clone()
    }

    /// The replicator's `cleanup_enabled` config flag, surfaced verbatim in
    /// the health report per spec §6.5.
    pub fn set_cleanup_enabled(&self, enabled: bool) {
        self.cleanup_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn report(&self) -> HealthReport {
        let components: std::collections::BTreeMap<String, ComponentStatus> = self
            .components
            .iter()
            .map(|entry| (entry.key().clone(), ComponentStatus { ready: entry.value().is_ready(), live: entry.value().is_live() }))
            .collect();

        let status = if components.is_empty() {
            Status::Starting
        } else if components.values().any(|c| !c.live) {
            Status::Degraded
        } else if components.values().all(|c| c.ready) {
            Status::Ready
        } else {
            Status::Starting
        };

        HealthReport { status, components, cleanup_enabled: self.cleanup_enabled.load(Ordering::SeqCst) }
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves on SIGINT or SIGTERM, whichever arrives first (spec §4.8:
/// "SIGINT/SIGTERM trigger graceful stop"). Every binary's `main` awaits this
/// instead of only `tokio::signal::ctrl_c()` so an orchestrator's SIGTERM
/// triggers the same graceful-stop path as a developer's Ctrl-C.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Installs the global Prometheus recorder so every `metrics::counter!`/
/// `gauge!`/`histogram!` call in the process records instead of no-opping,
/// the way the teacher's `exchange_collector::metrics_server` and
/// `data_writer`'s monitoring setup install
/// `metrics_exporter_prometheus::PrometheusBuilder` (spec §10.5). Binding an
/// HTTP listener for it is the one piece of those teacher call sites this
/// keeps: `/metrics`'s shape is specified (spec §6.5), its transport is an
/// external collaborator like any other HTTP surface (spec.md:13).
pub fn install_metrics_recorder(addr: SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install prometheus recorder: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_is_starting() {
        let registry = HealthRegistry::new();
        assert_eq!(registry.report().status, Status::Starting);
    }

    #[test]
    fn all_ready_components_report_ready() {
        let registry = HealthRegistry::new();
        registry.component("writer").mark_ready();
        registry.component("replicator").mark_ready();
        registry.set_cleanup_enabled(true);
        let report = registry.report();
        assert_eq!(report.status, Status::Ready);
        assert!(report.cleanup_enabled);
        assert!(report.components["writer"].ready);
    }

    #[test]
    fn one_degraded_component_degrades_overall_status() {
        let registry = HealthRegistry::new();
        registry.component("writer").mark_ready();
        registry.component("clients").mark_degraded();
        assert_eq!(registry.report().status, Status::Degraded);
    }

    #[test]
    fn not_ready_without_degraded_component_is_starting() {
        let registry = HealthRegistry::new();
        registry.component("writer").mark_ready();
        registry.component("replicator");
        assert_eq!(registry.report().status, Status::Starting);
    }
}

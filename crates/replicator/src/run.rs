//! One replication pass across every persisted table (spec §4.7).

use crate::config::ReplicatorConfig;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use marketprism_storage::{CopyWindow, HotStore, TableSchema, WatermarkStore};
use marketprism_storage::{ColdStore, StorageError};
use tracing::{info, warn};

/// Batches pulled per table in a single pass before moving on; bounds a
/// single tick's runtime even if a table has a very wide backlog.
const MAX_BATCHES_PER_TABLE: usize = 50;

#[derive(Debug, Default)]
pub struct TableReport {
    pub table: &'static str,
    pub planned: u64,
    pub copied: u64,
    pub deleted: u64,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub tables: Vec<TableReport>,
}

pub async fn run_once(hot: &HotStore, cold: &ColdStore, config: &ReplicatorConfig) -> Result<RunReport, StorageError> {
    let watermarks = WatermarkStore::new(cold.pool());
    watermarks.ensure_table().await?;

    let mut report = RunReport::default();
    let now = Utc::now();
    let default_lo = now - ChronoDuration::hours(config.window_hours);

    for table in marketprism_storage::ALL_TABLES.iter() {
        let hi = match hot.max_ts_ms(table).await? {
            Some(hi) => hi,
            None => continue,
        };
        let lo = watermarks.get(table.name).await?.unwrap_or(default_lo);

        if hi <= lo {
            continue;
        }

        let table_report = replicate_table(hot, cold, &watermarks, table, lo, hi, config).await?;
        report.tables.push(table_report);
    }

    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn replicate_table(
    hot: &HotStore,
    cold: &ColdStore,
    watermarks: &WatermarkStore<'_>,
    table: &TableSchema,
    lo: DateTime<Utc>,
    hi: DateTime<Utc>,
    config: &ReplicatorConfig,
) -> Result<TableReport, StorageError> {
    let mut report = TableReport { table: table.name, ..Default::default() };
    let mut cursor = lo;

    for _ in 0..MAX_BATCHES_PER_TABLE {
        let window = CopyWindow {
            lo: cursor,
            hi,
            limit: config.batch_limit,
            exchange: config.exchange.as_deref(),
            market_type: config.market_type.as_deref(),
            symbol_prefix: config.symbol_prefix.as_deref(),
        };
        let rows = hot.select_for_copy(table, window).await?;
        if rows.is_empty() {
            break;
        }

        let keys: Vec<String> = rows.iter().map(|r| r.dedup_key.clone()).collect();
        let already_in_cold = cold.existing_dedup_keys(table, &keys).await?;
        let to_copy: Vec<_> = rows.iter().filter(|r| !already_in_cold.contains(&r.dedup_key)).cloned().collect();

        report.planned += to_copy.len() as u64;
        cursor = rows.last().map(|r| r.ts_ms).unwrap_or(cursor);

        if !config.dry_run && !to_copy.is_empty() {
            let written = cold.insert_copied_rows(table, &to_copy).await?;
            report.copied += written;
        }

        if (rows.len() as i64) < config.batch_limit {
            break;
        }
    }

    if !config.dry_run {
        watermarks.advance(table.name, cursor).await?;

        if config.cleanup_enabled {
            let cutoff = cursor - ChronoDuration::hours(config.retention_hours);
            report.deleted = hot.delete_replicated_before(table, cutoff).await?;
        }
    } else {
        info!(table = table.name, planned = report.planned, "dry run: skipping insert, watermark advance, and cleanup");
    }

    if report.planned == 0 && report.copied == 0 {
        warn!(table = table.name, "replication pass selected no new rows despite hi > lo; likely fully caught up already");
    }

    Ok(report)
}

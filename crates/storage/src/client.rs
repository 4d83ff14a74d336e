//! Pool-backed hot and cold store clients. Both wrap the same
//! `deadpool_postgres::Pool` shape the teacher's `DataWriter` builds
//! (`DbConfig` + `Runtime::Tokio1` + `tokio_postgres::NoTls`); they differ only
//! in which DSN/pool they're constructed from and whether TTL cleanup runs.
//!
//! `OrderbookDelta` records have no table of their own: they are bus-only,
//! consumed by the synchronizer to produce the `OrderbookSnapshot` that
//! actually lands in `orderbooks` (see DESIGN.md). `insert_batch` is a no-op
//! for that variant.

use crate::schema::{self, TableSchema};
use crate::StorageError;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config as DbConfig, Pool, Runtime};
use marketprism_protocol::{DataType, Record};
use std::collections::HashSet;
use tokio_postgres::types::ToSql;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub connection_string: String,
    pub max_connections: usize,
}

fn build_pool(settings: &PoolSettings) -> Result<Pool, StorageError> {
    let mut db_config = DbConfig::new();
    db_config.url = Some(settings.connection_string.clone());
    if let Some(pool_config) = &mut db_config.pool {
        pool_config.max_size = settings.max_connections;
    }
    db_config
        .create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
        .map_err(|e| StorageError::Connection(e.to_string()))
}

async fn ensure_schema(pool: &Pool, ttl_days: Option<u32>) -> Result<(), StorageError> {
    let client = pool.get().await.map_err(|e| StorageError::Connection(e.to_string()))?;
    for table in schema::ALL_TABLES {
        client
            .batch_execute(&table.create_table_sql(ttl_days))
            .await
            .map_err(|e| StorageError::SchemaMismatch { table: table.name.to_string(), detail: e.to_string() })?;
    }
    Ok(())
}

/// Picks the table a record's data type is persisted under; `None` means the
/// type is bus-only and never reaches a store (`OrderbookDelta`).
pub fn table_for(data_type: DataType) -> Option<&'static TableSchema> {
    match data_type {
        DataType::OrderbookSnapshot => Some(&schema::ORDERBOOKS),
        DataType::OrderbookDelta => None,
        DataType::Trade => Some(&schema::TRADES),
        DataType::FundingRate => Some(&schema::FUNDING_RATES),
        DataType::OpenInterest => Some(&schema::OPEN_INTERESTS),
        DataType::Liquidation => Some(&schema::LIQUIDATIONS),
        DataType::LsrTopPosition => Some(&schema::LSR_TOP_POSITIONS),
        DataType::LsrAllAccount => Some(&schema::LSR_ALL_ACCOUNTS),
        DataType::VolatilityIndex => Some(&schema::VOLATILITY_INDICES),
    }
}

/// Short-retention store (spec §6.1): 3-day TTL, always-on write path for the
/// writer service.
pub struct HotStore {
    pool: Pool,
    ttl_days: u32,
}

impl HotStore {
    pub async fn connect(settings: PoolSettings, ttl_days: u32) -> Result<Self, StorageError> {
        let pool = build_pool(&settings)?;
        {
            let client = pool.get().await.map_err(|e| StorageError::Connection(e.to_string()))?;
            client.execute("SELECT 1", &[]).await.map_err(|e| StorageError::Connection(e.to_string()))?;
        }
        ensure_schema(&pool, Some(ttl_days)).await?;
        info!(ttl_days, "hot store connected and schema ensured");
        Ok(Self { pool, ttl_days })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Deletes rows older than the configured TTL. Called by the replicator
    /// after confirming cold-store durability for the watermark range.
    pub async fn enforce_ttl(&self, table: &TableSchema) -> Result<u64, StorageError> {
        let client = self.pool.get().await.map_err(|e| StorageError::Connection(e.to_string()))?;
        let sql = format!(
            "DELETE FROM {} WHERE ts_ms < now() - interval '{} days'",
            table.name, self.ttl_days
        );
        client
            .execute(&sql, &[])
            .await
            .map_err(|e| StorageError::ConstraintViolation { table: table.name.to_string(), detail: e.to_string() })
    }

    pub async fn insert_batch(&self, records: &[Record]) -> Result<u64, StorageError> {
        insert_batch(&self.pool, records).await
    }

    /// Highest `ts_ms` currently in `table`, used as the replicator's `hi`
    /// watermark bound (spec §4.7 step 1).
    pub async fn max_ts_ms(&self, table: &TableSchema) -> Result<Option<DateTime<Utc>>, StorageError> {
        max_ts_ms(&self.pool, table).await
    }

    /// Pulls up to `limit` rows in `(lo, hi]`, every column text-cast so the
    /// copy works across tables without per-type Rust mirrors (spec §4.7
    /// step 2); optional filters match the replicator's `MIGRATION_*` knobs.
    pub async fn select_for_copy(&self, table: &TableSchema, window: CopyWindow<'_>) -> Result<Vec<CopyRow>, StorageError> {
        select_for_copy(&self.pool, table, window).await
    }

    /// Deletes rows already confirmed durable in cold (spec §4.7 step 5);
    /// callers must only pass a cutoff at or before the advanced watermark.
    pub async fn delete_replicated_before(&self, table: &TableSchema, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let client = self.pool.get().await.map_err(|e| StorageError::Connection(e.to_string()))?;
        client
            .execute(&format!("DELETE FROM {} WHERE ts_ms <= $1", table.name), &[&cutoff])
            .await
            .map_err(|e| StorageError::ConstraintViolation { table: table.name.to_string(), detail: e.to_string() })
    }
}

/// Long-retention store (spec §6.2): no TTL, fed exclusively by the
/// replicator's hot→cold copy.
pub struct ColdStore {
    pool: Pool,
}

impl ColdStore {
    pub async fn connect(settings: PoolSettings) -> Result<Self, StorageError> {
        let pool = build_pool(&settings)?;
        {
            let client = pool.get().await.map_err(|e| StorageError::Connection(e.to_string()))?;
            client.execute("SELECT 1", &[]).await.map_err(|e| StorageError::Connection(e.to_string()))?;
        }
        ensure_schema(&pool, None).await?;
        info!("cold store connected and schema ensured");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub async fn insert_batch(&self, records: &[Record]) -> Result<u64, StorageError> {
        insert_batch(&self.pool, records).await
    }

    /// Subset of `keys` already present in `table`, used for the anti-join
    /// against hot before copying (spec §4.7 step 2).
    pub async fn existing_dedup_keys(&self, table: &TableSchema, keys: &[String]) -> Result<HashSet<String>, StorageError> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let client = self.pool.get().await.map_err(|e| StorageError::Connection(e.to_string()))?;
        let sql = format!("SELECT dedup_key FROM {} WHERE dedup_key = ANY($1)", table.name);
        let rows = client.query(&sql, &[&keys]).await.map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }

    /// Inserts pre-fetched hot rows verbatim (spec §4.7 step 3); idempotent
    /// via `ON CONFLICT (dedup_key) DO NOTHING`, same as the live write path.
    pub async fn insert_copied_rows(&self, table: &TableSchema, rows: &[CopyRow]) -> Result<u64, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let client = self.pool.get().await.map_err(|e| StorageError::Connection(e.to_string()))?;
        let col_names: Vec<&str> = table.columns.iter().map(|c| c.name).collect();
        let placeholders: Vec<String> =
            table.columns.iter().enumerate().map(|(i, c)| format!("${}::text::{}", i + 1, c.sql_type)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT (dedup_key) DO NOTHING",
            table.name,
            col_names.join(", "),
            placeholders.join(", ")
        );
        let mut written = 0u64;
        for row in rows {
            let params: Vec<&(dyn ToSql + Sync)> = row.values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
            let n = client
                .execute(&sql, &params)
                .await
                .map_err(|e| StorageError::ConstraintViolation { table: table.name.to_string(), detail: e.to_string() })?;
            written += n;
        }
        Ok(written)
    }
}

/// One hot row captured for copying, every column in `table.columns` order
/// text-cast so the same shape works across tables (spec §4.7 step 2).
#[derive(Debug, Clone)]
pub struct CopyRow {
    pub ts_ms: DateTime<Utc>,
    pub dedup_key: String,
    pub values: Vec<Option<String>>,
}

/// Optional `MIGRATION_*` partition filters (spec §4.7 scheduling); `None`
/// matches everything.
#[derive(Debug, Clone, Copy)]
pub struct CopyWindow<'a> {
    pub lo: DateTime<Utc>,
    pub hi: DateTime<Utc>,
    pub limit: i64,
    pub exchange: Option<&'a str>,
    pub market_type: Option<&'a str>,
    pub symbol_prefix: Option<&'a str>,
}

async fn max_ts_ms(pool: &Pool, table: &TableSchema) -> Result<Option<DateTime<Utc>>, StorageError> {
    let client = pool.get().await.map_err(|e| StorageError::Connection(e.to_string()))?;
    let row = client
        .query_one(&format!("SELECT max(ts_ms) FROM {}", table.name), &[])
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;
    Ok(row.get(0))
}

async fn select_for_copy(pool: &Pool, table: &TableSchema, window: CopyWindow<'_>) -> Result<Vec<CopyRow>, StorageError> {
    let dedup_idx = table.columns.iter().position(|c| c.name == "dedup_key").expect("every table has a dedup_key column");
    let cols_text: Vec<String> = table.columns.iter().map(|c| format!("{}::text", c.name)).collect();
    let sql = format!(
        "SELECT ts_ms, {} FROM {} \
         WHERE ts_ms > $1 AND ts_ms <= $2 \
           AND ($4::text IS NULL OR exchange = $4) \
           AND ($5::text IS NULL OR market_type = $5) \
           AND ($6::text IS NULL OR symbol LIKE $6 || '%') \
         ORDER BY ts_ms ASC LIMIT $3",
        cols_text.join(", "),
        table.name
    );
    let client = pool.get().await.map_err(|e| StorageError::Connection(e.to_string()))?;
    let rows = client
        .query(&sql, &[&window.lo, &window.hi, &window.limit, &window.exchange, &window.market_type, &window.symbol_prefix])
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let ts_ms: DateTime<Utc> = row.get(0);
            let values: Vec<Option<String>> = (0..table.columns.len()).map(|i| row.get(i + 1)).collect();
            let dedup_key = values[dedup_idx].clone().unwrap_or_default();
            CopyRow { ts_ms, dedup_key, values }
        })
        .collect())
}

async fn insert_batch(pool: &Pool, records: &[Record]) -> Result<u64, StorageError> {
    if records.is_empty() {
        return Ok(0);
    }
    let client = pool.get().await.map_err(|e| StorageError::Connection(e.to_string()))?;
    let mut written = 0u64;
    for record in records {
        let Some(table) = table_for(record.data_type()) else { continue };
        let envelope = record.envelope();
        let ts = chrono::DateTime::from_timestamp_millis(envelope.ts_ms).ok_or_else(|| StorageError::ConstraintViolation {
            table: table.name.to_string(),
            detail: format!("invalid ts_ms {}", envelope.ts_ms),
        })?;
        let dedup_key = record.dedup_key();

        let result = match record {
            Record::OrderbookSnapshot(r) => {
                let bids = serde_json::to_value(&r.bids).map_err(json_err(table))?;
                let asks = serde_json::to_value(&r.asks).map_err(json_err(table))?;
                client
                    .execute(
                        "INSERT INTO orderbooks (ts_ms, exchange, market_type, symbol, last_update_id, bids_count, asks_count, best_bid_price, best_ask_price, best_bid_quantity, best_ask_quantity, bids, asks, data_source, dedup_key) \
                         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15) ON CONFLICT (dedup_key) DO NOTHING",
                        &[
                            &ts,
                            &envelope.exchange,
                            &envelope.market_type.as_str(),
                            &envelope.symbol,
                            &(r.last_update_id as i64),
                            &(r.bids.len() as i32),
                            &(r.asks.len() as i32),
                            &r.best_bid.map(|l| l.price),
                            &r.best_ask.map(|l| l.price),
                            &r.best_bid.map(|l| l.quantity),
                            &r.best_ask.map(|l| l.quantity),
                            &bids,
                            &asks,
                            &envelope.data_source,
                            &dedup_key,
                        ],
                    )
                    .await
            }
            Record::Trade(r) => {
                client
                    .execute(
                        "INSERT INTO trades (ts_ms, exchange, market_type, symbol, trade_id, price, quantity, side, is_maker, trade_ts, data_source, dedup_key) \
                         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12) ON CONFLICT (dedup_key) DO NOTHING",
                        &[
                            &ts,
                            &envelope.exchange,
                            &envelope.market_type.as_str(),
                            &envelope.symbol,
                            &r.trade_id,
                            &r.price,
                            &r.quantity,
                            &r.side.as_str(),
                            &r.is_maker,
                            &chrono::DateTime::from_timestamp_millis(r.trade_ts_ms),
                            &envelope.data_source,
                            &dedup_key,
                        ],
                    )
                    .await
            }
            Record::FundingRate(r) => {
                client
                    .execute(
                        "INSERT INTO funding_rates (ts_ms, exchange, market_type, symbol, funding_rate, funding_ts, next_funding_ts, mark_price, index_price, data_source, dedup_key) \
                         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11) ON CONFLICT (dedup_key) DO NOTHING",
                        &[
                            &ts,
                            &envelope.exchange,
                            &envelope.market_type.as_str(),
                            &envelope.symbol,
                            &r.funding_rate,
                            &chrono::DateTime::from_timestamp_millis(r.funding_ts_ms),
                            &chrono::DateTime::from_timestamp_millis(r.next_funding_ts_ms),
                            &r.mark_price,
                            &r.index_price,
                            &envelope.data_source,
                            &dedup_key,
                        ],
                    )
                    .await
            }
            Record::OpenInterest(r) => {
                client
                    .execute(
                        "INSERT INTO open_interests (ts_ms, exchange, market_type, symbol, open_interest, open_interest_value, count, data_source, dedup_key) \
                         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) ON CONFLICT (dedup_key) DO NOTHING",
                        &[
                            &ts,
                            &envelope.exchange,
                            &envelope.market_type.as_str(),
                            &envelope.symbol,
                            &r.open_interest,
                            &r.open_interest_value,
                            &r.count.map(|c| c as i64),
                            &envelope.data_source,
                            &dedup_key,
                        ],
                    )
                    .await
            }
            Record::Liquidation(r) => {
                client
                    .execute(
                        "INSERT INTO liquidations (ts_ms, exchange, market_type, symbol, side, price, quantity, liquidation_ts, data_source, dedup_key) \
                         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10) ON CONFLICT (dedup_key) DO NOTHING",
                        &[
                            &ts,
                            &envelope.exchange,
                            &envelope.market_type.as_str(),
                            &envelope.symbol,
                            &r.side.as_str(),
                            &r.price,
                            &r.quantity,
                            &chrono::DateTime::from_timestamp_millis(r.liquidation_ts_ms),
                            &envelope.data_source,
                            &dedup_key,
                        ],
                    )
                    .await
            }
            Record::LsrTopPosition(r) => {
                client
                    .execute(
                        "INSERT INTO lsr_top_positions (ts_ms, exchange, market_type, symbol, long_position_ratio, short_position_ratio, period, data_source, dedup_key) \
                         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) ON CONFLICT (dedup_key) DO NOTHING",
                        &[
                            &ts,
                            &envelope.exchange,
                            &envelope.market_type.as_str(),
                            &envelope.symbol,
                            &r.long_position_ratio,
                            &r.short_position_ratio,
                            &r.period,
                            &envelope.data_source,
                            &dedup_key,
                        ],
                    )
                    .await
            }
            Record::LsrAllAccount(r) => {
                client
                    .execute(
                        "INSERT INTO lsr_all_accounts (ts_ms, exchange, market_type, symbol, long_account_ratio, short_account_ratio, period, data_source, dedup_key) \
                         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) ON CONFLICT (dedup_key) DO NOTHING",
                        &[
                            &ts,
                            &envelope.exchange,
                            &envelope.market_type.as_str(),
                            &envelope.symbol,
                            &r.long_account_ratio,
                            &r.short_account_ratio,
                            &r.period,
                            &envelope.data_source,
                            &dedup_key,
                        ],
                    )
                    .await
            }
            Record::VolatilityIndex(r) => {
                let maturity = r
                    .maturity_date
                    .as_ref()
                    .map(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d"))
                    .transpose()
                    .map_err(|e| StorageError::ConstraintViolation { table: table.name.to_string(), detail: e.to_string() })?;
                client
                    .execute(
                        "INSERT INTO volatility_indices (ts_ms, exchange, market_type, symbol, index_value, underlying_asset, maturity_date, data_source, dedup_key) \
                         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) ON CONFLICT (dedup_key) DO NOTHING",
                        &[
                            &ts,
                            &envelope.exchange,
                            &envelope.market_type.as_str(),
                            &envelope.symbol,
                            &r.index_value,
                            &r.underlying_asset,
                            &maturity,
                            &envelope.data_source,
                            &dedup_key,
                        ],
                    )
                    .await
            }
            Record::OrderbookDelta(_) => continue,
        };

        result.map_err(|e| StorageError::ConstraintViolation { table: table.name.to_string(), detail: e.to_string() })?;
        written += 1;
    }
    Ok(written)
}

fn json_err(table: &TableSchema) -> impl Fn(serde_json::Error) -> StorageError + '_ {
    move |e| StorageError::ConstraintViolation { table: table.name.to_string(), detail: e.to_string() }
}

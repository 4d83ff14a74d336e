//! Replication watermark audit table (spec §4.7 step 4): one row per data
//! type, advanced only forward so reruns with the same bounds are a no-op.

use crate::StorageError;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;

pub struct WatermarkStore<'a> {
    pool: &'a Pool,
}

impl<'a> WatermarkStore<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    pub async fn ensure_table(&self) -> Result<(), StorageError> {
        let client = self.pool.get().await.map_err(|e| StorageError::Connection(e.to_string()))?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS replication_watermarks (\n\
                     data_type TEXT PRIMARY KEY,\n\
                     watermark TIMESTAMPTZ NOT NULL,\n\
                     updated_at TIMESTAMPTZ NOT NULL DEFAULT now()\n\
                 );",
            )
            .await
            .map_err(|e| StorageError::SchemaMismatch { table: "replication_watermarks".to_string(), detail: e.to_string() })
    }

    pub async fn get(&self, data_type: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let client = self.pool.get().await.map_err(|e| StorageError::Connection(e.to_string()))?;
        let rows = client
            .query("SELECT watermark FROM replication_watermarks WHERE data_type = $1", &[&data_type])
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(rows.first().map(|r| r.get(0)))
    }

    /// Only moves the watermark forward; a rerun that computes an earlier or
    /// equal bound leaves the stored value untouched.
    pub async fn advance(&self, data_type: &str, watermark: DateTime<Utc>) -> Result<(), StorageError> {
        let client = self.pool.get().await.map_err(|e| StorageError::Connection(e.to_string()))?;
        client
            .execute(
                "INSERT INTO replication_watermarks (data_type, watermark) VALUES ($1, $2) \
                 ON CONFLICT (data_type) DO UPDATE SET \
                     watermark = GREATEST(replication_watermarks.watermark, EXCLUDED.watermark), \
                     updated_at = now()",
                &[&data_type, &watermark],
            )
            .await
            .map(|_| ())
            .map_err(|e| StorageError::ConstraintViolation { table: "replication_watermarks".to_string(), detail: e.to_string() })
    }
}


//! The eight table schemas (spec §6.3). Hot and cold stores build the exact
//! same [`TableSchema`] for a given type; only the TTL differs, enforced as a
//! scheduled delete rather than an engine-native expiry (Postgres has none —
//! see DESIGN.md for why tokio-postgres stays the storage driver here).

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub default: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    pub order_by: &'static [&'static str],
    pub partition_by: &'static [&'static str],
}

impl TableSchema {
    /// DDL for this table; `ttl_days` adds a comment only — Postgres has no
    /// native column TTL, so expiry is a deliberate deleted-by-job policy
    /// (see [`crate::client::HotStore::enforce_ttl`]).
    pub fn create_table_sql(&self, ttl_days: Option<u32>) -> String {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| match c.default {
                Some(d) => format!("    {} {} DEFAULT {}", c.name, c.sql_type, d),
                None => format!("    {} {}", c.name, c.sql_type),
            })
            .collect();
        let ttl_comment = match ttl_days {
            Some(days) => format!("-- ttl_days={days}, enforced by scheduled cleanup, not engine TTL\n"),
            None => "-- long-retention: no scheduled cleanup\n".to_string(),
        };
        format!(
            "{ttl_comment}CREATE TABLE IF NOT EXISTS {} (\n{}\n);\n\
             CREATE INDEX IF NOT EXISTS {}_order_idx ON {} ({});\n\
             CREATE UNIQUE INDEX IF NOT EXISTS {}_dedup_idx ON {} (dedup_key);",
            self.name,
            cols.join(",\n"),
            self.name,
            self.name,
            self.order_by.join(", "),
            self.name,
            self.name,
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaEquivalenceError {
    #[error("column count differs: hot has {hot}, cold has {cold}")]
    ColumnCountMismatch { hot: usize, cold: usize },
    #[error("column {index} differs: hot={hot:?} cold={cold:?}")]
    ColumnMismatch { index: usize, hot: ColumnDef, cold: ColumnDef },
    #[error("order-by keys differ: hot={hot:?} cold={cold:?}")]
    OrderByMismatch { hot: Vec<&'static str>, cold: Vec<&'static str> },
}

/// Schema-equivalence rule (spec §6.3, CI-enforceable): column names, types,
/// defaults, and ORDER BY keys must be identical; only TTL may differ.
pub fn assert_equivalent(hot: &TableSchema, cold: &TableSchema) -> Result<(), SchemaEquivalenceError> {
    if hot.columns.len() != cold.columns.len() {
        return Err(SchemaEquivalenceError::ColumnCountMismatch {
            hot: hot.columns.len(),
            cold: cold.columns.len(),
        });
    }
    for (i, (h, c)) in hot.columns.iter().zip(cold.columns.iter()).enumerate() {
        if h != c {
            return Err(SchemaEquivalenceError::ColumnMismatch { index: i, hot: *h, cold: *c });
        }
    }
    if hot.order_by != cold.order_by {
        return Err(SchemaEquivalenceError::OrderByMismatch {
            hot: hot.order_by.to_vec(),
            cold: cold.order_by.to_vec(),
        });
    }
    Ok(())
}

pub const ORDERBOOKS: TableSchema = TableSchema {
    name: "orderbooks",
    columns: &[
        ColumnDef { name: "ts_ms", sql_type: "TIMESTAMPTZ", default: None },
        ColumnDef { name: "exchange", sql_type: "TEXT", default: None },
        ColumnDef { name: "market_type", sql_type: "TEXT", default: None },
        ColumnDef { name: "symbol", sql_type: "TEXT", default: None },
        ColumnDef { name: "last_update_id", sql_type: "BIGINT", default: None },
        ColumnDef { name: "bids_count", sql_type: "INTEGER", default: None },
        ColumnDef { name: "asks_count", sql_type: "INTEGER", default: None },
        ColumnDef { name: "best_bid_price", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "best_ask_price", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "best_bid_quantity", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "best_ask_quantity", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "bids", sql_type: "JSONB", default: None },
        ColumnDef { name: "asks", sql_type: "JSONB", default: None },
        ColumnDef { name: "dedup_key", sql_type: "TEXT", default: None },
        ColumnDef { name: "data_source", sql_type: "TEXT", default: Some("'marketprism'") },
        ColumnDef { name: "created_at", sql_type: "TIMESTAMPTZ", default: Some("now()") },
    ],
    order_by: &["ts_ms", "exchange", "symbol", "last_update_id"],
    partition_by: &["exchange"],
};

pub const TRADES: TableSchema = TableSchema {
    name: "trades",
    columns: &[
        ColumnDef { name: "ts_ms", sql_type: "TIMESTAMPTZ", default: None },
        ColumnDef { name: "exchange", sql_type: "TEXT", default: None },
        ColumnDef { name: "market_type", sql_type: "TEXT", default: None },
        ColumnDef { name: "symbol", sql_type: "TEXT", default: None },
        ColumnDef { name: "trade_id", sql_type: "TEXT", default: None },
        ColumnDef { name: "price", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "quantity", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "side", sql_type: "TEXT", default: None },
        ColumnDef { name: "is_maker", sql_type: "BOOLEAN", default: None },
        ColumnDef { name: "trade_ts", sql_type: "TIMESTAMPTZ", default: None },
        ColumnDef { name: "dedup_key", sql_type: "TEXT", default: None },
        ColumnDef { name: "data_source", sql_type: "TEXT", default: Some("'marketprism'") },
        ColumnDef { name: "created_at", sql_type: "TIMESTAMPTZ", default: Some("now()") },
    ],
    order_by: &["ts_ms", "exchange", "symbol", "trade_id"],
    partition_by: &["exchange"],
};

pub const FUNDING_RATES: TableSchema = TableSchema {
    name: "funding_rates",
    columns: &[
        ColumnDef { name: "ts_ms", sql_type: "TIMESTAMPTZ", default: None },
        ColumnDef { name: "exchange", sql_type: "TEXT", default: None },
        ColumnDef { name: "market_type", sql_type: "TEXT", default: None },
        ColumnDef { name: "symbol", sql_type: "TEXT", default: None },
        ColumnDef { name: "funding_rate", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "funding_ts", sql_type: "TIMESTAMPTZ", default: None },
        ColumnDef { name: "next_funding_ts", sql_type: "TIMESTAMPTZ", default: None },
        ColumnDef { name: "mark_price", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "index_price", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "dedup_key", sql_type: "TEXT", default: None },
        ColumnDef { name: "data_source", sql_type: "TEXT", default: Some("'marketprism'") },
        ColumnDef { name: "created_at", sql_type: "TIMESTAMPTZ", default: Some("now()") },
    ],
    order_by: &["ts_ms", "exchange", "symbol", "funding_ts"],
    partition_by: &["exchange"],
};

pub const OPEN_INTERESTS: TableSchema = TableSchema {
    name: "open_interests",
    columns: &[
        ColumnDef { name: "ts_ms", sql_type: "TIMESTAMPTZ", default: None },
        ColumnDef { name: "exchange", sql_type: "TEXT", default: None },
        ColumnDef { name: "market_type", sql_type: "TEXT", default: None },
        ColumnDef { name: "symbol", sql_type: "TEXT", default: None },
        ColumnDef { name: "open_interest", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "open_interest_value", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "count", sql_type: "BIGINT", default: None },
        ColumnDef { name: "dedup_key", sql_type: "TEXT", default: None },
        ColumnDef { name: "data_source", sql_type: "TEXT", default: Some("'marketprism'") },
        ColumnDef { name: "created_at", sql_type: "TIMESTAMPTZ", default: Some("now()") },
    ],
    order_by: &["ts_ms", "exchange", "symbol"],
    partition_by: &["exchange"],
};

pub const LIQUIDATIONS: TableSchema = TableSchema {
    name: "liquidations",
    columns: &[
        ColumnDef { name: "ts_ms", sql_type: "TIMESTAMPTZ", default: None },
        ColumnDef { name: "exchange", sql_type: "TEXT", default: None },
        ColumnDef { name: "market_type", sql_type: "TEXT", default: None },
        ColumnDef { name: "symbol", sql_type: "TEXT", default: None },
        ColumnDef { name: "side", sql_type: "TEXT", default: None },
        ColumnDef { name: "price", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "quantity", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "liquidation_ts", sql_type: "TIMESTAMPTZ", default: None },
        ColumnDef { name: "dedup_key", sql_type: "TEXT", default: None },
        ColumnDef { name: "data_source", sql_type: "TEXT", default: Some("'marketprism'") },
        ColumnDef { name: "created_at", sql_type: "TIMESTAMPTZ", default: Some("now()") },
    ],
    order_by: &["ts_ms", "exchange", "symbol"],
    partition_by: &["exchange"],
};

pub const LSR_TOP_POSITIONS: TableSchema = TableSchema {
    name: "lsr_top_positions",
    columns: &[
        ColumnDef { name: "ts_ms", sql_type: "TIMESTAMPTZ", default: None },
        ColumnDef { name: "exchange", sql_type: "TEXT", default: None },
        ColumnDef { name: "market_type", sql_type: "TEXT", default: None },
        ColumnDef { name: "symbol", sql_type: "TEXT", default: None },
        ColumnDef { name: "long_position_ratio", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "short_position_ratio", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "period", sql_type: "TEXT", default: None },
        ColumnDef { name: "dedup_key", sql_type: "TEXT", default: None },
        ColumnDef { name: "data_source", sql_type: "TEXT", default: Some("'marketprism'") },
        ColumnDef { name: "created_at", sql_type: "TIMESTAMPTZ", default: Some("now()") },
    ],
    order_by: &["ts_ms", "exchange", "symbol", "period"],
    partition_by: &["exchange"],
};

pub const LSR_ALL_ACCOUNTS: TableSchema = TableSchema {
    name: "lsr_all_accounts",
    columns: &[
        ColumnDef { name: "ts_ms", sql_type: "TIMESTAMPTZ", default: None },
        ColumnDef { name: "exchange", sql_type: "TEXT", default: None },
        ColumnDef { name: "market_type", sql_type: "TEXT", default: None },
        ColumnDef { name: "symbol", sql_type: "TEXT", default: None },
        ColumnDef { name: "long_account_ratio", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "short_account_ratio", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "period", sql_type: "TEXT", default: None },
        ColumnDef { name: "dedup_key", sql_type: "TEXT", default: None },
        ColumnDef { name: "data_source", sql_type: "TEXT", default: Some("'marketprism'") },
        ColumnDef { name: "created_at", sql_type: "TIMESTAMPTZ", default: Some("now()") },
    ],
    order_by: &["ts_ms", "exchange", "symbol", "period"],
    partition_by: &["exchange"],
};

pub const VOLATILITY_INDICES: TableSchema = TableSchema {
    name: "volatility_indices",
    columns: &[
        ColumnDef { name: "ts_ms", sql_type: "TIMESTAMPTZ", default: None },
        ColumnDef { name: "exchange", sql_type: "TEXT", default: None },
        ColumnDef { name: "market_type", sql_type: "TEXT", default: None },
        ColumnDef { name: "symbol", sql_type: "TEXT", default: None },
        ColumnDef { name: "index_value", sql_type: "NUMERIC(24,8)", default: None },
        ColumnDef { name: "underlying_asset", sql_type: "TEXT", default: None },
        ColumnDef { name: "maturity_date", sql_type: "DATE", default: None },
        ColumnDef { name: "dedup_key", sql_type: "TEXT", default: None },
        ColumnDef { name: "data_source", sql_type: "TEXT", default: Some("'marketprism'") },
        ColumnDef { name: "created_at", sql_type: "TIMESTAMPTZ", default: Some("now()") },
    ],
    order_by: &["ts_ms", "exchange", "symbol"],
    partition_by: &["exchange"],
};

pub const ALL_TABLES: [TableSchema; 8] = [
    ORDERBOOKS,
    TRADES,
    FUNDING_RATES,
    OPEN_INTERESTS,
    LIQUIDATIONS,
    LSR_TOP_POSITIONS,
    LSR_ALL_ACCOUNTS,
    VOLATILITY_INDICES,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_and_cold_schemas_are_identical_by_construction() {
        for table in ALL_TABLES {
            assert_eq!(assert_equivalent(&table, &table), Ok(()));
        }
    }

    #[test]
    fn mismatched_order_by_is_detected() {
        let mut cold = TRADES.clone();
        cold.order_by = &["ts_ms", "symbol"];
        assert!(matches!(
            assert_equivalent(&TRADES, &cold),
            Err(SchemaEquivalenceError::OrderByMismatch { .. })
        ));
    }

    #[test]
    fn ddl_mentions_ttl_policy() {
        let ddl = TRADES.create_table_sql(Some(3));
        assert!(ddl.contains("ttl_days=3"));
        let ddl_cold = TRADES.create_table_sql(None);
        assert!(ddl_cold.contains("long-retention"));
    }
}

//! Hot and cold columnar stores (spec §6). The schema module defines the
//! eight persisted tables; the client module wraps deadpool-postgres pools
//! around them the way the teacher's `data_writer::DataWriter` does.

pub mod client;
pub mod schema;
pub mod watermark;

pub use client::{table_for, ColdStore, CopyRow, CopyWindow, HotStore, PoolSettings};
pub use marketprism_protocol::error::StorageError;
pub use schema::{assert_equivalent, ColumnDef, TableSchema, ALL_TABLES};
pub use watermark::WatermarkStore;

//! Grouped, append-only columnar table store.
//!
//! This crate persists in-memory tables into a store made of groups of named
//! tables and reads them back:
//!
//! - In-memory tables with explicit per-column type tags (`table` module).
//! - Schema inference and the persisted column contract (`schema` module).
//! - Same-kind compatibility checks run before every append
//!   (`schema_compat` module).
//! - The store handle, the write path and single/multi-store reads with an
//!   event-key filter and a tolerant mode (`store` module).
//! - Filesystem primitives and on-disk layout (`storage` module).
//!
//! Non-fatal conditions (text truncation, skipped inputs) are returned as
//! [`Advisory`] values and also logged through the `log` facade. The library
//! never installs a logger.
#![deny(missing_docs)]
pub mod advisory;
pub mod compression;
pub mod schema;
pub mod schema_compat;
pub mod storage;
pub mod store;
pub mod table;

pub use advisory::{Advisory, ReadOutcome, SkipReason, WriteReport};
pub use compression::Compression;
pub use schema::{ColumnDescriptor, SchemaField, TableSchema, infer_schema};
pub use schema_compat::{CastError, check_castable};
pub use store::{
    ReadError, ReadOptions, StoreError, StoreFile, WriteError, WriteOptions, read_many, read_one,
};
pub use table::{ColumnType, NumericType, Table, TableError};

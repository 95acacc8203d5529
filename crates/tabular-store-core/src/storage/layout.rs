//! On-disk layout helpers for a store root.
//!
//! All *relative* path conventions live here:
//! - the store manifest (`_store.json`),
//! - one directory per group, one sub-directory per table,
//! - the table metadata file (`<group>/<table>/_table.json`),
//! - row blocks (`<group>/<table>/data/<zero-padded>.parquet`).
//!
//! Callers join these with a [`crate::storage::StorageLocation`] before doing IO.

use std::path::PathBuf;

/// Name of the manifest file that marks a directory as a store.
pub const STORE_MANIFEST_FILE_NAME: &str = "_store.json";

/// Name of the per-table metadata file.
pub const TABLE_META_FILE_NAME: &str = "_table.json";

/// Directory (under a table) holding the row blocks.
pub const DATA_DIR_NAME: &str = "data";

/// Number of digits used in zero-padded block file names.
pub const BLOCK_FILENAME_DIGITS: usize = 10;

/// Relative path: `_store.json`
pub fn manifest_rel_path() -> PathBuf {
    PathBuf::from(STORE_MANIFEST_FILE_NAME)
}

/// Relative path: `<group>/`
pub fn group_rel_dir(group: &str) -> PathBuf {
    PathBuf::from(group)
}

/// Relative path: `<group>/<table>/`
pub fn table_rel_dir(group: &str, table: &str) -> PathBuf {
    group_rel_dir(group).join(table)
}

/// Relative path: `<group>/<table>/_table.json`
pub fn table_meta_rel_path(group: &str, table: &str) -> PathBuf {
    table_rel_dir(group, table).join(TABLE_META_FILE_NAME)
}

/// Block path relative to its table directory: `data/<zero-padded>.parquet`
pub fn block_table_rel_path(sequence: u64) -> String {
    format!(
        "{DATA_DIR_NAME}/{:0width$}.parquet",
        sequence,
        width = BLOCK_FILENAME_DIGITS
    )
}

/// Relative path (from the store root) of a block listed in table metadata.
pub fn block_rel_path(group: &str, table: &str, block_path: &str) -> PathBuf {
    table_rel_dir(group, table).join(block_path)
}

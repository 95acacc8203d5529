//! Write path: group/table creation plus append.
//!
//! Flow of [`StoreFile::write`]:
//! - validate the index hint against the incoming columns (nothing is touched
//!   on failure),
//! - create the group and, on first write, the table with an inferred schema,
//! - for non-empty input, check compatibility, conform the rows to the
//!   persisted layout and write them as a new block,
//! - commit the table metadata (block list, row count, index hint).
//!
//! A block is written with create-new semantics before the metadata that
//! lists it, so an interrupted append leaves at most an unlisted block file
//! behind and the table stays readable.

use std::collections::BTreeSet;

use arrow::error::ArrowError;
use log::debug;
use parquet::errors::ParquetError;
use snafu::prelude::*;

use crate::{
    advisory::WriteReport,
    compression::Compression,
    schema::{DEFAULT_MAX_TEXT_LENGTH, infer_schema},
    schema_compat::{CastError, check_castable},
    storage::{self, StorageError, layout},
    store::{
        BlockMeta, INDEX_HINT_ATTR, StoreError, StoreFile, StoreLocation, TableMeta, block,
        validate_name,
    },
    table::Table,
};

/// Errors raised by [`StoreFile::write`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum WriteError {
    /// The incoming table cannot be stored in the existing table.
    #[snafu(display("Cannot append to {location}: {source}"))]
    SchemaMismatch {
        /// Destination table.
        location: StoreLocation,
        /// Which rule was violated.
        source: CastError,
    },

    /// The index hint names columns that the incoming table does not have.
    #[snafu(display("Columns to index {missing:?} not found in table"))]
    UnknownIndexColumns {
        /// Hinted columns absent from the incoming table.
        missing: Vec<String>,
    },

    /// Store-level failure (group/table creation, metadata commit).
    #[snafu(display("Store error: {source}"))]
    Store {
        /// Underlying store error.
        source: StoreError,
    },

    /// Writing the row block failed.
    #[snafu(display("Failed to write block {path}: {source}"))]
    BlockStorage {
        /// Block path relative to the store root.
        path: String,
        /// Underlying storage error.
        source: StorageError,
    },

    /// Encoding the row block failed.
    #[snafu(display("Failed to encode block for {location}: {source}"))]
    Encode {
        /// Destination table.
        location: StoreLocation,
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// The incoming table lacks a column of the persisted schema.
    #[snafu(display("Column {column} is missing from the incoming table"))]
    MissingColumn {
        /// Persisted column absent from the incoming table.
        column: String,
    },

    /// Converting a column to its persisted type failed.
    #[snafu(display("Failed to convert column {column}: {source}"))]
    Convert {
        /// Column being converted.
        column: String,
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// Assembling the converted columns into a block failed.
    #[snafu(display("Failed to assemble block: {source}"))]
    Assemble {
        /// Underlying Arrow error.
        source: ArrowError,
    },
}

/// Options for [`StoreFile::write`].
///
/// `compression`, `description` and `max_text_length` only apply when the
/// write creates the table; appends to an existing table keep its settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOptions {
    /// Codec for the table's blocks.
    pub compression: Compression,
    /// Free-text description recorded on the table.
    pub description: String,
    /// Width of text columns, in bytes.
    pub max_text_length: usize,
    /// Columns to flag for downstream indexing.
    pub index_hint: Option<Vec<String>>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            description: String::new(),
            max_text_length: DEFAULT_MAX_TEXT_LENGTH,
            index_hint: None,
        }
    }
}

impl WriteOptions {
    /// Set the compression.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the text column width.
    pub fn with_max_text_length(mut self, max_text_length: usize) -> Self {
        self.max_text_length = max_text_length;
        self
    }

    /// Set the index hint.
    pub fn with_index_hint<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.index_hint = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

impl StoreFile {
    /// Append `table` to `group/name`, creating the group and table as needed.
    ///
    /// On first write the table's schema is inferred from `table`. Later
    /// writes must carry the same column-name set with castable types;
    /// otherwise [`WriteError::SchemaMismatch`] is returned and nothing is
    /// appended. A zero-row table only ensures that the group and table exist.
    pub async fn write(
        &mut self,
        table: &Table,
        group: &str,
        name: &str,
        options: &WriteOptions,
    ) -> Result<WriteReport, WriteError> {
        if let Some(hint) = &options.index_hint {
            let missing: Vec<String> = hint
                .iter()
                .filter(|c| !table.has_column(c))
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            ensure!(missing.is_empty(), UnknownIndexColumnsSnafu { missing });
        }
        validate_name("group", group).context(StoreSnafu)?;
        validate_name("table", name).context(StoreSnafu)?;

        let location = self.store_location(group, name);
        let mut report = WriteReport {
            created_group: self.create_group(group).await.context(StoreSnafu)?,
            ..WriteReport::default()
        };

        let mut meta = if self.has_table(group, name) {
            self.table_meta(group, name).await.context(StoreSnafu)?
        } else {
            let meta = TableMeta::new(
                infer_schema(table, options.max_text_length),
                options.description.clone(),
                options.compression,
            );
            self.create_table(group, name, &meta)
                .await
                .context(StoreSnafu)?;
            report.created_table = true;
            meta
        };
        let mut dirty = false;

        if table.num_rows() > 0 {
            report.advisories = check_castable(table, &meta.schema).context(SchemaMismatchSnafu {
                location: location.clone(),
            })?;

            let (batch, out_of_range) = block::conform(table, &meta.schema)?;
            report.advisories.extend(out_of_range);
            let bytes = block::encode(&batch, meta.compression).context(EncodeSnafu {
                location: location.clone(),
            })?;

            let block_path = self.write_block(group, name, &meta, &bytes).await?;
            let rows = table.num_rows();
            meta.blocks.push(BlockMeta {
                path: block_path,
                row_count: rows as u64,
            });
            meta.row_count += rows as u64;
            report.rows_written = rows;
            dirty = true;
        }

        if let Some(hint) = &options.index_hint {
            meta.attrs
                .insert(INDEX_HINT_ATTR.to_string(), serde_json::json!(hint));
            dirty = true;
        }

        if dirty {
            self.commit_table_meta(group, name, &meta)
                .await
                .context(StoreSnafu)?;
        }

        debug!(
            "wrote {} rows to {location} ({} total)",
            report.rows_written, meta.row_count
        );
        Ok(report)
    }

    /// Write `bytes` as the next block of `group/name`.
    ///
    /// Sequence numbers already taken on disk (unlisted leftovers of an
    /// interrupted append) are skipped.
    async fn write_block(
        &self,
        group: &str,
        name: &str,
        meta: &TableMeta,
        bytes: &[u8],
    ) -> Result<String, WriteError> {
        let mut sequence = meta.blocks.len() as u64 + 1;
        loop {
            let block_path = layout::block_table_rel_path(sequence);
            let rel = layout::block_rel_path(group, name, &block_path);
            match storage::write_new(self.storage_location(), &rel, bytes).await {
                Ok(()) => return Ok(block_path),
                Err(StorageError::AlreadyExists { .. }) => {
                    debug!("block {} already exists, skipping", rel.display());
                    sequence += 1;
                }
                Err(source) => {
                    return Err(source).context(BlockStorageSnafu {
                        path: rel.display().to_string(),
                    });
                }
            }
        }
    }
}

//! Read path: single-store and multi-store reads.
//!
//! Every read opens its own [`StoreFile`] and drops it before returning, on
//! success and on failure alike. Rows come back in on-disk order (blocks in
//! append order, rows in block order), optionally restricted to the rows
//! whose `event` value is in a key filter.
//!
//! In tolerant mode (`ignore_errors`) a missing store, a missing table or a
//! corrupted store is not an error: the input is skipped and reported as an
//! [`Advisory::Skipped`]. Any other failure propagates in both modes.

use std::{collections::HashSet, path::Path};

use arrow::{compute::concat_batches, error::ArrowError};
use log::{debug, warn};
use snafu::prelude::*;

use crate::{
    advisory::{Advisory, ReadOutcome, SkipReason},
    storage::{StorageError, layout},
    store::{StoreError, StoreFile, StoreLocation, block},
    table::{Table, TableError},
};

/// Name of the column a key filter selects on.
pub const EVENT_COLUMN: &str = "event";

/// Errors raised by [`read_one`] and [`read_many`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReadError {
    /// The store does not exist.
    #[snafu(display("Store not found: {path}"))]
    StoreNotFound {
        /// Requested store path.
        path: String,
        /// Underlying store error.
        source: StoreError,
    },

    /// The store exists but does not hold the requested table.
    #[snafu(display("Table not found: {location}"))]
    TableNotFound {
        /// Requested table.
        location: StoreLocation,
    },

    /// Store metadata or a block could not be decoded.
    #[snafu(display("Store {path} is corrupted: {detail}"))]
    StoreCorrupted {
        /// Store path.
        path: String,
        /// What is wrong.
        detail: String,
    },

    /// A key filter was given but the table has no `event` column.
    #[snafu(display("{location} has no event column to filter on"))]
    MissingEventColumn {
        /// Table being read.
        location: StoreLocation,
    },

    /// Every input of a multi-file read was skipped.
    #[snafu(display("No table could be loaded from {inputs} input(s)"))]
    NothingLoaded {
        /// Number of inputs given.
        inputs: usize,
    },

    /// The loaded tables differ in column names, or a column is text in one
    /// input and numeric in another.
    #[snafu(display("Inputs of a multi-file read do not share a schema: {source}"))]
    IncompatibleInputs {
        /// Underlying concatenation error.
        source: TableError,
    },

    /// Other store-level failure (I/O errors other than a missing store).
    #[snafu(display("Store error while reading: {source}"))]
    Store {
        /// Underlying store error.
        source: StoreError,
    },

    /// Other storage failure while reading a block.
    #[snafu(display("Storage error while reading: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// Decoding a block into Arrow arrays failed.
    #[snafu(display("Arrow error while reading: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// Building the resulting table failed.
    #[snafu(display("Failed to assemble table: {source}"))]
    Table {
        /// Underlying table error.
        source: TableError,
    },
}

impl ReadError {
    /// Why a tolerant read may skip this failure, or `None` if it must
    /// propagate regardless of mode.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            ReadError::StoreNotFound { .. } => Some(SkipReason::Missing),
            ReadError::TableNotFound { .. } => Some(SkipReason::TableNotFound),
            ReadError::StoreCorrupted { .. } => Some(SkipReason::Corrupted),
            _ => None,
        }
    }
}

impl From<StoreError> for ReadError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::StoreNotFound { path, source } => ReadError::StoreNotFound {
                path: path.clone(),
                source: StoreError::StoreNotFound { path, source },
            },
            StoreError::TableNotFound { location } => ReadError::TableNotFound { location },
            StoreError::StoreCorrupted { path, detail, .. } => {
                ReadError::StoreCorrupted { path, detail }
            }
            other => ReadError::Store { source: other },
        }
    }
}

/// Options for [`read_one`] and [`read_many`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Only return rows whose `event` value is in this list.
    pub key_filter: Option<Vec<i64>>,
    /// Skip missing or corrupted inputs instead of failing.
    pub ignore_errors: bool,
}

impl ReadOptions {
    /// Restrict the read to the given event keys.
    pub fn with_key_filter(mut self, keys: impl IntoIterator<Item = i64>) -> Self {
        self.key_filter = Some(keys.into_iter().collect());
        self
    }

    /// Enable or disable tolerant mode.
    pub fn with_ignore_errors(mut self, ignore_errors: bool) -> Self {
        self.ignore_errors = ignore_errors;
        self
    }
}

/// Read `group/table` from the store at `path`.
///
/// The value is `None` only when tolerant mode skipped the input; the
/// advisory explaining why is attached to the outcome.
pub async fn read_one(
    path: impl AsRef<Path>,
    group: &str,
    table: &str,
    options: &ReadOptions,
) -> Result<ReadOutcome<Option<Table>>, ReadError> {
    let path = path.as_ref();
    match load_table(path, group, table, options).await {
        Ok(loaded) => Ok(ReadOutcome::clean(Some(loaded))),
        Err(err) => match err.skip_reason() {
            Some(reason) if options.ignore_errors => {
                let advisory = Advisory::Skipped {
                    path: path.display().to_string(),
                    reason,
                };
                warn!("{advisory}");
                Ok(ReadOutcome {
                    value: None,
                    advisories: vec![advisory],
                })
            }
            _ => Err(err),
        },
    }
}

/// Read `group/table` from every store in `paths` and concatenate the results
/// in input order.
///
/// Columns are matched by name; numeric columns whose types differ between
/// inputs are widened to a common type (see [`Table::concat`]). Skipped
/// inputs (tolerant mode) contribute an advisory and no rows. Fails with
/// [`ReadError::NothingLoaded`] when no input produced a table.
pub async fn read_many<I, P>(
    paths: I,
    group: &str,
    table: &str,
    options: &ReadOptions,
) -> Result<ReadOutcome<Table>, ReadError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut inputs = 0usize;
    let mut tables = Vec::new();
    let mut advisories = Vec::new();

    for path in paths {
        inputs += 1;
        let outcome = read_one(path, group, table, options).await?;
        advisories.extend(outcome.advisories);
        tables.extend(outcome.value);
    }

    ensure!(!tables.is_empty(), NothingLoadedSnafu { inputs });
    let value = Table::concat(&tables).context(IncompatibleInputsSnafu)?;

    debug!(
        "loaded {} rows of {group}/{table} from {} of {inputs} input(s)",
        value.num_rows(),
        tables.len()
    );
    Ok(ReadOutcome { value, advisories })
}

async fn load_table(
    path: &Path,
    group: &str,
    table: &str,
    options: &ReadOptions,
) -> Result<Table, ReadError> {
    let store = StoreFile::open(path).await?;
    let meta = store.table_meta(group, table).await?;

    let keys: Option<HashSet<i64>> = match &options.key_filter {
        None => None,
        Some(keys) => {
            ensure!(
                meta.schema.field(EVENT_COLUMN).is_some(),
                MissingEventColumnSnafu {
                    location: store.store_location(group, table),
                }
            );
            Some(keys.iter().copied().collect())
        }
    };

    let mut batches = Vec::with_capacity(meta.blocks.len());
    for block_meta in &meta.blocks {
        let rel = layout::block_rel_path(group, table, &block_meta.path);
        let batch = block::load(
            store.storage_location(),
            &rel,
            &meta.schema,
            keys.as_ref().map(|k| (EVENT_COLUMN, k)),
        )
        .await?;
        batches.push(batch);
    }

    let batch = concat_batches(&meta.schema.decoded_arrow_schema(), &batches).context(ArrowSnafu)?;
    Table::try_new(batch).context(TableSnafu)
}

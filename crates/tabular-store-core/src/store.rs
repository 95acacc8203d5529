//! Grouped table store.
//!
//! A store is a root directory marked by a `_store.json` manifest. The
//! manifest lists the groups and, per group, the tables that exist; each
//! table keeps its own `_table.json` (schema, description, compression,
//! attributes, and the ordered list of row blocks) next to a `data/`
//! directory of Parquet blocks.
//!
//! [`StoreFile`] is the open handle. Writers own one across many calls
//! ([`StoreFile::write`]); readers go through [`read_one`] / [`read_many`],
//! which open and release their own handle per input.
//!
//! Metadata files are always replaced atomically. A table's metadata is the
//! source of truth for which blocks belong to it: blocks are written first
//! (create-new) and only become visible once the metadata listing them has
//! been committed.

mod block;
pub mod error;
mod read;
mod write;

#[cfg(test)]
pub(crate) mod test_util;

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

pub use error::StoreError;
pub use read::{EVENT_COLUMN, ReadError, ReadOptions, read_many, read_one};
pub use write::{WriteError, WriteOptions};

use crate::{
    compression::Compression,
    schema::TableSchema,
    storage::{self, StorageError, StorageLocation, layout},
};
use error::{
    InvalidNameSnafu, SerializeSnafu, StorageSnafu, StoreAlreadyExistsSnafu, StoreCorruptedSnafu,
    StoreNotFoundSnafu, TableNotFoundSnafu,
};

/// Current on-disk format version of stores and tables.
///
/// Bumped only on breaking changes to the JSON metadata layout.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Attribute key under which a table's index hint is recorded.
pub const INDEX_HINT_ATTR: &str = "columns_to_index";

/// Identifies a persisted table: store path, group and table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreLocation {
    /// Store root.
    pub path: PathBuf,
    /// Group name.
    pub group: String,
    /// Table name.
    pub table: String,
}

impl StoreLocation {
    /// Build a location from its parts.
    pub fn new(path: impl Into<PathBuf>, group: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            group: group.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:/{}/{}", self.path.display(), self.group, self.table)
    }
}

/// One appended block of rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockMeta {
    /// Path of the Parquet file relative to the table directory.
    pub path: String,
    /// Rows in the block.
    pub row_count: u64,
}

/// Metadata of a persisted table (`_table.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableMeta {
    /// Column contract fixed at creation.
    pub schema: TableSchema,
    /// Free-text description given at creation.
    pub description: String,
    /// Codec used for every block of this table.
    pub compression: Compression,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// On-disk format version.
    pub format_version: u32,
    /// Total rows across all blocks.
    pub row_count: u64,
    /// Blocks in append order.
    pub blocks: Vec<BlockMeta>,
    /// Free-form attributes (for example the index hint).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, serde_json::Value>,
}

impl TableMeta {
    /// Metadata for a freshly created, empty table.
    pub fn new(schema: TableSchema, description: impl Into<String>, compression: Compression) -> Self {
        Self {
            schema,
            description: description.into(),
            compression,
            created_at: Utc::now(),
            format_version: STORE_FORMAT_VERSION,
            row_count: 0,
            blocks: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    /// Columns flagged for downstream indexing, if a hint was recorded.
    pub fn index_hint(&self) -> Option<Vec<String>> {
        self.attrs
            .get(INDEX_HINT_ATTR)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Store manifest (`_store.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct StoreManifest {
    format_version: u32,
    created_at: DateTime<Utc>,
    #[serde(default)]
    groups: BTreeMap<String, BTreeSet<String>>,
}

impl StoreManifest {
    fn new() -> Self {
        Self {
            format_version: STORE_FORMAT_VERSION,
            created_at: Utc::now(),
            groups: BTreeMap::new(),
        }
    }
}

fn validate_name(what: &'static str, name: &str) -> Result<(), StoreError> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.starts_with('_') || name.starts_with('.') {
        Some("must not start with '_' or '.'")
    } else if name.contains(['/', '\\']) {
        Some("must not contain path separators")
    } else {
        None
    };

    match reason {
        Some(reason) => InvalidNameSnafu {
            what,
            name,
            reason,
        }
        .fail(),
        None => Ok(()),
    }
}

/// Open handle on a store.
#[derive(Debug, Clone)]
pub struct StoreFile {
    location: StorageLocation,
    manifest: StoreManifest,
}

impl StoreFile {
    /// Create a new, empty store at `path`.
    ///
    /// Fails with [`StoreError::StoreAlreadyExists`] if a store is already there.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let location = StorageLocation::local(path);
        let manifest = StoreManifest::new();
        let json = serde_json::to_vec_pretty(&manifest).context(SerializeSnafu {
            what: "store manifest",
        })?;

        match storage::write_new(&location, &layout::manifest_rel_path(), &json).await {
            Ok(()) => {}
            Err(source @ StorageError::AlreadyExists { .. }) => {
                return Err(source).context(StoreAlreadyExistsSnafu {
                    path: location.root().display().to_string(),
                });
            }
            Err(source) => return Err(StoreError::Storage { source }),
        }

        debug!("created store at {}", location.root().display());
        Ok(Self { location, manifest })
    }

    /// Open an existing store at `path`.
    ///
    /// A missing manifest, including one below a path that runs through a
    /// plain file, is [`StoreError::StoreNotFound`]. A plain file at `path`
    /// itself or an unreadable manifest (bad JSON, unknown format version) is
    /// [`StoreError::StoreCorrupted`].
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let location = StorageLocation::local(path);
        let root = location.root().display().to_string();

        let json = match storage::read_all_bytes(&location, &layout::manifest_rel_path()).await {
            Ok(s) => s,
            Err(source @ StorageError::NotFound { .. }) => {
                // A plain file where a store root is expected.
                if tokio::fs::metadata(location.root())
                    .await
                    .is_ok_and(|m| !m.is_dir())
                {
                    return StoreCorruptedSnafu {
                        path: root,
                        detail: "not a store directory",
                    }
                    .fail();
                }
                return Err(source).context(StoreNotFoundSnafu { path: root });
            }
            Err(source) => return Err(StoreError::Storage { source }),
        };

        let manifest: StoreManifest = serde_json::from_slice(&json).map_err(|e| {
            StoreCorruptedSnafu {
                path: root.clone(),
                detail: format!("unreadable store manifest: {e}"),
            }
            .build()
        })?;

        ensure!(
            manifest.format_version == STORE_FORMAT_VERSION,
            StoreCorruptedSnafu {
                path: root,
                detail: format!(
                    "unsupported format version {} (expected {STORE_FORMAT_VERSION})",
                    manifest.format_version
                ),
            }
        );

        Ok(Self { location, manifest })
    }

    /// Open the store at `path`, creating it if it does not exist.
    pub async fn open_or_create(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        match Self::open(&path).await {
            Ok(store) => Ok(store),
            Err(StoreError::StoreNotFound { .. }) => Self::create(path).await,
            Err(e) => Err(e),
        }
    }

    /// Root path of the store.
    pub fn path(&self) -> &Path {
        self.location.root()
    }

    /// Group names, sorted.
    pub fn groups(&self) -> impl Iterator<Item = &str> + '_ {
        self.manifest.groups.keys().map(String::as_str)
    }

    /// Table names in `group`, sorted; `None` if the group does not exist.
    pub fn tables(&self, group: &str) -> Option<impl Iterator<Item = &str> + '_> {
        self.manifest
            .groups
            .get(group)
            .map(|tables| tables.iter().map(String::as_str))
    }

    /// Whether `group` exists.
    pub fn has_group(&self, group: &str) -> bool {
        self.manifest.groups.contains_key(group)
    }

    /// Whether `group/table` exists.
    pub fn has_table(&self, group: &str, table: &str) -> bool {
        self.manifest
            .groups
            .get(group)
            .is_some_and(|tables| tables.contains(table))
    }

    /// Create `group` if it does not exist. Returns whether it was created.
    pub async fn create_group(&mut self, group: &str) -> Result<bool, StoreError> {
        if self.has_group(group) {
            return Ok(false);
        }
        validate_name("group", group)?;

        storage::create_dir_all(&self.location, &layout::group_rel_dir(group))
            .await
            .context(StorageSnafu)?;

        let mut manifest = self.manifest.clone();
        manifest.groups.insert(group.to_string(), BTreeSet::new());
        self.commit_manifest(manifest).await?;

        debug!("created group {group} in {}", self.path().display());
        Ok(true)
    }

    /// Load the metadata of `group/table`.
    pub async fn table_meta(&self, group: &str, table: &str) -> Result<TableMeta, StoreError> {
        ensure!(
            self.has_table(group, table),
            TableNotFoundSnafu {
                location: self.store_location(group, table),
            }
        );

        let rel = layout::table_meta_rel_path(group, table);
        let json = match storage::read_all_bytes(&self.location, &rel).await {
            Ok(s) => s,
            Err(StorageError::NotFound { .. }) => {
                return StoreCorruptedSnafu {
                    path: self.path().display().to_string(),
                    detail: format!("table {group}/{table} is listed but has no metadata"),
                }
                .fail();
            }
            Err(source) => return Err(StoreError::Storage { source }),
        };

        serde_json::from_slice(&json).map_err(|e| {
            StoreCorruptedSnafu {
                path: self.path().display().to_string(),
                detail: format!("unreadable metadata for table {group}/{table}: {e}"),
            }
            .build()
        })
    }

    /// Record an attribute on `group/table`, replacing any previous value.
    pub async fn set_table_attr(
        &self,
        group: &str,
        table: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut meta = self.table_meta(group, table).await?;
        meta.attrs.insert(key.to_string(), value);
        self.commit_table_meta(group, table, &meta).await
    }

    /// Register a new table with the given metadata. The group must exist.
    pub(crate) async fn create_table(
        &mut self,
        group: &str,
        table: &str,
        meta: &TableMeta,
    ) -> Result<(), StoreError> {
        validate_name("table", table)?;
        self.commit_table_meta(group, table, meta).await?;

        let mut manifest = self.manifest.clone();
        manifest
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(table.to_string());
        self.commit_manifest(manifest).await?;

        debug!(
            "created table {} with schema {}",
            self.store_location(group, table),
            meta.schema
        );
        Ok(())
    }

    /// Atomically replace the metadata of `group/table`.
    pub(crate) async fn commit_table_meta(
        &self,
        group: &str,
        table: &str,
        meta: &TableMeta,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(meta).context(SerializeSnafu {
            what: "table metadata",
        })?;
        storage::write_atomic(
            &self.location,
            &layout::table_meta_rel_path(group, table),
            &json,
        )
        .await
        .context(StorageSnafu)
    }

    async fn commit_manifest(&mut self, manifest: StoreManifest) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&manifest).context(SerializeSnafu {
            what: "store manifest",
        })?;
        storage::write_atomic(&self.location, &layout::manifest_rel_path(), &json)
            .await
            .context(StorageSnafu)?;
        self.manifest = manifest;
        Ok(())
    }

    pub(crate) fn storage_location(&self) -> &StorageLocation {
        &self.location
    }

    pub(crate) fn store_location(&self, group: &str, table: &str) -> StoreLocation {
        StoreLocation::new(self.path(), group, table)
    }
}

//! Errors raised by the store handle.
//!
//! The write and read paths wrap these in their own error types
//! ([`WriteError`](super::WriteError), [`ReadError`](super::ReadError)).

use snafu::{Backtrace, prelude::*};

use crate::{storage::StorageError, store::StoreLocation};

/// Errors raised while opening or updating a store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    /// No store manifest at the given path.
    #[snafu(display("Store not found: {path}"))]
    StoreNotFound {
        /// Store root that was probed.
        path: String,
        /// Underlying storage error.
        source: StorageError,
    },

    /// A store manifest already exists at the given path.
    #[snafu(display("Store already exists: {path}"))]
    StoreAlreadyExists {
        /// Store root.
        path: String,
        /// Underlying storage error.
        source: StorageError,
    },

    /// The store exists but its metadata cannot be understood.
    #[snafu(display("Store {path} is corrupted: {detail}"))]
    StoreCorrupted {
        /// Store root.
        path: String,
        /// What is wrong.
        detail: String,
        /// Backtrace at the point of detection.
        backtrace: Backtrace,
    },

    /// The group or the table does not exist.
    #[snafu(display("Table not found: {location}"))]
    TableNotFound {
        /// Requested table.
        location: StoreLocation,
    },

    /// A group or table name cannot be used.
    #[snafu(display("Invalid {what} name {name:?}: {reason}"))]
    InvalidName {
        /// `"group"` or `"table"`.
        what: &'static str,
        /// Offending name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Storage layer failure.
    #[snafu(display("Storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// Metadata could not be serialized.
    #[snafu(display("Failed to serialize {what}: {source}"))]
    Serialize {
        /// Which document.
        what: &'static str,
        /// Underlying serde error.
        source: serde_json::Error,
    },
}

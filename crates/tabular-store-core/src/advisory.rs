//! Non-fatal diagnostics returned alongside results.
//!
//! Writes and tolerant reads can succeed while still having something worth
//! reporting (text that will be truncated, numbers that do not fit the
//! persisted column type, an input file that was skipped).
//! Those conditions are collected as [`Advisory`] values on the returned
//! report so callers and tests can inspect them directly; each one is also
//! emitted through `log::warn!` at the point it is raised.

use std::fmt;

/// Why a read input was skipped in tolerant mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The store path does not exist (or is not a store).
    Missing,
    /// The store exists but does not contain the requested table.
    TableNotFound,
    /// The store or one of the table's blocks could not be decoded.
    Corrupted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Missing => f.write_str("does not exist"),
            SkipReason::TableNotFound => f.write_str("does not contain the requested table"),
            SkipReason::Corrupted => f.write_str("corrupted"),
        }
    }
}

/// A non-fatal condition raised during a write or read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// A text column holds values longer than the persisted column width.
    /// They are stored truncated.
    TextTruncated {
        /// Column name.
        column: String,
        /// Longest value in the incoming column, in bytes.
        longest: usize,
        /// Declared width of the persisted column, in bytes.
        width: usize,
    },

    /// Numeric values that do not fit the persisted column type. They are
    /// stored as null.
    ValueOutOfRange {
        /// Column name.
        column: String,
        /// Number of values stored as null.
        count: usize,
    },

    /// An input was skipped by a tolerant read.
    Skipped {
        /// Store path that was skipped.
        path: String,
        /// Why it was skipped.
        reason: SkipReason,
    },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::TextTruncated {
                column,
                longest,
                width,
            } => write!(
                f,
                "column {column} contains strings longer than allowed ({longest} > {width} bytes)"
            ),
            Advisory::ValueOutOfRange { column, count } => write!(
                f,
                "column {column} has {count} values out of range for its stored type, stored as null"
            ),
            Advisory::Skipped { path, reason } => write!(f, "skipped {path}: {reason}"),
        }
    }
}

/// Outcome of a write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteReport {
    /// The group did not exist and was created by this call.
    pub created_group: bool,
    /// The table did not exist and was created by this call.
    pub created_table: bool,
    /// Rows appended by this call.
    pub rows_written: usize,
    /// Non-fatal conditions raised while writing.
    pub advisories: Vec<Advisory>,
}

/// Outcome of a read: the value plus any advisories.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome<T> {
    /// What was read.
    pub value: T,
    /// Non-fatal conditions raised while reading.
    pub advisories: Vec<Advisory>,
}

impl<T> ReadOutcome<T> {
    /// Wrap a value with no advisories.
    pub fn clean(value: T) -> Self {
        Self {
            value,
            advisories: Vec::new(),
        }
    }

    /// Drop the advisories and keep the value.
    pub fn into_value(self) -> T {
        self.value
    }
}

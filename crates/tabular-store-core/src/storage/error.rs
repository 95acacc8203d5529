//! Storage error types.
//!
//! Every failure names the filesystem path involved and, for generic I/O
//! failures, the step of the store protocol that failed. Missing paths are
//! classified separately so callers can tell "no such store/table/block"
//! apart from a broken disk.

use std::{fmt, io};

use snafu::{Backtrace, IntoError, prelude::*};

/// Step of a storage primitive that hit an I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    /// Creating a group, table or data directory.
    CreateDir,
    /// Writing (and syncing) a metadata document or block.
    Write,
    /// Renaming a finished temporary file over its target.
    Rename,
    /// Reading a metadata document or block.
    Read,
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            StorageOp::CreateDir => "create directory",
            StorageOp::Write => "write",
            StorageOp::Rename => "rename into",
            StorageOp::Read => "read",
        };
        f.write_str(verb)
    }
}

/// Errors raised by the filesystem primitives in [`crate::storage`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The path, or one of its parents, does not exist or is not a
    /// directory.
    #[snafu(display("No such file: {path}"))]
    NotFound {
        /// Absolute path that was looked up.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
        /// Where the error was raised.
        backtrace: Backtrace,
    },

    /// A create-new write found the file already present.
    #[snafu(display("Refusing to overwrite {path}"))]
    AlreadyExists {
        /// Absolute path of the existing file.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
        /// Where the error was raised.
        backtrace: Backtrace,
    },

    /// Any other I/O failure.
    #[snafu(display("Failed to {op} {path}: {source}"))]
    Io {
        /// Which step failed.
        op: StorageOp,
        /// Absolute path involved.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
        /// Where the error was raised.
        backtrace: Backtrace,
    },
}

impl StorageError {
    /// Path the error refers to.
    pub fn path(&self) -> &str {
        match self {
            StorageError::NotFound { path, .. }
            | StorageError::AlreadyExists { path, .. }
            | StorageError::Io { path, .. } => path,
        }
    }
}

/// Classify a read-side I/O error: a missing path, or a path component that
/// is a plain file, is [`StorageError::NotFound`].
pub(crate) fn classify_read(op: StorageOp, path: String, e: io::Error) -> StorageError {
    match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => {
            NotFoundSnafu { path }.into_error(e)
        }
        _ => IoSnafu { op, path }.into_error(e),
    }
}

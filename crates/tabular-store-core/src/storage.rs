//! Filesystem access for a store root.
//!
//! Every byte that reaches disk goes through this module. It maps a store
//! root plus a relative path to an absolute location and provides the small
//! set of primitives the store needs:
//!
//! - Atomic replacement of metadata files (write-then-rename).
//! - Create-new writes for row blocks, so a block is written exactly once.
//! - Whole-file reads and a cheap head/tail probe used to reject files that
//!   cannot be Parquet before handing them to the decoder.
//!
//! Only the local filesystem is supported. Higher layers (`store`) work with
//! relative paths from [`layout`] and never concatenate strings themselves.

pub mod error;
pub mod layout;

use std::{
    io::{self, SeekFrom},
    path::{Path, PathBuf},
};

use snafu::{IntoError, prelude::*};
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};

pub use error::{StorageError, StorageOp};
use error::{AlreadyExistsSnafu, IoSnafu, NotFoundSnafu, classify_read};

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Physical root of a store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageLocation {
    /// A store rooted at a directory on the local filesystem.
    Local(PathBuf),
}

impl StorageLocation {
    /// Creates a new `StorageLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        StorageLocation::Local(root.into())
    }

    /// Root path of the location.
    pub fn root(&self) -> &Path {
        match self {
            StorageLocation::Local(root) => root,
        }
    }
}

fn join_local(location: &StorageLocation, rel: &Path) -> PathBuf {
    match location {
        StorageLocation::Local(root) => root.join(rel),
    }
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent).await.context(IoSnafu {
            op: StorageOp::CreateDir,
            path: parent.display().to_string(),
        })?;
    }
    Ok(())
}

/// Guard that removes a temporary file on drop unless disarmed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Create `rel_dir` (and any missing parents) inside `location`.
pub async fn create_dir_all(location: &StorageLocation, rel_dir: &Path) -> StorageResult<()> {
    let abs = join_local(location, rel_dir);
    fs::create_dir_all(&abs).await.context(IoSnafu {
        op: StorageOp::CreateDir,
        path: abs.display().to_string(),
    })
}

/// Write `contents` to `rel_path` inside `location`, replacing any existing
/// file atomically.
///
/// The payload is written to a sibling `.tmp` file, synced, and renamed into
/// place. Readers observe either the old or the new contents, never a mix.
pub async fn write_atomic(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    create_parent_dir(&abs).await?;

    let tmp_path = abs.with_extension("tmp");
    let tmp_str = tmp_path.display().to_string();
    let mut guard = TempFileGuard::new(tmp_path.clone());

    {
        let mut file = fs::File::create(&tmp_path).await.context(IoSnafu {
            op: StorageOp::Write,
            path: tmp_str.clone(),
        })?;
        file.write_all(contents).await.context(IoSnafu {
            op: StorageOp::Write,
            path: tmp_str.clone(),
        })?;
        file.sync_all().await.context(IoSnafu {
            op: StorageOp::Write,
            path: tmp_str,
        })?;
    }

    fs::rename(&tmp_path, &abs).await.context(IoSnafu {
        op: StorageOp::Rename,
        path: abs.display().to_string(),
    })?;

    guard.disarm();
    Ok(())
}

/// Create a *new* file at `rel_path` and write `contents`, failing with
/// [`StorageError::AlreadyExists`] if the file is already there.
pub async fn write_new(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    create_parent_dir(&abs).await?;

    let path_str = abs.display().to_string();

    let open_result = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&abs)
        .await;

    let mut file = match open_result {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(AlreadyExistsSnafu { path: path_str }.into_error(e));
        }
        Err(e) => {
            return Err(IoSnafu {
                op: StorageOp::Write,
                path: path_str,
            }
            .into_error(e));
        }
    };

    file.write_all(contents).await.context(IoSnafu {
        op: StorageOp::Write,
        path: path_str.clone(),
    })?;
    file.sync_all().await.context(IoSnafu {
        op: StorageOp::Write,
        path: path_str,
    })?;

    Ok(())
}

/// Read the full contents of the file at `rel_path`.
///
/// A missing file, or a parent path that is not a directory, yields
/// [`StorageError::NotFound`]; everything else is [`StorageError::Io`].
pub async fn read_all_bytes(location: &StorageLocation, rel_path: &Path) -> StorageResult<Vec<u8>> {
    let abs = join_local(location, rel_path);
    fs::read(&abs)
        .await
        .map_err(|e| classify_read(StorageOp::Read, abs.display().to_string(), e))
}

/// Length plus first and last 4 bytes of a file.
#[derive(Debug)]
pub struct FileHeadTail4 {
    /// Length of the file in bytes.
    pub len: u64,
    /// First 4 bytes of the file (zero-filled if the file is shorter).
    pub head: [u8; 4],
    /// Last 4 bytes of the file (zero-filled if the file is shorter than 8 bytes).
    pub tail: [u8; 4],
}

/// Probe the length, first 4 bytes and last 4 bytes of the file at `rel_path`.
///
/// Missing paths, directories and other non-regular files are reported as
/// [`StorageError::NotFound`].
pub async fn read_head_tail_4(
    location: &StorageLocation,
    rel_path: &Path,
) -> StorageResult<FileHeadTail4> {
    let abs = join_local(location, rel_path);
    let path_str = abs.display().to_string();

    let meta = fs::metadata(&abs)
        .await
        .map_err(|e| classify_read(StorageOp::Read, path_str.clone(), e))?;
    if !meta.is_file() {
        let not_file = io::Error::other("not a regular file");
        return Err(NotFoundSnafu { path: path_str }.into_error(not_file));
    }

    let len = meta.len();

    let read_failed = IoSnafu {
        op: StorageOp::Read,
        path: path_str,
    };
    let mut file = fs::File::open(&abs).await.context(read_failed.clone())?;

    let mut head = [0u8; 4];
    let mut tail = [0u8; 4];

    if len >= 4 {
        file.read_exact(&mut head).await.context(read_failed.clone())?;
    }

    if len >= 8 {
        file.seek(SeekFrom::End(-4)).await.context(read_failed.clone())?;
        file.read_exact(&mut tail).await.context(read_failed)?;
    }

    Ok(FileHeadTail4 { len, head, tail })
}

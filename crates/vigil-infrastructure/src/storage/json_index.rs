//! Whole-document JSON index files (session index, milestone index).
//!
//! The document is a JSON array. Writes go through a temp file, fsync and
//! rename, so readers never see a half-written index. Read-modify-write is
//! unlocked unless locking is enabled, in which case an exclusive advisory
//! lock on `<name>.lock` serializes it across processes.

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use vigil_core::repository::{IndexEntry, IndexRepository, IndexUpdate};
use vigil_core::{Result as VigilResult, VigilError};

/// Errors that can occur during index file operations.
#[derive(Debug)]
pub enum IndexFileError {
    /// File I/O error.
    IoError(std::io::Error),
    /// JSON serialization/deserialization error.
    JsonError(serde_json::Error),
    /// File locking error.
    LockError(String),
}

impl std::fmt::Display for IndexFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexFileError::IoError(e) => write!(f, "I/O error: {}", e),
            IndexFileError::JsonError(e) => write!(f, "JSON error: {}", e),
            IndexFileError::LockError(e) => write!(f, "Lock error: {}", e),
        }
    }
}

impl std::error::Error for IndexFileError {}

impl From<std::io::Error> for IndexFileError {
    fn from(e: std::io::Error) -> Self {
        IndexFileError::IoError(e)
    }
}

impl From<serde_json::Error> for IndexFileError {
    fn from(e: serde_json::Error) -> Self {
        IndexFileError::JsonError(e)
    }
}

impl From<IndexFileError> for VigilError {
    fn from(e: IndexFileError) -> Self {
        match e {
            IndexFileError::IoError(e) => e.into(),
            IndexFileError::JsonError(e) => e.into(),
            IndexFileError::LockError(message) => VigilError::io(message),
        }
    }
}

/// A handle to a JSON array file.
pub struct JsonIndexFile<T> {
    path: PathBuf,
    locking: bool,
    _phantom: PhantomData<T>,
}

impl<T> Clone for JsonIndexFile<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            locking: self.locking,
            _phantom: PhantomData,
        }
    }
}

impl<T> JsonIndexFile<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Creates an unlocked index handle.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            locking: false,
            _phantom: PhantomData,
        }
    }

    /// Enables or disables the exclusive lock around `update`.
    pub fn with_locking(mut self, locking: bool) -> Self {
        self.locking = locking;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads every entry. A missing or blank file is an empty index.
    pub fn load(&self) -> Result<Vec<T>, IndexFileError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)?;

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        Ok(serde_json::from_str(&content)?)
    }

    /// Replaces the whole document atomically.
    pub fn save(&self, entries: &[T]) -> Result<(), IndexFileError> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(entries)?;

        let tmp_path = self.get_temp_path()?;
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(json.as_bytes())?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }

    /// Read-modify-write of the whole document, locked if enabled.
    pub fn update<F>(&self, f: F) -> Result<(), IndexFileError>
    where
        F: FnOnce(&mut Vec<T>),
    {
        let _lock = if self.locking {
            Some(FileLock::acquire(&self.path)?)
        } else {
            None
        };

        let mut entries = self.load()?;
        f(&mut entries);
        self.save(&entries)
    }

    fn get_temp_path(&self) -> Result<PathBuf, IndexFileError> {
        let parent = self.path.parent().ok_or_else(|| {
            IndexFileError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Path has no parent directory",
            ))
        })?;

        let file_name = self.path.file_name().ok_or_else(|| {
            IndexFileError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Path has no file name",
            ))
        })?;

        // Per-process temp name: concurrent writers must not share one temp file.
        let tmp_name = format!(".{}.{}.tmp", file_name.to_string_lossy(), std::process::id());
        Ok(parent.join(tmp_name))
    }
}

/// Exclusive advisory lock held for the guard's lifetime.
struct FileLock {
    #[allow(dead_code)]
    file: File,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self, IndexFileError> {
        let lock_path = path.with_extension("lock");

        if let Some(parent) = lock_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        use fs2::FileExt;
        file.lock_exclusive()
            .map_err(|e| IndexFileError::LockError(format!("Failed to acquire lock: {}", e)))?;

        // The lock file is left in place; removing it would let a second
        // process lock a fresh inode while the first still holds the old one.
        Ok(FileLock { file })
    }
}

/// Async [`IndexRepository`] over a [`JsonIndexFile`].
///
/// File work runs on the blocking pool.
pub struct JsonIndexRepository<T> {
    file: JsonIndexFile<T>,
}

impl<T> JsonIndexRepository<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(file: JsonIndexFile<T>) -> Self {
        Self { file }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

async fn blocking<R, F>(f: F) -> VigilResult<R>
where
    F: FnOnce() -> Result<R, IndexFileError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VigilError::internal(format!("index task failed: {}", e)))?
        .map_err(VigilError::from)
}

#[async_trait]
impl<T> IndexRepository<T> for JsonIndexRepository<T>
where
    T: IndexEntry + Serialize + DeserializeOwned,
{
    async fn read(&self) -> VigilResult<Vec<T>> {
        let file = self.file.clone();
        blocking(move || file.load()).await
    }

    async fn write(&self, entries: Vec<T>) -> VigilResult<()> {
        let file = self.file.clone();
        blocking(move || file.save(&entries)).await
    }

    async fn update(&self, apply: IndexUpdate<T>) -> VigilResult<()> {
        let file = self.file.clone();
        blocking(move || file.update(apply)).await
    }
}

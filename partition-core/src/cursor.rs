use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::error::StoreError;
use crate::metrics_consts::CURSOR_COLD_STARTS;
use crate::store::StoreTransaction;

/// Default file used by `FileCursorStore`.
pub const DEFAULT_CURSOR_FILE: &str = "rr_index.txt";

/// Durable home of the round-robin cursor.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// The persisted cursor, or `None` when nothing usable is persisted (missing or corrupt).
    async fn load_cursor(&self) -> Result<Option<u64>, StoreError>;

    async fn save_cursor(&self, next_index: u64) -> Result<(), StoreError>;

    /// Forget the persisted cursor, so the next load reports `None`.
    async fn clear_cursor(&self) -> Result<(), StoreError>;

    /// Persist `next_index` as part of `tx`, so it commits or rolls back with the partition
    /// writes. Returns `false` when the cursor lives outside the record store, and the caller has
    /// to use `save_cursor` instead.
    async fn save_cursor_in(
        &self,
        _tx: &mut dyn StoreTransaction,
        _next_index: u64,
    ) -> Result<bool, StoreError> {
        Ok(false)
    }
}

/// Keeps the cursor as a decimal number in a text file. Writes go to a sibling temporary file
/// that is then renamed over the cursor file, so a crash never leaves a half-written value.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, error: std::io::Error) -> StoreError {
        StoreError::CursorIo {
            path: self.path.clone(),
            error,
        }
    }
}

impl Default for FileCursorStore {
    fn default() -> Self {
        Self::new(DEFAULT_CURSOR_FILE)
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load_cursor(&self) -> Result<Option<u64>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(self.io_error(error)),
        };

        match contents.trim().parse::<u64>() {
            Ok(next_index) => Ok(Some(next_index)),
            Err(_) => {
                warn!(
                    path = %self.path.display(),
                    "ignoring corrupt round-robin cursor file"
                );
                Ok(None)
            }
        }
    }

    async fn save_cursor(&self, next_index: u64) -> Result<(), StoreError> {
        let staging = self.path.with_extension("tmp");

        tokio::fs::write(&staging, next_index.to_string())
            .await
            .map_err(|error| self.io_error(error))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|error| self.io_error(error))
    }

    async fn clear_cursor(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(self.io_error(error)),
        }
    }
}

/// A cursor that only lives as long as the process. Meant for tests and embedders that
/// re-run the bulk partition on every start.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    value: Mutex<Option<u64>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load_cursor(&self) -> Result<Option<u64>, StoreError> {
        Ok(*self.value.lock().await)
    }

    async fn save_cursor(&self, next_index: u64) -> Result<(), StoreError> {
        *self.value.lock().await = Some(next_index);
        Ok(())
    }

    async fn clear_cursor(&self) -> Result<(), StoreError> {
        *self.value.lock().await = None;
        Ok(())
    }
}

/// The round-robin cursor: the position the next single insert will take in the cyclic sequence.
///
/// All access goes through `lock`, which hands out a guard for the whole read-increment-persist
/// sequence of one operation.
pub struct RoundRobinCursor {
    store: Mutex<Arc<dyn CursorStore>>,
}

impl RoundRobinCursor {
    pub fn new(store: Arc<dyn CursorStore>) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    pub async fn lock(&self) -> CursorGuard<'_> {
        CursorGuard {
            store: self.store.lock().await,
        }
    }

    /// Current cursor value, treating a missing or corrupt one as 0. Only looks: a missing cursor
    /// is not reported as a cold start until an insert actually resumes from it.
    pub async fn current(&self) -> Result<u64, StoreError> {
        Ok(self.lock().await.load().await?.unwrap_or(0))
    }
}

/// Exclusive access to the cursor for the duration of one partitioning operation.
pub struct CursorGuard<'a> {
    store: MutexGuard<'a, Arc<dyn CursorStore>>,
}

impl CursorGuard<'_> {
    /// The persisted value as is, `None` when missing or corrupt.
    pub async fn load(&self) -> Result<Option<u64>, StoreError> {
        self.store.load_cursor().await
    }

    pub async fn write(&self, next_index: u64) -> Result<(), StoreError> {
        self.store.save_cursor(next_index).await
    }

    /// Write `next_index` through `tx` if the cursor lives in the record store. See
    /// `CursorStore::save_cursor_in`.
    pub async fn write_in(
        &self,
        tx: &mut dyn StoreTransaction,
        next_index: u64,
    ) -> Result<bool, StoreError> {
        self.store.save_cursor_in(tx, next_index).await
    }

    /// Put back a value previously returned by `load`.
    pub async fn restore(&self, previous: Option<u64>) -> Result<(), StoreError> {
        match previous {
            Some(next_index) => self.store.save_cursor(next_index).await,
            None => self.store.clear_cursor().await,
        }
    }
}

/// Cold start: without a usable cursor the cycle restarts at partition 0.
pub(crate) fn resume_from(persisted: Option<u64>) -> u64 {
    match persisted {
        Some(next_index) => next_index,
        None => {
            warn!("round-robin cursor missing, resuming from partition 0");
            metrics::counter!(CURSOR_COLD_STARTS).increment(1);
            0
        }
    }
}

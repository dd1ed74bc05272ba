use async_trait::async_trait;
use tracing::warn;

use crate::error::StoreError;
use crate::types::{Record, StoredRecord, TableKind, TableSummary};

/// A durable collection of record tables that hands out transactions.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Open a transaction. Nothing done through it is visible to others until `commit`, and
    /// dropping it without committing discards every write.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// Table operations available inside one store transaction.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn table_exists(&mut self, name: &str) -> Result<bool, StoreError>;

    async fn create_table(&mut self, name: &str, kind: TableKind) -> Result<(), StoreError>;

    /// Drop a table, doing nothing if it does not exist.
    async fn drop_table(&mut self, name: &str) -> Result<(), StoreError>;

    /// Append records to a base table, which assigns their ids in slice order.
    async fn bulk_load(&mut self, name: &str, records: &[Record]) -> Result<u64, StoreError>;

    /// Append a single record to a base table and return it with its assigned id.
    async fn append(&mut self, name: &str, record: &Record) -> Result<StoredRecord, StoreError>;

    /// Insert an already identified record into a partition table.
    async fn insert_one(&mut self, name: &str, record: &StoredRecord) -> Result<(), StoreError>;

    /// Insert a batch of already identified records into a partition table.
    async fn copy_into(
        &mut self,
        name: &str,
        records: &[StoredRecord],
    ) -> Result<u64, StoreError>;

    async fn count(&mut self, name: &str) -> Result<u64, StoreError>;

    /// Up to `limit` records with an id strictly greater than `after`, in ascending id order.
    async fn scan_ordered(
        &mut self,
        name: &str,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, StoreError>;

    /// Names of the visible tables starting with `prefix`.
    async fn list_tables(&mut self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn summarize(&mut self, name: &str) -> Result<TableSummary, StoreError>;

    /// The round-robin cursor stored under `name`, if any.
    async fn load_cursor(&mut self, name: &str) -> Result<Option<u64>, StoreError>;

    async fn save_cursor(&mut self, name: &str, next_index: u64) -> Result<(), StoreError>;

    async fn clear_cursor(&mut self, name: &str) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Commit `tx` if `result` is a success, roll it back otherwise. A failed rollback is only logged:
/// the error that caused it is the one worth reporting.
pub(crate) async fn commit_or_rollback<T, E>(
    tx: Box<dyn StoreTransaction>,
    result: Result<T, E>,
) -> Result<T, E>
where
    E: From<StoreError>,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = tx.rollback().await {
                warn!("failed to roll back transaction: {}", rollback_error);
            }
            Err(error)
        }
    }
}

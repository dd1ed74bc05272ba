use std::sync::Arc;

use async_trait::async_trait;
use partition_core::{
    CursorStore, MemoryStore, Record, RecordStore, StoreError, StoreTransaction, StoredRecord,
    TableKind, TableSummary,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

#[allow(dead_code)]
pub async fn seed_base(store: &dyn RecordStore, table: &str, records: &[Record]) {
    let mut tx = store.begin().await.unwrap();
    tx.drop_table(table).await.unwrap();
    tx.create_table(table, TableKind::Base).await.unwrap();
    tx.bulk_load(table, records).await.unwrap();
    tx.commit().await.unwrap();
}

#[allow(dead_code)]
pub async fn read_all(store: &dyn RecordStore, table: &str) -> Vec<StoredRecord> {
    let mut tx = store.begin().await.unwrap();
    let records = tx.scan_ordered(table, None, usize::MAX).await.unwrap();
    tx.rollback().await.unwrap();
    records
}

#[allow(dead_code)]
pub async fn table_exists(store: &dyn RecordStore, table: &str) -> bool {
    let mut tx = store.begin().await.unwrap();
    let exists = tx.table_exists(table).await.unwrap();
    tx.rollback().await.unwrap();
    exists
}

// Scores every partition count cares about: the extremes, a few interior values and, for each
// n in 1..=10, every interior boundary k * 5 / n
#[allow(dead_code)]
pub fn boundary_scores() -> Vec<f64> {
    let mut scores = vec![0.0, 0.5, 1.0, 2.5, 3.5, 4.999, 5.0];
    for n in 1..=10 {
        let width = 5.0 / n as f64;
        for k in 1..n {
            scores.push(k as f64 * width);
        }
    }
    scores
}

#[allow(dead_code)]
pub fn random_records(count: usize, seed: u64) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            // Half-star ratings like the movielens data, plus the occasional arbitrary score
            let score = if rng.gen_bool(0.8) {
                f64::from(rng.gen_range(0..=10u8)) * 0.5
            } else {
                rng.gen_range(0.0..=5.0)
            };
            Record::new(i as i32, rng.gen_range(1..1000), score)
        })
        .collect()
}

/// Which operation a `FlakyStore` transaction should fail.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    // Writes into this table fail
    WriteTo(String),
    Commit,
}

/// A `MemoryStore` whose transactions fail on demand.
#[allow(dead_code)]
#[derive(Clone)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failure: Failure,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new(inner: MemoryStore, failure: Failure) -> Self {
        Self { inner, failure }
    }

    pub fn failing_writes_to(inner: MemoryStore, table: &str) -> Self {
        Self::new(inner, Failure::WriteTo(table.to_owned()))
    }

    pub fn failing_commits(inner: MemoryStore) -> Self {
        Self::new(inner, Failure::Commit)
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(FlakyTransaction {
            inner: self.inner.begin().await?,
            failure: self.failure.clone(),
        }))
    }
}

#[allow(dead_code)]
struct FlakyTransaction {
    inner: Box<dyn StoreTransaction>,
    failure: Failure,
}

impl FlakyTransaction {
    fn check_write(&self, name: &str) -> Result<(), StoreError> {
        match &self.failure {
            Failure::WriteTo(table) if table == name => Err(StoreError::QueryError {
                command: "INSERT".to_owned(),
                error: sqlx::Error::PoolTimedOut,
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl StoreTransaction for FlakyTransaction {
    async fn table_exists(&mut self, name: &str) -> Result<bool, StoreError> {
        self.inner.table_exists(name).await
    }

    async fn create_table(&mut self, name: &str, kind: TableKind) -> Result<(), StoreError> {
        self.inner.create_table(name, kind).await
    }

    async fn drop_table(&mut self, name: &str) -> Result<(), StoreError> {
        self.inner.drop_table(name).await
    }

    async fn bulk_load(&mut self, name: &str, records: &[Record]) -> Result<u64, StoreError> {
        self.check_write(name)?;
        self.inner.bulk_load(name, records).await
    }

    async fn append(&mut self, name: &str, record: &Record) -> Result<StoredRecord, StoreError> {
        self.check_write(name)?;
        self.inner.append(name, record).await
    }

    async fn insert_one(&mut self, name: &str, record: &StoredRecord) -> Result<(), StoreError> {
        self.check_write(name)?;
        self.inner.insert_one(name, record).await
    }

    async fn copy_into(
        &mut self,
        name: &str,
        records: &[StoredRecord],
    ) -> Result<u64, StoreError> {
        self.check_write(name)?;
        self.inner.copy_into(name, records).await
    }

    async fn count(&mut self, name: &str) -> Result<u64, StoreError> {
        self.inner.count(name).await
    }

    async fn scan_ordered(
        &mut self,
        name: &str,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        self.inner.scan_ordered(name, after, limit).await
    }

    async fn list_tables(&mut self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list_tables(prefix).await
    }

    async fn summarize(&mut self, name: &str) -> Result<TableSummary, StoreError> {
        self.inner.summarize(name).await
    }

    async fn load_cursor(&mut self, name: &str) -> Result<Option<u64>, StoreError> {
        self.inner.load_cursor(name).await
    }

    async fn save_cursor(&mut self, name: &str, next_index: u64) -> Result<(), StoreError> {
        self.inner.save_cursor(name, next_index).await
    }

    async fn clear_cursor(&mut self, name: &str) -> Result<(), StoreError> {
        self.inner.clear_cursor(name).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.failure == Failure::Commit {
            self.inner.rollback().await?;
            return Err(StoreError::TransactionError {
                command: "COMMIT".to_owned(),
                error: sqlx::Error::PoolTimedOut,
            });
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

/// A cursor store that cannot persist anything.
#[allow(dead_code)]
#[derive(Default)]
pub struct BrokenCursorStore;

#[async_trait]
impl CursorStore for BrokenCursorStore {
    async fn load_cursor(&self) -> Result<Option<u64>, StoreError> {
        Ok(None)
    }

    async fn save_cursor(&self, _next_index: u64) -> Result<(), StoreError> {
        Err(StoreError::CursorIo {
            path: "rr_index.txt".into(),
            error: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }

    async fn clear_cursor(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A cursor kept in a `MemoryStore` next to the partitions, written through the partitioning
/// transaction like `PgCursorStore` does.
#[allow(dead_code)]
pub struct StoreCursor {
    store: MemoryStore,
    name: String,
}

#[allow(dead_code)]
impl StoreCursor {
    pub fn new(store: MemoryStore, name: &str) -> Self {
        Self {
            store,
            name: name.to_owned(),
        }
    }
}

#[async_trait]
impl CursorStore for StoreCursor {
    async fn load_cursor(&self) -> Result<Option<u64>, StoreError> {
        let mut tx = self.store.begin().await?;
        let next_index = tx.load_cursor(&self.name).await?;
        tx.rollback().await?;
        Ok(next_index)
    }

    async fn save_cursor(&self, next_index: u64) -> Result<(), StoreError> {
        let mut tx = self.store.begin().await?;
        tx.save_cursor(&self.name, next_index).await?;
        tx.commit().await
    }

    async fn clear_cursor(&self) -> Result<(), StoreError> {
        let mut tx = self.store.begin().await?;
        tx.clear_cursor(&self.name).await?;
        tx.commit().await
    }

    async fn save_cursor_in(
        &self,
        tx: &mut dyn StoreTransaction,
        next_index: u64,
    ) -> Result<bool, StoreError> {
        tx.save_cursor(&self.name, next_index).await?;
        Ok(true)
    }
}

#[allow(dead_code)]
pub fn shared(store: MemoryStore) -> Arc<dyn RecordStore> {
    Arc::new(store)
}

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StoreError;
use crate::store::{RecordStore, StoreTransaction};
use crate::types::{is_valid_identifier, Record, StoredRecord, TableKind, TableSummary};

/// Everything a transaction works on: the tables and the round-robin cursors kept next to them.
#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    cursors: BTreeMap<String, u64>,
}

#[derive(Debug, Clone)]
struct MemoryTable {
    kind: TableKind,
    rows: Vec<StoredRecord>,
    last_id: i64,
}

impl MemoryTable {
    fn new(kind: TableKind) -> Self {
        Self {
            kind,
            rows: Vec::new(),
            last_id: 0,
        }
    }

    fn append(&mut self, record: &Record) -> StoredRecord {
        self.last_id += 1;
        let stored = StoredRecord::new(self.last_id, *record);
        self.rows.push(stored);
        stored
    }
}

/// A `RecordStore` held entirely in memory.
///
/// Transactions work on a private copy of every table and cursor and publish it on commit. Only
/// one transaction can be open at a time, which serializes writers the same way a single Postgres
/// connection would.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();

        Ok(Box::new(MemoryTransaction { guard, working }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl MemoryTransaction {
    fn table(&self, name: &str) -> Result<&MemoryTable, StoreError> {
        self.working
            .tables
            .get(name)
            .ok_or_else(|| StoreError::MissingTable(name.to_owned()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, StoreError> {
        self.working
            .tables
            .get_mut(name)
            .ok_or_else(|| StoreError::MissingTable(name.to_owned()))
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn table_exists(&mut self, name: &str) -> Result<bool, StoreError> {
        Ok(self.working.tables.contains_key(name))
    }

    async fn create_table(&mut self, name: &str, kind: TableKind) -> Result<(), StoreError> {
        if !is_valid_identifier(name) {
            return Err(StoreError::InvalidIdentifier(name.to_owned()));
        }
        if self.working.tables.contains_key(name) {
            return Err(StoreError::DuplicateTable(name.to_owned()));
        }

        self.working.tables.insert(name.to_owned(), MemoryTable::new(kind));
        Ok(())
    }

    async fn drop_table(&mut self, name: &str) -> Result<(), StoreError> {
        self.working.tables.remove(name);
        Ok(())
    }

    async fn bulk_load(&mut self, name: &str, records: &[Record]) -> Result<u64, StoreError> {
        let table = self.table_mut(name)?;
        for record in records {
            table.append(record);
        }
        Ok(records.len() as u64)
    }

    async fn append(&mut self, name: &str, record: &Record) -> Result<StoredRecord, StoreError> {
        Ok(self.table_mut(name)?.append(record))
    }

    async fn insert_one(&mut self, name: &str, record: &StoredRecord) -> Result<(), StoreError> {
        self.copy_into(name, std::slice::from_ref(record)).await?;
        Ok(())
    }

    async fn copy_into(
        &mut self,
        name: &str,
        records: &[StoredRecord],
    ) -> Result<u64, StoreError> {
        let table = self.table_mut(name)?;
        table.rows.extend_from_slice(records);
        if table.kind == TableKind::Partition {
            if let Some(max_id) = records.iter().map(|record| record.id).max() {
                table.last_id = table.last_id.max(max_id);
            }
        }
        Ok(records.len() as u64)
    }

    async fn count(&mut self, name: &str) -> Result<u64, StoreError> {
        Ok(self.table(name)?.rows.len() as u64)
    }

    async fn scan_ordered(
        &mut self,
        name: &str,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let after = after.unwrap_or(i64::MIN);
        let mut rows: Vec<StoredRecord> = self
            .table(name)?
            .rows
            .iter()
            .filter(|record| record.id > after)
            .copied()
            .collect();

        rows.sort_by_key(|record| record.id);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn list_tables(&mut self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .working
            .tables
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn summarize(&mut self, name: &str) -> Result<TableSummary, StoreError> {
        let table = self.table(name)?;
        let scores = table.rows.iter().map(|record| record.score);

        Ok(TableSummary {
            rows: table.rows.len() as u64,
            min_score: scores.clone().reduce(f64::min),
            max_score: scores.reduce(f64::max),
        })
    }

    async fn load_cursor(&mut self, name: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.working.cursors.get(name).copied())
    }

    async fn save_cursor(&mut self, name: &str, next_index: u64) -> Result<(), StoreError> {
        self.working.cursors.insert(name.to_owned(), next_index);
        Ok(())
    }

    async fn clear_cursor(&mut self, name: &str) -> Result<(), StoreError> {
        self.working.cursors.remove(name);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

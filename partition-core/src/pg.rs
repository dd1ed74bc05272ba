use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};

use crate::config::PoolConfig;
use crate::cursor::CursorStore;
use crate::error::StoreError;
use crate::store::{RecordStore, StoreTransaction};
use crate::types::{is_valid_identifier, Record, StoredRecord, TableKind, TableSummary};

// https://www.postgresql.org/docs/current/errcodes-appendix.html
const UNDEFINED_TABLE: &str = "42P01";
const DUPLICATE_TABLE: &str = "42P07";

/// A `RecordStore` backed by PostgreSQL. Every store transaction is a database transaction, DDL
/// included, so a failed partitioning run leaves no tables behind.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub async fn new(config: &PoolConfig) -> Result<Self, StoreError> {
        let pool = config
            .connect()
            .await
            .map_err(|error| StoreError::PoolCreationError { error })?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the bookkeeping tables (currently only the round-robin cursor table).
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|error| StoreError::TransactionError {
                command: "BEGIN".to_owned(),
                error,
            })?;

        Ok(Box::new(PgStoreTransaction { tx }))
    }
}

struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

/// Quote a table name for use in a statement. Names are checked first, as they cannot be bound.
fn quoted(name: &str) -> Result<String, StoreError> {
    if is_valid_identifier(name) {
        Ok(format!("\"{name}\""))
    } else {
        Err(StoreError::InvalidIdentifier(name.to_owned()))
    }
}

fn query_error(command: &str, table: &str, error: sqlx::Error) -> StoreError {
    if let Some(db_error) = error.as_database_error() {
        match db_error.code().as_deref() {
            Some(UNDEFINED_TABLE) => return StoreError::MissingTable(table.to_owned()),
            Some(DUPLICATE_TABLE) => return StoreError::DuplicateTable(table.to_owned()),
            _ => {}
        }
    }

    StoreError::QueryError {
        command: command.to_owned(),
        error,
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn table_exists(&mut self, name: &str) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            r#"
SELECT EXISTS (
    SELECT 1
    FROM information_schema.tables
    WHERE table_schema = current_schema() AND table_name = $1
)
            "#,
        )
        .bind(name)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|error| query_error("SELECT", name, error))
    }

    async fn create_table(&mut self, name: &str, kind: TableKind) -> Result<(), StoreError> {
        let id_column = match kind {
            TableKind::Base => "BIGSERIAL",
            TableKind::Partition => "BIGINT",
        };
        let query = format!(
            r#"
CREATE TABLE {} (
    id {} PRIMARY KEY,
    userid INTEGER NOT NULL,
    movieid INTEGER NOT NULL,
    rating DOUBLE PRECISION NOT NULL
)
            "#,
            quoted(name)?,
            id_column
        );

        sqlx::query(&query)
            .execute(&mut *self.tx)
            .await
            .map_err(|error| query_error("CREATE TABLE", name, error))?;
        Ok(())
    }

    async fn drop_table(&mut self, name: &str) -> Result<(), StoreError> {
        let query = format!("DROP TABLE IF EXISTS {}", quoted(name)?);

        sqlx::query(&query)
            .execute(&mut *self.tx)
            .await
            .map_err(|error| query_error("DROP TABLE", name, error))?;
        Ok(())
    }

    async fn bulk_load(&mut self, name: &str, records: &[Record]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        // Flatten the records into a series of vecs of arguments PG can unnest
        let mut user_ids = Vec::with_capacity(records.len());
        let mut item_ids = Vec::with_capacity(records.len());
        let mut scores = Vec::with_capacity(records.len());
        for record in records {
            user_ids.push(record.user_id);
            item_ids.push(record.item_id);
            scores.push(record.score);
        }

        let query = format!(
            r#"
INSERT INTO {}
    (userid, movieid, rating)
SELECT *
FROM UNNEST($1::INTEGER[], $2::INTEGER[], $3::DOUBLE PRECISION[])
            "#,
            quoted(name)?
        );

        let result = sqlx::query(&query)
            .bind(user_ids)
            .bind(item_ids)
            .bind(scores)
            .execute(&mut *self.tx)
            .await
            .map_err(|error| query_error("INSERT", name, error))?;
        Ok(result.rows_affected())
    }

    async fn append(&mut self, name: &str, record: &Record) -> Result<StoredRecord, StoreError> {
        let query = format!(
            r#"
INSERT INTO {}
    (userid, movieid, rating)
VALUES
    ($1, $2, $3)
RETURNING id
            "#,
            quoted(name)?
        );

        let id = sqlx::query_scalar::<_, i64>(&query)
            .bind(record.user_id)
            .bind(record.item_id)
            .bind(record.score)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|error| query_error("INSERT", name, error))?;
        Ok(StoredRecord::new(id, *record))
    }

    async fn insert_one(&mut self, name: &str, record: &StoredRecord) -> Result<(), StoreError> {
        let query = format!(
            r#"
INSERT INTO {}
    (id, userid, movieid, rating)
VALUES
    ($1, $2, $3, $4)
            "#,
            quoted(name)?
        );

        sqlx::query(&query)
            .bind(record.id)
            .bind(record.user_id)
            .bind(record.item_id)
            .bind(record.score)
            .execute(&mut *self.tx)
            .await
            .map_err(|error| query_error("INSERT", name, error))?;
        Ok(())
    }

    async fn copy_into(
        &mut self,
        name: &str,
        records: &[StoredRecord],
    ) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut ids = Vec::with_capacity(records.len());
        let mut user_ids = Vec::with_capacity(records.len());
        let mut item_ids = Vec::with_capacity(records.len());
        let mut scores = Vec::with_capacity(records.len());
        for record in records {
            ids.push(record.id);
            user_ids.push(record.user_id);
            item_ids.push(record.item_id);
            scores.push(record.score);
        }

        let query = format!(
            r#"
INSERT INTO {}
    (id, userid, movieid, rating)
SELECT *
FROM UNNEST($1::BIGINT[], $2::INTEGER[], $3::INTEGER[], $4::DOUBLE PRECISION[])
            "#,
            quoted(name)?
        );

        let result = sqlx::query(&query)
            .bind(ids)
            .bind(user_ids)
            .bind(item_ids)
            .bind(scores)
            .execute(&mut *self.tx)
            .await
            .map_err(|error| query_error("INSERT", name, error))?;
        Ok(result.rows_affected())
    }

    async fn count(&mut self, name: &str) -> Result<u64, StoreError> {
        let query = format!("SELECT COUNT(*) FROM {}", quoted(name)?);

        let count = sqlx::query_scalar::<_, i64>(&query)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|error| query_error("SELECT", name, error))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn scan_ordered(
        &mut self,
        name: &str,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let query = format!(
            r#"
SELECT id, userid, movieid, rating
FROM {}
WHERE id > $1
ORDER BY id
LIMIT $2
            "#,
            quoted(name)?
        );

        sqlx::query_as::<_, StoredRecord>(&query)
            .bind(after.unwrap_or(i64::MIN))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|error| query_error("SELECT", name, error))
    }

    async fn list_tables(&mut self, prefix: &str) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar::<_, String>(
            r#"
SELECT table_name::TEXT
FROM information_schema.tables
WHERE table_schema = current_schema() AND left(table_name, length($1)) = $1
ORDER BY table_name
            "#,
        )
        .bind(prefix)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|error| query_error("SELECT", prefix, error))
    }

    async fn summarize(&mut self, name: &str) -> Result<TableSummary, StoreError> {
        let query = format!(
            "SELECT COUNT(*), MIN(rating), MAX(rating) FROM {}",
            quoted(name)?
        );

        let (rows, min_score, max_score) =
            sqlx::query_as::<_, (i64, Option<f64>, Option<f64>)>(&query)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(|error| query_error("SELECT", name, error))?;

        Ok(TableSummary {
            rows: u64::try_from(rows).unwrap_or_default(),
            min_score,
            max_score,
        })
    }

    async fn load_cursor(&mut self, name: &str) -> Result<Option<u64>, StoreError> {
        fetch_cursor(&mut *self.tx, name).await
    }

    async fn save_cursor(&mut self, name: &str, next_index: u64) -> Result<(), StoreError> {
        upsert_cursor(&mut *self.tx, name, next_index).await
    }

    async fn clear_cursor(&mut self, name: &str) -> Result<(), StoreError> {
        delete_cursor(&mut *self.tx, name).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|error| StoreError::TransactionError {
                command: "COMMIT".to_owned(),
                error,
            })
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|error| StoreError::TransactionError {
                command: "ROLLBACK".to_owned(),
                error,
            })
    }
}

/// Keeps round-robin cursors as rows of the `partition_cursors` table, one per cursor name.
#[derive(Clone)]
pub struct PgCursorStore {
    pool: PgPool,
    name: String,
}

impl PgCursorStore {
    pub fn new(pool: PgPool, name: &str) -> Self {
        Self {
            pool,
            name: name.to_owned(),
        }
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn load_cursor(&self) -> Result<Option<u64>, StoreError> {
        fetch_cursor(&self.pool, &self.name).await
    }

    async fn save_cursor(&self, next_index: u64) -> Result<(), StoreError> {
        upsert_cursor(&self.pool, &self.name, next_index).await
    }

    async fn clear_cursor(&self) -> Result<(), StoreError> {
        delete_cursor(&self.pool, &self.name).await
    }

    // The row is written on the partitioning transaction's own connection, so it commits or rolls
    // back with the partition writes and a single-connection pool is enough.
    async fn save_cursor_in(
        &self,
        tx: &mut dyn StoreTransaction,
        next_index: u64,
    ) -> Result<bool, StoreError> {
        tx.save_cursor(&self.name, next_index).await?;
        Ok(true)
    }
}

async fn fetch_cursor<'c, E>(executor: E, name: &str) -> Result<Option<u64>, StoreError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let next_index =
        sqlx::query_scalar::<_, i64>("SELECT next_index FROM partition_cursors WHERE name = $1")
            .bind(name)
            .fetch_optional(executor)
            .await
            .map_err(|error| query_error("SELECT", "partition_cursors", error))?;

    // A negative value can only come from outside tampering, treat it as corrupt.
    Ok(next_index.and_then(|value| u64::try_from(value).ok()))
}

async fn upsert_cursor<'c, E>(executor: E, name: &str, next_index: u64) -> Result<(), StoreError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let value = i64::try_from(next_index).map_err(|_| StoreError::CursorOutOfRange(next_index))?;

    sqlx::query(
        r#"
INSERT INTO partition_cursors
    (name, next_index, updated_at)
VALUES
    ($1, $2, NOW())
ON CONFLICT (name) DO UPDATE
SET
    next_index = EXCLUDED.next_index,
    updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(name)
    .bind(value)
    .execute(executor)
    .await
    .map_err(|error| query_error("INSERT", "partition_cursors", error))?;
    Ok(())
}

async fn delete_cursor<'c, E>(executor: E, name: &str) -> Result<(), StoreError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    sqlx::query("DELETE FROM partition_cursors WHERE name = $1")
        .bind(name)
        .execute(executor)
        .await
        .map_err(|error| query_error("DELETE", "partition_cursors", error))?;
    Ok(())
}

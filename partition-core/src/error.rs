use std::path::PathBuf;

use thiserror::Error;

/// Enumeration of errors raised by a record store or a cursor store.
/// Errors can originate from sqlx or the filesystem and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("pool creation failed with: {error}")]
    PoolCreationError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("transaction {command} failed with: {error}")]
    TransactionError { command: String, error: sqlx::Error },
    #[error("running migrations failed with: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("table {0} does not exist")]
    MissingTable(String),
    #[error("table {0} already exists")]
    DuplicateTable(String),
    #[error("{0} is not a valid table identifier")]
    InvalidIdentifier(String),
    #[error("cursor value {0} cannot be stored")]
    CursorOutOfRange(u64),
    #[error("cursor file {path} could not be accessed: {error}")]
    CursorIo {
        path: PathBuf,
        error: std::io::Error,
    },
}

/// Errors surfaced by the partitioners.
#[derive(Error, Debug)]
pub enum PartitionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("table {table} does not exist")]
    NotFound { table: String },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("storage failure: {0}")]
    StorageFailure(StoreError),
}

impl From<StoreError> for PartitionError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::MissingTable(table) => PartitionError::NotFound { table },
            StoreError::InvalidIdentifier(name) => {
                PartitionError::InvalidArgument(format!("{name} is not a valid table identifier"))
            }
            other => PartitionError::StorageFailure(other),
        }
    }
}

/// Errors raised while ingesting a ratings file.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("could not read ratings file {path}: {error}")]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("line {line} is malformed: {reason}")]
    MalformedLine { line: usize, reason: String },
    #[error(transparent)]
    Partition(#[from] PartitionError),
}

impl From<StoreError> for LoadError {
    fn from(error: StoreError) -> Self {
        LoadError::Partition(error.into())
    }
}

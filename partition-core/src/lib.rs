// Modules are private and the parts meant for callers are re-exported below, so the internals
// can move around without breaking the public API

// Types
mod types;
pub use types::validate_table_name;
pub use types::PartitionSet;
pub use types::Record;
pub use types::StoredRecord;
pub use types::Strategy;
pub use types::TableKind;
pub use types::TableSummary;
pub use types::MAX_SCORE;

// Errors
mod error;
// Errors from loading ratings files
pub use error::LoadError;
// Errors from the partitioners and the registry: bad input, missing tables, broken partition sets
pub use error::PartitionError;
// Errors from the storage backends - postgres, the filesystem
pub use error::StoreError;

// Interval arithmetic shared by every range partitioning path
mod boundary;
pub use boundary::RangeScheme;
pub use boundary::BOUNDARY_TOLERANCE;

// Storage
mod memory;
mod pg;
mod store;
pub use memory::MemoryStore;
pub use pg::PgCursorStore;
pub use pg::PgRecordStore;
pub use store::RecordStore;
pub use store::StoreTransaction;

// Round-robin cursor persistence
mod cursor;
pub use cursor::CursorGuard;
pub use cursor::CursorStore;
pub use cursor::FileCursorStore;
pub use cursor::MemoryCursorStore;
pub use cursor::RoundRobinCursor;
pub use cursor::DEFAULT_CURSOR_FILE;

// Partitioners
mod range;
mod registry;
mod report;
mod round_robin;
pub use range::RangePartitioner;
pub use registry::count_partitions;
pub use registry::list_partitions;
pub use registry::partition_index;
pub use registry::resolve;
pub use registry::PartitionRegistry;
pub use report::PartitionReport;
pub use report::PartitionStats;
pub use round_robin::RoundRobinPartitioner;

// Ratings ingestion
mod ingest;
pub use ingest::load_ratings;
pub use ingest::parse_rating_line;
pub use ingest::DEFAULT_LOAD_BATCH_SIZE;

// Config
mod config;
pub use config::PartitionerConfig;
pub use config::PoolConfig;
pub use config::DEFAULT_ACQUIRE_TIMEOUT;
pub use config::DEFAULT_BATCH_SIZE;
pub use config::DEFAULT_IDLE_TIMEOUT;
pub use config::DEFAULT_MAX_CONNECTIONS;
pub use config::DEFAULT_RANGE_PREFIX;
pub use config::DEFAULT_ROUND_ROBIN_PREFIX;

mod metrics_consts;

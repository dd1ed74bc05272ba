// Labeled with the strategy ("range" or "round_robin") and the path ("bulk" or "insert")
pub const RECORDS_ROUTED: &str = "partition_records_routed";
pub const BULK_PARTITION_RUNS: &str = "partition_bulk_runs";
pub const BULK_PARTITION_DURATION: &str = "partition_bulk_duration_seconds";
// Round-robin inserts that found no usable cursor and restarted the cycle at 0
pub const CURSOR_COLD_STARTS: &str = "partition_cursor_cold_starts";
// Restoring the previous cursor after a failed commit did not work either
pub const CURSOR_RESTORE_FAILURES: &str = "partition_cursor_restore_failures";
pub const RATINGS_LOADED: &str = "partition_ratings_loaded";

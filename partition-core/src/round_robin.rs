use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use crate::config::PartitionerConfig;
use crate::cursor::{resume_from, CursorGuard, CursorStore, RoundRobinCursor};
use crate::error::PartitionError;
use crate::metrics_consts::{
    BULK_PARTITION_DURATION, BULK_PARTITION_RUNS, CURSOR_RESTORE_FAILURES, RECORDS_ROUTED,
};
use crate::registry::{check_base, check_partitions, recreate_partitions, resolve};
use crate::report::{build_report, PartitionReport};
use crate::store::{RecordStore, StoreTransaction};
use crate::types::{PartitionSet, Record, StoredRecord, Strategy};

/// Spreads records over partitions cyclically, in insertion order.
///
/// The position of the next insert in the cycle is kept in a `RoundRobinCursor`, so inserts made
/// after a restart carry on where the previous process stopped.
pub struct RoundRobinPartitioner {
    store: Arc<dyn RecordStore>,
    cursor: RoundRobinCursor,
    config: PartitionerConfig,
}

impl RoundRobinPartitioner {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cursor_store: Arc<dyn CursorStore>,
        config: PartitionerConfig,
    ) -> Self {
        Self {
            store,
            cursor: RoundRobinCursor::new(cursor_store),
            config,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.config.round_robin_prefix
    }

    /// The cursor value the next insert will start from. Reading it has no side effect.
    pub async fn next_index(&self) -> Result<u64, PartitionError> {
        Ok(self.cursor.current().await?)
    }

    /// Drop any existing round-robin partitions, create `partitions` new ones and deal the records
    /// of `base` over them in id order: the record at position `k` goes to partition
    /// `k % partitions`. Returns the partition set and the persisted cursor, `total % partitions`.
    #[instrument(skip_all, fields(base = base, partitions = partitions))]
    pub async fn bulk_partition(
        &self,
        base: &str,
        partitions: usize,
    ) -> Result<(PartitionSet, u64), PartitionError> {
        if partitions == 0 {
            return Err(PartitionError::InvalidArgument(
                "number of partitions must be positive, got 0".to_owned(),
            ));
        }
        let start = Instant::now();

        // Held until the end so no insert can interleave with the rebuild.
        let cursor = self.cursor.lock().await;
        let previous = cursor.load().await?;

        let mut tx = self.store.begin().await?;
        let result = self.bulk_partition_tx(tx.as_mut(), base, partitions).await;
        let (set, total) = finish(tx, result, &cursor, previous, |(set, total)| {
            *total % set.count as u64
        })
        .await?;
        let next_index = total % partitions as u64;

        let labels = [("strategy", Strategy::RoundRobin.as_str())];
        metrics::counter!(BULK_PARTITION_RUNS, &labels).increment(1);
        metrics::histogram!(BULK_PARTITION_DURATION, &labels)
            .record(start.elapsed().as_secs_f64());
        metrics::counter!(RECORDS_ROUTED, "strategy" => "round_robin", "path" => "bulk")
            .increment(total);
        info!(
            routed = total,
            next_index,
            "round-robin partitioned {} into {} partitions",
            base,
            set.count
        );

        Ok((set, next_index))
    }

    async fn bulk_partition_tx(
        &self,
        tx: &mut dyn StoreTransaction,
        base: &str,
        partitions: usize,
    ) -> Result<(PartitionSet, u64), PartitionError> {
        check_base(tx, base, self.prefix()).await?;
        let set = recreate_partitions(tx, self.prefix(), partitions).await?;

        let batch_size = self.config.batch_size.max(1);
        let mut buckets: Vec<Vec<StoredRecord>> = vec![Vec::new(); set.count];
        let mut after = None;
        let mut position: u64 = 0;

        loop {
            let batch = tx.scan_ordered(base, after, batch_size).await?;
            let Some(last_id) = batch.last().map(|record| record.id) else {
                break;
            };
            after = Some(last_id);

            for record in batch {
                buckets[slot(position, set.count)].push(record);
                position += 1;
            }
            for (index, bucket) in buckets.iter_mut().enumerate() {
                if !bucket.is_empty() {
                    tx.copy_into(&set.table_name(index), bucket).await?;
                    bucket.clear();
                }
            }
        }

        Ok((set, position))
    }

    /// Append `record` to `base` and to the partition the cursor points at, then advance the
    /// cursor. Returns the index of the partition that received the record, or `InvalidState` when
    /// `partitions` does not match the partition tables.
    #[instrument(skip_all, fields(base = base, partitions = partitions.count))]
    pub async fn insert(
        &self,
        base: &str,
        record: Record,
        partitions: &PartitionSet,
    ) -> Result<usize, PartitionError> {
        record.validate()?;

        let cursor = self.cursor.lock().await;
        let previous = cursor.load().await?;
        let current = resume_from(previous);

        let mut tx = self.store.begin().await?;
        let result = async {
            check_base(tx.as_mut(), base, &partitions.prefix).await?;
            check_partitions(tx.as_mut(), partitions).await?;
            insert_tx(tx.as_mut(), base, record, partitions, current).await
        }
        .await;
        let index = finish(tx, result, &cursor, previous, |index| {
            next_after(*index, partitions.count)
        })
        .await?;

        metrics::counter!(RECORDS_ROUTED, "strategy" => "round_robin", "path" => "insert")
            .increment(1);
        Ok(index)
    }

    /// Like `insert`, but recovers the partition set from the tables named after the configured
    /// prefix instead of taking it from the caller.
    #[instrument(skip_all, fields(base = base))]
    pub async fn insert_discovered(
        &self,
        base: &str,
        record: Record,
    ) -> Result<usize, PartitionError> {
        record.validate()?;

        let cursor = self.cursor.lock().await;
        let previous = cursor.load().await?;
        let current = resume_from(previous);

        let mut tx = self.store.begin().await?;
        let result = async {
            check_base(tx.as_mut(), base, self.prefix()).await?;
            let partitions = resolve(tx.as_mut(), self.prefix()).await?;
            let index = insert_tx(tx.as_mut(), base, record, &partitions, current).await?;
            Ok::<_, PartitionError>((index, partitions.count))
        }
        .await;
        let (index, _) = finish(tx, result, &cursor, previous, |(index, count)| {
            next_after(*index, *count)
        })
        .await?;

        metrics::counter!(RECORDS_ROUTED, "strategy" => "round_robin", "path" => "insert")
            .increment(1);
        Ok(index)
    }

    /// Row counts of `base` and its round-robin partitions.
    pub async fn report(
        &self,
        base: &str,
        partitions: &PartitionSet,
    ) -> Result<PartitionReport, PartitionError> {
        build_report(self.store.as_ref(), base, partitions, Strategy::RoundRobin).await
    }
}

fn slot(position: u64, partitions: usize) -> usize {
    (position % partitions as u64) as usize
}

fn next_after(index: usize, partitions: usize) -> u64 {
    ((index + 1) % partitions) as u64
}

async fn insert_tx(
    tx: &mut dyn StoreTransaction,
    base: &str,
    record: Record,
    partitions: &PartitionSet,
    cursor: u64,
) -> Result<usize, PartitionError> {
    let index = slot(cursor, partitions.count);
    let stored = tx.append(base, &record).await?;
    tx.insert_one(&partitions.table_name(index), &stored).await?;

    debug!(id = stored.id, cursor, index, "routed record");
    Ok(index)
}

/// Settle an operation that moves the cursor: roll back on failure, otherwise persist the new
/// cursor while the transaction is still open and commit. A cursor kept in the record store is
/// written through the transaction itself. Any other cursor is written back to its previous value
/// if the commit fails, so the cursor never gets ahead of the partitions it describes.
async fn finish<T>(
    mut tx: Box<dyn StoreTransaction>,
    result: Result<T, PartitionError>,
    cursor: &CursorGuard<'_>,
    previous: Option<u64>,
    next_index: impl FnOnce(&T) -> u64,
) -> Result<T, PartitionError> {
    let value = match result {
        Ok(value) => value,
        Err(error) => {
            if let Err(rollback_error) = tx.rollback().await {
                warn!("failed to roll back transaction: {}", rollback_error);
            }
            return Err(error);
        }
    };

    let next_index = next_index(&value);
    let written = match cursor.write_in(tx.as_mut(), next_index).await {
        Ok(false) => cursor.write(next_index).await.map(|()| false),
        written => written,
    };
    let in_transaction = match written {
        Ok(in_transaction) => in_transaction,
        Err(error) => {
            if let Err(rollback_error) = tx.rollback().await {
                warn!("failed to roll back transaction: {}", rollback_error);
            }
            return Err(error.into());
        }
    };

    if let Err(error) = tx.commit().await {
        if !in_transaction {
            if let Err(restore_error) = cursor.restore(previous).await {
                metrics::counter!(CURSOR_RESTORE_FAILURES).increment(1);
                error!(
                    previous = ?previous,
                    "failed to restore round-robin cursor after a failed commit: {}", restore_error
                );
            }
        }
        return Err(error.into());
    }

    Ok(value)
}

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument};

use crate::boundary::RangeScheme;
use crate::config::PartitionerConfig;
use crate::error::PartitionError;
use crate::metrics_consts::{BULK_PARTITION_DURATION, BULK_PARTITION_RUNS, RECORDS_ROUTED};
use crate::registry::{check_base, check_partitions, recreate_partitions, resolve};
use crate::report::{build_report, PartitionReport};
use crate::store::{commit_or_rollback, RecordStore, StoreTransaction};
use crate::types::{PartitionSet, Record, StoredRecord, Strategy};

/// Spreads records over partitions by score interval. See `RangeScheme` for the interval rules.
pub struct RangePartitioner {
    store: Arc<dyn RecordStore>,
    config: PartitionerConfig,
}

impl RangePartitioner {
    pub fn new(store: Arc<dyn RecordStore>, config: PartitionerConfig) -> Self {
        Self { store, config }
    }

    pub fn prefix(&self) -> &str {
        &self.config.range_prefix
    }

    /// Drop any existing range partitions, create `partitions` new ones and copy every record of
    /// `base` into the one owning its score. Runs in a single transaction.
    #[instrument(skip_all, fields(base = base, partitions = partitions))]
    pub async fn bulk_partition(
        &self,
        base: &str,
        partitions: usize,
    ) -> Result<PartitionSet, PartitionError> {
        let scheme = RangeScheme::new(partitions)?;
        let start = Instant::now();

        let mut tx = self.store.begin().await?;
        let result = self.bulk_partition_tx(tx.as_mut(), base, &scheme).await;
        let (set, routed) = commit_or_rollback(tx, result).await?;

        let labels = [("strategy", Strategy::Range.as_str())];
        metrics::counter!(BULK_PARTITION_RUNS, &labels).increment(1);
        metrics::histogram!(BULK_PARTITION_DURATION, &labels)
            .record(start.elapsed().as_secs_f64());
        metrics::counter!(RECORDS_ROUTED, "strategy" => "range", "path" => "bulk")
            .increment(routed);
        info!(routed, "range partitioned {} into {} partitions", base, set.count);

        Ok(set)
    }

    async fn bulk_partition_tx(
        &self,
        tx: &mut dyn StoreTransaction,
        base: &str,
        scheme: &RangeScheme,
    ) -> Result<(PartitionSet, u64), PartitionError> {
        check_base(tx, base, self.prefix()).await?;
        let set = recreate_partitions(tx, self.prefix(), scheme.partitions()).await?;

        let batch_size = self.config.batch_size.max(1);
        let mut buckets: Vec<Vec<StoredRecord>> = vec![Vec::new(); set.count];
        let mut after = None;
        let mut routed = 0;

        loop {
            let batch = tx.scan_ordered(base, after, batch_size).await?;
            let Some(last_id) = batch.last().map(|record| record.id) else {
                break;
            };
            after = Some(last_id);
            routed += batch.len() as u64;

            for record in batch {
                buckets[scheme.partition_for(record.score)].push(record);
            }
            for (index, bucket) in buckets.iter_mut().enumerate() {
                if !bucket.is_empty() {
                    tx.copy_into(&set.table_name(index), bucket).await?;
                    bucket.clear();
                }
            }
        }

        Ok((set, routed))
    }

    /// Append `record` to `base` and to the range partition owning its score. Returns the index
    /// of that partition, or `InvalidState` when `partitions` does not match the partition tables.
    #[instrument(skip_all, fields(base = base, partitions = partitions.count))]
    pub async fn insert(
        &self,
        base: &str,
        record: Record,
        partitions: &PartitionSet,
    ) -> Result<usize, PartitionError> {
        record.validate()?;

        let mut tx = self.store.begin().await?;
        let result = async {
            check_base(tx.as_mut(), base, &partitions.prefix).await?;
            check_partitions(tx.as_mut(), partitions).await?;
            let scheme = RangeScheme::new(partitions.count)?;
            insert_tx(tx.as_mut(), base, record, partitions, &scheme).await
        }
        .await;
        let index = commit_or_rollback(tx, result).await?;

        metrics::counter!(RECORDS_ROUTED, "strategy" => "range", "path" => "insert")
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

        let mut tx = self.store.begin().await?;
        let result = async {
            check_base(tx.as_mut(), base, self.prefix()).await?;
            let partitions = resolve(tx.as_mut(), self.prefix()).await?;
            let scheme = RangeScheme::new(partitions.count)?;
            insert_tx(tx.as_mut(), base, record, &partitions, &scheme).await
        }
        .await;
        let index = commit_or_rollback(tx, result).await?;

        metrics::counter!(RECORDS_ROUTED, "strategy" => "range", "path" => "insert")
            .increment(1);
        Ok(index)
    }

    /// Row counts and score ranges of `base` and its range partitions.
    pub async fn report(
        &self,
        base: &str,
        partitions: &PartitionSet,
    ) -> Result<PartitionReport, PartitionError> {
        build_report(self.store.as_ref(), base, partitions, Strategy::Range).await
    }
}

async fn insert_tx(
    tx: &mut dyn StoreTransaction,
    base: &str,
    record: Record,
    partitions: &PartitionSet,
    scheme: &RangeScheme,
) -> Result<usize, PartitionError> {
    let index = scheme.partition_for(record.score);
    let stored = tx.append(base, &record).await?;
    tx.insert_one(&partitions.table_name(index), &stored).await?;

    debug!(id = stored.id, score = record.score, index, "routed record");
    Ok(index)
}

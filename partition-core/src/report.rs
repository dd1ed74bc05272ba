use serde::Serialize;

use crate::boundary::RangeScheme;
use crate::error::PartitionError;
use crate::store::{commit_or_rollback, RecordStore, StoreTransaction};
use crate::types::{PartitionSet, Strategy, TableSummary};

/// Row count and score range of one partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionStats {
    pub index: usize,
    pub table: String,
    #[serde(flatten)]
    pub summary: TableSummary,
}

/// Snapshot of how a base table is spread over its partitions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionReport {
    pub base: String,
    pub strategy: Strategy,
    pub base_rows: u64,
    pub partitions: Vec<PartitionStats>,
}

impl PartitionReport {
    pub fn partitioned_rows(&self) -> u64 {
        self.partitions.iter().map(|stats| stats.summary.rows).sum()
    }

    /// Whether the partitions hold as many rows as the base table.
    pub fn is_exhaustive(&self) -> bool {
        self.partitioned_rows() == self.base_rows
    }

    /// Difference between the largest and the smallest partition.
    pub fn spread(&self) -> u64 {
        let sizes = self.partitions.iter().map(|stats| stats.summary.rows);
        match (sizes.clone().max(), sizes.min()) {
            (Some(max), Some(min)) => max - min,
            _ => 0,
        }
    }

    /// Indices of the partitions holding a score outside their range interval. Intervals are
    /// contiguous, so checking the smallest and largest score of each partition is enough.
    pub fn out_of_range(&self, scheme: &RangeScheme) -> Vec<usize> {
        self.partitions
            .iter()
            .filter(|stats| {
                [stats.summary.min_score, stats.summary.max_score]
                    .into_iter()
                    .flatten()
                    .any(|score| !scheme.contains(stats.index, score))
            })
            .map(|stats| stats.index)
            .collect()
    }
}

pub(crate) async fn build_report(
    store: &dyn RecordStore,
    base: &str,
    partitions: &PartitionSet,
    strategy: Strategy,
) -> Result<PartitionReport, PartitionError> {
    let mut tx = store.begin().await?;
    let result = report_tx(tx.as_mut(), base, partitions, strategy).await;
    commit_or_rollback(tx, result).await
}

async fn report_tx(
    tx: &mut dyn StoreTransaction,
    base: &str,
    partitions: &PartitionSet,
    strategy: Strategy,
) -> Result<PartitionReport, PartitionError> {
    let base_rows = tx.count(base).await?;
    let mut stats = Vec::with_capacity(partitions.count);

    for (index, table) in partitions.tables().enumerate() {
        let summary = tx.summarize(&table).await?;
        stats.push(PartitionStats {
            index,
            table,
            summary,
        });
    }

    Ok(PartitionReport {
        base: base.to_owned(),
        strategy,
        base_rows,
        partitions: stats,
    })
}

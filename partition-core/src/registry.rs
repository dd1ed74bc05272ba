use std::sync::Arc;

use crate::error::{PartitionError, StoreError};
use crate::store::{commit_or_rollback, RecordStore, StoreTransaction};
use crate::types::{validate_table_name, PartitionSet, TableKind};

/// Index encoded in a partition table name, if `table` is `{prefix}{index}`.
pub fn partition_index(prefix: &str, table: &str) -> Option<usize> {
    let suffix = table.strip_prefix(prefix)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // range_part01 is not something a partitioner ever creates
    if suffix.len() > 1 && suffix.starts_with('0') {
        return None;
    }
    suffix.parse().ok()
}

/// Sorted indices of every partition named `{prefix}{index}`.
pub async fn list_partitions(
    tx: &mut dyn StoreTransaction,
    prefix: &str,
) -> Result<Vec<usize>, StoreError> {
    let mut indices: Vec<usize> = tx
        .list_tables(prefix)
        .await?
        .iter()
        .filter_map(|table| partition_index(prefix, table))
        .collect();
    indices.sort_unstable();
    Ok(indices)
}

pub async fn count_partitions(
    tx: &mut dyn StoreTransaction,
    prefix: &str,
) -> Result<usize, StoreError> {
    Ok(list_partitions(tx, prefix).await?.len())
}

/// Rebuild the `PartitionSet` descriptor from the tables alone. The partitions must be exactly
/// `0..N` with `N > 0`.
pub async fn resolve(
    tx: &mut dyn StoreTransaction,
    prefix: &str,
) -> Result<PartitionSet, PartitionError> {
    let indices = list_partitions(tx, prefix).await?;

    if indices.is_empty() {
        return Err(PartitionError::InvalidState(format!(
            "no partitions named {prefix}<N> exist, run a bulk partition first"
        )));
    }
    if indices.iter().enumerate().any(|(position, index)| position != *index) {
        return Err(PartitionError::InvalidState(format!(
            "partitions named {prefix}<N> are not numbered 0..{}: found {:?}",
            indices.len(),
            indices
        )));
    }

    Ok(PartitionSet::new(prefix, indices.len()))
}

/// Check that `partitions` still describes the tables in the store: an insert routed with a
/// stale count would land in the wrong partition.
pub(crate) async fn check_partitions(
    tx: &mut dyn StoreTransaction,
    partitions: &PartitionSet,
) -> Result<(), PartitionError> {
    if partitions.count == 0 {
        return Err(PartitionError::InvalidState(format!(
            "partition set {}<N> is empty",
            partitions.prefix
        )));
    }

    let indices = list_partitions(tx, &partitions.prefix).await?;
    if !indices.iter().copied().eq(0..partitions.count) {
        return Err(PartitionError::InvalidState(format!(
            "expected partitions {}0..{}, found {:?}",
            partitions.prefix, partitions.count, indices
        )));
    }

    Ok(())
}

/// Drop every partition named after `prefix`, whatever its index, and create `count` empty ones.
pub(crate) async fn recreate_partitions(
    tx: &mut dyn StoreTransaction,
    prefix: &str,
    count: usize,
) -> Result<PartitionSet, StoreError> {
    let set = PartitionSet::new(prefix, count);

    for index in list_partitions(tx, prefix).await? {
        tx.drop_table(&set.table_name(index)).await?;
    }
    for table in set.tables() {
        tx.create_table(&table, TableKind::Partition).await?;
    }

    Ok(set)
}

/// Check the names a partitioning operation is about to use and that the base table exists.
pub(crate) async fn check_base(
    tx: &mut dyn StoreTransaction,
    base: &str,
    prefix: &str,
) -> Result<(), PartitionError> {
    validate_table_name(base)?;
    validate_table_name(prefix)?;

    if partition_index(prefix, base).is_some() {
        return Err(PartitionError::InvalidArgument(format!(
            "base table {base} would be mistaken for a partition named {prefix}<N>"
        )));
    }
    if !tx.table_exists(base).await? {
        return Err(PartitionError::NotFound {
            table: base.to_owned(),
        });
    }

    Ok(())
}

/// Read-only view over the partitions visible in a store.
#[derive(Clone)]
pub struct PartitionRegistry {
    store: Arc<dyn RecordStore>,
}

impl PartitionRegistry {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Number of committed partitions named `{prefix}{index}`.
    pub async fn count_partitions(&self, prefix: &str) -> Result<usize, PartitionError> {
        let mut tx = self.store.begin().await?;
        let result = count_partitions(tx.as_mut(), prefix)
            .await
            .map_err(PartitionError::from);
        commit_or_rollback(tx, result).await
    }

    pub async fn resolve(&self, prefix: &str) -> Result<PartitionSet, PartitionError> {
        let mut tx = self.store.begin().await?;
        let result = resolve(tx.as_mut(), prefix).await;
        commit_or_rollback(tx, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    async fn store_with_tables(tables: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for table in tables {
            tx.create_table(table, TableKind::Partition).await.unwrap();
        }
        tx.commit().await.unwrap();
        store
    }

    #[test]
    fn test_partition_index() {
        assert_eq!(partition_index("range_part", "range_part0"), Some(0));
        assert_eq!(partition_index("range_part", "range_part17"), Some(17));

        assert_eq!(partition_index("range_part", "range_part"), None);
        assert_eq!(partition_index("range_part", "range_part_old"), None);
        assert_eq!(partition_index("range_part", "range_part01"), None);
        assert_eq!(partition_index("range_part", "rrobin_part1"), None);
        assert_eq!(partition_index("range_part", "range_part1x"), None);
    }

    #[tokio::test]
    async fn test_count_ignores_lookalikes() {
        let store = store_with_tables(&[
            "range_part0",
            "range_part1",
            "range_part2",
            "range_part_backup",
            "rrobin_part0",
        ])
        .await;
        let registry = PartitionRegistry::new(Arc::new(store));

        assert_eq!(registry.count_partitions("range_part").await.unwrap(), 3);
        assert_eq!(registry.count_partitions("rrobin_part").await.unwrap(), 1);
        assert_eq!(registry.count_partitions("hash_part").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resolve() {
        let store = store_with_tables(&["range_part0", "range_part1", "range_part10"]).await;
        let registry = PartitionRegistry::new(Arc::new(store));

        assert!(matches!(
            registry.resolve("range_part").await,
            Err(PartitionError::InvalidState(_))
        ));
        assert!(matches!(
            registry.resolve("rrobin_part").await,
            Err(PartitionError::InvalidState(_))
        ));

        let store = store_with_tables(&["rrobin_part0", "rrobin_part1", "rrobin_part2"]).await;
        let registry = PartitionRegistry::new(Arc::new(store));
        assert_eq!(
            registry.resolve("rrobin_part").await.unwrap(),
            PartitionSet::new("rrobin_part", 3)
        );
    }

    #[tokio::test]
    async fn test_check_partitions() {
        let store = store_with_tables(&["range_part0", "range_part1", "range_part2"]).await;
        let mut tx = store.begin().await.unwrap();

        let current = PartitionSet::new("range_part", 3);
        assert!(check_partitions(tx.as_mut(), &current).await.is_ok());

        for stale in [0, 2, 4] {
            assert!(matches!(
                check_partitions(tx.as_mut(), &PartitionSet::new("range_part", stale)).await,
                Err(PartitionError::InvalidState(_))
            ));
        }
        assert!(matches!(
            check_partitions(tx.as_mut(), &PartitionSet::new("rrobin_part", 3)).await,
            Err(PartitionError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_recreate_drops_stale_partitions() {
        let store = store_with_tables(&["range_part0", "range_part1", "range_part2"]).await;

        let mut tx = store.begin().await.unwrap();
        let set = recreate_partitions(tx.as_mut(), "range_part", 2)
            .await
            .unwrap();
        assert_eq!(set, PartitionSet::new("range_part", 2));
        assert_eq!(
            list_partitions(tx.as_mut(), "range_part").await.unwrap(),
            vec![0, 1]
        );
    }

    #[tokio::test]
    async fn test_check_base() {
        let store = store_with_tables(&["ratings"]).await;
        let mut tx = store.begin().await.unwrap();

        assert!(check_base(tx.as_mut(), "ratings", "range_part").await.is_ok());
        assert!(matches!(
            check_base(tx.as_mut(), "missing", "range_part").await,
            Err(PartitionError::NotFound { table }) if table == "missing"
        ));
        assert!(matches!(
            check_base(tx.as_mut(), "range_part3", "range_part").await,
            Err(PartitionError::InvalidArgument(_))
        ));
        assert!(matches!(
            check_base(tx.as_mut(), "ratings", "Range Part").await,
            Err(PartitionError::InvalidArgument(_))
        ));
    }
}

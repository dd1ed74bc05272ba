use std::sync::Arc;
use std::time::Duration;

use common::{random_records, read_all, seed_base};
use partition_core::{
    load_ratings, CursorStore, PartitionError, PartitionRegistry, PartitionerConfig,
    PgCursorStore, PgRecordStore, RangePartitioner, RangeScheme, Record, RecordStore,
    RoundRobinPartitioner, StoreError, TableKind,
};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

mod common;

const BASE: &str = "ratings";

fn config() -> PartitionerConfig {
    PartitionerConfig {
        batch_size: 16,
        ..Default::default()
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn test_range_partition(db: PgPool) {
    let store = Arc::new(PgRecordStore::from_pool(db));
    seed_base(store.as_ref(), BASE, &random_records(200, 21)).await;
    let partitioner = RangePartitioner::new(store.clone(), config());

    let set = partitioner.bulk_partition(BASE, 3).await.unwrap();
    let scheme = RangeScheme::new(3).unwrap();
    let report = partitioner.report(BASE, &set).await.unwrap();
    assert!(report.is_exhaustive());
    assert!(report.out_of_range(&scheme).is_empty());

    let index = partitioner
        .insert(BASE, Record::new(1, 1, 5.0), &set)
        .await
        .unwrap();
    assert_eq!(index, 2);
    let last = read_all(store.as_ref(), "range_part2").await;
    // Partitions keep the id the base table assigned
    assert_eq!(last.last().map(|record| record.id), Some(201));

    // Shrinking drops the partitions that are no longer part of the set
    partitioner.bulk_partition(BASE, 2).await.unwrap();
    let registry = PartitionRegistry::new(store.clone());
    assert_eq!(registry.count_partitions("range_part").await.unwrap(), 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_round_robin_with_pg_cursor(db: PgPool) {
    let store = Arc::new(PgRecordStore::from_pool(db.clone()));
    seed_base(store.as_ref(), BASE, &random_records(10, 22)).await;
    let cursor = Arc::new(PgCursorStore::new(db.clone(), "ratings"));
    let partitioner = RoundRobinPartitioner::new(store.clone(), cursor.clone(), config());

    let (set, next_index) = partitioner.bulk_partition(BASE, 4).await.unwrap();
    assert_eq!(next_index, 2);

    let index = partitioner
        .insert(BASE, Record::new(1, 1, 1.0), &set)
        .await
        .unwrap();
    assert_eq!(index, 2);

    // Another process sharing the database sees the same cursor
    let other = PgCursorStore::new(db, "ratings");
    assert_eq!(other.load_cursor().await.unwrap(), Some(3));

    other.clear_cursor().await.unwrap();
    assert_eq!(cursor.load_cursor().await.unwrap(), None);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_single_connection_pool(options: PgPoolOptions, connect: PgConnectOptions) {
    let db = options
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(connect)
        .await
        .unwrap();
    let store = Arc::new(PgRecordStore::from_pool(db.clone()));
    seed_base(store.as_ref(), BASE, &random_records(5, 23)).await;
    let cursor = Arc::new(PgCursorStore::new(db, "ratings"));
    let partitioner = RoundRobinPartitioner::new(store.clone(), cursor.clone(), config());

    let (set, next_index) = partitioner.bulk_partition(BASE, 3).await.unwrap();
    assert_eq!(next_index, 2);

    // The cursor row is written on the connection the insert already holds
    for expected in [2, 0, 1] {
        let index = partitioner
            .insert(BASE, Record::new(1, 1, 1.0), &set)
            .await
            .unwrap();
        assert_eq!(index, expected);
    }
    assert_eq!(cursor.load_cursor().await.unwrap(), Some(2));
    assert_eq!(read_all(store.as_ref(), "rrobin_part0").await.len(), 3);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_prefix_underscore_is_not_a_wildcard(db: PgPool) {
    let store = PgRecordStore::from_pool(db);
    let mut tx = store.begin().await.unwrap();
    for table in ["range_part0", "range_part1", "rangexpart2", "range_part_old"] {
        tx.create_table(table, TableKind::Partition).await.unwrap();
    }
    tx.commit().await.unwrap();

    let registry = PartitionRegistry::new(Arc::new(store));
    assert_eq!(registry.count_partitions("range_part").await.unwrap(), 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_store_errors(db: PgPool) {
    let store = PgRecordStore::from_pool(db);
    let mut tx = store.begin().await.unwrap();

    assert!(matches!(
        tx.count("missing").await,
        Err(StoreError::MissingTable(table)) if table == "missing"
    ));
    tx.rollback().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.create_table(BASE, TableKind::Base).await.unwrap();
    assert!(matches!(
        tx.create_table(BASE, TableKind::Base).await,
        Err(StoreError::DuplicateTable(_))
    ));
    tx.rollback().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    assert!(matches!(
        tx.drop_table("ratings; DROP TABLE partition_cursors").await,
        Err(StoreError::InvalidIdentifier(_))
    ));
    tx.rollback().await.unwrap();

    let partitioner = RangePartitioner::new(Arc::new(store), config());
    assert!(matches!(
        partitioner.bulk_partition(BASE, 2).await,
        Err(PartitionError::NotFound { .. })
    ));
}

#[sqlx::test(migrations = "./migrations")]
async fn test_load_ratings(db: PgPool) {
    let store = PgRecordStore::from_pool(db);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ratings.dat");
    tokio::fs::write(&path, "1::122::5::838985046\n1::185::4.5::838983525\n\n2::64::0::1\n")
        .await
        .unwrap();

    assert_eq!(load_ratings(&store, BASE, &path, 2).await.unwrap(), 3);

    let records = read_all(&store, BASE).await;
    let scores: Vec<f64> = records.iter().map(|record| record.score).collect();
    assert_eq!(scores, vec![5.0, 4.5, 0.0]);
}

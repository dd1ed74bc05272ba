//! Load a ratings file into postgres and build its range and round-robin partitions.

use std::sync::Arc;

use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use partition_core::{
    load_ratings, CursorStore, FileCursorStore, PartitionReport, PgCursorStore, PgRecordStore,
    RangePartitioner, RangeScheme, RecordStore, RoundRobinPartitioner,
};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use config::{Config, CursorBackend};

mod config;

fn log_report(report: &PartitionReport) -> Result<()> {
    info!("{}", serde_json::to_string(report)?);
    if !report.is_exhaustive() {
        warn!(
            base_rows = report.base_rows,
            partitioned_rows = report.partitioned_rows(),
            "{} partitions do not add up to their base table",
            report.strategy
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let store = PgRecordStore::new(&config.pool_config())
        .await
        .wrap_err("failed to connect to postgres")?;
    store
        .run_migrations()
        .await
        .wrap_err("failed to run migrations")?;

    let base = config.ratings_table.as_str();
    if config.load_ratings {
        let loaded = load_ratings(&store, base, &config.ratings_file, config.load_batch_size)
            .await
            .wrap_err_with(|| format!("failed to load {}", config.ratings_file.display()))?;
        info!(loaded, "ratings loaded");
    }

    let cursor_store: Arc<dyn CursorStore> = match config.cursor_backend {
        CursorBackend::File => Arc::new(FileCursorStore::new(&config.cursor_path)),
        CursorBackend::Postgres => Arc::new(PgCursorStore::new(
            store.pool().clone(),
            config.cursor_name.as_str(),
        )),
    };
    let store: Arc<dyn RecordStore> = Arc::new(store);

    if config.partition_mode.range() {
        let partitioner = RangePartitioner::new(store.clone(), config.partitioner_config());
        let set = partitioner
            .bulk_partition(base, config.partition_count)
            .await
            .wrap_err("range partitioning failed")?;

        let report = partitioner.report(base, &set).await?;
        let misplaced = report.out_of_range(&RangeScheme::new(set.count)?);
        if !misplaced.is_empty() {
            warn!(?misplaced, "range partitions hold scores outside their interval");
        }
        log_report(&report)?;
    }

    if config.partition_mode.round_robin() {
        let partitioner =
            RoundRobinPartitioner::new(store.clone(), cursor_store, config.partitioner_config());
        let (set, next_index) = partitioner
            .bulk_partition(base, config.partition_count)
            .await
            .wrap_err("round-robin partitioning failed")?;
        info!(next_index, "round-robin cursor saved");

        log_report(&partitioner.report(base, &set).await?)?;
    }

    Ok(())
}

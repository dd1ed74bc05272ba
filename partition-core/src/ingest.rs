use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, instrument};

use crate::error::LoadError;
use crate::metrics_consts::RATINGS_LOADED;
use crate::store::{commit_or_rollback, RecordStore, StoreTransaction};
use crate::types::{validate_table_name, Record, TableKind};

/// Batch size used by the loader binary when none is configured.
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 500_000;

const FIELD_SEPARATOR: &str = "::";

/// Parse one `userid::movieid::rating[::timestamp]` line. The timestamp is accepted and dropped.
pub fn parse_rating_line(line: &str) -> Result<Record, String> {
    let mut fields = line.trim().split(FIELD_SEPARATOR);

    let user_id = match fields.next() {
        Some(field) if !field.is_empty() => field
            .trim()
            .parse::<i32>()
            .map_err(|e| format!("invalid user id {field:?}: {e}"))?,
        _ => return Err("missing user id".to_owned()),
    };
    let item_id = fields
        .next()
        .ok_or_else(|| "missing movie id".to_owned())?
        .trim()
        .parse::<i32>()
        .map_err(|e| format!("invalid movie id: {e}"))?;
    let score = fields
        .next()
        .ok_or_else(|| "missing rating".to_owned())?
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid rating: {e}"))?;

    let _timestamp = fields.next();
    if fields.next().is_some() {
        return Err("too many fields".to_owned());
    }

    let record = Record::new(user_id, item_id, score);
    record.validate().map_err(|e| e.to_string())?;
    Ok(record)
}

/// Replace `table` with the ratings read from `path`, inserted `batch_size` at a time in file
/// order. Blank lines are skipped; any malformed line aborts the whole load. Returns how many
/// ratings were loaded.
#[instrument(skip_all, fields(table = table, path = %path.display()))]
pub async fn load_ratings(
    store: &dyn RecordStore,
    table: &str,
    path: &Path,
    batch_size: usize,
) -> Result<u64, LoadError> {
    validate_table_name(table)?;

    let file = File::open(path).await.map_err(|error| LoadError::Io {
        path: path.to_owned(),
        error,
    })?;

    let mut tx = store.begin().await?;
    let result = load_tx(tx.as_mut(), table, file, path, batch_size.max(1)).await;
    let loaded = commit_or_rollback(tx, result).await?;

    metrics::counter!(RATINGS_LOADED).increment(loaded);
    info!(loaded, "loaded ratings into {}", table);

    Ok(loaded)
}

async fn load_tx(
    tx: &mut dyn StoreTransaction,
    table: &str,
    file: File,
    path: &Path,
    batch_size: usize,
) -> Result<u64, LoadError> {
    tx.drop_table(table).await?;
    tx.create_table(table, TableKind::Base).await?;

    let mut lines = BufReader::new(file).lines();
    let mut batch = Vec::with_capacity(batch_size.min(DEFAULT_LOAD_BATCH_SIZE));
    let mut line_number = 0;
    let mut loaded = 0;

    while let Some(line) = lines.next_line().await.map_err(|error| LoadError::Io {
        path: path.to_owned(),
        error,
    })? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let record = parse_rating_line(&line).map_err(|reason| LoadError::MalformedLine {
            line: line_number,
            reason,
        })?;
        batch.push(record);

        if batch.len() >= batch_size {
            loaded += tx.bulk_load(table, &batch).await?;
            batch.clear();
        }
    }
    loaded += tx.bulk_load(table, &batch).await?;

    Ok(loaded)
}

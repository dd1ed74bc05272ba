use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PartitionError;

/// Upper bound of the score domain. Scores live in `[0, MAX_SCORE]`.
pub const MAX_SCORE: f64 = 5.0;

// Postgres truncates identifiers above this length.
const MAX_IDENTIFIER_LEN: usize = 63;

/// A rating as it enters the system: who rated what, and how much.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub user_id: i32,
    pub item_id: i32,
    pub score: f64,
}

impl Record {
    pub fn new(user_id: i32, item_id: i32, score: f64) -> Self {
        Self {
            user_id,
            item_id,
            score,
        }
    }

    /// Reject scores no partition can own: NaN, infinities, and anything outside `[0, MAX_SCORE]`.
    pub fn validate(&self) -> Result<(), PartitionError> {
        if !self.score.is_finite() || self.score < 0.0 || self.score > MAX_SCORE {
            return Err(PartitionError::InvalidArgument(format!(
                "score {} of record (user {}, item {}) is outside [0, {}]",
                self.score, self.user_id, self.item_id, MAX_SCORE
            )));
        }
        Ok(())
    }
}

/// A record once the base collection has accepted it. `id` grows with insertion order and is
/// carried over verbatim into whichever partition holds the record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredRecord {
    pub id: i64,
    #[sqlx(rename = "userid")]
    pub user_id: i32,
    #[sqlx(rename = "movieid")]
    pub item_id: i32,
    #[sqlx(rename = "rating")]
    pub score: f64,
}

impl StoredRecord {
    pub fn new(id: i64, record: Record) -> Self {
        Self {
            id,
            user_id: record.user_id,
            item_id: record.item_id,
            score: record.score,
        }
    }

    pub fn record(&self) -> Record {
        Record::new(self.user_id, self.item_id, self.score)
    }
}

/// Base tables assign ids; partition tables receive them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Base,
    Partition,
}

/// Row count and score range of one table.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TableSummary {
    pub rows: u64,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
}

/// Descriptor of an existing set of partitions: partition `i` is the table `{prefix}{i}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSet {
    pub prefix: String,
    pub count: usize,
}

impl PartitionSet {
    pub fn new(prefix: &str, count: usize) -> Self {
        Self {
            prefix: prefix.to_owned(),
            count,
        }
    }

    pub fn table_name(&self, index: usize) -> String {
        format!("{}{}", self.prefix, index)
    }

    pub fn tables(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.count).map(|index| self.table_name(index))
    }
}

/// The two ways records can be spread over partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Range,
    RoundRobin,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Range => "range",
            Strategy::RoundRobin => "round_robin",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = PartitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "range" => Ok(Strategy::Range),
            "round_robin" | "roundrobin" | "rrobin" => Ok(Strategy::RoundRobin),
            invalid => Err(PartitionError::InvalidArgument(format!(
                "{invalid} is not a valid partitioning strategy"
            ))),
        }
    }
}

pub(crate) fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => {}
        _ => return false,
    }
    name.len() <= MAX_IDENTIFIER_LEN
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Table names end up spliced into SQL, so only plain lowercase identifiers are accepted.
pub fn validate_table_name(name: &str) -> Result<(), PartitionError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(PartitionError::InvalidArgument(format!(
            "{name:?} is not a valid table name"
        )))
    }
}

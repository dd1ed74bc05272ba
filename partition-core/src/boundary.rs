use crate::error::PartitionError;
use crate::types::MAX_SCORE;

/// Relative tolerance used to decide that `score / width` sits exactly on an integer, i.e. that the
/// score lies on a shared boundary. Both the bulk and the single insert paths go through
/// `RangeScheme::partition_for`, so they can never disagree on it.
pub const BOUNDARY_TOLERANCE: f64 = 4.0 * f64::EPSILON;

/// Splits `[0, MAX_SCORE]` into `partitions` intervals of equal width.
///
/// Partition 0 owns `[0, w]`, partition `i > 0` owns `(i * w, (i + 1) * w]` and the last partition
/// always owns `MAX_SCORE`. A score on an interior boundary belongs to the lower partition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeScheme {
    partitions: usize,
    width: f64,
}

impl RangeScheme {
    pub fn new(partitions: usize) -> Result<Self, PartitionError> {
        if partitions == 0 {
            return Err(PartitionError::InvalidArgument(
                "number of partitions must be positive, got 0".to_owned(),
            ));
        }

        Ok(Self {
            partitions,
            width: MAX_SCORE / partitions as f64,
        })
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    /// Index of the partition owning `score`.
    pub fn partition_for(&self, score: f64) -> usize {
        let last = self.partitions - 1;

        if score <= 0.0 {
            return 0;
        }
        if score >= MAX_SCORE {
            return last;
        }

        let ratio = score / self.width;
        let nearest = ratio.round();
        let ratio = if (ratio - nearest).abs() <= BOUNDARY_TOLERANCE * nearest.max(1.0) {
            nearest
        } else {
            ratio
        };

        // ceil(r) - 1 is floor(r) off the boundaries and r - 1 on them.
        (ratio.ceil() as usize).saturating_sub(1).min(last)
    }

    /// Nominal `(lower, upper)` bounds of a partition. The lower bound is exclusive except for
    /// partition 0; the upper bound is inclusive and pinned to `MAX_SCORE` for the last partition.
    pub fn bounds(&self, index: usize) -> (f64, f64) {
        let lower = index as f64 * self.width;
        let upper = if index + 1 >= self.partitions {
            MAX_SCORE
        } else {
            (index + 1) as f64 * self.width
        };
        (lower, upper)
    }

    pub fn contains(&self, index: usize, score: f64) -> bool {
        self.partition_for(score) == index
    }
}

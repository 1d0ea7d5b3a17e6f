use serde::{Deserialize, Serialize};

use super::checkpoint::current_timestamp;
use super::EmbeddingVector;
use crate::domain::DomainError;

/// Batch-local statistics for one group: how many vectors arrived in the
/// batch and their element-wise mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialAggregate {
    group_key: String,
    count: u64,
    mean: EmbeddingVector,
}

impl PartialAggregate {
    pub fn new(group_key: impl Into<String>, count: u64, mean: EmbeddingVector) -> Self {
        Self {
            group_key: group_key.into(),
            count,
            mean,
        }
    }

    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> &EmbeddingVector {
        &self.mean
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// The persisted running aggregate of a `(partition_key, group_key)` pair.
///
/// `mean` is the arithmetic mean of every raw vector ever folded into the
/// group, whatever batch boundaries were used to get there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAggregate {
    partition_key: String,
    group_key: String,
    count: u64,
    mean: EmbeddingVector,
    updated_at: i64,
}

impl GroupAggregate {
    pub fn reconstitute(
        partition_key: String,
        group_key: String,
        count: u64,
        mean: EmbeddingVector,
        updated_at: i64,
    ) -> Self {
        Self {
            partition_key,
            group_key,
            count,
            mean,
            updated_at,
        }
    }

    /// Folds `partial` into `existing`, treating a missing aggregate as
    /// `count = 0` with a zero mean.
    ///
    /// ```text
    /// n    = c1 + c2
    /// mean = m1 * (c1 / n) + m2 * (c2 / n)
    /// ```
    ///
    /// The identity is associative, so folding batches one by one yields the
    /// same mean as a single pass over all of them.
    pub fn merge(
        existing: Option<&GroupAggregate>,
        partition_key: &str,
        partial: &PartialAggregate,
    ) -> Result<GroupAggregate, DomainError> {
        let (c1, m1) = match existing {
            Some(current) => {
                if current.partition_key != partition_key || current.group_key != partial.group_key
                {
                    return Err(DomainError::internal(format!(
                        "Cannot merge group {}/{} into {}/{}",
                        partition_key,
                        partial.group_key,
                        current.partition_key,
                        current.group_key
                    )));
                }
                (current.count, current.mean.clone())
            }
            None => (0, EmbeddingVector::zeros(partial.mean.dimensions())),
        };
        let c2 = partial.count;

        let new_count = c1.checked_add(c2).ok_or_else(|| {
            DomainError::inconsistent(format!(
                "Count overflow merging group {}/{}",
                partition_key, partial.group_key
            ))
        })?;

        partial.mean.ensure_dimensions(m1.dimensions()).map_err(|_| {
            DomainError::inconsistent(format!(
                "Group {}/{} has stored dimension {} but batch dimension {}",
                partition_key,
                partial.group_key,
                m1.dimensions(),
                partial.mean.dimensions()
            ))
        })?;

        let mean = if new_count == 0 {
            m1
        } else {
            let total = new_count as f64;
            EmbeddingVector::weighted_sum(&m1, c1 as f64 / total, &partial.mean, c2 as f64 / total)?
        };

        Ok(GroupAggregate {
            partition_key: partition_key.to_string(),
            group_key: partial.group_key.clone(),
            count: new_count,
            mean,
            updated_at: current_timestamp(),
        })
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> &EmbeddingVector {
        &self.mean
    }

    pub fn dimensions(&self) -> usize {
        self.mean.dimensions()
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(values: &[f64]) -> EmbeddingVector {
        EmbeddingVector::new(values.to_vec())
    }

    #[test]
    fn test_merge_into_missing_aggregate_copies_partial() {
        let partial = PartialAggregate::new("A", 2, vector(&[3.0, 0.0]));

        let merged = GroupAggregate::merge(None, "P", &partial).unwrap();

        assert_eq!(merged.partition_key(), "P");
        assert_eq!(merged.group_key(), "A");
        assert_eq!(merged.count(), 2);
        assert!(merged.mean().approx_eq(&vector(&[3.0, 0.0]), 1e-12));
    }

    #[test]
    fn test_merge_weights_by_count() {
        let existing = GroupAggregate::reconstitute(
            "P".to_string(),
            "A".to_string(),
            2,
            vector(&[3.0, 0.0]),
            0,
        );
        let partial = PartialAggregate::new("A", 1, vector(&[0.0, 6.0]));

        let merged = GroupAggregate::merge(Some(&existing), "P", &partial).unwrap();

        assert_eq!(merged.count(), 3);
        assert!(merged.mean().approx_eq(&vector(&[2.0, 2.0]), 1e-12));
    }

    #[test]
    fn test_merge_is_batch_invariant() {
        // Mean of [1], [2], [3], [6] is [3].
        let single = GroupAggregate::merge(
            None,
            "P",
            &PartialAggregate::new("G", 4, vector(&[3.0])),
        )
        .unwrap();

        let first = GroupAggregate::merge(
            None,
            "P",
            &PartialAggregate::new("G", 3, vector(&[2.0])),
        )
        .unwrap();
        let second = GroupAggregate::merge(
            Some(&first),
            "P",
            &PartialAggregate::new("G", 1, vector(&[6.0])),
        )
        .unwrap();

        assert_eq!(single.count(), second.count());
        assert!(single.mean().approx_eq(second.mean(), 1e-12));
    }

    #[test]
    fn test_merge_rejects_dimension_mismatch() {
        let existing = GroupAggregate::reconstitute(
            "P".to_string(),
            "A".to_string(),
            5,
            vector(&[1.0, 1.0, 1.0]),
            0,
        );
        let partial = PartialAggregate::new("A", 1, vector(&[1.0, 1.0]));

        let err = GroupAggregate::merge(Some(&existing), "P", &partial).unwrap_err();

        assert!(err.is_inconsistent());
    }

    #[test]
    fn test_merge_empty_partial_keeps_existing_mean() {
        let existing = GroupAggregate::reconstitute(
            "P".to_string(),
            "A".to_string(),
            4,
            vector(&[1.0, 2.0]),
            0,
        );
        let partial = PartialAggregate::new("A", 0, vector(&[0.0, 0.0]));

        let merged = GroupAggregate::merge(Some(&existing), "P", &partial).unwrap();

        assert_eq!(merged.count(), 4);
        assert!(merged.mean().approx_eq(&vector(&[1.0, 2.0]), 1e-12));
    }

    #[test]
    fn test_merge_rejects_foreign_group() {
        let existing = GroupAggregate::reconstitute(
            "P".to_string(),
            "B".to_string(),
            1,
            vector(&[1.0]),
            0,
        );
        let partial = PartialAggregate::new("A", 1, vector(&[1.0]));

        assert!(GroupAggregate::merge(Some(&existing), "P", &partial).is_err());
    }
}

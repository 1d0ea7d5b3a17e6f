use std::collections::BTreeMap;

use crate::domain::{DomainError, EmbeddingVector, IdRange, PartialAggregate, RawEmbeddingRecord};

struct GroupAccumulator {
    count: u64,
    sum: EmbeddingVector,
}

/// Folds the raw records of one batch into per-group partial aggregates.
///
/// Sums are kept per group and divided once in [`PartialAggregator::finish`].
/// Every vector of the batch must share a single dimension.
pub struct PartialAggregator {
    partition_key: String,
    range: IdRange,
    expected_dimensions: Option<usize>,
    batch_dimensions: Option<usize>,
    groups: BTreeMap<String, GroupAccumulator>,
    included: u64,
    skipped: u64,
}

impl PartialAggregator {
    pub fn new(partition_key: impl Into<String>, range: IdRange) -> Self {
        Self {
            partition_key: partition_key.into(),
            range,
            expected_dimensions: None,
            batch_dimensions: None,
            groups: BTreeMap::new(),
            included: 0,
            skipped: 0,
        }
    }

    pub fn with_expected_dimensions(mut self, dimensions: Option<usize>) -> Self {
        self.expected_dimensions = dimensions;
        self
    }

    /// Convenience wrapper: aggregates `records` in one call.
    pub fn aggregate<'a, I>(
        partition_key: &str,
        range: IdRange,
        expected_dimensions: Option<usize>,
        records: I,
    ) -> Result<Vec<PartialAggregate>, DomainError>
    where
        I: IntoIterator<Item = &'a RawEmbeddingRecord>,
    {
        let mut aggregator =
            Self::new(partition_key, range).with_expected_dimensions(expected_dimensions);
        aggregator.extend(records)?;
        Ok(aggregator.finish())
    }

    pub fn add(&mut self, record: &RawEmbeddingRecord) -> Result<(), DomainError> {
        if record.partition_key() != self.partition_key {
            return Err(DomainError::inconsistent(format!(
                "Record {} belongs to partition {}, expected {}",
                record.id(),
                record.partition_key(),
                self.partition_key
            )));
        }
        if !self.range.contains(record.id()) {
            return Err(DomainError::inconsistent(format!(
                "Record {} is outside batch range {}",
                record.id(),
                self.range
            )));
        }

        let vector = match record.vector() {
            Some(v) => v,
            None => {
                self.skipped += 1;
                return Ok(());
            }
        };

        if !vector.is_finite() {
            return Err(DomainError::inconsistent(format!(
                "Record {} has a non-finite embedding component",
                record.id()
            )));
        }
        if vector.is_empty() {
            return Err(DomainError::inconsistent(format!(
                "Record {} has an empty embedding",
                record.id()
            )));
        }

        let expected = match (self.expected_dimensions, self.batch_dimensions) {
            (Some(configured), _) => configured,
            (None, Some(seen)) => seen,
            (None, None) => vector.dimensions(),
        };
        if vector.dimensions() != expected {
            return Err(DomainError::inconsistent(format!(
                "Record {} has embedding dimension {}, expected {}",
                record.id(),
                vector.dimensions(),
                expected
            )));
        }
        self.batch_dimensions = Some(expected);

        let group = self
            .groups
            .entry(record.group_key().to_string())
            .or_insert_with(|| GroupAccumulator {
                count: 0,
                sum: EmbeddingVector::zeros(expected),
            });
        group.sum.accumulate(vector)?;
        group.count += 1;
        self.included += 1;

        Ok(())
    }

    pub fn extend<'a, I>(&mut self, records: I) -> Result<(), DomainError>
    where
        I: IntoIterator<Item = &'a RawEmbeddingRecord>,
    {
        for record in records {
            self.add(record)?;
        }
        Ok(())
    }

    /// Records that contributed a vector so far.
    pub fn included(&self) -> u64 {
        self.included
    }

    /// Records skipped because their vector was absent.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Emits one partial per group seen, ordered by group key.
    pub fn finish(self) -> Vec<PartialAggregate> {
        self.groups
            .into_iter()
            .map(|(group_key, acc)| {
                let mean = acc.sum.scaled(1.0 / acc.count as f64);
                PartialAggregate::new(group_key, acc.count, mean)
            })
            .collect()
    }
}

use serde::Serialize;
use tracing::debug;

use crate::application::AggregateWriter;
use crate::domain::{Checkpoint, DomainError, GroupAggregate, IdRange, PartialAggregate};

/// Everything one atomic unit needs: the partition, the id range the
/// partials were computed over, and the partials themselves.
#[derive(Debug, Clone)]
pub struct MergeBatch {
    partition_key: String,
    range: IdRange,
    partials: Vec<PartialAggregate>,
}

impl MergeBatch {
    pub fn new(
        partition_key: impl Into<String>,
        range: IdRange,
        partials: Vec<PartialAggregate>,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            range,
            partials,
        }
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn range(&self) -> IdRange {
        self.range
    }

    pub fn partials(&self) -> &[PartialAggregate] {
        &self.partials
    }

    /// Number of vectors carried by the batch.
    pub fn record_count(&self) -> u64 {
        self.partials.iter().map(|p| p.count()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchCommit {
    pub checkpoint: i64,
    pub groups_written: usize,
}

/// Runs the merge-and-advance sequence of one batch against a
/// transaction-scoped writer.
///
/// The stored checkpoint must still equal `batch.range().low()`; otherwise the
/// partition moved since the range was selected and the unit is refused
/// before anything is written. The checkpoint is written after every
/// aggregate. Callers commit only when this returns `Ok`.
pub fn apply_batch(
    writer: &mut dyn AggregateWriter,
    batch: &MergeBatch,
) -> Result<BatchCommit, DomainError> {
    let range = batch.range();
    if range.is_empty() {
        return Err(DomainError::invalid_input(format!(
            "Refusing to commit empty range {} for partition {}",
            range,
            batch.partition_key()
        )));
    }

    let current = writer.read_checkpoint(batch.partition_key())?;
    let current = Checkpoint::validate_id(batch.partition_key(), current)?;
    if current != range.low() {
        return Err(DomainError::conflict(format!(
            "Checkpoint for partition {} is {} but batch {} expected {}",
            batch.partition_key(),
            current,
            range,
            range.low()
        )));
    }

    let mut groups_written = 0;
    for partial in batch.partials().iter().filter(|p| !p.is_empty()) {
        let existing = writer.find_aggregate(batch.partition_key(), partial.group_key())?;
        let merged = GroupAggregate::merge(existing.as_ref(), batch.partition_key(), partial)?;
        writer.upsert_aggregate(&merged)?;
        groups_written += 1;
    }

    writer.write_checkpoint(&Checkpoint::new(batch.partition_key(), range.high()))?;

    debug!(
        "Applied batch {} for partition {}: {} vectors into {} groups",
        range,
        batch.partition_key(),
        batch.record_count(),
        groups_written
    );

    Ok(BatchCommit {
        checkpoint: range.high(),
        groups_written,
    })
}

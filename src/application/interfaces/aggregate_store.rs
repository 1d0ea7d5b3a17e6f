use async_trait::async_trait;

use crate::application::{BatchCommit, MergeBatch};
use crate::domain::{Checkpoint, DomainError, GroupAggregate};

/// Transaction-scoped access to aggregates and checkpoints.
///
/// Every call made through one writer belongs to the same atomic unit; the
/// unit is committed or rolled back by the store that handed out the writer.
pub trait AggregateWriter {
    /// Last processed id of the partition, 0 when no checkpoint exists.
    fn read_checkpoint(&mut self, partition_key: &str) -> Result<i64, DomainError>;

    fn find_aggregate(
        &mut self,
        partition_key: &str,
        group_key: &str,
    ) -> Result<Option<GroupAggregate>, DomainError>;

    /// Insert-or-update keyed by `(partition_key, group_key)`.
    fn upsert_aggregate(&mut self, aggregate: &GroupAggregate) -> Result<(), DomainError>;

    /// Insert-or-update keyed by `partition_key`.
    fn write_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), DomainError>;
}

/// Durable store of running group aggregates and per-partition checkpoints.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Last processed id of the partition, 0 when no checkpoint exists.
    async fn read_checkpoint(&self, partition_key: &str) -> Result<i64, DomainError>;

    /// Merges the batch and advances the checkpoint to `batch.range().high()`
    /// as a single atomic unit (see [`crate::application::apply_batch`]).
    /// On error nothing of the batch is persisted.
    async fn commit_batch(&self, batch: &MergeBatch) -> Result<BatchCommit, DomainError>;

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, DomainError>;

    async fn find_aggregate(
        &self,
        partition_key: &str,
        group_key: &str,
    ) -> Result<Option<GroupAggregate>, DomainError>;

    /// All aggregates of the partition, ordered by group key.
    async fn find_by_partition(
        &self,
        partition_key: &str,
    ) -> Result<Vec<GroupAggregate>, DomainError>;

    async fn count_groups(&self, partition_key: &str) -> Result<u64, DomainError>;
}

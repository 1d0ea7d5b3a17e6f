use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::{apply_batch, AggregateStore, AggregateWriter, BatchCommit, MergeBatch};
use crate::domain::{Checkpoint, DomainError, GroupAggregate};

type GroupId = (String, String);

#[derive(Default)]
struct AggregateState {
    aggregates: BTreeMap<GroupId, GroupAggregate>,
    checkpoints: BTreeMap<String, Checkpoint>,
}

/// Buffers the writes of one batch on top of the committed state. The
/// buffered writes are folded in only after the whole batch succeeded.
struct StagedWriter<'a> {
    base: &'a AggregateState,
    aggregates: BTreeMap<GroupId, GroupAggregate>,
    checkpoints: BTreeMap<String, Checkpoint>,
}

impl<'a> StagedWriter<'a> {
    fn new(base: &'a AggregateState) -> Self {
        Self {
            base,
            aggregates: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
        }
    }

    fn into_changes(
        self,
    ) -> (
        BTreeMap<GroupId, GroupAggregate>,
        BTreeMap<String, Checkpoint>,
    ) {
        (self.aggregates, self.checkpoints)
    }
}

impl AggregateWriter for StagedWriter<'_> {
    fn read_checkpoint(&mut self, partition_key: &str) -> Result<i64, DomainError> {
        let checkpoint = self
            .checkpoints
            .get(partition_key)
            .or_else(|| self.base.checkpoints.get(partition_key));
        match checkpoint {
            Some(c) => Checkpoint::validate_id(partition_key, c.last_processed_id()),
            None => Ok(0),
        }
    }

    fn find_aggregate(
        &mut self,
        partition_key: &str,
        group_key: &str,
    ) -> Result<Option<GroupAggregate>, DomainError> {
        let key = (partition_key.to_string(), group_key.to_string());
        Ok(self
            .aggregates
            .get(&key)
            .or_else(|| self.base.aggregates.get(&key))
            .cloned())
    }

    fn upsert_aggregate(&mut self, aggregate: &GroupAggregate) -> Result<(), DomainError> {
        self.aggregates.insert(
            (
                aggregate.partition_key().to_string(),
                aggregate.group_key().to_string(),
            ),
            aggregate.clone(),
        );
        Ok(())
    }

    fn write_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), DomainError> {
        self.checkpoints
            .insert(checkpoint.partition_key().to_string(), checkpoint.clone());
        Ok(())
    }
}

pub struct InMemoryAggregateStore {
    state: Arc<Mutex<AggregateState>>,
}

impl InMemoryAggregateStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AggregateState::default())),
        }
    }
}

impl Default for InMemoryAggregateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn read_checkpoint(&self, partition_key: &str) -> Result<i64, DomainError> {
        let state = self.state.lock().await;
        StagedWriter::new(&state).read_checkpoint(partition_key)
    }

    async fn commit_batch(&self, batch: &MergeBatch) -> Result<BatchCommit, DomainError> {
        let mut state = self.state.lock().await;

        let (commit, aggregates, checkpoints) = {
            let mut writer = StagedWriter::new(&state);
            let commit = apply_batch(&mut writer, batch)?;
            let (aggregates, checkpoints) = writer.into_changes();
            (commit, aggregates, checkpoints)
        };

        state.aggregates.extend(aggregates);
        state.checkpoints.extend(checkpoints);

        debug!(
            "Committed {} aggregates for partition {} to memory",
            commit.groups_written,
            batch.partition_key()
        );
        Ok(commit)
    }

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, DomainError> {
        let state = self.state.lock().await;
        Ok(state.checkpoints.values().cloned().collect())
    }

    async fn find_aggregate(
        &self,
        partition_key: &str,
        group_key: &str,
    ) -> Result<Option<GroupAggregate>, DomainError> {
        let state = self.state.lock().await;
        StagedWriter::new(&state).find_aggregate(partition_key, group_key)
    }

    async fn find_by_partition(
        &self,
        partition_key: &str,
    ) -> Result<Vec<GroupAggregate>, DomainError> {
        let state = self.state.lock().await;
        Ok(state
            .aggregates
            .values()
            .filter(|a| a.partition_key() == partition_key)
            .cloned()
            .collect())
    }

    async fn count_groups(&self, partition_key: &str) -> Result<u64, DomainError> {
        let state = self.state.lock().await;
        Ok(state
            .aggregates
            .keys()
            .filter(|(partition, _)| partition == partition_key)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EmbeddingVector, IdRange, PartialAggregate};

    fn partial(group: &str, count: u64, mean: &[f64]) -> PartialAggregate {
        PartialAggregate::new(group, count, EmbeddingVector::new(mean.to_vec()))
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_no_trace() {
        let store = InMemoryAggregateStore::new();
        store
            .commit_batch(&MergeBatch::new(
                "P",
                IdRange::new(0, 1),
                vec![partial("B", 1, &[1.0, 1.0, 1.0])],
            ))
            .await
            .unwrap();

        // A merges fine, B fails on the dimension check after A was staged.
        let failing = MergeBatch::new(
            "P",
            IdRange::new(1, 3),
            vec![partial("A", 1, &[1.0, 2.0]), partial("B", 1, &[1.0, 2.0])],
        );
        let err = store.commit_batch(&failing).await.unwrap_err();

        assert!(err.is_inconsistent());
        assert!(store.find_aggregate("P", "A").await.unwrap().is_none());
        assert_eq!(store.read_checkpoint("P").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_by_partition_is_ordered_and_scoped() {
        let store = InMemoryAggregateStore::new();
        store
            .commit_batch(&MergeBatch::new(
                "P",
                IdRange::new(0, 2),
                vec![partial("b", 1, &[1.0]), partial("a", 1, &[2.0])],
            ))
            .await
            .unwrap();
        store
            .commit_batch(&MergeBatch::new(
                "Q",
                IdRange::new(0, 1),
                vec![partial("c", 1, &[3.0])],
            ))
            .await
            .unwrap();

        let groups: Vec<String> = store
            .find_by_partition("P")
            .await
            .unwrap()
            .iter()
            .map(|a| a.group_key().to_string())
            .collect();

        assert_eq!(groups, vec!["a", "b"]);
        assert_eq!(store.count_groups("Q").await.unwrap(), 1);
        assert_eq!(store.list_checkpoints().await.unwrap().len(), 2);
    }
}

use std::sync::Arc;

use crate::application::{AggregateStore, RawEmbeddingRepository};
use crate::domain::{DomainError, PartitionSelector, PartitionStatus};

/// Reports how far each partition's checkpoint trails the raw table.
pub struct PartitionStatusUseCase {
    raw_repo: Arc<dyn RawEmbeddingRepository>,
    aggregate_store: Arc<dyn AggregateStore>,
}

impl PartitionStatusUseCase {
    pub fn new(
        raw_repo: Arc<dyn RawEmbeddingRepository>,
        aggregate_store: Arc<dyn AggregateStore>,
    ) -> Self {
        Self {
            raw_repo,
            aggregate_store,
        }
    }

    pub async fn execute(
        &self,
        selector: &PartitionSelector,
    ) -> Result<Vec<PartitionStatus>, DomainError> {
        let discovered = if selector.requires_discovery() {
            // Partitions whose raw rows are gone still have a checkpoint worth showing.
            let mut keys = self.raw_repo.partitions().await?;
            keys.extend(
                self.aggregate_store
                    .list_checkpoints()
                    .await?
                    .into_iter()
                    .map(|c| c.partition_key().to_string()),
            );
            keys
        } else {
            Vec::new()
        };

        let mut statuses = Vec::new();
        for partition_key in selector.resolve(discovered) {
            let checkpoint = self.aggregate_store.read_checkpoint(&partition_key).await?;
            let max_raw_id = self.raw_repo.max_id(&partition_key).await?;
            let group_count = self.aggregate_store.count_groups(&partition_key).await?;
            statuses.push(PartitionStatus {
                partition_key,
                checkpoint,
                max_raw_id,
                group_count,
            });
        }

        Ok(statuses)
    }
}

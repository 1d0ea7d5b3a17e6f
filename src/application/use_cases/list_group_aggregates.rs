use std::sync::Arc;

use crate::application::AggregateStore;
use crate::domain::{DomainError, GroupAggregate};

pub struct ListGroupAggregatesUseCase {
    aggregate_store: Arc<dyn AggregateStore>,
}

impl ListGroupAggregatesUseCase {
    pub fn new(aggregate_store: Arc<dyn AggregateStore>) -> Self {
        Self { aggregate_store }
    }

    pub async fn execute(&self, partition_key: &str) -> Result<Vec<GroupAggregate>, DomainError> {
        self.aggregate_store.find_by_partition(partition_key).await
    }

    pub async fn get(
        &self,
        partition_key: &str,
        group_key: &str,
    ) -> Result<GroupAggregate, DomainError> {
        self.aggregate_store
            .find_aggregate(partition_key, group_key)
            .await?
            .ok_or_else(|| {
                DomainError::not_found(format!(
                    "No aggregate for group {} in partition {}",
                    group_key, partition_key
                ))
            })
    }
}

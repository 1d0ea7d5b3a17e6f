use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::RawEmbeddingRepository;
use crate::domain::{validate_append_order, DomainError, IdRange, RawEmbeddingRecord};

pub struct InMemoryRawEmbeddingRepository {
    records: Arc<Mutex<BTreeMap<i64, RawEmbeddingRecord>>>,
}

impl InMemoryRawEmbeddingRepository {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }
}

impl Default for InMemoryRawEmbeddingRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RawEmbeddingRepository for InMemoryRawEmbeddingRepository {
    async fn partitions(&self) -> Result<Vec<String>, DomainError> {
        let records = self.records.lock().await;
        let partitions: BTreeSet<&str> = records.values().map(|r| r.partition_key()).collect();
        Ok(partitions.into_iter().map(String::from).collect())
    }

    async fn max_id(&self, partition_key: &str) -> Result<Option<i64>, DomainError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .rev()
            .find(|r| r.partition_key() == partition_key)
            .map(|r| r.id()))
    }

    async fn scan(
        &self,
        partition_key: &str,
        range: IdRange,
        limit: Option<usize>,
    ) -> Result<Vec<RawEmbeddingRecord>, DomainError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.records.lock().await;
        Ok(records
            .range(range.low().saturating_add(1)..=range.high())
            .map(|(_, r)| r)
            .filter(|r| r.partition_key() == partition_key)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn append_batch(&self, batch: &[RawEmbeddingRecord]) -> Result<(), DomainError> {
        let mut records = self.records.lock().await;

        validate_append_order(batch, |partition_key| {
            Ok(records
                .values()
                .rev()
                .find(|r| r.partition_key() == partition_key)
                .map(|r| r.id()))
        })?;
        if let Some(existing) = batch.iter().find(|r| records.contains_key(&r.id())) {
            return Err(DomainError::invalid_input(format!(
                "Raw record {} already exists",
                existing.id()
            )));
        }

        for record in batch {
            records.insert(record.id(), record.clone());
        }

        debug!("Appended {} raw records to memory", batch.len());
        Ok(())
    }
}

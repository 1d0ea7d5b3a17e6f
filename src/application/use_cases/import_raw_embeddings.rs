use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::application::{AggregateStore, RawEmbeddingRepository};
use crate::domain::{DomainError, RawEmbeddingRecord};

/// Loads raw records from a JSON Lines file into the raw table.
///
/// Each non-blank line is one record:
/// `{"id": 1, "partition_key": "p", "group_key": "g", "vector": [0.1, 0.2]}`.
/// The file is imported completely or not at all.
pub struct ImportRawEmbeddingsUseCase {
    raw_repo: Arc<dyn RawEmbeddingRepository>,
    aggregate_store: Arc<dyn AggregateStore>,
}

impl ImportRawEmbeddingsUseCase {
    pub fn new(
        raw_repo: Arc<dyn RawEmbeddingRepository>,
        aggregate_store: Arc<dyn AggregateStore>,
    ) -> Self {
        Self {
            raw_repo,
            aggregate_store,
        }
    }

    /// Returns the number of records appended.
    pub async fn execute(&self, path: &Path) -> Result<u64, DomainError> {
        let records = Self::read_records(path).await?;
        if records.is_empty() {
            info!("No raw records in {}", path.display());
            return Ok(0);
        }

        self.ensure_above_checkpoints(&records).await?;
        self.raw_repo.append_batch(&records).await?;

        info!("Imported {} raw records from {}", records.len(), path.display());
        Ok(records.len() as u64)
    }

    async fn read_records(path: &Path) -> Result<Vec<RawEmbeddingRecord>, DomainError> {
        let file = tokio::fs::File::open(path).await?;
        let mut lines = BufReader::new(file).lines();

        let mut records = Vec::new();
        let mut line_number = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }

            let record: RawEmbeddingRecord = serde_json::from_str(&line).map_err(|e| {
                DomainError::invalid_input(format!(
                    "{}:{}: invalid record: {}",
                    path.display(),
                    line_number,
                    e
                ))
            })?;
            records.push(record);
        }

        debug!("Parsed {} raw records from {}", records.len(), path.display());
        Ok(records)
    }

    /// A record at or below its partition's checkpoint would never be merged.
    async fn ensure_above_checkpoints(
        &self,
        records: &[RawEmbeddingRecord],
    ) -> Result<(), DomainError> {
        let mut lowest: BTreeMap<&str, i64> = BTreeMap::new();
        for record in records {
            let entry = lowest.entry(record.partition_key()).or_insert(record.id());
            *entry = (*entry).min(record.id());
        }

        for (partition_key, lowest_id) in lowest {
            let checkpoint = self.aggregate_store.read_checkpoint(partition_key).await?;
            if lowest_id <= checkpoint {
                return Err(DomainError::invalid_input(format!(
                    "Raw record {} is at or below checkpoint {} of partition {}",
                    lowest_id, checkpoint, partition_key
                )));
            }
        }
        Ok(())
    }
}

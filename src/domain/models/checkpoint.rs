use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// Replay boundary of one partition: every raw record with
/// `id <= last_processed_id` has been folded into the aggregates exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    partition_key: String,
    last_processed_id: i64,
    updated_at: i64,
}

impl Checkpoint {
    pub fn new(partition_key: impl Into<String>, last_processed_id: i64) -> Self {
        Self {
            partition_key: partition_key.into(),
            last_processed_id,
            updated_at: current_timestamp(),
        }
    }

    pub fn reconstitute(partition_key: String, last_processed_id: i64, updated_at: i64) -> Self {
        Self {
            partition_key,
            last_processed_id,
            updated_at,
        }
    }

    /// Checks a stored checkpoint value before it is trusted as a replay
    /// boundary.
    pub fn validate_id(partition_key: &str, last_processed_id: i64) -> Result<i64, DomainError> {
        if last_processed_id < 0 {
            return Err(DomainError::inconsistent(format!(
                "Checkpoint for partition {} is negative: {}",
                partition_key, last_processed_id
            )));
        }
        Ok(last_processed_id)
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn last_processed_id(&self) -> i64 {
        self.last_processed_id
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }
}

pub(crate) fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

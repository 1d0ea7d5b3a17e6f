use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::EmbeddingVector;
use crate::domain::DomainError;

/// One raw observation from the upstream embeddings table.
///
/// Records are immutable once written. `vector` is `None` when the upstream
/// model produced no embedding; such records never contribute to aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEmbeddingRecord {
    id: i64,
    partition_key: String,
    group_key: String,
    #[serde(default)]
    vector: Option<EmbeddingVector>,
}

impl RawEmbeddingRecord {
    pub fn new(
        id: i64,
        partition_key: impl Into<String>,
        group_key: impl Into<String>,
        vector: Option<EmbeddingVector>,
    ) -> Self {
        Self {
            id,
            partition_key: partition_key.into(),
            group_key: group_key.into(),
            vector,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    pub fn vector(&self) -> Option<&EmbeddingVector> {
        self.vector.as_ref()
    }

    pub fn has_vector(&self) -> bool {
        self.vector.is_some()
    }
}

/// Checks that `records` may be appended behind the rows already stored.
///
/// Ids must be positive, unique within the call, and strictly above the
/// highest id of their partition. `stored_max` is asked once per partition
/// for the highest id already stored there.
pub fn validate_append_order<F>(
    records: &[RawEmbeddingRecord],
    mut stored_max: F,
) -> Result<(), DomainError>
where
    F: FnMut(&str) -> Result<Option<i64>, DomainError>,
{
    let mut seen = HashSet::new();
    let mut high_water: HashMap<&str, Option<i64>> = HashMap::new();

    for record in records {
        if record.id() <= 0 {
            return Err(DomainError::invalid_input(format!(
                "Raw record {} has a non-positive id",
                record.id()
            )));
        }
        if !seen.insert(record.id()) {
            return Err(DomainError::invalid_input(format!(
                "Raw record {} appears twice",
                record.id()
            )));
        }

        let partition_key = record.partition_key();
        let current = match high_water.get(partition_key) {
            Some(max) => *max,
            None => stored_max(partition_key)?,
        };
        if let Some(max) = current {
            if record.id() <= max {
                return Err(DomainError::invalid_input(format!(
                    "Raw record {} is not above id {} of partition {}",
                    record.id(),
                    max,
                    partition_key
                )));
            }
        }
        high_water.insert(partition_key, Some(record.id()));
    }

    Ok(())
}

use async_trait::async_trait;

use crate::domain::{DomainError, IdRange, RawEmbeddingRecord};

/// Access to the upstream table of raw per-record embeddings.
#[async_trait]
pub trait RawEmbeddingRepository: Send + Sync {
    /// Distinct partition keys present in the raw table, sorted.
    async fn partitions(&self) -> Result<Vec<String>, DomainError>;

    /// Highest record id of the partition, `None` when it has no rows.
    async fn max_id(&self, partition_key: &str) -> Result<Option<i64>, DomainError>;

    /// Records of the partition with `range.low() < id <= range.high()` in id
    /// order, including those without a vector. `limit` caps the number of
    /// rows returned, taking the lowest ids first.
    async fn scan(
        &self,
        partition_key: &str,
        range: IdRange,
        limit: Option<usize>,
    ) -> Result<Vec<RawEmbeddingRecord>, DomainError>;

    /// Appends records as one atomic unit.
    ///
    /// Ids are assigned upstream. Each must be positive, unused, and above
    /// every id already stored for its partition (including earlier records
    /// of the same call); otherwise nothing is appended and the call fails
    /// with `InvalidInput`.
    async fn append_batch(&self, records: &[RawEmbeddingRecord]) -> Result<(), DomainError>;
}

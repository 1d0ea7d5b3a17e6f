pub mod application;
pub mod connector;
pub mod domain;

pub use application::{
    apply_batch, AggregateStore, AggregateWriter, BatchCommit, ImportRawEmbeddingsUseCase,
    ListGroupAggregatesUseCase, MergeBatch, PartitionStatusUseCase, RawEmbeddingRepository,
    RefreshConfig, RefreshGroupEmbeddingsUseCase,
};

pub use connector::{
    Container, ContainerConfig, DuckdbAggregateStore, DuckdbRawEmbeddingRepository,
    InMemoryAggregateStore, InMemoryRawEmbeddingRepository,
};

pub use domain::{
    Checkpoint, DomainError, EmbeddingVector, GroupAggregate, IdRange, PartialAggregate,
    PartialAggregator, PartitionOutcome, PartitionReport, PartitionSelector, PartitionStatus,
    RawEmbeddingRecord, RunReport,
};

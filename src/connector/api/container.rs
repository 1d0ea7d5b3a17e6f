use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::application::{
    AggregateStore, ImportRawEmbeddingsUseCase, ListGroupAggregatesUseCase,
    PartitionStatusUseCase, RawEmbeddingRepository, RefreshConfig,
    RefreshGroupEmbeddingsUseCase,
};
use crate::{
    DuckdbAggregateStore, DuckdbRawEmbeddingRepository, InMemoryAggregateStore,
    InMemoryRawEmbeddingRepository,
};

pub const DEFAULT_DB_FILE: &str = "group-embeddings.duckdb";

pub struct ContainerConfig {
    pub data_dir: String,
    /// Explicit DuckDB file; overrides `data_dir`.
    pub database: Option<PathBuf>,
    /// Keep raw records and aggregates in memory only. Nothing persists
    /// beyond the process.
    pub memory_storage: bool,
    /// Open the database in read-only mode.
    ///
    /// When `true`, DuckDB is opened with `AccessMode::ReadOnly`, which does not
    /// acquire the exclusive write lock, so `status` and `show` can run while a
    /// refresh holds the file. The schema is not created in this mode.
    pub read_only: bool,
}

impl ContainerConfig {
    pub fn db_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.data_dir).join(DEFAULT_DB_FILE))
    }
}

pub struct Container {
    raw_repo: Arc<dyn RawEmbeddingRepository>,
    aggregate_store: Arc<dyn AggregateStore>,
    config: ContainerConfig,
}

impl Container {
    pub async fn new(config: ContainerConfig) -> Result<Self> {
        let (raw_repo, aggregate_store): (
            Arc<dyn RawEmbeddingRepository>,
            Arc<dyn AggregateStore>,
        ) = if config.memory_storage {
            debug!("Using in-memory storage");
            (
                Arc::new(InMemoryRawEmbeddingRepository::new()),
                Arc::new(InMemoryAggregateStore::new()),
            )
        } else {
            let db_path = config.db_path();
            if config.read_only {
                debug!("Opening DuckDB (read-only) at {:?}", db_path);
                let raw = DuckdbRawEmbeddingRepository::new_read_only(&db_path)?;
                let store = DuckdbAggregateStore::with_connection_no_init(raw.shared_connection());
                (Arc::new(raw), Arc::new(store))
            } else {
                if let Some(parent) = db_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                debug!("Opening DuckDB at {:?}", db_path);
                // One connection for both tables: DuckDB allows a single writer per file.
                let raw = DuckdbRawEmbeddingRepository::new(&db_path)?;
                let store = DuckdbAggregateStore::with_connection(raw.shared_connection()).await?;
                (Arc::new(raw), Arc::new(store))
            }
        };

        Ok(Self {
            raw_repo,
            aggregate_store,
            config,
        })
    }

    pub fn refresh_use_case(&self, refresh_config: RefreshConfig) -> RefreshGroupEmbeddingsUseCase {
        RefreshGroupEmbeddingsUseCase::new(self.raw_repo.clone(), self.aggregate_store.clone())
            .with_config(refresh_config)
    }

    pub fn status_use_case(&self) -> PartitionStatusUseCase {
        PartitionStatusUseCase::new(self.raw_repo.clone(), self.aggregate_store.clone())
    }

    pub fn list_aggregates_use_case(&self) -> ListGroupAggregatesUseCase {
        ListGroupAggregatesUseCase::new(self.aggregate_store.clone())
    }

    pub fn import_use_case(&self) -> ImportRawEmbeddingsUseCase {
        ImportRawEmbeddingsUseCase::new(self.raw_repo.clone(), self.aggregate_store.clone())
    }

    pub fn db_path(&self) -> PathBuf {
        self.config.db_path()
    }
}

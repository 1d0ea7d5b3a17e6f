use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use duckdb::types::Value;
use duckdb::{params, Connection};
use tokio::sync::Mutex;
use tracing::debug;

use super::duckdb_support::{open_connection, vector_from_value, vector_to_param};
use crate::application::RawEmbeddingRepository;
use crate::domain::{validate_append_order, DomainError, IdRange, RawEmbeddingRecord};

pub struct DuckdbRawEmbeddingRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DuckdbRawEmbeddingRepository {
    pub fn new(path: &Path) -> Result<Self, DomainError> {
        let conn = open_connection(path, false)?;
        Self::initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens the database without taking the write lock. The schema must
    /// already exist.
    pub fn new_read_only(path: &Path) -> Result<Self, DomainError> {
        let conn = open_connection(path, true)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[allow(dead_code)]
    pub fn in_memory() -> Result<Self, DomainError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            DomainError::storage(format!("Failed to open DuckDB in-memory DB: {}", e))
        })?;
        Self::initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Returns a clone of the shared connection Arc.
    /// DuckDB only allows one write connection per file, so the aggregate
    /// store runs on this same connection.
    pub fn shared_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn query_max_id(conn: &Connection, partition_key: &str) -> Result<Option<i64>, DomainError> {
        conn.query_row(
            "SELECT MAX(id) FROM raw_embeddings WHERE partition_key = ?",
            params![partition_key],
            |row| row.get::<_, Option<i64>>(0),
        )
        .map_err(|e| DomainError::storage(format!("Failed to query max id: {}", e)))
    }

    fn initialize_schema(conn: &Connection) -> Result<(), DomainError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS raw_embeddings (
                id BIGINT PRIMARY KEY,
                partition_key TEXT NOT NULL,
                group_key TEXT NOT NULL,
                vector DOUBLE[]
            );

            CREATE INDEX IF NOT EXISTS idx_raw_embeddings_partition_id
            ON raw_embeddings(partition_key, id);
            "#,
        )
        .map_err(|e| {
            DomainError::storage(format!("Failed to initialize raw_embeddings schema: {}", e))
        })?;

        debug!("DuckDB raw_embeddings table initialized");
        Ok(())
    }
}

#[async_trait]
impl RawEmbeddingRepository for DuckdbRawEmbeddingRepository {
    async fn partitions(&self) -> Result<Vec<String>, DomainError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT DISTINCT partition_key FROM raw_embeddings ORDER BY partition_key")
            .map_err(|e| DomainError::storage(format!("Failed to prepare statement: {}", e)))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| DomainError::storage(format!("Failed to query partitions: {}", e)))?;

        let mut partitions = Vec::new();
        for row in rows {
            partitions
                .push(row.map_err(|e| DomainError::storage(format!("Failed to read row: {}", e)))?);
        }

        Ok(partitions)
    }

    async fn max_id(&self, partition_key: &str) -> Result<Option<i64>, DomainError> {
        let conn = self.conn.lock().await;
        Self::query_max_id(&conn, partition_key)
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

        let mut sql = String::from(
            "SELECT id, group_key, vector FROM raw_embeddings \
             WHERE partition_key = ? AND id > ? AND id <= ? ORDER BY id",
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DomainError::storage(format!("Failed to prepare scan: {}", e)))?;

        let rows = stmt
            .query_map(params![partition_key, range.low(), range.high()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Value>(2)?,
                ))
            })
            .map_err(|e| DomainError::storage(format!("Failed to scan raw embeddings: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, group_key, vector) =
                row.map_err(|e| DomainError::storage(format!("Failed to read row: {}", e)))?;
            let vector = vector_from_value(vector, || format!("raw record {}", id))?;
            records.push(RawEmbeddingRecord::new(id, partition_key, group_key, vector));
        }

        debug!(
            "Scanned {} raw records in {} for partition {}",
            records.len(),
            range,
            partition_key
        );
        Ok(records)
    }

    async fn append_batch(&self, records: &[RawEmbeddingRecord]) -> Result<(), DomainError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| DomainError::storage(format!("Failed to begin transaction: {}", e)))?;

        validate_append_order(records, |partition_key| {
            Self::query_max_id(&tx, partition_key)
        })?;

        {
            let mut exists = tx
                .prepare("SELECT COUNT(*) FROM raw_embeddings WHERE id = ?")
                .map_err(|e| DomainError::storage(format!("Failed to prepare statement: {}", e)))?;
            let mut insert = tx
                .prepare(
                    "INSERT INTO raw_embeddings (id, partition_key, group_key, vector) \
                     VALUES (?, ?, ?, CAST(CAST(? AS VARCHAR) AS DOUBLE[]))",
                )
                .map_err(|e| DomainError::storage(format!("Failed to prepare statement: {}", e)))?;

            for record in records {
                // Ids are unique across partitions.
                let taken: i64 = exists
                    .query_row(params![record.id()], |row| row.get(0))
                    .map_err(|e| {
                        DomainError::storage(format!("Failed to look up raw record: {}", e))
                    })?;
                if taken > 0 {
                    return Err(DomainError::invalid_input(format!(
                        "Raw record {} already exists",
                        record.id()
                    )));
                }

                let vector = record.vector().map(vector_to_param).transpose()?;
                insert
                    .execute(params![
                        record.id(),
                        record.partition_key(),
                        record.group_key(),
                        vector,
                    ])
                    .map_err(|e| {
                        DomainError::storage(format!(
                            "Failed to insert raw record {}: {}",
                            record.id(),
                            e
                        ))
                    })?;
            }
        }

        tx.commit()
            .map_err(|e| DomainError::storage(format!("Failed to commit: {}", e)))?;

        debug!("Appended {} raw records to DuckDB", records.len());
        Ok(())
    }
}

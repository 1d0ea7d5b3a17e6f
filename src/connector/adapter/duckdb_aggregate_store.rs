use std::sync::Arc;

use async_trait::async_trait;
use duckdb::types::Value;
use duckdb::{params, Connection};
use tokio::sync::Mutex;
use tracing::debug;

use super::duckdb_support::{vector_from_value, vector_to_param};
use crate::application::{apply_batch, AggregateStore, AggregateWriter, BatchCommit, MergeBatch};
use crate::domain::{Checkpoint, DomainError, GroupAggregate};

const AGGREGATE_COLUMNS: &str = "partition_key, group_key, vector_count, mean, updated_at";

pub struct DuckdbAggregateStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckdbAggregateStore {
    /// Create a new store using an existing shared connection.
    pub async fn with_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, DomainError> {
        let conn_guard = conn.lock().await;
        Self::initialize_schema(&conn_guard)?;
        drop(conn_guard);

        Ok(Self { conn })
    }

    /// Wraps a read-only connection; the tables must already exist.
    pub fn with_connection_no_init(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
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

    fn initialize_schema(conn: &Connection) -> Result<(), DomainError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS group_aggregates (
                partition_key TEXT NOT NULL,
                group_key TEXT NOT NULL,
                vector_count BIGINT NOT NULL,
                mean DOUBLE[] NOT NULL,
                updated_at BIGINT NOT NULL,
                PRIMARY KEY (partition_key, group_key)
            );

            CREATE TABLE IF NOT EXISTS checkpoints (
                partition_key TEXT PRIMARY KEY,
                last_processed_id BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            );
            "#,
        )
        .map_err(|e| {
            DomainError::storage(format!("Failed to initialize aggregate schema: {}", e))
        })?;

        debug!("DuckDB group_aggregates and checkpoints tables initialized");
        Ok(())
    }
}

/// Runs aggregate and checkpoint statements on one connection or transaction.
struct DuckdbAggregateWriter<'conn> {
    conn: &'conn Connection,
}

impl DuckdbAggregateWriter<'_> {
    fn row_to_aggregate(
        partition_key: String,
        group_key: String,
        count: i64,
        mean: Value,
        updated_at: i64,
    ) -> Result<GroupAggregate, DomainError> {
        let count = u64::try_from(count).map_err(|_| {
            DomainError::inconsistent(format!(
                "Group {}/{} has negative count {}",
                partition_key, group_key, count
            ))
        })?;
        let context = || format!("group {}/{}", partition_key, group_key);
        let mean = vector_from_value(mean, context)?.ok_or_else(|| {
            DomainError::inconsistent(format!("{} has no mean", context()))
        })?;
        Ok(GroupAggregate::reconstitute(
            partition_key,
            group_key,
            count,
            mean,
            updated_at,
        ))
    }

    fn query_aggregates(
        &self,
        sql: &str,
        params: &[&dyn duckdb::ToSql],
    ) -> Result<Vec<GroupAggregate>, DomainError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| DomainError::storage(format!("Failed to prepare statement: {}", e)))?;

        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Value>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(|e| DomainError::storage(format!("Failed to query aggregates: {}", e)))?;

        let mut aggregates = Vec::new();
        for row in rows {
            let (partition_key, group_key, count, mean, updated_at) =
                row.map_err(|e| DomainError::storage(format!("Failed to read row: {}", e)))?;
            aggregates.push(Self::row_to_aggregate(
                partition_key,
                group_key,
                count,
                mean,
                updated_at,
            )?);
        }
        Ok(aggregates)
    }
}

impl AggregateWriter for DuckdbAggregateWriter<'_> {
    fn read_checkpoint(&mut self, partition_key: &str) -> Result<i64, DomainError> {
        match self.conn.query_row(
            "SELECT last_processed_id FROM checkpoints WHERE partition_key = ?",
            params![partition_key],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(id) => Checkpoint::validate_id(partition_key, id),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(DomainError::storage(format!(
                "Failed to read checkpoint for partition {}: {}",
                partition_key, e
            ))),
        }
    }

    fn find_aggregate(
        &mut self,
        partition_key: &str,
        group_key: &str,
    ) -> Result<Option<GroupAggregate>, DomainError> {
        let sql = format!(
            "SELECT {} FROM group_aggregates WHERE partition_key = ? AND group_key = ?",
            AGGREGATE_COLUMNS
        );
        Ok(self
            .query_aggregates(&sql, params![partition_key, group_key])?
            .into_iter()
            .next())
    }

    fn upsert_aggregate(&mut self, aggregate: &GroupAggregate) -> Result<(), DomainError> {
        let mean = vector_to_param(aggregate.mean())?;
        self.conn
            .execute(
                r#"
                INSERT INTO group_aggregates (partition_key, group_key, vector_count, mean, updated_at)
                VALUES (?, ?, ?, CAST(CAST(? AS VARCHAR) AS DOUBLE[]), ?)
                ON CONFLICT (partition_key, group_key) DO UPDATE SET
                    vector_count = excluded.vector_count,
                    mean = excluded.mean,
                    updated_at = excluded.updated_at
                "#,
                params![
                    aggregate.partition_key(),
                    aggregate.group_key(),
                    aggregate.count() as i64,
                    mean,
                    aggregate.updated_at(),
                ],
            )
            .map_err(|e| {
                DomainError::storage(format!(
                    "Failed to upsert aggregate {}/{}: {}",
                    aggregate.partition_key(),
                    aggregate.group_key(),
                    e
                ))
            })?;
        Ok(())
    }

    fn write_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), DomainError> {
        self.conn
            .execute(
                r#"
                INSERT INTO checkpoints (partition_key, last_processed_id, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT (partition_key) DO UPDATE SET
                    last_processed_id = excluded.last_processed_id,
                    updated_at = excluded.updated_at
                "#,
                params![
                    checkpoint.partition_key(),
                    checkpoint.last_processed_id(),
                    checkpoint.updated_at(),
                ],
            )
            .map_err(|e| {
                DomainError::storage(format!(
                    "Failed to write checkpoint for partition {}: {}",
                    checkpoint.partition_key(),
                    e
                ))
            })?;
        Ok(())
    }
}

#[async_trait]
impl AggregateStore for DuckdbAggregateStore {
    async fn read_checkpoint(&self, partition_key: &str) -> Result<i64, DomainError> {
        let conn = self.conn.lock().await;
        DuckdbAggregateWriter { conn: &conn }.read_checkpoint(partition_key)
    }

    async fn commit_batch(&self, batch: &MergeBatch) -> Result<BatchCommit, DomainError> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| DomainError::storage(format!("Failed to begin transaction: {}", e)))?;

        // Dropping `tx` on the error path rolls back every write of the batch.
        let commit = {
            let mut writer = DuckdbAggregateWriter { conn: &tx };
            apply_batch(&mut writer, batch)?
        };

        tx.commit()
            .map_err(|e| DomainError::storage(format!("Failed to commit: {}", e)))?;

        debug!(
            "Committed {} aggregates for partition {}, checkpoint {}",
            commit.groups_written,
            batch.partition_key(),
            commit.checkpoint
        );
        Ok(commit)
    }

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, DomainError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT partition_key, last_processed_id, updated_at FROM checkpoints \
                 ORDER BY partition_key",
            )
            .map_err(|e| DomainError::storage(format!("Failed to prepare statement: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(|e| DomainError::storage(format!("Failed to query checkpoints: {}", e)))?;

        let mut checkpoints = Vec::new();
        for row in rows {
            let (partition_key, id, updated_at) =
                row.map_err(|e| DomainError::storage(format!("Failed to read row: {}", e)))?;
            let id = Checkpoint::validate_id(&partition_key, id)?;
            checkpoints.push(Checkpoint::reconstitute(partition_key, id, updated_at));
        }

        Ok(checkpoints)
    }

    async fn find_aggregate(
        &self,
        partition_key: &str,
        group_key: &str,
    ) -> Result<Option<GroupAggregate>, DomainError> {
        let conn = self.conn.lock().await;
        DuckdbAggregateWriter { conn: &conn }.find_aggregate(partition_key, group_key)
    }

    async fn find_by_partition(
        &self,
        partition_key: &str,
    ) -> Result<Vec<GroupAggregate>, DomainError> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM group_aggregates WHERE partition_key = ? ORDER BY group_key",
            AGGREGATE_COLUMNS
        );
        DuckdbAggregateWriter { conn: &conn }.query_aggregates(&sql, params![partition_key])
    }

    async fn count_groups(&self, partition_key: &str) -> Result<u64, DomainError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM group_aggregates WHERE partition_key = ?",
                params![partition_key],
                |row| row.get(0),
            )
            .map_err(|e| DomainError::storage(format!("Failed to count groups: {}", e)))?;
        Ok(count as u64)
    }
}

//! Helpers shared by the DuckDB adapters.
//!
//! Vectors live in `DOUBLE[]` columns. They are bound as JSON text and cast
//! in SQL (`CAST(CAST(? AS VARCHAR) AS DOUBLE[])`, which pins the parameter
//! type). `serde_json` prints the shortest representation that parses back
//! to the same `f64`. They are read back as typed `LIST` values, never
//! through a text rendering.

use std::path::Path;

use duckdb::types::Value;
use duckdb::{AccessMode, Config, Connection};

use crate::domain::{DomainError, EmbeddingVector};

pub(crate) fn open_connection(path: &Path, read_only: bool) -> Result<Connection, DomainError> {
    if read_only {
        let config = Config::default()
            .access_mode(AccessMode::ReadOnly)
            .map_err(|e| DomainError::storage(format!("Failed to configure DuckDB: {}", e)))?;
        Connection::open_with_flags(path, config).map_err(|e| {
            DomainError::storage(format!("Failed to open DuckDB database read-only: {}", e))
        })
    } else {
        Connection::open(path)
            .map_err(|e| DomainError::storage(format!("Failed to open DuckDB database: {}", e)))
    }
}

pub(crate) fn vector_to_param(vector: &EmbeddingVector) -> Result<String, DomainError> {
    Ok(serde_json::to_string(vector)?)
}

/// Decodes a `DOUBLE[]` column value. SQL `NULL` maps to `None`.
pub(crate) fn vector_from_value(
    value: Value,
    context: impl FnOnce() -> String,
) -> Result<Option<EmbeddingVector>, DomainError> {
    let items = match value {
        Value::Null => return Ok(None),
        Value::List(items) => items,
        other => {
            return Err(DomainError::inconsistent(format!(
                "Vector column for {} holds {:?}, expected a DOUBLE list",
                context(),
                other
            )))
        }
    };

    let mut values = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Double(v) => values.push(v),
            Value::Float(v) => values.push(f64::from(v)),
            other => {
                return Err(DomainError::inconsistent(format!(
                    "Vector for {} has component {:?}",
                    context(),
                    other
                )))
            }
        }
    }
    Ok(Some(EmbeddingVector::new(values)))
}

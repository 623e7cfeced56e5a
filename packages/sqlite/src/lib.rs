//! SQLite-backed connection for the FilterMate engine, used for the subset
//! history store and for SQL-level tests.

mod connection;

pub use connection::SqliteConnection;

use std::path::Path;
use std::sync::Arc;

use filtermate_engine::{FilterMateError, SubsetHistory};

/// Opens (or creates) a history database at `path` with its table in place.
pub async fn open_history(
    path: impl AsRef<Path>,
    project_uuid: impl Into<String>,
) -> Result<SubsetHistory, FilterMateError> {
    let connection = SqliteConnection::open(path)?;
    let history = SubsetHistory::new(Arc::new(connection), project_uuid);
    history.ensure_table().await?;
    Ok(history)
}

/// Like [`open_history`] but kept in memory for the lifetime of the value.
pub async fn in_memory_history(
    project_uuid: impl Into<String>,
) -> Result<SubsetHistory, FilterMateError> {
    let history = SubsetHistory::new(Arc::new(SqliteConnection::in_memory()?), project_uuid);
    history.ensure_table().await?;
    Ok(history)
}

//! Append-only history of subset strings per layer, for unfilter/reset.
//!
//! Statements are built as literal SQL; every string goes through
//! `quote_literal`.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::SqlConnection;
use crate::errors;
use crate::sql::identifiers::quote_literal;
use crate::{FilterMateError, Value};

pub const HISTORY_TABLE: &str = "fm_subset_history";

const COLUMNS: &str = "id, timestamp, fk_project, layer_id, source_layer_id, seq_order, subset_string";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub project_uuid: String,
    pub layer_id: String,
    pub source_layer_id: Option<String>,
    pub seq_order: i64,
    pub subset_string: String,
}

pub struct SubsetHistory {
    connection: Arc<dyn SqlConnection>,
    project_uuid: String,
}

impl SubsetHistory {
    pub fn new(connection: Arc<dyn SqlConnection>, project_uuid: impl Into<String>) -> Self {
        Self {
            connection,
            project_uuid: project_uuid.into(),
        }
    }

    pub fn project_uuid(&self) -> &str {
        &self.project_uuid
    }

    pub async fn ensure_table(&self) -> Result<(), FilterMateError> {
        self.connection
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {HISTORY_TABLE} (\
                     id TEXT PRIMARY KEY, \
                     timestamp TEXT NOT NULL, \
                     fk_project TEXT NOT NULL, \
                     layer_id TEXT NOT NULL, \
                     source_layer_id TEXT, \
                     seq_order INTEGER NOT NULL, \
                     subset_string TEXT NOT NULL)"
                ),
                &[],
            )
            .await?;
        self.connection.commit().await
    }

    /// Appends `subset_string` after the layer's latest entry.
    pub async fn record(
        &self,
        layer_id: &str,
        source_layer_id: Option<&str>,
        subset_string: &str,
    ) -> Result<HistoryEntry, FilterMateError> {
        let next_seq = self.max_seq_order(layer_id).await?.map_or(1, |max| max + 1);
        let entry = HistoryEntry {
            id: Uuid::now_v7(),
            // Stored with millisecond precision.
            timestamp: Utc::now().trunc_subsecs(3),
            project_uuid: self.project_uuid.clone(),
            layer_id: layer_id.to_string(),
            source_layer_id: source_layer_id.map(str::to_string),
            seq_order: next_seq,
            subset_string: subset_string.to_string(),
        };
        let sql = format!(
            "INSERT INTO {HISTORY_TABLE} ({COLUMNS}) VALUES ({}, {}, {}, {}, {}, {}, {})",
            quote_literal(&entry.id.to_string()),
            quote_literal(&entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
            quote_literal(&entry.project_uuid),
            quote_literal(&entry.layer_id),
            entry
                .source_layer_id
                .as_deref()
                .map(quote_literal)
                .unwrap_or_else(|| "NULL".to_string()),
            entry.seq_order,
            quote_literal(&entry.subset_string),
        );
        self.connection.execute(&sql, &[]).await?;
        self.connection.commit().await?;
        tracing::debug!(layer_id, seq_order = entry.seq_order, "recorded subset history");
        Ok(entry)
    }

    /// Entries of a layer, oldest first.
    pub async fn entries(&self, layer_id: &str) -> Result<Vec<HistoryEntry>, FilterMateError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {HISTORY_TABLE} WHERE {} ORDER BY seq_order ASC",
            self.layer_predicate(layer_id)
        );
        let result = self.connection.execute(&sql, &[]).await?;
        result.rows.iter().map(|row| entry_from_row(row)).collect()
    }

    pub async fn latest(&self, layer_id: &str) -> Result<Option<HistoryEntry>, FilterMateError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {HISTORY_TABLE} WHERE {} ORDER BY seq_order DESC LIMIT 1",
            self.layer_predicate(layer_id)
        );
        let result = self.connection.execute(&sql, &[]).await?;
        result.rows.first().map(|row| entry_from_row(row)).transpose()
    }

    /// Removes the latest entry and returns it.
    pub async fn pop_latest(&self, layer_id: &str) -> Result<Option<HistoryEntry>, FilterMateError> {
        let Some(latest) = self.latest(layer_id).await? else {
            return Ok(None);
        };
        self.connection
            .execute(
                &format!(
                    "DELETE FROM {HISTORY_TABLE} WHERE id = {}",
                    quote_literal(&latest.id.to_string())
                ),
                &[],
            )
            .await?;
        self.connection.commit().await?;
        Ok(Some(latest))
    }

    /// Deletes every entry of a layer; returns how many there were.
    pub async fn delete_for_layer(&self, layer_id: &str) -> Result<usize, FilterMateError> {
        let existing = self.entries(layer_id).await?.len();
        self.connection
            .execute(
                &format!(
                    "DELETE FROM {HISTORY_TABLE} WHERE {}",
                    self.layer_predicate(layer_id)
                ),
                &[],
            )
            .await?;
        self.connection.commit().await?;
        Ok(existing)
    }

    async fn max_seq_order(&self, layer_id: &str) -> Result<Option<i64>, FilterMateError> {
        let sql = format!(
            "SELECT MAX(seq_order) FROM {HISTORY_TABLE} WHERE {}",
            self.layer_predicate(layer_id)
        );
        let result = self.connection.execute(&sql, &[]).await?;
        Ok(result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_i64))
    }

    fn layer_predicate(&self, layer_id: &str) -> String {
        format!(
            "fk_project = {} AND layer_id = {}",
            quote_literal(&self.project_uuid),
            quote_literal(layer_id)
        )
    }
}

fn entry_from_row(row: &[Value]) -> Result<HistoryEntry, FilterMateError> {
    let text = |index: usize, column: &str| -> Result<String, FilterMateError> {
        match row.get(index) {
            Some(Value::Text(value)) => Ok(value.clone()),
            other => Err(errors::history_error(&format!(
                "column `{column}` is not text: {other:?}"
            ))),
        }
    };
    let id = text(0, "id")?;
    let timestamp = text(1, "timestamp")?;
    Ok(HistoryEntry {
        id: Uuid::parse_str(&id)
            .map_err(|error| errors::history_error(&format!("invalid entry id `{id}`: {error}")))?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|error| {
                errors::history_error(&format!("invalid timestamp `{timestamp}`: {error}"))
            })?
            .with_timezone(&Utc),
        project_uuid: text(2, "fk_project")?,
        layer_id: text(3, "layer_id")?,
        source_layer_id: match row.get(4) {
            Some(Value::Text(value)) => Some(value.clone()),
            _ => None,
        },
        seq_order: row
            .get(5)
            .and_then(Value::as_i64)
            .ok_or_else(|| errors::history_error("column `seq_order` is not an integer"))?,
        subset_string: text(6, "subset_string")?,
    })
}

use std::collections::HashSet;

use crate::backend::SqlConnection;
use crate::error_classification::is_missing_relation_error;
use crate::layer::VectorLayer;
use crate::mv::naming::{stale_view_references, CHAIN_PREFIX, MV_PREFIX};
use crate::mv::tracker::MvReferenceTracker;
use crate::sql::identifiers::{qualified_name, quote_literal};
use crate::FilterMateError;

/// Drops a FilterMate view. Returns `false` when it was already gone.
pub async fn drop_materialized_view(
    connection: &dyn SqlConnection,
    schema: &str,
    mv_name: &str,
) -> Result<bool, FilterMateError> {
    let sql = format!(
        "DROP MATERIALIZED VIEW IF EXISTS {} CASCADE",
        qualified_name(Some(schema), mv_name)
    );
    match connection.execute(&sql, &[]).await {
        Ok(_) => {
            tracing::debug!(schema, mv_name, "dropped materialized view");
            Ok(true)
        }
        Err(error) if is_missing_relation_error(&error) => Ok(false),
        Err(error) => Err(error),
    }
}

/// Names of materialized views in `schema`.
pub async fn list_materialized_views(
    connection: &dyn SqlConnection,
    schema: &str,
) -> Result<Vec<String>, FilterMateError> {
    let sql = format!(
        "SELECT matviewname FROM pg_matviews WHERE schemaname = {}",
        quote_literal(schema)
    );
    let result = connection.execute(&sql, &[]).await?;
    Ok(result
        .rows
        .iter()
        .filter_map(|row| row.first().and_then(|value| value.as_text()))
        .map(str::to_string)
        .collect())
}

pub async fn materialized_view_exists(
    connection: &dyn SqlConnection,
    schema: &str,
    mv_name: &str,
) -> Result<bool, FilterMateError> {
    let sql = format!(
        "SELECT 1 FROM pg_matviews WHERE schemaname = {} AND matviewname = {}",
        quote_literal(schema),
        quote_literal(mv_name)
    );
    Ok(!connection.execute(&sql, &[]).await?.rows.is_empty())
}

/// Drops this session's views that no layer references anymore. Returns the
/// dropped names.
pub async fn cleanup_session_materialized_views(
    connection: &dyn SqlConnection,
    tracker: &MvReferenceTracker,
    schema: &str,
    session_id: &str,
) -> Result<Vec<String>, FilterMateError> {
    let session_prefixes = [
        format!("{MV_PREFIX}{session_id}_"),
        format!("{CHAIN_PREFIX}{session_id}_"),
    ];
    let mut dropped = Vec::new();
    for mv_name in list_materialized_views(connection, schema).await? {
        if !session_prefixes
            .iter()
            .any(|prefix| mv_name.starts_with(prefix.as_str()))
        {
            continue;
        }
        if tracker.is_referenced(&mv_name) {
            tracing::debug!(mv_name, "keeping referenced materialized view");
            continue;
        }
        if drop_materialized_view(connection, schema, &mv_name).await? {
            dropped.push(mv_name);
        }
    }
    connection.commit().await?;
    if !dropped.is_empty() {
        tracing::info!(session_id, count = dropped.len(), "cleaned up session materialized views");
    }
    Ok(dropped)
}

/// Releases every view reference held by a layer and drops the views that
/// became unreferenced.
pub async fn release_layer(
    connection: &dyn SqlConnection,
    tracker: &MvReferenceTracker,
    schema: &str,
    layer_id: &str,
) -> Result<Vec<String>, FilterMateError> {
    let mut dropped = Vec::new();
    for mv_name in tracker.remove_all_references_for_layer(layer_id) {
        if drop_materialized_view(connection, schema, &mv_name).await? {
            dropped.push(mv_name);
        }
    }
    if !dropped.is_empty() {
        connection.commit().await?;
    }
    Ok(dropped)
}

/// Clears subset strings that reference FilterMate views which no longer
/// exist, typically after a project reload. Returns the affected layer ids.
pub fn clear_orphaned_subsets(
    layers: &[&dyn VectorLayer],
    existing_relations: &HashSet<String>,
) -> Vec<String> {
    let existing: HashSet<String> = existing_relations
        .iter()
        .map(|name| name.to_ascii_lowercase())
        .collect();
    let mut cleared = Vec::new();
    for layer in layers {
        let subset = layer.subset_string();
        let missing = stale_view_references(&subset)
            .into_iter()
            .filter(|name| !existing.contains(&name.to_ascii_lowercase()))
            .collect::<Vec<_>>();
        if missing.is_empty() {
            continue;
        }
        let layer_id = layer.props().layer_id.clone();
        if layer.set_subset_string("") {
            tracing::warn!(layer_id, views = ?missing, "cleared subset referencing missing views");
            cleared.push(layer_id);
        } else {
            tracing::error!(layer_id, "could not clear orphaned subset string");
        }
    }
    cleared
}

//! Precomputed buffers for dynamic buffer expressions over large sources.
//!
//! Inlining a per-feature buffer in the EXISTS subquery recomputes it for
//! every target row. Above the configured source size the buffers are
//! materialized once in the temp schema (not `pg_temp`: the provider's own
//! connection must see the view) and the filter joins against that.

use crate::backend::SqlConnection;
use crate::backends::postgres::postgis_buffer;
use crate::backends::EngineServices;
use crate::mv::materialized_view_exists;
use crate::mv::naming::{content_hash, view_name, MV_PREFIX};
use crate::request::{FilterRequest, SourceTable};
use crate::sql::identifiers::{qualified_name, quote_ident, sanitize_sql_identifier};
use crate::FilterMateError;

/// Geometry column of every precomputed view.
pub const BUFFER_GEOMETRY_COLUMN: &str = "geom";

/// Creates (or reuses) the buffer view and registers `layer_id` as a
/// reference. `None` means precomputation failed and the caller should
/// inline the buffer.
pub async fn precompute_buffers(
    connection: &dyn SqlConnection,
    services: &EngineServices,
    request: &FilterRequest,
    source: &SourceTable,
    distance_sql: &str,
) -> Result<Option<SourceTable>, FilterMateError> {
    let config = &services.config;
    let layer_id = request.target.layer_id.as_str();
    let source_relation = source.relation();

    let mut geometry = quote_ident(&source.geometry_column);
    if request.use_source_centroids {
        geometry = format!("ST_PointOnSurface({geometry})");
    }
    let segments = request.buffer.segments.unwrap_or(config.buffer_segments);
    let buffered = postgis_buffer(
        &geometry,
        distance_sql,
        false,
        segments,
        request.buffer.end_cap,
        source.srid,
    );
    let source_filter = request.source_filter();

    let hash = content_hash(&[
        source_relation.as_str(),
        buffered.as_str(),
        source_filter.unwrap_or_default(),
    ]);
    let mv_name = view_name(MV_PREFIX, &config.session_id, &hash);
    let mv_relation = qualified_name(Some(&config.temp_schema), &mv_name);

    let exists = match materialized_view_exists(connection, &config.temp_schema, &mv_name).await {
        Ok(exists) => exists,
        Err(error) => {
            tracing::warn!(mv_name, %error, "buffer view lookup failed, inlining buffers");
            rollback_quietly(connection).await;
            return Ok(None);
        }
    };
    if exists {
        tracing::debug!(mv_name, "reusing precomputed buffer view");
    } else {
        let pk_column = source
            .primary_key
            .as_deref()
            .map(|pk| format!("{}, ", quote_ident(pk)))
            .unwrap_or_default();
        let filter_clause = source_filter
            .map(|filter| format!(" WHERE {filter}"))
            .unwrap_or_default();
        let index_name = quote_ident(&sanitize_sql_identifier(&format!("{mv_name}_gist")));
        let statements = [
            format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                quote_ident(&config.temp_schema)
            ),
            format!(
                "CREATE MATERIALIZED VIEW {mv_relation} AS SELECT {pk_column}{buffered} AS {} FROM {source_relation}{filter_clause} WITH DATA",
                quote_ident(BUFFER_GEOMETRY_COLUMN)
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {index_name} ON {mv_relation} USING GIST ({})",
                quote_ident(BUFFER_GEOMETRY_COLUMN)
            ),
            format!("ANALYZE {mv_relation}"),
        ];
        if let Err(error) = run_all(connection, &statements).await {
            tracing::warn!(mv_name, %error, "buffer precomputation failed, inlining buffers");
            rollback_quietly(connection).await;
            return Ok(None);
        }
        tracing::info!(mv_name, source = %source_relation, "precomputed dynamic buffers");
    }

    services.tracker.add_reference(&mv_name, layer_id);
    Ok(Some(SourceTable {
        schema: Some(config.temp_schema.clone()),
        table: mv_name,
        geometry_column: BUFFER_GEOMETRY_COLUMN.to_string(),
        primary_key: source.primary_key.clone(),
        srid: source.srid,
        fields: Vec::new(),
    }))
}

pub(crate) async fn rollback_quietly(connection: &dyn SqlConnection) {
    if let Err(rollback_error) = connection.rollback().await {
        tracing::error!(%rollback_error, "rollback after failed view statement");
    }
}

pub(crate) async fn run_all(
    connection: &dyn SqlConnection,
    statements: &[String],
) -> Result<(), FilterMateError> {
    for statement in statements {
        connection.execute(statement, &[]).await?;
    }
    connection.commit().await
}

//! PostGIS filters: an inline WKT literal for small sources, a correlated
//! EXISTS subquery against the source table otherwise.

pub mod buffer_mv;
pub mod chain_optimizer;
pub mod qgis_expression;
pub mod timeout;

use regex::{Captures, Regex};

pub use chain_optimizer::{
    analyze_chain, estimated_improvement, ChainContext, ChainFilter, ChainStrategy,
    FilterChainOptimizer,
};
pub use qgis_expression::qgis_to_postgis;
pub use timeout::{is_complex_query, with_statement_timeout};

use crate::backend::SqlConnection;
use crate::backends::{
    merge_with_existing, set_layer_subset, BuildOutcome, EngineServices, FallbackReason,
};
use crate::combine::{
    adapt_exists_for_nested_context_in_schema, extract_exists_clauses, strip_exists_clauses,
    ExistsClause,
};
use crate::layer::{LayerProps, ProviderType, VectorLayer};
use crate::request::{
    ordered_predicates, CombineOperator, EndCapStyle, FilterRequest, SourceTable, WktGeometry,
};
use crate::sql::expr::FilterExpr;
use crate::sql::identifiers::{escape_sql_string, quote_ident};
use crate::sql::normalize::normalize_filter_for_table;
use crate::sql::scan::{split_top_level, strip_outer_parens};
use crate::FilterMateError;

pub const SOURCE_ALIAS: &str = "__source";
pub const CHAIN_ALIAS: &str = "__chain";
const WEB_MERCATOR: i32 = 3857;
const WGS84: i32 = 4326;

/// `ST_Buffer` with segment/end-cap parameters. SRID 4326 buffers are
/// computed in web mercator so the distance is in meters; negative
/// distances are guarded against empty results.
pub(crate) fn postgis_buffer(
    geometry: &str,
    distance: &str,
    negative: bool,
    segments: u32,
    end_cap: EndCapStyle,
    srid: Option<i32>,
) -> String {
    let parameters = match end_cap {
        EndCapStyle::Round => format!("'quad_segs={segments}'"),
        other => format!("'quad_segs={segments} endcap={}'", other.as_str()),
    };
    let buffered = if srid == Some(WGS84) {
        format!(
            "ST_Transform(ST_Buffer(ST_Transform({geometry}, {WEB_MERCATOR}), {distance}, {parameters}), {WGS84})"
        )
    } else {
        format!("ST_Buffer({geometry}, {distance}, {parameters})")
    };
    if negative {
        format!(
            "CASE WHEN ST_IsEmpty(ST_MakeValid({buffered})) THEN NULL ELSE ST_MakeValid({buffered}) END"
        )
    } else {
        buffered
    }
}

/// The relation the EXISTS subquery reads from.
struct PreparedSource {
    table: SourceTable,
    alias: &'static str,
    /// Buffers are already applied in the relation's geometry.
    buffered: bool,
    /// The source filter is already applied by the relation.
    filter_applied: bool,
    /// Chained constraints are already applied by the relation.
    chain_applied: bool,
}

impl PreparedSource {
    fn direct(table: SourceTable) -> Self {
        Self {
            table,
            alias: SOURCE_ALIAS,
            buffered: false,
            filter_applied: false,
            chain_applied: false,
        }
    }
}

pub struct PostgresBuilder {
    services: EngineServices,
}

impl PostgresBuilder {
    pub fn new(services: EngineServices) -> Self {
        Self { services }
    }

    pub async fn build_expression(
        &self,
        request: &FilterRequest,
    ) -> Result<BuildOutcome, FilterMateError> {
        let target = &request.target;
        let table = target.table_name()?;
        let geometry_column = target.geometry_column_name()?;

        if let Some(wkt) = self.simple_mode_source(request) {
            tracing::debug!(layer_id = %target.layer_id, wkt_len = wkt.wkt.len(), "simple mode");
            return Ok(BuildOutcome::Expression(
                self.simple_expression(request, wkt, table, geometry_column),
            ));
        }

        let Some(source_table) = request.source.table.clone() else {
            if request.buffer.has_dynamic_expression() {
                return Ok(BuildOutcome::UseOgrFallback(
                    FallbackReason::DynamicBufferExpression,
                ));
            }
            return match request.source.wkt.as_ref() {
                Some(wkt) => {
                    tracing::warn!(
                        layer_id = %target.layer_id,
                        wkt_len = wkt.wkt.len(),
                        "no source table for EXISTS mode, embedding a large WKT literal"
                    );
                    Ok(BuildOutcome::Expression(self.simple_expression(
                        request,
                        wkt,
                        table,
                        geometry_column,
                    )))
                }
                None => Ok(BuildOutcome::UseOgrFallback(
                    FallbackReason::MissingSourceGeometry,
                )),
            };
        };

        let connection = self.connection_for(target).await;
        let complex = is_complex_query(request);
        if complex {
            self.services.notifier.warn(
                "Complex spatial query",
                "A dynamic buffer combined with a chained filter can take several minutes. \
                 The query is limited by a statement timeout.",
            );
        }

        let prepared = match connection.as_deref() {
            Some(connection) if complex => {
                with_statement_timeout(
                    connection,
                    self.services.config.complex_query_timeout_ms,
                    self.prepare_source(Some(connection), request, source_table),
                )
                .await?
            }
            connection => self.prepare_source(connection, request, source_table).await?,
        };

        Ok(BuildOutcome::Expression(
            self.exists_expression(request, &prepared, table, geometry_column),
        ))
    }

    fn simple_mode_source<'r>(&self, request: &'r FilterRequest) -> Option<&'r WktGeometry> {
        let config = &self.services.config;
        let wkt = request.source.wkt.as_ref()?;
        let known_srid = wkt.srid.or(request.target.srid()).is_some();
        (known_srid
            && !request.buffer.has_dynamic_expression()
            && request.source.feature_count <= config.simple_mode_max_features
            && wkt.wkt.len() <= config.simple_mode_max_wkt_len)
            .then_some(wkt)
    }

    fn simple_expression(
        &self,
        request: &FilterRequest,
        wkt: &WktGeometry,
        table: &str,
        geometry_column: &str,
    ) -> String {
        let target_srid = request.target.srid();
        let source_srid = wkt.srid.or(target_srid);

        let mut target_geom = format!("{}.{}", quote_ident(table), quote_ident(geometry_column));
        if request.use_centroids {
            target_geom = format!("ST_PointOnSurface({target_geom})");
        }

        let literal = format!("'{}'", escape_sql_string(&wkt.wkt));
        let mut source_geom = match source_srid {
            Some(srid) => format!("ST_MakeValid(ST_GeomFromText({literal}, {srid}))"),
            None => format!("ST_MakeValid(ST_GeomFromText({literal}))"),
        };
        if request.use_source_centroids {
            source_geom = format!("ST_PointOnSurface({source_geom})");
        }
        if let Some(distance) = request.buffer.static_value() {
            source_geom = self.static_buffer(request, &source_geom, distance, source_srid);
        }
        source_geom = transform_to(source_geom, source_srid, target_srid);

        if request.source_filter().is_some() {
            tracing::debug!("source filter is already reflected in the WKT literal");
        }
        predicates_expr(request, &target_geom, &source_geom).to_sql()
    }

    fn static_buffer(
        &self,
        request: &FilterRequest,
        geometry: &str,
        distance: f64,
        srid: Option<i32>,
    ) -> String {
        postgis_buffer(
            geometry,
            &distance.to_string(),
            distance < 0.0,
            request
                .buffer
                .segments
                .unwrap_or(self.services.config.buffer_segments),
            request.buffer.end_cap,
            srid,
        )
    }

    async fn connection_for(
        &self,
        layer: &LayerProps,
    ) -> Option<std::sync::Arc<dyn SqlConnection>> {
        let provider = self.services.connections.as_ref()?;
        match provider.connection_for_layer(layer).await {
            Ok(layer_connection) => Some(layer_connection.connection),
            Err(error) => {
                tracing::warn!(layer_id = %layer.layer_id, %error, "no connection, skipping view optimizations");
                None
            }
        }
    }

    /// Picks the relation to join: a filter-chain view, a precomputed buffer
    /// view, or the source table itself.
    async fn prepare_source(
        &self,
        connection: Option<&dyn SqlConnection>,
        request: &FilterRequest,
        source: SourceTable,
    ) -> Result<PreparedSource, FilterMateError> {
        let Some(connection) = connection else {
            return Ok(PreparedSource::direct(source));
        };
        let layer_id = request.target.layer_id.as_str();
        let chained = chained_clauses(request);

        if chained.len() >= 2 {
            let context = ChainContext {
                source: source.clone(),
                source_feature_count: request.source.feature_count,
                filters: chained.iter().map(ChainFilter::from_exists_clause).collect(),
                buffer_value: request.buffer.static_value(),
                buffer_expression: request.buffer.expression.clone(),
            };
            if let Some(view) = FilterChainOptimizer::new(&self.services)
                .try_create_filter_chain_mv(connection, &context, layer_id)
                .await?
            {
                let filter_applied = source_filter_remainder(request).is_none();
                return Ok(PreparedSource {
                    table: view,
                    alias: CHAIN_ALIAS,
                    buffered: false,
                    filter_applied,
                    chain_applied: true,
                });
            }
        }

        if request.buffer.has_dynamic_expression()
            && request.source.feature_count > self.services.config.dynamic_buffer_mv_threshold
        {
            let distance = qgis_to_postgis(
                request.buffer.expression.as_deref().unwrap_or_default(),
                None,
                &quote_ident(&source.geometry_column),
                &source.fields,
            );
            if let Some(view) =
                buffer_mv::precompute_buffers(connection, &self.services, request, &source, &distance)
                    .await?
            {
                return Ok(PreparedSource {
                    table: view,
                    alias: SOURCE_ALIAS,
                    buffered: true,
                    filter_applied: true,
                    chain_applied: false,
                });
            }
        }

        Ok(PreparedSource::direct(source))
    }

    fn exists_expression(
        &self,
        request: &FilterRequest,
        prepared: &PreparedSource,
        table: &str,
        geometry_column: &str,
    ) -> String {
        let source = &prepared.table;
        let alias = prepared.alias;
        let target_srid = request.target.srid();

        let mut target_geom = quote_ident(geometry_column);
        if request.use_centroids {
            target_geom = format!("ST_PointOnSurface({target_geom})");
        }

        let mut source_geom = format!("{alias}.{}", quote_ident(&source.geometry_column));
        if !prepared.buffered {
            if request.use_source_centroids {
                source_geom = format!("ST_PointOnSurface({source_geom})");
            }
            if let Some(expression) = request
                .buffer
                .expression
                .as_deref()
                .filter(|_| request.buffer.has_dynamic_expression())
            {
                let distance = qgis_to_postgis(expression, Some(alias), &source_geom, &source.fields);
                source_geom = postgis_buffer(
                    &source_geom,
                    &distance,
                    false,
                    request
                        .buffer
                        .segments
                        .unwrap_or(self.services.config.buffer_segments),
                    request.buffer.end_cap,
                    source.srid,
                );
            } else if let Some(distance) = request.buffer.static_value() {
                source_geom = self.static_buffer(request, &source_geom, distance, source.srid);
            }
        }
        source_geom = transform_to(source_geom, source.srid, target_srid);

        let mut conditions = vec![predicates_expr(request, &target_geom, &source_geom)];
        if !prepared.filter_applied {
            if let Some(remainder) = source_filter_remainder(request) {
                let original = request.source.table.as_ref();
                let adapted = adapt_exists_for_nested_context_in_schema(
                    &remainder,
                    original.and_then(|table| table.schema.as_deref()),
                    original.map(|table| table.table.as_str()).unwrap_or(&source.table),
                    alias,
                );
                conditions.push(FilterExpr::Group(adapted));
            }
        }

        let mut clauses = vec![FilterExpr::Exists {
            relation: source.relation(),
            alias: alias.to_string(),
            conditions,
        }];
        if !prepared.chain_applied {
            let source_geometry_column = request
                .source
                .table
                .as_ref()
                .map(|table| table.geometry_column.as_str())
                .unwrap_or(&source.geometry_column);
            for clause in chained_clauses(request) {
                clauses.push(FilterExpr::Raw(retarget_exists_clause(
                    &clause.sql,
                    source_geometry_column,
                    table,
                    geometry_column,
                )));
            }
        }
        FilterExpr::And(clauses).to_sql()
    }

    pub fn apply_filter(
        &self,
        layer: &dyn VectorLayer,
        expression: &str,
        old_subset: Option<&str>,
        operator: Option<CombineOperator>,
    ) -> bool {
        let props = layer.props();
        let merged = merge_with_existing(
            &props.layer_id,
            expression,
            old_subset,
            operator,
            ProviderType::Postgres,
        );
        let normalized = match props.table.as_deref() {
            Some(table) => normalize_filter_for_table(&merged, table, &props.fields),
            None => merged,
        };
        set_layer_subset(layer, &normalized)
    }
}

/// Spatial predicates OR'd in selectivity order.
fn predicates_expr(request: &FilterRequest, target: &str, source: &str) -> FilterExpr {
    FilterExpr::Or(
        ordered_predicates(&request.predicates)
            .into_iter()
            .map(|predicate| FilterExpr::predicate(predicate.postgis_function(), target, source))
            .collect(),
    )
}

fn transform_to(geometry: String, from: Option<i32>, to: Option<i32>) -> String {
    match (from, to) {
        (Some(from), Some(to)) if from != to => format!("ST_Transform({geometry}, {to})"),
        _ => geometry,
    }
}

/// EXISTS clauses of the source layer's own filter, in textual order.
fn chained_clauses(request: &FilterRequest) -> Vec<ExistsClause> {
    request
        .source_filter()
        .map(extract_exists_clauses)
        .unwrap_or_default()
}

/// The source filter without its EXISTS clauses, if anything is left.
fn source_filter_remainder(request: &FilterRequest) -> Option<String> {
    let filter = request.source_filter()?;
    let stripped = strip_exists_clauses(filter);
    let parts: Vec<&str> = split_top_level(&stripped, "AND")
        .into_iter()
        .filter(|part| !strip_outer_parens(part).is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(" AND "))
}

/// Points a chained clause at the distant layer: its bare reference to the
/// source geometry becomes `"target_table"."target_geom"`.
fn retarget_exists_clause(
    clause: &str,
    source_geometry_column: &str,
    target_table: &str,
    target_geometry_column: &str,
) -> String {
    let pattern = format!(
        r#"(^|[^.A-Za-z0-9_"]){}"#,
        regex::escape(&quote_ident(source_geometry_column))
    );
    let Ok(bare_geometry) = Regex::new(&pattern) else {
        return clause.to_string();
    };
    let replacement = format!(
        "{}.{}",
        quote_ident(target_table),
        quote_ident(target_geometry_column)
    );
    bare_geometry
        .replace_all(clause, |captures: &Captures| {
            format!("{}{replacement}", &captures[1])
        })
        .into_owned()
}

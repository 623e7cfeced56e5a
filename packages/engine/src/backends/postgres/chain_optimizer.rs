//! Materializing the source side of a filter chain.
//!
//! When a source layer is itself filtered by two or more EXISTS constraints,
//! every distant layer would re-evaluate all of them. A `SOURCE_MV` keeps
//! the already-constrained source rows once, and distant filters become a
//! single EXISTS against it. Off unless `enable_filter_chain_mv` is set.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::backend::SqlConnection;
use crate::backends::postgres::buffer_mv::{rollback_quietly, run_all};
use crate::backends::EngineServices;
use crate::combine::ExistsClause;
use crate::mv::materialized_view_exists;
use crate::mv::naming::{content_hash, view_name, CHAIN_PREFIX};
use crate::request::{SourceTable, SpatialPredicate};
use crate::sql::identifiers::{qualified_name, quote_ident, sanitize_sql_identifier};
use crate::FilterMateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStrategy {
    None,
    SourceMv,
    /// Not produced by `analyze_chain`.
    IntersectionMv,
    /// Not produced by `analyze_chain`.
    HybridMv,
}

/// One constraint of the chain: an EXISTS clause written against the
/// source table.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainFilter {
    pub schema: String,
    pub table: String,
    pub predicate: Option<SpatialPredicate>,
    pub buffer: Option<f64>,
    pub condition: String,
}

impl ChainFilter {
    pub fn from_exists_clause(clause: &ExistsClause) -> Self {
        Self {
            schema: clause.schema.clone(),
            table: clause.table.clone(),
            predicate: clause_predicate(&clause.sql),
            buffer: None,
            condition: clause.sql.clone(),
        }
    }

    fn descriptor(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.schema,
            self.table,
            self.predicate.map(SpatialPredicate::as_str).unwrap_or("?"),
            self.buffer.map(|value| value.to_string()).unwrap_or_default(),
            self.condition
        )
    }
}

fn predicate_function_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bST_([A-Za-z]+)\s*\(").expect("predicate function regex is valid")
    })
}

/// First spatial predicate called in a clause.
fn clause_predicate(sql: &str) -> Option<SpatialPredicate> {
    predicate_function_regex()
        .captures_iter(sql)
        .find_map(|captures| SpatialPredicate::from_str(&captures[1].to_ascii_lowercase()).ok())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainContext {
    pub source: SourceTable,
    pub source_feature_count: u64,
    pub filters: Vec<ChainFilter>,
    pub buffer_value: Option<f64>,
    pub buffer_expression: Option<String>,
}

impl ChainContext {
    /// Content hash over the source, the sorted filter descriptors and the
    /// buffer. Identical chains hash identically whatever their order.
    pub fn content_hash(&self) -> String {
        let mut descriptors: Vec<String> = self.filters.iter().map(ChainFilter::descriptor).collect();
        descriptors.sort();
        let source = format!(
            "{}.{}",
            self.source.schema.as_deref().unwrap_or("public"),
            self.source.table
        );
        let buffer = match (&self.buffer_expression, self.buffer_value) {
            (Some(expression), _) => expression.clone(),
            (None, Some(value)) => value.to_string(),
            (None, None) => String::new(),
        };
        content_hash(&[source.as_str(), descriptors.join(";").as_str(), buffer.as_str()])
    }
}

pub fn analyze_chain(context: &ChainContext, max_features: u64) -> ChainStrategy {
    if context.filters.len() >= 2 && context.source_feature_count <= max_features {
        ChainStrategy::SourceMv
    } else {
        ChainStrategy::None
    }
}

/// Expected share of per-row work saved by collapsing `filter_count`
/// constraints into one.
pub fn estimated_improvement(filter_count: usize) -> f64 {
    if filter_count < 2 {
        return 0.0;
    }
    (filter_count - 1) as f64 / filter_count as f64
}

pub struct FilterChainOptimizer<'a> {
    services: &'a EngineServices,
}

impl<'a> FilterChainOptimizer<'a> {
    pub fn new(services: &'a EngineServices) -> Self {
        Self { services }
    }

    /// Builds the source view for a `SOURCE_MV` chain, reusing an existing
    /// view with the same content hash. Returns the view name.
    pub async fn create_chain_mv(
        &self,
        connection: &dyn SqlConnection,
        context: &ChainContext,
        layer_id: &str,
    ) -> Result<Option<String>, FilterMateError> {
        let config = &self.services.config;
        let strategy = analyze_chain(context, config.chain_mv_max_features);
        if strategy != ChainStrategy::SourceMv {
            tracing::debug!(?strategy, filters = context.filters.len(), "chain not materialized");
            return Ok(None);
        }

        let mv_name = view_name(CHAIN_PREFIX, &config.session_id, &context.content_hash());
        let exists = match materialized_view_exists(connection, &config.temp_schema, &mv_name).await {
            Ok(exists) => exists,
            Err(error) => {
                tracing::warn!(mv_name, %error, "chain view lookup failed, keeping chained EXISTS");
                rollback_quietly(connection).await;
                return Ok(None);
            }
        };
        if !exists {
            let mv_relation = qualified_name(Some(&config.temp_schema), &mv_name);
            let conditions = context
                .filters
                .iter()
                .map(|filter| filter.condition.as_str())
                .collect::<Vec<_>>()
                .join(" AND ");
            let index_name = quote_ident(&sanitize_sql_identifier(&format!("{mv_name}_gist")));
            let statements = [
                format!(
                    "CREATE SCHEMA IF NOT EXISTS {}",
                    quote_ident(&config.temp_schema)
                ),
                format!(
                    "CREATE MATERIALIZED VIEW {mv_relation} AS SELECT * FROM {} WHERE {conditions} WITH DATA",
                    context.source.relation()
                ),
                format!(
                    "CREATE INDEX IF NOT EXISTS {index_name} ON {mv_relation} USING GIST ({})",
                    quote_ident(&context.source.geometry_column)
                ),
                format!("ANALYZE {mv_relation}"),
            ];
            if let Err(error) = run_all(connection, &statements).await {
                tracing::warn!(mv_name, %error, "filter chain view failed, keeping chained EXISTS");
                rollback_quietly(connection).await;
                return Ok(None);
            }
            tracing::info!(
                mv_name,
                filters = context.filters.len(),
                improvement = estimated_improvement(context.filters.len()),
                "materialized filter chain"
            );
        }

        self.services.tracker.add_reference(&mv_name, layer_id);
        Ok(Some(mv_name))
    }

    /// Gate in front of `create_chain_mv`; `None` while the feature flag is
    /// off.
    pub async fn try_create_filter_chain_mv(
        &self,
        connection: &dyn SqlConnection,
        context: &ChainContext,
        layer_id: &str,
    ) -> Result<Option<SourceTable>, FilterMateError> {
        let config = &self.services.config;
        if !config.enable_filter_chain_mv {
            return Ok(None);
        }
        let Some(mv_name) = self.create_chain_mv(connection, context, layer_id).await? else {
            return Ok(None);
        };
        Ok(Some(SourceTable {
            schema: Some(config.temp_schema.clone()),
            table: mv_name,
            geometry_column: context.source.geometry_column.clone(),
            primary_key: context.source.primary_key.clone(),
            srid: context.source.srid,
            fields: context.source.fields.clone(),
        }))
    }
}

//! Spatialite and GeoPackage filters built around an embedded WKT literal.

use std::borrow::Cow;

use crate::backends::{
    merge_with_existing, set_layer_subset, BuildOutcome, EngineServices, FallbackReason,
};
use crate::geometry::simplify_wkt;
use crate::layer::{ProviderType, VectorLayer};
use crate::request::{ordered_predicates, BufferSpec, CombineOperator, EndCapStyle, FilterRequest};
use crate::sql::expr::FilterExpr;
use crate::sql::identifiers::{escape_sql_string, quote_ident};
use crate::FilterMateError;

const WEB_MERCATOR: i32 = 3857;
const WGS84: i32 = 4326;

pub struct SpatialiteBuilder {
    services: EngineServices,
}

impl SpatialiteBuilder {
    pub fn new(services: EngineServices) -> Self {
        Self { services }
    }

    pub fn build_expression(&self, request: &FilterRequest) -> Result<BuildOutcome, FilterMateError> {
        let target = &request.target;
        let layer_id = target.layer_id.as_str();
        if request.buffer.has_dynamic_expression() {
            tracing::info!(layer_id, "dynamic buffer expression needs the OGR backend");
            return Ok(BuildOutcome::UseOgrFallback(
                FallbackReason::DynamicBufferExpression,
            ));
        }
        let Some(source) = request.source.wkt.as_ref() else {
            return Ok(BuildOutcome::UseOgrFallback(
                FallbackReason::MissingSourceGeometry,
            ));
        };
        if source.is_geometry_collection() {
            tracing::info!(layer_id, "geometry collection source needs the OGR backend");
            return Ok(BuildOutcome::UseOgrFallback(FallbackReason::GeometryCollection));
        }

        let table = target.table_name()?;
        let geometry_column = target.geometry_column_name()?;
        let target_srid = target.srid();
        let source_srid = source.srid.or(target_srid);

        let mut target_geom = format!("{}.{}", quote_ident(table), quote_ident(geometry_column));
        if target.is_geopackage() {
            target_geom = format!("GeomFromGPB({target_geom})");
        }
        if request.use_centroids {
            target_geom = format!("PointOnSurface({target_geom})");
        }

        let mut wkt = Cow::Borrowed(source.wkt.as_str());
        if source.wkt.len() >= self.services.config.spatialite_simplify_threshold {
            match simplify_wkt(&source.wkt) {
                Some(simplified) => {
                    tracing::debug!(
                        layer_id,
                        wkt_len = source.wkt.len(),
                        simplified_len = simplified.wkt.len(),
                        tolerance = simplified.tolerance,
                        "simplified large source geometry"
                    );
                    wkt = Cow::Owned(simplified.wkt);
                }
                None => {
                    tracing::warn!(layer_id, wkt_len = source.wkt.len(), "large source geometry could not be simplified");
                }
            }
        }
        let wkt_literal = format!("'{}'", escape_sql_string(&wkt));
        let mut source_geom = match source_srid {
            Some(srid) => format!("MakeValid(GeomFromText({wkt_literal}, {srid}))"),
            None => format!("MakeValid(GeomFromText({wkt_literal}))"),
        };
        if request.use_source_centroids {
            source_geom = format!("PointOnSurface({source_geom})");
        }
        if let Some(distance) = request.buffer.static_value() {
            source_geom = self.buffer_sql(&source_geom, distance, &request.buffer, source_srid);
        }
        if let (Some(from), Some(to)) = (source_srid, target_srid) {
            if from != to {
                source_geom = format!("Transform({source_geom}, {to})");
            }
        }

        let predicates = ordered_predicates(&request.predicates)
            .into_iter()
            .map(|predicate| FilterExpr::Predicate {
                function: predicate.spatialite_function(),
                target: target_geom.clone(),
                source: source_geom.clone(),
                comparison: Some("= 1"),
            })
            .collect();
        Ok(BuildOutcome::Expression(FilterExpr::Or(predicates).to_sql()))
    }

    fn buffer_sql(&self, geom: &str, distance: f64, spec: &BufferSpec, srid: Option<i32>) -> String {
        let segments = spec.segments.unwrap_or(self.services.config.buffer_segments);
        let buffer = |inner: &str| match spec.end_cap {
            EndCapStyle::Round => format!("Buffer({inner}, {distance}, {segments})"),
            EndCapStyle::Flat | EndCapStyle::Square => format!(
                "ST_Buffer({inner}, {distance}, 'quad_segs={segments} endcap={}')",
                spec.end_cap.as_str()
            ),
        };
        let buffered = if srid == Some(WGS84) {
            format!(
                "Transform({}, {WGS84})",
                buffer(&format!("Transform({geom}, {WEB_MERCATOR})"))
            )
        } else {
            buffer(geom)
        };
        if distance < 0.0 {
            format!(
                "CASE WHEN IsEmpty(MakeValid({buffered})) THEN NULL ELSE MakeValid({buffered}) END"
            )
        } else {
            buffered
        }
    }

    pub fn apply_filter(
        &self,
        layer: &dyn VectorLayer,
        expression: &str,
        old_subset: Option<&str>,
        operator: Option<CombineOperator>,
    ) -> bool {
        let merged = merge_with_existing(
            &layer.props().layer_id,
            expression,
            old_subset,
            operator,
            ProviderType::Spatialite,
        );
        set_layer_subset(layer, &merged)
    }
}

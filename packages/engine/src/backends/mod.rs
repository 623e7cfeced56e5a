//! Backend-specific filter builders behind one closed set of variants.

pub mod ogr;
pub mod postgres;
pub mod spatialite;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use ogr::{
    OgrBuilder, ProcessingFeedback, ProcessingRunner, SelectByLocationParams, ThreadAccessMonitor,
    SELECT_BY_LOCATION,
};
pub use postgres::PostgresBuilder;
pub use spatialite::SpatialiteBuilder;

use crate::backend::ConnectionProvider;
use crate::combine::{combine_with_old_subset, should_replace_old_subset};
use crate::config::FilterEngineConfig;
use crate::layer::{LayerProps, ProviderType, VectorLayer};
use crate::mv::MvReferenceTracker;
use crate::notify::{TracingNotifier, UserNotifier};
use crate::request::{CombineOperator, FilterRequest};
use crate::FilterMateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Per-feature buffer expressions need a query context the WKT literal lacks.
    DynamicBufferExpression,
    /// `MakeValid` on geometry collections raises RTTOPO errors in Spatialite.
    GeometryCollection,
    MissingSourceGeometry,
}

impl FallbackReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DynamicBufferExpression => "dynamic buffer expression",
            Self::GeometryCollection => "geometry collection source",
            Self::MissingSourceGeometry => "no usable source geometry",
        }
    }
}

/// Result of building a filter: SQL for the target, or a request to retry
/// through the OGR builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BuildOutcome {
    Expression(String),
    UseOgrFallback(FallbackReason),
}

impl BuildOutcome {
    pub fn expression(&self) -> Option<&str> {
        match self {
            Self::Expression(expression) => Some(expression),
            Self::UseOgrFallback(_) => None,
        }
    }
}

/// Process-wide collaborators handed to every builder.
#[derive(Clone)]
pub struct EngineServices {
    pub config: Arc<FilterEngineConfig>,
    pub tracker: Arc<MvReferenceTracker>,
    pub notifier: Arc<dyn UserNotifier>,
    pub connections: Option<Arc<dyn ConnectionProvider>>,
    pub processing: Option<Arc<dyn ProcessingRunner>>,
    pub ogr_monitor: Arc<ThreadAccessMonitor>,
}

impl EngineServices {
    pub fn new(config: FilterEngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            tracker: Arc::new(MvReferenceTracker::new()),
            notifier: Arc::new(TracingNotifier),
            connections: None,
            processing: None,
            ogr_monitor: Arc::new(ThreadAccessMonitor::default()),
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<MvReferenceTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn UserNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_connections(mut self, connections: Arc<dyn ConnectionProvider>) -> Self {
        self.connections = Some(connections);
        self
    }

    pub fn with_processing(mut self, processing: Arc<dyn ProcessingRunner>) -> Self {
        self.processing = Some(processing);
        self
    }
}

pub enum FilterBackend {
    Postgres(PostgresBuilder),
    Spatialite(SpatialiteBuilder),
    Ogr(OgrBuilder),
}

impl FilterBackend {
    /// Memory layers have no SQL surface and share the OGR path.
    pub fn for_provider(provider: ProviderType, services: &EngineServices) -> Self {
        match provider {
            ProviderType::Postgres => Self::Postgres(PostgresBuilder::new(services.clone())),
            ProviderType::Spatialite => Self::Spatialite(SpatialiteBuilder::new(services.clone())),
            ProviderType::Ogr | ProviderType::Memory => Self::Ogr(OgrBuilder::new(services.clone())),
        }
    }

    /// GeoPackage layers go to the Spatialite builder whichever provider
    /// serves them; everything else follows [`Self::for_provider`].
    pub fn for_layer(layer: &LayerProps, services: &EngineServices) -> Self {
        match layer.provider {
            ProviderType::Ogr | ProviderType::Spatialite if layer.is_geopackage() => {
                Self::Spatialite(SpatialiteBuilder::new(services.clone()))
            }
            provider => Self::for_provider(provider, services),
        }
    }

    pub fn provider(&self) -> ProviderType {
        match self {
            Self::Postgres(_) => ProviderType::Postgres,
            Self::Spatialite(_) => ProviderType::Spatialite,
            Self::Ogr(_) => ProviderType::Ogr,
        }
    }

    pub fn supports_layer(&self, layer: &LayerProps) -> bool {
        match self {
            Self::Postgres(_) => layer.provider == ProviderType::Postgres,
            Self::Spatialite(_) => layer.provider == ProviderType::Spatialite || layer.is_geopackage(),
            Self::Ogr(_) => true,
        }
    }

    pub async fn build_expression(
        &self,
        request: &FilterRequest,
    ) -> Result<BuildOutcome, FilterMateError> {
        request.validate()?;
        match self {
            Self::Postgres(builder) => builder.build_expression(request).await,
            Self::Spatialite(builder) => builder.build_expression(request),
            Self::Ogr(builder) => builder.build_expression(request),
        }
    }

    /// Merges `expression` into the layer's filter and applies it. `false`
    /// means the provider rejected the result.
    pub async fn apply_filter(
        &self,
        layer: &dyn VectorLayer,
        expression: &str,
        old_subset: Option<&str>,
        operator: Option<CombineOperator>,
    ) -> Result<bool, FilterMateError> {
        match self {
            Self::Postgres(builder) => Ok(builder.apply_filter(layer, expression, old_subset, operator)),
            Self::Spatialite(builder) => {
                Ok(builder.apply_filter(layer, expression, old_subset, operator))
            }
            Self::Ogr(builder) => builder.apply_filter(layer, expression, old_subset, operator),
        }
    }
}

/// Combines with the previous subset unless it is too foreign to keep.
pub(crate) fn merge_with_existing(
    layer_id: &str,
    new_expression: &str,
    old_subset: Option<&str>,
    operator: Option<CombineOperator>,
    provider: ProviderType,
) -> String {
    let old_subset = old_subset.filter(|old| {
        let decision = should_replace_old_subset(old);
        if decision.should_replace {
            tracing::info!(layer_id, reasons = ?decision.reasons, "discarding previous subset");
        }
        !decision.should_replace
    });
    combine_with_old_subset(new_expression, old_subset, operator, provider)
}

/// Sets the subset string, logging the provider's diagnostics on rejection.
pub(crate) fn set_layer_subset(layer: &dyn VectorLayer, subset: &str) -> bool {
    let layer_id = &layer.props().layer_id;
    if layer.set_subset_string(subset) {
        tracing::debug!(layer_id, subset_len = subset.len(), "subset string applied");
        return true;
    }
    match layer.last_error() {
        Some(diagnostics) => {
            tracing::error!(layer_id, subset, diagnostics, "provider rejected subset string")
        }
        None => tracing::error!(layer_id, subset, "provider rejected subset string"),
    }
    false
}

#[cfg(test)]
mod tests {
    use super::{BuildOutcome, EngineServices, FallbackReason, FilterBackend};
    use crate::config::FilterEngineConfig;
    use crate::layer::ProviderType;
    use crate::testing::{layer_fixture, request_fixture};

    #[test]
    fn factory_maps_memory_to_ogr() {
        let services = EngineServices::new(FilterEngineConfig::default());
        assert_eq!(
            FilterBackend::for_provider(ProviderType::Memory, &services).provider(),
            ProviderType::Ogr
        );
        assert_eq!(
            FilterBackend::for_provider(ProviderType::Spatialite, &services).provider(),
            ProviderType::Spatialite
        );
    }

    #[test]
    fn outcome_serializes_tagged() {
        let json = serde_json::to_string(&BuildOutcome::UseOgrFallback(
            FallbackReason::GeometryCollection,
        ))
        .expect("serialize");
        assert_eq!(json, r#"{"kind":"use_ogr_fallback","value":"geometry_collection"}"#);
        assert_eq!(BuildOutcome::Expression("1 = 0".into()).expression(), Some("1 = 0"));
    }

    #[tokio::test]
    async fn geopackage_layers_under_ogr_use_the_spatialite_builder() {
        let services = EngineServices::new(FilterEngineConfig::default());
        let mut request = request_fixture(ProviderType::Ogr);
        request.target.source_uri = "/data/roads.gpkg|layername=roads".to_string();

        let backend = FilterBackend::for_layer(&request.target, &services);
        assert_eq!(backend.provider(), ProviderType::Spatialite);
        assert!(backend.supports_layer(&request.target));
        let outcome = backend.build_expression(&request).await.expect("build");
        let sql = outcome.expression().expect("expression");
        assert!(sql.starts_with("Intersects(GeomFromGPB(\"roads\".\"geom\"), "));

        let shapefile = layer_fixture(ProviderType::Ogr, "roads");
        assert_eq!(
            FilterBackend::for_layer(&shapefile, &services).provider(),
            ProviderType::Ogr
        );
    }
}

//! Filtering for providers without a SQL surface: run `selectbylocation`
//! and turn the selected ids into a primary-key `IN (...)` filter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backends::{merge_with_existing, set_layer_subset, BuildOutcome, EngineServices};
use crate::errors;
use crate::layer::{ProviderType, VectorLayer};
use crate::request::{ordered_predicates, CombineOperator, EndCapStyle, FilterRequest};
use crate::sql::identifiers::quote_ident;
use crate::sql::pk::{detect_primary_key_kind, format_pk_values_for_sql};
use crate::{FilterMateError, Value};

pub const SELECT_BY_LOCATION: &str = "native:selectbylocation";

/// Feature-id columns that equal the ids the selection reports.
const FEATURE_ID_COLUMNS: &[&str] = &["fid", "ogc_fid"];

/// Parameter bag for `native:selectbylocation`. `METHOD` 0 creates a new
/// selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SelectByLocationParams {
    pub algorithm: String,
    pub input: String,
    pub intersect: String,
    pub predicate: Vec<u8>,
    pub method: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_expression: Option<String>,
    #[serde(default)]
    pub buffer_segments: Option<u32>,
    #[serde(default)]
    pub buffer_end_cap: EndCapStyle,
    #[serde(default)]
    pub use_centroids: bool,
}

/// Cooperative cancellation, polled by the processing framework.
#[derive(Debug, Default)]
pub struct ProcessingFeedback {
    canceled: AtomicBool,
}

impl ProcessingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

/// Host processing facade. Blocks until the algorithm finishes and returns
/// the selected feature ids of `params.input`.
pub trait ProcessingRunner: Send + Sync {
    fn select_by_location(
        &self,
        params: &SelectByLocationParams,
        feedback: &ProcessingFeedback,
    ) -> Result<Vec<i64>, FilterMateError>;
}

/// OGR providers are not safe for concurrent access. Cross-thread use is
/// reported, not prevented.
#[derive(Debug, Default)]
pub struct ThreadAccessMonitor {
    last_thread: Mutex<Option<ThreadId>>,
}

impl ThreadAccessMonitor {
    /// Records the calling thread; returns `true` when the previous operation
    /// ran on a different one.
    pub fn enter(&self, operation: &str) -> bool {
        let current = std::thread::current().id();
        let mut last = self.last_thread.lock();
        let switched = last.is_some_and(|previous| previous != current);
        if switched {
            tracing::warn!(
                operation,
                "OGR access from a different thread than the previous operation"
            );
        }
        *last = Some(current);
        switched
    }
}

pub struct OgrBuilder {
    services: EngineServices,
    feedback: ProcessingFeedback,
}

impl OgrBuilder {
    pub fn new(services: EngineServices) -> Self {
        Self {
            services,
            feedback: ProcessingFeedback::new(),
        }
    }

    pub fn feedback(&self) -> &ProcessingFeedback {
        &self.feedback
    }

    /// The "expression" of this backend is the serialized parameter bag;
    /// the selection itself runs in `apply_filter`.
    pub fn build_expression(&self, request: &FilterRequest) -> Result<BuildOutcome, FilterMateError> {
        let Some(source_layer) = request.source.layer_id.as_deref() else {
            return Err(errors::invalid_request_error(
                "selectbylocation needs the source layer id",
            ));
        };
        let mut predicate: Vec<u8> = ordered_predicates(&request.predicates)
            .into_iter()
            .map(|predicate| predicate.selectbylocation_code())
            .collect();
        predicate.sort_unstable();
        predicate.dedup();

        let params = SelectByLocationParams {
            algorithm: SELECT_BY_LOCATION.to_string(),
            input: request.target.layer_id.clone(),
            intersect: source_layer.to_string(),
            predicate,
            method: 0,
            buffer: request.buffer.static_value(),
            buffer_expression: request
                .buffer
                .has_dynamic_expression()
                .then(|| request.buffer.expression.clone())
                .flatten(),
            buffer_segments: Some(
                request
                    .buffer
                    .segments
                    .unwrap_or(self.services.config.buffer_segments),
            ),
            buffer_end_cap: request.buffer.end_cap,
            use_centroids: request.use_centroids,
        };
        serde_json::to_string(&params)
            .map(BuildOutcome::Expression)
            .map_err(errors::invalid_parameters_error)
    }

    pub fn apply_filter(
        &self,
        layer: &dyn VectorLayer,
        expression: &str,
        old_subset: Option<&str>,
        operator: Option<CombineOperator>,
    ) -> Result<bool, FilterMateError> {
        let params: SelectByLocationParams =
            serde_json::from_str(expression).map_err(errors::invalid_parameters_error)?;
        let Some(runner) = self.services.processing.as_ref() else {
            return Err(errors::processing_error(
                SELECT_BY_LOCATION,
                "no processing runner is available",
            ));
        };

        self.services.ogr_monitor.enter(SELECT_BY_LOCATION);
        let feature_ids = runner.select_by_location(&params, &self.feedback)?;
        if self.feedback.is_canceled() {
            return Err(errors::canceled_error(SELECT_BY_LOCATION));
        }

        let props = layer.props();
        let filter = selection_filter(layer, &feature_ids);
        tracing::debug!(
            layer_id = %props.layer_id,
            selected = feature_ids.len(),
            "selectbylocation finished"
        );
        let merged = merge_with_existing(
            &props.layer_id,
            &filter,
            old_subset,
            operator,
            ProviderType::Ogr,
        );
        Ok(set_layer_subset(layer, &merged))
    }
}

/// `"pk" IN (...)` over the selected features, or `1 = 0` for an empty
/// selection.
fn selection_filter(layer: &dyn VectorLayer, feature_ids: &[i64]) -> String {
    if feature_ids.is_empty() {
        return "1 = 0".to_string();
    }
    let props = layer.props();
    let pk = props
        .primary_key
        .as_deref()
        .filter(|pk| !pk.trim().is_empty())
        .unwrap_or("fid");
    let values: Vec<Value> = if FEATURE_ID_COLUMNS
        .iter()
        .any(|column| pk.eq_ignore_ascii_case(column))
    {
        feature_ids.iter().copied().map(Value::Integer).collect()
    } else {
        layer.attribute_values(pk, feature_ids)
    };
    let detection = detect_primary_key_kind(Some(props), pk, Some(&values));
    format!(
        "{} IN ({})",
        quote_ident(pk),
        format_pk_values_for_sql(&values, Some(detection.numeric))
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{SelectByLocationParams, ThreadAccessMonitor};
    use crate::backends::{BuildOutcome, EngineServices, OgrBuilder};
    use crate::config::FilterEngineConfig;
    use crate::layer::ProviderType;
    use crate::request::SpatialPredicate;
    use crate::testing::request_fixture;

    #[test]
    fn params_use_selectbylocation_codes() {
        let builder = OgrBuilder::new(EngineServices::new(FilterEngineConfig::default()));
        let mut request = request_fixture(ProviderType::Ogr);
        request.predicates = [
            SpatialPredicate::Within,
            SpatialPredicate::Intersects,
            SpatialPredicate::CoveredBy,
        ]
        .into_iter()
        .collect();
        let outcome = builder.build_expression(&request).expect("build");
        let BuildOutcome::Expression(json) = outcome else {
            panic!("OGR never falls back");
        };
        let params: SelectByLocationParams = serde_json::from_str(&json).expect("params");
        assert_eq!(params.algorithm, "native:selectbylocation");
        assert_eq!(params.predicate, vec![0, 6]);
        assert_eq!(params.method, 0);
        assert!(json.contains("\"INTERSECT\""));
    }

    #[test]
    fn monitor_reports_thread_switches() {
        let monitor = Arc::new(ThreadAccessMonitor::default());
        assert!(!monitor.enter("first"));
        assert!(!monitor.enter("same thread"));
        let other = Arc::clone(&monitor);
        let switched = std::thread::spawn(move || other.enter("other thread"))
            .join()
            .expect("thread should finish");
        assert!(switched);
    }
}

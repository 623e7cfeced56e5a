#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use filtermate_engine::backends::{ProcessingFeedback, ProcessingRunner, SelectByLocationParams};
use filtermate_engine::{
    BufferSpec, CombineOperator, ConnectionProvider, EngineServices, FieldInfo, FieldKind,
    FilterEngineConfig, FilterMateError, FilterRequest, LayerConnection, LayerProps, ProviderType,
    QueryResult, SourceGeometry, SourceTable, SpatialPredicate, SqlConnection, Value, VectorLayer,
    WktGeometry,
};
use parking_lot::Mutex;

/// Expands a scenario into one test per backend. The body receives the
/// provider under test.
#[macro_export]
macro_rules! provider_test {
    ($name:ident, |$provider:ident| $body:expr) => {
        paste::paste! {
            #[test]
            fn [<$name _postgres>]() {
                $crate::support::run_scenario(filtermate_engine::ProviderType::Postgres, |$provider| $body);
            }

            #[test]
            fn [<$name _spatialite>]() {
                $crate::support::run_scenario(filtermate_engine::ProviderType::Spatialite, |$provider| $body);
            }

            #[test]
            fn [<$name _ogr>]() {
                $crate::support::run_scenario(filtermate_engine::ProviderType::Ogr, |$provider| $body);
            }
        }
    };
}

pub fn run_scenario<F, Fut>(provider: ProviderType, scenario: F)
where
    F: FnOnce(ProviderType) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");
    runtime.block_on(scenario(provider));
}

pub fn config() -> FilterEngineConfig {
    FilterEngineConfig {
        session_id: "s1".to_string(),
        ..FilterEngineConfig::default()
    }
}

/// Records statements; answers substring-matched canned rows.
#[derive(Default)]
pub struct RecordingConnection {
    statements: Mutex<Vec<String>>,
    responses: Mutex<Vec<(String, Vec<Vec<Value>>)>>,
    failures: Mutex<Vec<(String, String)>>,
}

impl RecordingConnection {
    pub fn respond(&self, fragment: &str, rows: Vec<Vec<Value>>) {
        self.responses.lock().push((fragment.to_string(), rows));
    }

    pub fn fail(&self, fragment: &str, message: &str) {
        self.failures
            .lock()
            .push((fragment.to_string(), message.to_string()));
    }

    pub fn executed(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    pub fn executed_matching(&self, fragment: &str) -> Vec<String> {
        self.executed()
            .into_iter()
            .filter(|sql| sql.contains(fragment))
            .collect()
    }
}

#[async_trait(?Send)]
impl SqlConnection for RecordingConnection {
    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<QueryResult, FilterMateError> {
        self.statements.lock().push(sql.to_string());
        if let Some((_, message)) = self
            .failures
            .lock()
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
        {
            return Err(FilterMateError::unknown(message.clone()));
        }
        let rows = self
            .responses
            .lock()
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();
        Ok(QueryResult {
            rows,
            columns: Vec::new(),
        })
    }
}

pub struct StaticConnections(pub Arc<RecordingConnection>);

#[async_trait(?Send)]
impl ConnectionProvider for StaticConnections {
    async fn connection_for_layer(
        &self,
        layer: &LayerProps,
    ) -> Result<LayerConnection, FilterMateError> {
        Ok(LayerConnection {
            connection: self.0.clone(),
            source_uri: layer.source_uri.clone(),
        })
    }
}

/// Processing runner returning a fixed selection and recording its inputs.
#[derive(Default)]
pub struct FixedSelection {
    pub feature_ids: Vec<i64>,
    pub calls: Mutex<Vec<SelectByLocationParams>>,
}

impl FixedSelection {
    pub fn new(feature_ids: Vec<i64>) -> Self {
        Self {
            feature_ids,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ProcessingRunner for FixedSelection {
    fn select_by_location(
        &self,
        params: &SelectByLocationParams,
        _feedback: &ProcessingFeedback,
    ) -> Result<Vec<i64>, FilterMateError> {
        self.calls.lock().push(params.clone());
        Ok(self.feature_ids.clone())
    }
}

pub fn services_with(selection: Arc<FixedSelection>) -> EngineServices {
    EngineServices::new(config()).with_processing(selection)
}

pub struct FakeLayer {
    pub props: LayerProps,
    pub subset: Mutex<String>,
}

impl FakeLayer {
    pub fn new(props: LayerProps, subset: &str) -> Self {
        Self {
            props,
            subset: Mutex::new(subset.to_string()),
        }
    }
}

impl VectorLayer for FakeLayer {
    fn props(&self) -> &LayerProps {
        &self.props
    }

    fn subset_string(&self) -> String {
        self.subset.lock().clone()
    }

    fn set_subset_string(&self, subset: &str) -> bool {
        *self.subset.lock() = subset.to_string();
        true
    }

    fn attribute_values(&self, _field: &str, feature_ids: &[i64]) -> Vec<Value> {
        feature_ids.iter().map(|id| Value::Integer(id * 10)).collect()
    }
}

pub fn layer(provider: ProviderType, table: &str) -> LayerProps {
    LayerProps {
        layer_id: format!("{table}_layer"),
        name: table.to_string(),
        provider,
        schema: Some("public".to_string()),
        table: Some(table.to_string()),
        geometry_column: Some("geom".to_string()),
        primary_key: Some("id".to_string()),
        crs_authid: Some("EPSG:4326".to_string()),
        feature_count: Some(1_000),
        source_uri: String::new(),
        fields: vec![
            FieldInfo::new("id", FieldKind::Integer),
            FieldInfo::new("name", FieldKind::Text),
        ],
    }
}

/// `roads` intersected with `feature_count` features of `zones`.
pub fn request(provider: ProviderType, feature_count: u64) -> FilterRequest {
    FilterRequest {
        target: layer(provider, "roads"),
        predicates: BTreeSet::from([SpatialPredicate::Intersects]),
        source: SourceGeometry {
            layer_id: Some("zones_layer".to_string()),
            wkt: Some(WktGeometry {
                wkt: "POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))".to_string(),
                srid: Some(4326),
            }),
            table: Some(SourceTable {
                schema: Some("public".to_string()),
                table: "zones".to_string(),
                geometry_column: "geom".to_string(),
                primary_key: Some("id".to_string()),
                srid: Some(4326),
                fields: vec![FieldInfo::new("width", FieldKind::Real)],
            }),
            feature_count,
        },
        buffer: BufferSpec::default(),
        use_centroids: false,
        use_source_centroids: false,
        source_filter: None,
        combine_operator: Some(CombineOperator::And),
    }
}

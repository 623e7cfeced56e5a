//! Fakes shared by unit tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{ConnectionProvider, LayerConnection, SqlConnection};
use crate::layer::{FieldInfo, FieldKind, LayerProps, ProviderType, VectorLayer};
use crate::notify::UserNotifier;
use crate::request::{
    BufferSpec, CombineOperator, FilterRequest, SourceGeometry, SourceTable, SpatialPredicate,
    WktGeometry,
};
use crate::{FilterMateError, QueryResult, Value};

/// Records every statement and answers from canned responses matched by
/// substring, first match wins. Unmatched statements succeed with no rows.
#[derive(Default)]
pub(crate) struct RecordingConnection {
    pub statements: Mutex<Vec<String>>,
    responses: Mutex<Vec<(String, Result<QueryResult, FilterMateError>)>>,
    pub commits: Mutex<usize>,
    pub rollbacks: Mutex<usize>,
}

impl RecordingConnection {
    pub(crate) fn respond(&self, fragment: &str, rows: Vec<Vec<Value>>) {
        self.responses.lock().push((
            fragment.to_string(),
            Ok(QueryResult {
                rows,
                columns: Vec::new(),
            }),
        ));
    }

    pub(crate) fn fail(&self, fragment: &str, message: &str) {
        self.responses
            .lock()
            .push((fragment.to_string(), Err(FilterMateError::unknown(message))));
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    pub(crate) fn executed_matching(&self, fragment: &str) -> Vec<String> {
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
        let responses = self.responses.lock();
        match responses.iter().find(|(fragment, _)| sql.contains(fragment.as_str())) {
            Some((_, response)) => response.clone(),
            None => Ok(QueryResult::default()),
        }
    }

    async fn commit(&self) -> Result<(), FilterMateError> {
        *self.commits.lock() += 1;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), FilterMateError> {
        *self.rollbacks.lock() += 1;
        Ok(())
    }
}

pub(crate) fn layer_fixture(provider: ProviderType, table: &str) -> LayerProps {
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
            FieldInfo::new("kind", FieldKind::Text),
        ],
    }
}

/// `roads` filtered by intersecting five `zones` features.
pub(crate) fn request_fixture(provider: ProviderType) -> FilterRequest {
    FilterRequest {
        target: layer_fixture(provider, "roads"),
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
                fields: vec![
                    FieldInfo::new("id", FieldKind::Integer),
                    FieldInfo::new("width", FieldKind::Text),
                ],
            }),
            feature_count: 5,
        },
        buffer: BufferSpec::default(),
        use_centroids: false,
        use_source_centroids: false,
        source_filter: None,
        combine_operator: Some(CombineOperator::And),
    }
}

pub(crate) struct StaticConnectionProvider(pub Arc<RecordingConnection>);

#[async_trait(?Send)]
impl ConnectionProvider for StaticConnectionProvider {
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

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub warnings: Mutex<Vec<String>>,
}

impl UserNotifier for RecordingNotifier {
    fn warn(&self, title: &str, _message: &str) {
        self.warnings.lock().push(title.to_string());
    }
}

/// Layer whose provider accepts every subset unless `reject` is set.
pub(crate) struct FakeLayer {
    pub props: LayerProps,
    pub subset: Mutex<String>,
    pub reject: bool,
    pub values: Vec<Value>,
}

impl FakeLayer {
    pub(crate) fn new(props: LayerProps, subset: &str) -> Self {
        Self {
            props,
            subset: Mutex::new(subset.to_string()),
            reject: false,
            values: Vec::new(),
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
        if self.reject {
            return false;
        }
        *self.subset.lock() = subset.to_string();
        true
    }

    fn last_error(&self) -> Option<String> {
        self.reject.then(|| "syntax error at or near \"(\"".to_string())
    }

    fn attribute_values(&self, _field: &str, feature_ids: &[i64]) -> Vec<Value> {
        feature_ids
            .iter()
            .filter_map(|id| usize::try_from(*id).ok())
            .filter_map(|index| self.values.get(index).cloned())
            .collect()
    }
}

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use filtermate_engine::{
    BufferSpec, CombineOperator, ConnectionProvider, FieldInfo, FieldKind, FilterMateError,
    FilterRequest, LayerConnection, LayerProps, ProviderType, QueryResult, SourceGeometry,
    SourceTable, SpatialPredicate, SqlConnection, Value, VectorLayer, WktGeometry,
};

pub fn roads_layer() -> LayerProps {
    LayerProps {
        layer_id: "roads_layer".to_string(),
        name: "roads".to_string(),
        provider: ProviderType::Postgres,
        schema: Some("public".to_string()),
        table: Some("roads".to_string()),
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

pub fn zone_request(wkt: &str) -> FilterRequest {
    FilterRequest {
        target: roads_layer(),
        predicates: BTreeSet::from([SpatialPredicate::Intersects]),
        source: SourceGeometry {
            layer_id: Some("zones_layer".to_string()),
            wkt: Some(WktGeometry {
                wkt: wkt.to_string(),
                srid: Some(4326),
            }),
            table: None,
            feature_count: 1,
        },
        buffer: BufferSpec::default(),
        use_centroids: false,
        use_source_centroids: false,
        source_filter: None,
        combine_operator: Some(CombineOperator::And),
    }
}

/// Large zone source with a per-feature buffer, built through a
/// precomputed buffer view.
pub fn buffered_zone_request() -> FilterRequest {
    let mut request = zone_request("POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))");
    request.source.wkt = None;
    request.source.feature_count = 50_000;
    request.source.table = Some(SourceTable {
        schema: Some("public".to_string()),
        table: "zones".to_string(),
        geometry_column: "geom".to_string(),
        primary_key: Some("id".to_string()),
        srid: Some(4326),
        fields: vec![
            FieldInfo::new("id", FieldKind::Integer),
            FieldInfo::new("width", FieldKind::Real),
        ],
    });
    request.buffer.expression = Some("\"width\" * 2".to_string());
    request
}

/// Stands in for the PostgreSQL side: records statements, returns no rows.
#[derive(Default)]
pub struct StatementLog {
    statements: Mutex<Vec<String>>,
}

impl StatementLog {
    pub fn matching(&self, fragment: &str) -> Vec<String> {
        self.statements
            .lock()
            .expect("statement mutex")
            .iter()
            .filter(|sql| sql.contains(fragment))
            .cloned()
            .collect()
    }
}

#[async_trait(?Send)]
impl SqlConnection for StatementLog {
    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<QueryResult, FilterMateError> {
        self.statements
            .lock()
            .expect("statement mutex")
            .push(sql.to_string());
        Ok(QueryResult::default())
    }
}

pub struct LogProvider(pub Arc<StatementLog>);

#[async_trait(?Send)]
impl ConnectionProvider for LogProvider {
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

pub struct MemoryLayer {
    pub props: LayerProps,
    pub subset: Mutex<String>,
}

impl MemoryLayer {
    pub fn new(props: LayerProps) -> Self {
        Self {
            props,
            subset: Mutex::new(String::new()),
        }
    }
}

impl VectorLayer for MemoryLayer {
    fn props(&self) -> &LayerProps {
        &self.props
    }

    fn subset_string(&self) -> String {
        self.subset.lock().expect("subset mutex").clone()
    }

    fn set_subset_string(&self, subset: &str) -> bool {
        *self.subset.lock().expect("subset mutex") = subset.to_string();
        true
    }

    fn last_error(&self) -> Option<String> {
        None
    }

    fn attribute_values(&self, _field: &str, feature_ids: &[i64]) -> Vec<Value> {
        feature_ids.iter().copied().map(Value::Integer).collect()
    }
}

use serde::{Deserialize, Serialize};

use crate::{errors, FilterMateError, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Postgres,
    Spatialite,
    Ogr,
    Memory,
}

impl ProviderType {
    /// Maps a QGIS data provider key to a provider type.
    pub fn from_provider_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "postgis" => Some(Self::Postgres),
            "spatialite" | "sqlite" => Some(Self::Spatialite),
            "ogr" => Some(Self::Ogr),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Spatialite => "spatialite",
            Self::Ogr => "ogr",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Integer64,
    Real,
    Numeric,
    Text,
    Uuid,
    Date,
    DateTime,
    Boolean,
    Other,
}

impl FieldKind {
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Integer | Self::Integer64 | Self::Real | Self::Numeric
        )
    }

    pub const fn is_textual(self) -> bool {
        matches!(self, Self::Text | Self::Uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Metadata of a layer as reported by the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerProps {
    pub layer_id: String,
    #[serde(default)]
    pub name: String,
    pub provider: ProviderType,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub geometry_column: Option<String>,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub crs_authid: Option<String>,
    #[serde(default)]
    pub feature_count: Option<u64>,
    #[serde(default)]
    pub source_uri: String,
    #[serde(default)]
    pub fields: Vec<FieldInfo>,
}

impl LayerProps {
    pub fn table_name(&self) -> Result<&str, FilterMateError> {
        non_empty(self.table.as_deref())
            .ok_or_else(|| errors::missing_layer_property_error(&self.layer_id, "table"))
    }

    pub fn geometry_column_name(&self) -> Result<&str, FilterMateError> {
        non_empty(self.geometry_column.as_deref())
            .ok_or_else(|| errors::missing_layer_property_error(&self.layer_id, "geometry_column"))
    }

    pub fn primary_key_name(&self) -> Result<&str, FilterMateError> {
        non_empty(self.primary_key.as_deref())
            .ok_or_else(|| errors::missing_layer_property_error(&self.layer_id, "primary_key"))
    }

    pub fn schema_name(&self) -> &str {
        non_empty(self.schema.as_deref()).unwrap_or("public")
    }

    /// EPSG code parsed from `crs_authid` (`EPSG:4326` -> 4326).
    pub fn srid(&self) -> Option<i32> {
        self.crs_authid.as_deref().and_then(srid_from_authid)
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .or_else(|| {
                self.fields
                    .iter()
                    .find(|field| field.name.eq_ignore_ascii_case(name))
            })
    }

    /// GeoPackage layers are served by OGR/Spatialite but store geometries as GPB blobs.
    pub fn is_geopackage(&self) -> bool {
        let source = self.source_uri.to_ascii_lowercase();
        source.contains(".gpkg") || source.contains("gpkg|")
    }
}

pub(crate) fn srid_from_authid(authid: &str) -> Option<i32> {
    let (_, code) = authid.rsplit_once(':')?;
    code.trim().parse().ok()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

/// A vector layer owned by the host application.
///
/// `set_subset_string` is single-writer: callers serialize concurrent calls
/// on the same layer.
pub trait VectorLayer: Send + Sync {
    fn props(&self) -> &LayerProps;

    fn subset_string(&self) -> String;

    /// Returns false when the provider rejects the filter.
    fn set_subset_string(&self, subset: &str) -> bool;

    /// Provider diagnostics for the last rejected subset string, if any.
    fn last_error(&self) -> Option<String> {
        None
    }

    /// Values of `field` for the given feature ids, in id order.
    fn attribute_values(&self, field: &str, feature_ids: &[i64]) -> Vec<Value>;
}

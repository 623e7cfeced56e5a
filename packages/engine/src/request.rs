use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::sql::identifiers::qualified_name;
use crate::{errors, FieldInfo, FilterMateError, LayerProps};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpatialPredicate {
    Intersects,
    Contains,
    Within,
    Touches,
    Overlaps,
    Crosses,
    Disjoint,
    Equals,
    Covers,
    #[serde(alias = "covered_by")]
    CoveredBy,
}

impl SpatialPredicate {
    pub const fn all() -> &'static [Self] {
        &[
            Self::Intersects,
            Self::Contains,
            Self::Within,
            Self::Touches,
            Self::Overlaps,
            Self::Crosses,
            Self::Disjoint,
            Self::Equals,
            Self::Covers,
            Self::CoveredBy,
        ]
    }

    /// Lower ranks are more restrictive and are evaluated first.
    pub const fn selectivity_rank(self) -> u8 {
        match self {
            Self::Within | Self::CoveredBy => 1,
            Self::Contains | Self::Covers => 2,
            Self::Equals => 3,
            Self::Touches => 4,
            Self::Crosses => 5,
            Self::Overlaps => 6,
            Self::Disjoint => 7,
            Self::Intersects => 8,
        }
    }

    pub const fn postgis_function(self) -> &'static str {
        match self {
            Self::Intersects => "ST_Intersects",
            Self::Contains => "ST_Contains",
            Self::Within => "ST_Within",
            Self::Touches => "ST_Touches",
            Self::Overlaps => "ST_Overlaps",
            Self::Crosses => "ST_Crosses",
            Self::Disjoint => "ST_Disjoint",
            Self::Equals => "ST_Equals",
            Self::Covers => "ST_Covers",
            Self::CoveredBy => "ST_CoveredBy",
        }
    }

    pub const fn spatialite_function(self) -> &'static str {
        match self {
            Self::Intersects => "Intersects",
            Self::Contains => "Contains",
            Self::Within => "Within",
            Self::Touches => "Touches",
            Self::Overlaps => "Overlaps",
            Self::Crosses => "Crosses",
            Self::Disjoint => "Disjoint",
            Self::Equals => "Equals",
            Self::Covers => "Covers",
            Self::CoveredBy => "CoveredBy",
        }
    }

    /// `native:selectbylocation` PREDICATE code. Covers/coveredby have no
    /// code of their own and use contains/within.
    pub const fn selectbylocation_code(self) -> u8 {
        match self {
            Self::Intersects => 0,
            Self::Contains | Self::Covers => 1,
            Self::Disjoint => 2,
            Self::Equals => 3,
            Self::Touches => 4,
            Self::Overlaps => 5,
            Self::Within | Self::CoveredBy => 6,
            Self::Crosses => 7,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intersects => "intersects",
            Self::Contains => "contains",
            Self::Within => "within",
            Self::Touches => "touches",
            Self::Overlaps => "overlaps",
            Self::Crosses => "crosses",
            Self::Disjoint => "disjoint",
            Self::Equals => "equals",
            Self::Covers => "covers",
            Self::CoveredBy => "coveredby",
        }
    }
}

impl FromStr for SpatialPredicate {
    type Err = FilterMateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['_', ' '], "");
        Self::all()
            .iter()
            .copied()
            .find(|predicate| predicate.as_str() == normalized)
            .ok_or_else(|| {
                errors::invalid_request_error(&format!("unknown spatial predicate `{value}`"))
            })
    }
}

/// Enabled predicates ordered by selectivity, most restrictive first.
pub fn ordered_predicates(predicates: &BTreeSet<SpatialPredicate>) -> Vec<SpatialPredicate> {
    let mut ordered: Vec<SpatialPredicate> = predicates.iter().copied().collect();
    ordered.sort_by_key(|predicate| predicate.selectivity_rank());
    ordered
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CombineOperator {
    And,
    Or,
    AndNot,
    Replace,
}

impl CombineOperator {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
            Self::AndNot => "AND NOT",
            Self::Replace => "REPLACE",
        }
    }
}

impl FromStr for CombineOperator {
    type Err = FilterMateError;

    /// An empty operator means AND, the most restrictive combination.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_uppercase().as_str() {
            "" | "AND" => Ok(Self::And),
            "OR" => Ok(Self::Or),
            "AND NOT" | "NOT" => Ok(Self::AndNot),
            "REPLACE" => Ok(Self::Replace),
            _ => Err(errors::invalid_request_error(&format!(
                "unknown combine operator `{value}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndCapStyle {
    #[default]
    Round,
    Flat,
    Square,
}

impl EndCapStyle {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Round => "round",
            Self::Flat => "flat",
            Self::Square => "square",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSpec {
    /// Static distance in layer units; negative values erode.
    pub value: Option<f64>,
    /// QGIS expression evaluated per source feature.
    pub expression: Option<String>,
    /// `quad_segs`; falls back to the engine configuration.
    pub segments: Option<u32>,
    pub end_cap: EndCapStyle,
}

impl BufferSpec {
    pub fn has_dynamic_expression(&self) -> bool {
        self.expression
            .as_deref()
            .is_some_and(|expression| !expression.trim().is_empty())
    }

    pub fn static_value(&self) -> Option<f64> {
        self.value.filter(|value| *value != 0.0 && value.is_finite())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WktGeometry {
    pub wkt: String,
    #[serde(default)]
    pub srid: Option<i32>,
}

impl WktGeometry {
    pub fn is_geometry_collection(&self) -> bool {
        crate::geometry::is_geometry_collection(&self.wkt)
    }
}

/// A table or view the target can be joined against in an EXISTS subquery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTable {
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    pub geometry_column: String,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub srid: Option<i32>,
    /// Column types, used to cast comparisons in buffer expressions.
    #[serde(default)]
    pub fields: Vec<FieldInfo>,
}

impl SourceTable {
    pub fn relation(&self) -> String {
        qualified_name(self.schema.as_deref(), &self.table)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceGeometry {
    pub layer_id: Option<String>,
    pub wkt: Option<WktGeometry>,
    pub table: Option<SourceTable>,
    pub feature_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRequest {
    pub target: LayerProps,
    pub predicates: BTreeSet<SpatialPredicate>,
    pub source: SourceGeometry,
    #[serde(default)]
    pub buffer: BufferSpec,
    #[serde(default)]
    pub use_centroids: bool,
    #[serde(default)]
    pub use_source_centroids: bool,
    /// Filter already applied to the source layer.
    #[serde(default)]
    pub source_filter: Option<String>,
    #[serde(default)]
    pub combine_operator: Option<CombineOperator>,
}

impl FilterRequest {
    pub fn validate(&self) -> Result<(), FilterMateError> {
        if self.predicates.is_empty() {
            return Err(errors::invalid_request_error(
                "at least one spatial predicate must be enabled",
            ));
        }
        if self.source.wkt.is_none() && self.source.table.is_none() && self.source.layer_id.is_none()
        {
            return Err(errors::invalid_request_error(
                "the source geometry has neither WKT, a table reference nor a layer id",
            ));
        }
        Ok(())
    }

    pub fn source_filter(&self) -> Option<&str> {
        self.source_filter
            .as_deref()
            .map(str::trim)
            .filter(|filter| !filter.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{ordered_predicates, CombineOperator, SpatialPredicate, WktGeometry};

    #[test]
    fn orders_predicates_by_selectivity() {
        let predicates = BTreeSet::from([SpatialPredicate::Intersects, SpatialPredicate::Within]);
        assert_eq!(
            ordered_predicates(&predicates),
            vec![SpatialPredicate::Within, SpatialPredicate::Intersects]
        );
    }

    #[test]
    fn parses_combine_operators() {
        assert_eq!("".parse::<CombineOperator>().unwrap(), CombineOperator::And);
        assert_eq!(
            "and  not".parse::<CombineOperator>().unwrap(),
            CombineOperator::AndNot
        );
        assert_eq!("OR".parse::<CombineOperator>().unwrap(), CombineOperator::Or);
        assert!("XOR".parse::<CombineOperator>().is_err());
    }

    #[test]
    fn parses_predicate_aliases() {
        assert_eq!(
            "covered_by".parse::<SpatialPredicate>().unwrap(),
            SpatialPredicate::CoveredBy
        );
        assert_eq!(
            "Intersects".parse::<SpatialPredicate>().unwrap(),
            SpatialPredicate::Intersects
        );
    }

    #[test]
    fn detects_geometry_collections() {
        let plain = WktGeometry {
            wkt: "POINT(1 2)".to_string(),
            srid: Some(4326),
        };
        let collection = WktGeometry {
            wkt: "SRID=4326; GEOMETRYCOLLECTION(POINT(1 2))".to_string(),
            srid: Some(4326),
        };
        assert!(!plain.is_geometry_collection());
        assert!(collection.is_geometry_collection());
    }
}

use crate::sql::identifiers::quote_literal;
use crate::{LayerProps, Value};

/// Primary key names that are numeric in practically every data source.
pub const COMMON_NUMERIC_PK_NAMES: &[&str] = &[
    "id", "fid", "gid", "pk", "ogc_fid", "objectid", "oid", "rowid",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkDetectionSource {
    SampleValues,
    LayerSchema,
    CommonName,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PkDetection {
    pub numeric: bool,
    pub source: PkDetectionSource,
}

/// Decides whether `pk_field` holds numbers or text/UUIDs.
///
/// Inconclusive detection resolves to numeric: a UUID rendered unquoted
/// fails loudly in SQL while a quoted integer silently still matches.
pub fn detect_primary_key_kind(
    layer: Option<&LayerProps>,
    pk_field: &str,
    sample_values: Option<&[Value]>,
) -> PkDetection {
    if let Some(samples) = sample_values {
        let non_null: Vec<&Value> = samples
            .iter()
            .filter(|value| !matches!(value, Value::Null))
            .collect();
        if !non_null.is_empty() {
            return PkDetection {
                numeric: non_null.iter().all(|value| value_is_numeric(value)),
                source: PkDetectionSource::SampleValues,
            };
        }
    }

    if let Some(field) = layer.and_then(|layer| layer.field(pk_field)) {
        return PkDetection {
            numeric: field.kind.is_numeric(),
            source: PkDetectionSource::LayerSchema,
        };
    }

    let lowered = pk_field.trim().to_ascii_lowercase();
    if COMMON_NUMERIC_PK_NAMES.contains(&lowered.as_str()) {
        return PkDetection {
            numeric: true,
            source: PkDetectionSource::CommonName,
        };
    }

    tracing::debug!(pk_field, "primary key type is unknown, assuming numeric");
    PkDetection {
        numeric: true,
        source: PkDetectionSource::Default,
    }
}

pub fn is_numeric_primary_key(
    layer: Option<&LayerProps>,
    pk_field: &str,
    sample_values: Option<&[Value]>,
) -> bool {
    detect_primary_key_kind(layer, pk_field, sample_values).numeric
}

/// Renders values for an `IN (...)` list. `None` infers the kind from the values.
pub fn format_pk_values_for_sql(values: &[Value], is_numeric: Option<bool>) -> String {
    let numeric = is_numeric.unwrap_or_else(|| {
        values
            .iter()
            .filter(|value| !matches!(value, Value::Null))
            .all(value_is_numeric)
    });

    values
        .iter()
        .map(|value| {
            if numeric {
                render_numeric(value)
            } else {
                render_text(value)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn value_is_numeric(value: &Value) -> bool {
    match value {
        Value::Integer(_) | Value::Real(_) => true,
        Value::Text(text) => parse_number(text).is_some(),
        Value::Null | Value::Boolean(_) => false,
    }
}

/// Numeric literal for `text`: integers are normalized, decimals keep their
/// digits.
fn parse_number(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(value.to_string());
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(|_| trimmed.to_string())
}

fn render_real(value: f64) -> String {
    if !value.is_finite() {
        return "NULL".to_string();
    }
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        return (value as i64).to_string();
    }
    value.to_string()
}

fn render_numeric(value: &Value) -> String {
    match value {
        Value::Integer(value) => value.to_string(),
        Value::Real(value) => render_real(*value),
        Value::Boolean(value) => i64::from(*value).to_string(),
        Value::Null => "NULL".to_string(),
        // A non-numeric text value must still produce valid SQL.
        Value::Text(text) => parse_number(text).unwrap_or_else(|| quote_literal(text)),
    }
}

fn render_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Text(text) => quote_literal(text),
        Value::Integer(value) => quote_literal(&value.to_string()),
        Value::Real(value) => quote_literal(&value.to_string()),
        Value::Boolean(value) => quote_literal(&value.to_string()),
    }
}

use serde::{Deserialize, Serialize};

use crate::errors;
use crate::mv::naming::generate_session_id;
use crate::FilterMateError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterEngineConfig {
    /// Highest source feature count still embedded as a WKT literal.
    pub simple_mode_max_features: u64,
    pub simple_mode_max_wkt_len: usize,
    /// WKT size in bytes above which Spatialite sources are simplified first.
    pub spatialite_simplify_threshold: usize,
    /// Source feature count above which dynamic buffers are precomputed once.
    pub dynamic_buffer_mv_threshold: u64,
    pub chain_mv_max_features: u64,
    pub enable_filter_chain_mv: bool,
    pub complex_query_timeout_ms: u64,
    pub buffer_segments: u32,
    pub temp_schema: String,
    pub session_id: String,
}

impl Default for FilterEngineConfig {
    fn default() -> Self {
        Self {
            simple_mode_max_features: 100,
            simple_mode_max_wkt_len: 100_000,
            spatialite_simplify_threshold: 100_000,
            dynamic_buffer_mv_threshold: 10_000,
            chain_mv_max_features: 100_000,
            enable_filter_chain_mv: false,
            complex_query_timeout_ms: 120_000,
            buffer_segments: 5,
            temp_schema: "filtermate_temp".to_string(),
            session_id: generate_session_id(),
        }
    }
}

impl FilterEngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, FilterMateError> {
        serde_json::from_str(json).map_err(|error| {
            errors::invalid_request_error(&format!("invalid engine configuration: {error}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::FilterEngineConfig;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = FilterEngineConfig::from_json_str(
            r#"{"enable_filter_chain_mv": true, "session_id": "abcd1234"}"#,
        )
        .expect("config should parse");
        assert!(config.enable_filter_chain_mv);
        assert_eq!(config.session_id, "abcd1234");
        assert_eq!(config.simple_mode_max_features, 100);
        assert_eq!(config.temp_schema, "filtermate_temp");
        assert_eq!(config.complex_query_timeout_ms, 120_000);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = FilterEngineConfig::from_json_str("{ nope").expect_err("should fail");
        assert_eq!(err.code, "FILTERMATE_ERROR_INVALID_REQUEST");
    }

    #[test]
    fn default_session_ids_differ() {
        let a = FilterEngineConfig::default();
        let b = FilterEngineConfig::default();
        assert_eq!(a.session_id.len(), 8);
        assert_ne!(a.session_id, b.session_id);
    }
}

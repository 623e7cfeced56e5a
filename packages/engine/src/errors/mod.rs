use crate::FilterMateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    MissingLayerProperty,
    InvalidRequest,
    Database,
    InvalidParameters,
    Processing,
    Canceled,
    History,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingLayerProperty => "FILTERMATE_ERROR_MISSING_LAYER_PROPERTY",
            Self::InvalidRequest => "FILTERMATE_ERROR_INVALID_REQUEST",
            Self::Database => "FILTERMATE_ERROR_DATABASE",
            Self::InvalidParameters => "FILTERMATE_ERROR_INVALID_PARAMETERS",
            Self::Processing => "FILTERMATE_ERROR_PROCESSING",
            Self::Canceled => "FILTERMATE_ERROR_CANCELED",
            Self::History => "FILTERMATE_ERROR_HISTORY",
        }
    }

    pub const fn all() -> &'static [Self] {
        &[
            Self::MissingLayerProperty,
            Self::InvalidRequest,
            Self::Database,
            Self::InvalidParameters,
            Self::Processing,
            Self::Canceled,
            Self::History,
        ]
    }
}

fn build_error(code: ErrorCode, title: &str, description: &str) -> FilterMateError {
    FilterMateError::new(code.as_str(), title, description)
}

pub(crate) fn missing_layer_property_error(layer_id: &str, property: &str) -> FilterMateError {
    build_error(
        ErrorCode::MissingLayerProperty,
        "Layer property missing",
        &format!("layer `{layer_id}` has no `{property}`; the filter cannot be built without it"),
    )
}

pub(crate) fn invalid_request_error(description: &str) -> FilterMateError {
    build_error(ErrorCode::InvalidRequest, "Invalid filter request", description)
}

pub fn database_error(context: &str, cause: impl std::fmt::Display) -> FilterMateError {
    build_error(
        ErrorCode::Database,
        "Database command failed",
        &format!("{context}: {cause}"),
    )
}

pub(crate) fn invalid_parameters_error(cause: impl std::fmt::Display) -> FilterMateError {
    build_error(
        ErrorCode::InvalidParameters,
        "Invalid processing parameters",
        &format!("expression is not a selectbylocation parameter bag: {cause}"),
    )
}

pub fn processing_error(algorithm: &str, cause: impl std::fmt::Display) -> FilterMateError {
    build_error(
        ErrorCode::Processing,
        "Processing algorithm failed",
        &format!("`{algorithm}` failed: {cause}"),
    )
}

pub(crate) fn canceled_error(algorithm: &str) -> FilterMateError {
    build_error(
        ErrorCode::Canceled,
        "Operation canceled",
        &format!("`{algorithm}` was canceled before it produced a selection"),
    )
}

pub(crate) fn history_error(description: &str) -> FilterMateError {
    build_error(ErrorCode::History, "Subset history unavailable", description)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterMateError {
    pub code: String,
    pub title: String,
    pub description: String,
}

impl FilterMateError {
    pub fn new(
        code: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn unknown(description: impl Into<String>) -> Self {
        Self::new("FILTERMATE_ERROR_UNKNOWN", "Unknown error", description)
    }
}

impl std::fmt::Display for FilterMateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title, self.description)
    }
}

impl std::error::Error for FilterMateError {}

use thiserror::Error;

/// Row store errors. The `Display` text is what callers see in the
/// `message` field of the error envelope.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Missing request body")]
    MissingBody,
    #[error("ID required")]
    MissingIdentifier,
    #[error("Employee with ID {0} not found")]
    NotFound(String),
    #[error("{0}")]
    InvalidReference(String),
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("{0}")]
    Validation(String),
    #[error("header of table '{table}' does not match schema (expected {expected} columns, found {found})")]
    SchemaMismatch {
        table: String,
        expected: usize,
        found: usize,
    },
    #[error("backend error: {0}")]
    Backend(String),
    #[error("Server Error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(id: &str) -> Self { Self::NotFound(id.to_string()) }

    /// The next id would not fit in a `u64`.
    pub fn id_space_exhausted() -> Self { Self::Validation("id space exhausted".into()) }

    /// Stable short code used for metrics labels and logs
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::MissingBody => "missing_body",
            StoreError::MissingIdentifier => "missing_identifier",
            StoreError::NotFound(_) => "not_found",
            StoreError::InvalidReference(_) => "invalid_reference",
            StoreError::UnsupportedMethod(_) => "unsupported_method",
            StoreError::Validation(_) => "validation",
            StoreError::SchemaMismatch { .. } => "schema_mismatch",
            StoreError::Backend(_) => "backend",
            StoreError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self { StoreError::Internal(e.to_string()) }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self { StoreError::Backend(e.to_string()) }
}

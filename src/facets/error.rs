//! Error types for facet operations

use crate::error::AppError;

/// Result type for facet operations
pub type FacetResult<T> = std::result::Result<T, FacetError>;

/// Errors that can occur while encoding, indexing or querying facets
#[derive(Debug, thiserror::Error)]
pub enum FacetError {
    /// A field or value cannot be represented as a token
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The query exceeded its deadline
    #[error("Query timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The caller cancelled the query
    #[error("Query cancelled")]
    Cancelled,

    /// Lookup by record ID found nothing
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The query is well-formed JSON but not acceptable
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Index initialization failed
    #[error("Index initialization failed: {0}")]
    IndexInitFailed(String),

    /// Writing to the index failed
    #[error("Indexing failed: {0}")]
    IndexingFailed(String),

    /// Query execution failed
    #[error("Search execution failed: {0}")]
    SearchFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Tantivy error
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),
}

impl FacetError {
    /// Whether the error was caused by the query budget running out
    pub fn is_timeout(&self) -> bool {
        matches!(self, FacetError::Timeout { .. })
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            FacetError::Encoding(_) => "encoding",
            FacetError::Timeout { .. } => "timeout",
            FacetError::Cancelled => "cancelled",
            FacetError::NotFound(_) => "not_found",
            FacetError::InvalidQuery(_) => "invalid_query",
            FacetError::IndexInitFailed(_) => "index_init",
            FacetError::IndexingFailed(_) => "indexing",
            FacetError::SearchFailed(_) => "search",
            FacetError::InvalidConfiguration(_) => "configuration",
            FacetError::Io(_) => "io",
            FacetError::Tantivy(_) => "tantivy",
        }
    }
}

impl From<FacetError> for AppError {
    fn from(err: FacetError) -> Self {
        match err {
            FacetError::Encoding(msg) => AppError::Validation(msg),
            FacetError::InvalidQuery(msg) => AppError::Validation(msg),
            FacetError::NotFound(msg) => AppError::NotFound(msg),
            FacetError::Timeout { elapsed_ms } => {
                AppError::Timeout(format!("facet query exceeded deadline after {}ms", elapsed_ms))
            }
            FacetError::Cancelled => AppError::Timeout("facet query cancelled".to_string()),
            FacetError::InvalidConfiguration(msg) => AppError::Configuration(msg),
            FacetError::Io(err) => AppError::Io(err),
            other => AppError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_error_mapping_to_app_error() {
        let app: AppError = FacetError::Encoding("bad".into()).into();
        assert_eq!(app.status_code(), StatusCode::BAD_REQUEST);

        let app: AppError = FacetError::Timeout { elapsed_ms: 10 }.into();
        assert_eq!(app.status_code(), StatusCode::REQUEST_TIMEOUT);

        let app: AppError = FacetError::NotFound("x".into()).into();
        assert_eq!(app.status_code(), StatusCode::NOT_FOUND);

        let app: AppError =
            FacetError::from(tantivy::TantivyError::SystemError("boom".into())).into();
        assert_eq!(app.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad column");
        let app: AppError = FacetError::from(io).into();
        assert_eq!(app.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(FacetError::Cancelled.kind(), "cancelled");
        assert!(FacetError::Timeout { elapsed_ms: 1 }.is_timeout());
        assert!(!FacetError::Cancelled.is_timeout());
    }
}

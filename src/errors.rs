//! Centralised error taxonomy for the retrieval and grounding core.
//!
//! Every failure mode recognised by the core maps to one variant here,
//! following the component boundaries the system is organised around:
//! connectors/ingestion, normalisation, embedding, storage, search, and the
//! query-facing API. Each error knows whether it is recoverable, which
//! lets the ingestion orchestrator and the embedder/generator adapters
//! decide retry vs. terminal failure without re-deriving that policy at
//! every call site.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Comprehensive error type for the legal RAG core.
#[derive(Debug, Error)]
pub enum CoreError {
    // -- generic / system --------------------------------------------------
    #[error("I/O error: {0}")]
    Io(std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Validation failed for field '{field}': {reason}")]
    ValidationFailed { field: String, reason: String },

    #[error("Operation cancelled at stage '{stage}'")]
    Cancelled { stage: String },

    #[error("Timeout at stage '{stage}' after {elapsed_ms}ms")]
    Timeout { stage: String, elapsed_ms: u64 },

    // -- connectors / fetch (spec §4.2, §7) ---------------------------------
    #[error("Fetch failed for {url}: {details}")]
    FetchError {
        url: String,
        details: String,
        permanent: bool,
    },

    #[error("Rate limit exceeded for host '{host}'")]
    RateLimitExceeded {
        host: String,
        retry_after_seconds: Option<u64>,
    },

    // -- normalisation / parsing (spec §4.3, §7) ----------------------------
    #[error("Parse error for source '{official_id}': {details}")]
    ParseError {
        official_id: String,
        details: String,
    },

    #[error("Document has neither structure nor text: source '{official_id}'")]
    EmptyDocument { official_id: String },

    #[error("Unsupported text encoding: {encoding}")]
    UnsupportedEncoding { encoding: String },

    // -- embedding (spec §4.4, §7) -------------------------------------------
    #[error("Embedding failed: {reason}")]
    EmbeddingError { reason: String, transient: bool },

    #[error("Embedder returned vector of dimension {actual}, expected {expected}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    // -- store (spec §4.1, §7) ------------------------------------------------
    #[error("Store error: {message}")]
    StoreError { message: String, transient: bool },

    #[error("Database connection failed: {db_path} - {reason}")]
    DatabaseConnectionFailed { db_path: String, reason: String },

    #[error("Duplicate official_id: {official_id}")]
    DuplicateOfficialId { official_id: String },

    #[error("Serialization failed: {message}")]
    SerializationFailed { message: String },

    // -- search / retrieval (spec §4.6, §7) -----------------------------------
    #[error("Retrieval failed: {message}")]
    RetrievalError { message: String },

    #[error("Invalid search query: {query} - {reason}")]
    InvalidSearchQuery { query: String, reason: String },

    // -- generation (spec §4.8, §7) --------------------------------------------
    #[error("Generation failed: {reason}")]
    GenerationError { reason: String },

    // -- API / query-path validation (spec §6, §7) -----------------------------
    #[error("Query too short: {len} characters, minimum {min}")]
    QueryTooShort { len: usize, min: usize },

    #[error("Query too long: {len} characters, maximum {max}")]
    QueryTooLong { len: usize, max: usize },

    #[error("Validation error: {message}")]
    ApiValidationError { message: String },

    // -- conversions ------------------------------------------------------------
    #[error("HTTP client error: {0}")]
    Http(reqwest::Error),

    #[error("JSON error: {0}")]
    Json(serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(toml::de::Error),

    #[error("Database error: {0}")]
    Database(sled::Error),

    #[error("Binary serialization error: {0}")]
    Bincode(bincode::Error),
}

impl CoreError {
    /// Whether the orchestrator should retry this failure.
    ///
    /// Mirrors spec §7: transient network/provider/store failures retry;
    /// 4xx (non-429), `EmptyDocument`, and exhausted embeddings are terminal.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CoreError::FetchError { permanent, .. } => !permanent,
            CoreError::RateLimitExceeded { .. } => true,
            CoreError::EmbeddingError { transient, .. } => *transient,
            CoreError::StoreError { transient, .. } => *transient,
            CoreError::DatabaseConnectionFailed { .. } => true,
            CoreError::Timeout { .. } => true,
            CoreError::ParseError { .. }
            | CoreError::EmptyDocument { .. }
            | CoreError::EmbeddingDimensionMismatch { .. }
            | CoreError::DuplicateOfficialId { .. }
            | CoreError::Cancelled { .. } => false,
            _ => false,
        }
    }

    /// Error category for metrics and structured log fields.
    pub fn category(&self) -> &'static str {
        match self {
            CoreError::Config { .. } => "configuration",
            CoreError::FetchError { .. } | CoreError::RateLimitExceeded { .. } => "ingestion",
            CoreError::ParseError { .. }
            | CoreError::EmptyDocument { .. }
            | CoreError::UnsupportedEncoding { .. } => "normalise",
            CoreError::EmbeddingError { .. } | CoreError::EmbeddingDimensionMismatch { .. } => {
                "embed"
            }
            CoreError::StoreError { .. }
            | CoreError::DatabaseConnectionFailed { .. }
            | CoreError::DuplicateOfficialId { .. }
            | CoreError::SerializationFailed { .. }
            | CoreError::Database(_)
            | CoreError::Bincode(_) => "store",
            CoreError::RetrievalError { .. } | CoreError::InvalidSearchQuery { .. } => "search",
            CoreError::GenerationError { .. } => "generate",
            CoreError::QueryTooShort { .. }
            | CoreError::QueryTooLong { .. }
            | CoreError::ApiValidationError { .. } => "api",
            CoreError::Timeout { .. } | CoreError::Cancelled { .. } => "lifecycle",
            CoreError::Io(_) | CoreError::Http(_) | CoreError::Json(_) | CoreError::Toml(_) => {
                "system"
            }
            CoreError::Internal { .. } | CoreError::ValidationFailed { .. } => "generic",
        }
    }

    /// Suggested recovery action, where one exists.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            CoreError::RateLimitExceeded { .. } => Some("Wait and retry after the specified time"),
            CoreError::FetchError { permanent: false, .. } => {
                Some("Retry with exponential backoff")
            }
            CoreError::EmbeddingError { transient: true, .. } => {
                Some("Retry with exponential backoff")
            }
            CoreError::StoreError { transient: true, .. } => Some("Retry the transaction"),
            CoreError::Timeout { .. } => Some("Increase the deadline or simplify the request"),
            _ => None,
        }
    }

    /// The HTTP error code exposed at the service boundary (spec §6), if any.
    pub fn api_error_code(&self) -> Option<&'static str> {
        match self {
            CoreError::QueryTooShort { .. } => Some("QUERY_TOO_SHORT"),
            CoreError::QueryTooLong { .. } => Some("QUERY_TOO_LONG"),
            CoreError::ApiValidationError { .. } | CoreError::ValidationFailed { .. } => {
                Some("VALIDATION_ERROR")
            }
            CoreError::RateLimitExceeded { .. } => Some("RATE_LIMIT_EXCEEDED"),
            CoreError::RetrievalError { .. } | CoreError::Internal { .. } => {
                Some("INTERNAL_ERROR")
            }
            _ => None,
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Json(err)
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::Http(err)
    }
}

impl From<bincode::Error> for CoreError {
    fn from(err: bincode::Error) -> Self {
        CoreError::Bincode(err)
    }
}

impl From<sled::Error> for CoreError {
    fn from(err: sled::Error) -> Self {
        CoreError::Database(err)
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(err: toml::de::Error) -> Self {
        CoreError::Toml(err)
    }
}

/// Builds a `CoreError::Internal` with a formatted message.
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::errors::CoreError::Internal {
            message: $msg.to_string(),
        }
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::errors::CoreError::Internal {
            message: format!($fmt, $($arg)*),
        }
    };
}

/// Builds a `CoreError::ValidationFailed` for a named field.
#[macro_export]
macro_rules! validation_error {
    ($field:expr, $reason:expr) => {
        $crate::errors::CoreError::ValidationFailed {
            field: $field.to_string(),
            reason: $reason.to_string(),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_recoverable_unless_permanent() {
        let transient = CoreError::FetchError {
            url: "https://boe.es".into(),
            details: "timeout".into(),
            permanent: false,
        };
        assert!(transient.is_recoverable());

        let permanent = CoreError::FetchError {
            url: "https://boe.es".into(),
            details: "404".into(),
            permanent: true,
        };
        assert!(!permanent.is_recoverable());
    }

    #[test]
    fn empty_document_is_terminal() {
        let err = CoreError::EmptyDocument {
            official_id: "BOE-A-1978-31229".into(),
        };
        assert!(!err.is_recoverable());
        assert_eq!(err.category(), "normalise");
    }

    #[test]
    fn api_error_codes_match_spec_taxonomy() {
        assert_eq!(
            CoreError::QueryTooShort { len: 5, min: 10 }.api_error_code(),
            Some("QUERY_TOO_SHORT")
        );
        assert_eq!(
            CoreError::QueryTooLong { len: 600, max: 500 }.api_error_code(),
            Some("QUERY_TOO_LONG")
        );
    }
}

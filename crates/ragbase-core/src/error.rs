//! Error taxonomy shared by every ragbase component.
//!
//! Each variant corresponds to one failure kind callers are expected to
//! distinguish: configuration and input validation, registry conflicts,
//! transient external-service failures, fatal data errors, and storage
//! backend failures. [`RagError::code`] gives a stable machine-readable
//! identifier used by the HTTP layer and in structured logs.

use thiserror::Error;

/// Result alias used throughout the core and app crates.
pub type Result<T, E = RagError> = std::result::Result<T, E>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RagError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("knowledge base already exists: {0}")]
    AlreadyExists(String),

    #[error("knowledge base not found: {0}")]
    KnowledgeBaseNotFound(String),

    #[error("file not found: {kb}/{filename}")]
    FileNotFound { kb: String, filename: String },

    #[error("file changed while indexing: {kb}/{filename}")]
    FileChanged { kb: String, filename: String },

    #[error("{service} unavailable: {message}")]
    ServiceUnavailable { service: String, message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("partial deletion of knowledge base {kb}: {message}")]
    PartialDeletionFailure { kb: String, message: String },

    #[error("{service} error: {message}")]
    Upstream { service: String, message: String },

    #[error("document store error: {0}")]
    DocumentStore(String),

    #[error("vector index error: {0}")]
    VectorIndex(String),
}

impl RagError {
    pub fn unavailable(service: impl Into<String>, message: impl ToString) -> Self {
        RagError::ServiceUnavailable {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn upstream(service: impl Into<String>, message: impl ToString) -> Self {
        RagError::Upstream {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// True for transient failures that may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::ServiceUnavailable { .. }
                | RagError::Timeout { .. }
                | RagError::FileChanged { .. }
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            RagError::InvalidConfiguration(_) => "invalid_configuration",
            RagError::InvalidInput(_) => "invalid_input",
            RagError::AlreadyExists(_) => "already_exists",
            RagError::KnowledgeBaseNotFound(_) => "knowledge_base_not_found",
            RagError::FileNotFound { .. } => "file_not_found",
            RagError::FileChanged { .. } => "file_changed",
            RagError::ServiceUnavailable { .. } => "service_unavailable",
            RagError::Timeout { .. } => "timeout",
            RagError::DimensionMismatch { .. } => "dimension_mismatch",
            RagError::PartialDeletionFailure { .. } => "partial_deletion_failure",
            RagError::Upstream { .. } => "upstream_error",
            RagError::DocumentStore(_) => "document_store_error",
            RagError::VectorIndex(_) => "vector_index_error",
        }
    }
}

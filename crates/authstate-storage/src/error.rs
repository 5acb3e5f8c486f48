//! Storage error types.

use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No document matched a query that required one.
    #[error("no matching document in {namespace}")]
    NoMatchingDocument { namespace: String },

    /// A write would violate a unique index.
    #[error("duplicate key in {namespace}: {key}")]
    DuplicateKey { namespace: String, key: String },

    /// Collection does not exist.
    #[error("namespace not found: {namespace}")]
    NamespaceNotFound { namespace: String },

    /// Collection already exists.
    #[error("namespace already exists: {namespace}")]
    NamespaceExists { namespace: String },

    /// Malformed namespace string or component.
    #[error("invalid namespace: {value}")]
    InvalidNamespace { value: String },

    /// Malformed query or projection document.
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },

    /// Malformed update document.
    #[error("invalid update: {message}")]
    InvalidUpdate { message: String },

    /// The requested write concern cannot be satisfied.
    #[error("write concern failed: {message}")]
    WriteConcernFailed { message: String },

    /// The backend cannot be reached.
    #[error("store unreachable: {message}")]
    Unreachable { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

impl StorageError {
    /// Returns true for not-found conditions that callers usually handle as absence.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::NoMatchingDocument { .. } | StorageError::NamespaceNotFound { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

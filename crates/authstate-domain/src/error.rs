//! Domain error types for principal resolution.

use thiserror::Error;

/// Boxed error from the store underneath a reader, passed through unchanged.
pub type BoxedStoreError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Domain-specific errors for principal reads and role resolution.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No stored document for the user.
    #[error("could not find user {user}")]
    UserNotFound { user: String },

    /// No stored document (and no built-in definition) for the role.
    #[error("could not find role {role}")]
    RoleNotFound { role: String },

    /// A stored principal document does not have the expected shape.
    #[error("invalid document for {principal}: {message}")]
    InvalidPrincipalDocument { principal: String, message: String },

    /// Malformed user or role name.
    #[error("invalid principal name: {value}")]
    InvalidName { value: String },

    /// Authorization schema version this layer does not understand.
    #[error("unsupported authorization schema version {version}")]
    UnsupportedSchemaVersion { version: i64 },

    /// Resolution expanded more roles than allowed.
    #[error("role graph too large: more than {max_roles} roles reachable")]
    RoleGraphTooLarge { max_roles: usize },

    /// Resolution exceeded its deadline; partial results were discarded.
    #[error("timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Failure reported by the underlying store.
    #[error("storage error: {0}")]
    Storage(#[source] BoxedStoreError),
}

impl DomainError {
    /// True for `UserNotFound` and `RoleNotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DomainError::UserNotFound { .. } | DomainError::RoleNotFound { .. }
        )
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

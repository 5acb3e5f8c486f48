//! Errors surfaced to the authorization manager.

use authstate_domain::DomainError;
use authstate_storage::StorageError;
use thiserror::Error;

/// Errors from the external state facade.
#[derive(Debug, Error)]
pub enum ExternalStateError {
    /// Failure reported by the document store.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Not-found, malformed-document and resolution failures.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Another writer holds the update lock for this tenant.
    #[error("authorization update lock for tenant {tenant} is held by another writer")]
    LockBusy { tenant: String },

    /// A user document with the same name already exists.
    #[error("user {user} already exists")]
    DuplicateUser { user: String },
}

impl ExternalStateError {
    /// True when the error means the requested principal or document does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            ExternalStateError::Storage(e) => e.is_not_found(),
            ExternalStateError::Domain(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Result type for external state operations.
pub type ExternalStateResult<T> = Result<T, ExternalStateError>;

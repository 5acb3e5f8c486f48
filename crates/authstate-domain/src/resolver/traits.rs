//! Reader trait the resolver and assembler fetch principal documents through.

use async_trait::async_trait;

use crate::error::{DomainError, DomainResult};
use crate::model::{PrincipalQuery, RawDocument, RoleName, SchemaVersion, UserName};

/// Retrieves raw stored principal documents.
///
/// Implementations only answer [`PrincipalQuery`]s; the query shape for a given principal and
/// schema version is decided here, not by the store.
#[async_trait]
pub trait PrincipalDocumentReader: Send + Sync {
    /// Returns the first document matching `query`, or `None`.
    ///
    /// Store failures map to [`DomainError::Storage`] and are never turned into `None`.
    async fn find_principal(&self, query: &PrincipalQuery) -> DomainResult<Option<RawDocument>>;

    /// Reads a user's credential document in the given layout.
    async fn read_user_document(
        &self,
        user: &UserName,
        version: SchemaVersion,
    ) -> DomainResult<RawDocument> {
        self.find_principal(&PrincipalQuery::for_user(user, version))
            .await?
            .ok_or_else(|| DomainError::UserNotFound {
                user: user.to_string(),
            })
    }

    /// Reads a stored role document.
    async fn read_role_document(&self, role: &RoleName) -> DomainResult<RawDocument> {
        self.find_principal(&PrincipalQuery::for_role(role))
            .await?
            .ok_or_else(|| DomainError::RoleNotFound {
                role: role.to_string(),
            })
    }
}

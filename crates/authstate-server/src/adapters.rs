//! Adapter that bridges the storage layer to the domain layer.
//!
//! The domain crate reads principal documents through `PrincipalDocumentReader`; this module
//! implements it over any `DocumentStore`.

use std::sync::Arc;

use async_trait::async_trait;

use authstate_domain::error::{DomainError, DomainResult};
use authstate_domain::model::{PrincipalQuery, RawDocument};
use authstate_domain::resolver::PrincipalDocumentReader;
use authstate_storage::{DocumentStore, Namespace};

/// Adapter that implements `PrincipalDocumentReader` using a `DocumentStore`.
pub struct StorePrincipalReader<S: ?Sized> {
    store: Arc<S>,
}

impl<S: DocumentStore + ?Sized> StorePrincipalReader<S> {
    /// Creates a new adapter wrapping the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DocumentStore + ?Sized> PrincipalDocumentReader for StorePrincipalReader<S> {
    async fn find_principal(&self, query: &PrincipalQuery) -> DomainResult<Option<RawDocument>> {
        let namespace = Namespace::new(query.db.as_str(), query.collection.as_str());
        match self.store.find_one(&namespace, &query.filter).await {
            Ok(document) => Ok(Some(document)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(DomainError::Storage(Box::new(e))),
        }
    }
}

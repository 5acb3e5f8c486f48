//! Authorization update lock.
//!
//! Serializes writers to the authorization collections of one tenant. Acquisition never waits:
//! a busy lock reports `false` and the caller decides whether to retry. Readers never take it.
//!
//! Two strategies exist:
//!
//! - [`LocalUpdateLock`] keeps holders in process memory (storage tier).
//! - [`StoreUpdateLock`] records the holder as a document in `config.locks` so that every router
//!   sharing the store contends on the same lock (router tier).
//!
//! Releasing a lock that is not held is a lock-discipline bug and panics.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use authstate_storage::{Document, DocumentStore, Namespace, StorageError, WriteConcern};

use crate::error::ExternalStateResult;

/// Database holding the router-tier lock collection.
pub const LOCKS_DB: &str = "config";
/// Collection holding router-tier lock documents.
pub const LOCKS_COLLECTION: &str = "locks";

/// `_id` of the lock document for `tenant`.
pub fn lock_document_id(tenant: &str) -> String {
    format!("authzUpdate/{tenant}")
}

/// Non-blocking per-tenant writer lock.
#[async_trait]
pub trait UpdateLock: Send + Sync {
    /// Takes the lock for `tenant` if nobody holds it. Returns `false` when it is busy.
    async fn try_acquire(&self, tenant: &str, reason: &str) -> ExternalStateResult<bool>;

    /// Releases the lock for `tenant`.
    ///
    /// # Panics
    ///
    /// Panics when the lock is not held by this instance.
    async fn release(&self, tenant: &str) -> ExternalStateResult<()>;
}

#[derive(Debug, Clone)]
struct LockHolder {
    reason: String,
    acquired_at: DateTime<Utc>,
}

/// In-process update lock.
#[derive(Debug, Default)]
pub struct LocalUpdateLock {
    holders: DashMap<String, LockHolder>,
}

impl LocalUpdateLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reason given by the current holder of `tenant`'s lock.
    pub fn holder_reason(&self, tenant: &str) -> Option<String> {
        self.holders.get(tenant).map(|h| h.reason.clone())
    }

    pub fn is_held(&self, tenant: &str) -> bool {
        self.holders.contains_key(tenant)
    }
}

#[async_trait]
impl UpdateLock for LocalUpdateLock {
    async fn try_acquire(&self, tenant: &str, reason: &str) -> ExternalStateResult<bool> {
        match self.holders.entry(tenant.to_string()) {
            Entry::Occupied(entry) => {
                debug!(
                    tenant,
                    reason,
                    held_for = %entry.get().reason,
                    "authorization update lock busy"
                );
                metrics::counter!("authstate_update_lock_busy_total").increment(1);
                Ok(false)
            }
            Entry::Vacant(entry) => {
                entry.insert(LockHolder {
                    reason: reason.to_string(),
                    acquired_at: Utc::now(),
                });
                debug!(tenant, reason, "authorization update lock acquired");
                Ok(true)
            }
        }
    }

    async fn release(&self, tenant: &str) -> ExternalStateResult<()> {
        match self.holders.remove(tenant) {
            Some((_, holder)) => {
                let held_ms = (Utc::now() - holder.acquired_at).num_milliseconds();
                debug!(tenant, held_ms, "authorization update lock released");
                Ok(())
            }
            None => panic!(
                "released authorization update lock for tenant {tenant} that is not held"
            ),
        }
    }
}

/// Update lock recorded in the document store.
///
/// The lock for a tenant is the document `{_id: "authzUpdate/<tenant>", holder, why,
/// acquiredAt}` in `config.locks`. Acquisition is an insert, so the store's `_id` uniqueness
/// decides the winner.
pub struct StoreUpdateLock<S: ?Sized> {
    store: Arc<S>,
    holder: String,
    write_concern: WriteConcern,
}

impl<S: DocumentStore + ?Sized> StoreUpdateLock<S> {
    /// Creates a lock that identifies itself as `holder` in lock documents.
    pub fn new(store: Arc<S>, holder: impl Into<String>) -> Self {
        Self {
            store,
            holder: holder.into(),
            write_concern: WriteConcern::majority(),
        }
    }

    pub fn with_write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = write_concern;
        self
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn namespace() -> Namespace {
        Namespace::new(LOCKS_DB, LOCKS_COLLECTION)
    }

    fn document(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => Document::new(),
        }
    }
}

#[async_trait]
impl<S: DocumentStore + ?Sized> UpdateLock for StoreUpdateLock<S> {
    #[instrument(skip(self), fields(holder = %self.holder))]
    async fn try_acquire(&self, tenant: &str, reason: &str) -> ExternalStateResult<bool> {
        let lock = Self::document(json!({
            "_id": lock_document_id(tenant),
            "holder": self.holder,
            "why": reason,
            "acquiredAt": Utc::now().to_rfc3339(),
        }));
        match self
            .store
            .insert(&Self::namespace(), lock, &self.write_concern)
            .await
        {
            Ok(()) => {
                debug!("authorization update lock acquired");
                Ok(true)
            }
            Err(StorageError::DuplicateKey { .. }) => {
                debug!("authorization update lock busy");
                metrics::counter!("authstate_update_lock_busy_total").increment(1);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(holder = %self.holder))]
    async fn release(&self, tenant: &str) -> ExternalStateResult<()> {
        let query = Self::document(json!({
            "_id": lock_document_id(tenant),
            "holder": self.holder,
        }));
        let removed = self
            .store
            .remove(&Self::namespace(), &query, &self.write_concern)
            .await?;
        if removed == 0 {
            panic!(
                "released authorization update lock for tenant {tenant} that is not held by {}",
                self.holder
            );
        }
        debug!("authorization update lock released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authstate_storage::MemoryDocumentStore;

    #[tokio::test]
    async fn test_local_lock_is_exclusive_per_tenant() {
        let lock = LocalUpdateLock::new();

        assert!(lock.try_acquire("t1", "createUser").await.unwrap());
        assert!(!lock.try_acquire("t1", "dropRole").await.unwrap());
        assert!(lock.try_acquire("t2", "createUser").await.unwrap());
        assert_eq!(lock.holder_reason("t1").as_deref(), Some("createUser"));

        lock.release("t1").await.unwrap();
        assert!(!lock.is_held("t1"));
        assert!(lock.try_acquire("t1", "dropRole").await.unwrap());
    }

    #[tokio::test]
    #[should_panic(expected = "not held")]
    async fn test_local_release_without_acquire_panics() {
        let lock = LocalUpdateLock::new();
        let _ = lock.release("t1").await;
    }

    #[tokio::test]
    async fn test_store_lock_contends_across_holders() {
        let store = MemoryDocumentStore::new_shared();
        let router_a = StoreUpdateLock::new(Arc::clone(&store), "router-a");
        let router_b = StoreUpdateLock::new(Arc::clone(&store), "router-b");

        assert!(router_a.try_acquire("t1", "grantRole").await.unwrap());
        assert!(!router_b.try_acquire("t1", "grantRole").await.unwrap());

        let lock_doc = store
            .find_one(
                &Namespace::new(LOCKS_DB, LOCKS_COLLECTION),
                &StoreUpdateLock::<MemoryDocumentStore>::document(json!({"_id": "authzUpdate/t1"})),
            )
            .await
            .unwrap();
        assert_eq!(lock_doc["holder"], json!("router-a"));
        assert_eq!(lock_doc["why"], json!("grantRole"));

        router_a.release("t1").await.unwrap();
        assert!(router_b.try_acquire("t1", "grantRole").await.unwrap());
    }

    #[tokio::test]
    #[should_panic(expected = "not held")]
    async fn test_store_lock_release_by_other_holder_panics() {
        let store = MemoryDocumentStore::new_shared();
        let router_a = StoreUpdateLock::new(Arc::clone(&store), "router-a");
        let router_b = StoreUpdateLock::new(Arc::clone(&store), "router-b");

        assert!(router_a.try_acquire("t1", "grantRole").await.unwrap());
        let _ = router_b.release("t1").await;
    }

    #[tokio::test]
    async fn test_store_lock_surfaces_store_failures() {
        let store = MemoryDocumentStore::new_shared();
        store.set_reachable(false);
        let lock = StoreUpdateLock::new(store, "router-a");

        let result = lock.try_acquire("t1", "grantRole").await;

        assert!(matches!(
            result,
            Err(crate::error::ExternalStateError::Storage(StorageError::Unreachable { .. }))
        ));
    }
}

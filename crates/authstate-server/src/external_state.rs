//! External authorization state.
//!
//! [`ExternalState`] is everything the authorization manager needs from the outside world:
//! principal descriptions, privilege document reads and writes, generic access to the
//! authorization collections, and the update lock that serializes writers.
//!
//! [`AuthzExternalState`] implements it over a [`DocumentStore`]. The deployment topology picks
//! the lock strategy and whether writes are reported to an [`OpObserver`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};
use ulid::Ulid;

use authstate_domain::error::DomainError;
use authstate_domain::model::{
    PrincipalQuery, RoleName, SchemaVersion, UserName, ADMIN_DB, ROLES_COLLECTION,
    SCHEMA_VERSION_DOCUMENT_ID, USERS_COLLECTION, VERSION_COLLECTION,
};
use authstate_domain::resolver::{PrincipalDocumentReader, ResolverConfig};
use authstate_domain::DescriptionAssembler;
use authstate_storage::{Document, DocumentStore, Namespace, StorageError, WriteConcern};

use crate::adapters::StorePrincipalReader;
use crate::error::{ExternalStateError, ExternalStateResult};
use crate::lock::{LocalUpdateLock, StoreUpdateLock, UpdateLock};
use crate::observer::{OpEntry, OpKind, OpObserver};

/// Where this process sits in the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Data-bearing node: in-process lock, writes reported to the op observer.
    #[default]
    Storage,
    /// Routing node: lock recorded in the store, writes not observed locally.
    Router,
}

/// Authorization state operations consumed by the authorization manager.
#[async_trait]
pub trait ExternalState: Send + Sync {
    /// Ensures the unique indexes on the user and role collections exist.
    async fn initialize(&self) -> ExternalStateResult<()>;

    /// Schema version recorded in `admin.system.version`; `V1` when absent.
    async fn authorization_version(&self) -> ExternalStateResult<SchemaVersion>;

    /// Description document of a user, resolved under the current schema version.
    async fn describe_user(&self, user: &UserName) -> ExternalStateResult<Document>;

    /// Description document of a stored or built-in role.
    async fn describe_role(&self, role: &RoleName) -> ExternalStateResult<Document>;

    /// Raw stored document of a user in the given layout.
    async fn get_privilege_document(
        &self,
        user: &UserName,
        version: SchemaVersion,
    ) -> ExternalStateResult<Document>;

    /// True if any user document exists in either layout.
    async fn has_any_privilege_documents(&self) -> ExternalStateResult<bool>;

    /// Inserts a user document for `db` under the current layout.
    async fn insert_privilege_document(
        &self,
        db: &str,
        user_document: Document,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()>;

    /// Applies `update` to one user's document.
    async fn update_privilege_document(
        &self,
        user: &UserName,
        update: &Document,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()>;

    /// Removes matching user documents, returning how many were removed.
    async fn remove_privilege_documents(
        &self,
        query: &Document,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<u64>;

    async fn get_all_database_names(&self) -> ExternalStateResult<Vec<String>>;

    /// Every legacy user document stored in `db`.
    async fn get_all_v1_privilege_docs_for_db(&self, db: &str)
        -> ExternalStateResult<Vec<Document>>;

    async fn find_one(&self, namespace: &Namespace, query: &Document)
        -> ExternalStateResult<Document>;

    async fn query(
        &self,
        namespace: &Namespace,
        query: &Document,
        projection: Option<&Document>,
        visit: &mut (dyn FnMut(Document) + Send),
    ) -> ExternalStateResult<()>;

    async fn insert(
        &self,
        namespace: &Namespace,
        document: Document,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()>;

    async fn update_one(
        &self,
        namespace: &Namespace,
        query: &Document,
        update: &Document,
        upsert: bool,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()>;

    /// Returns the number of documents matched or upserted.
    async fn update(
        &self,
        namespace: &Namespace,
        query: &Document,
        update: &Document,
        upsert: bool,
        multi: bool,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<u64>;

    async fn remove(
        &self,
        namespace: &Namespace,
        query: &Document,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<u64>;

    async fn create_index(
        &self,
        namespace: &Namespace,
        keys: &Document,
        unique: bool,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()>;

    async fn drop_collection(
        &self,
        namespace: &Namespace,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()>;

    async fn rename_collection(
        &self,
        from: &Namespace,
        to: &Namespace,
        drop_target: bool,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()>;

    async fn copy_collection(
        &self,
        from: &Namespace,
        to: &Namespace,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()>;

    /// Takes the update lock for `tenant` without waiting.
    async fn try_acquire_update_lock(&self, tenant: &str, reason: &str)
        -> ExternalStateResult<bool>;

    /// Releases the update lock for `tenant`. Panics when it is not held.
    async fn release_update_lock(&self, tenant: &str) -> ExternalStateResult<()>;
}

/// Runs `op` while holding `tenant`'s update lock.
///
/// Returns [`ExternalStateError::LockBusy`] without running `op` when another writer holds the
/// lock. The lock is released however `op` finishes, including by panicking; the panic is
/// resumed after the release.
pub async fn with_update_lock<E, F, Fut, T>(
    state: &E,
    tenant: &str,
    reason: &str,
    op: F,
) -> ExternalStateResult<T>
where
    E: ExternalState + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = ExternalStateResult<T>>,
{
    if !state.try_acquire_update_lock(tenant, reason).await? {
        return Err(ExternalStateError::LockBusy {
            tenant: tenant.to_string(),
        });
    }

    let outcome = AssertUnwindSafe(op()).catch_unwind().await;
    let released = state.release_update_lock(tenant).await;

    match outcome {
        Ok(result) => {
            let value = result?;
            released?;
            Ok(value)
        }
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

fn users_namespace() -> Namespace {
    Namespace::new(ADMIN_DB, USERS_COLLECTION)
}

/// [`ExternalState`] over a document store.
pub struct AuthzExternalState<S: ?Sized> {
    store: Arc<S>,
    assembler: DescriptionAssembler<StorePrincipalReader<S>>,
    lock: Arc<dyn UpdateLock>,
    observer: Option<Arc<dyn OpObserver>>,
    topology: Topology,
}

impl<S: DocumentStore + ?Sized> AuthzExternalState<S> {
    /// Storage tier: in-process lock, every applied write reported to `observer`.
    pub fn for_storage_tier(store: Arc<S>, observer: Arc<dyn OpObserver>) -> Self {
        Self::assemble(
            store,
            Arc::new(LocalUpdateLock::new()),
            Some(observer),
            Topology::Storage,
        )
    }

    /// Router tier: lock recorded in the store under `process_id`, no local observation.
    pub fn for_router_tier(store: Arc<S>, process_id: impl Into<String>) -> Self {
        let lock = StoreUpdateLock::new(Arc::clone(&store), process_id);
        Self::assemble(store, Arc::new(lock), None, Topology::Router)
    }

    fn assemble(
        store: Arc<S>,
        lock: Arc<dyn UpdateLock>,
        observer: Option<Arc<dyn OpObserver>>,
        topology: Topology,
    ) -> Self {
        let reader = Arc::new(StorePrincipalReader::new(Arc::clone(&store)));
        Self {
            store,
            assembler: DescriptionAssembler::new(reader, ResolverConfig::default()),
            lock,
            observer,
            topology,
        }
    }

    /// Replaces the resolver limits used by descriptions.
    pub fn with_resolver_config(mut self, config: ResolverConfig) -> Self {
        let reader = Arc::clone(self.assembler.resolver().reader());
        self.assembler = DescriptionAssembler::new(reader, config);
        self
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Runs `op` under `tenant`'s update lock. See [`with_update_lock`].
    pub async fn with_update_lock<F, Fut, T>(
        &self,
        tenant: &str,
        reason: &str,
        op: F,
    ) -> ExternalStateResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ExternalStateResult<T>>,
    {
        with_update_lock(self, tenant, reason, op).await
    }

    fn observe(&self, entry: impl FnOnce() -> OpEntry) {
        if let Some(observer) = &self.observer {
            observer.on_op(&entry());
        }
    }

    async fn user_namespace_and_filter(
        &self,
        user: &UserName,
    ) -> ExternalStateResult<(Namespace, Document)> {
        let version = self.authorization_version().await?;
        let query = PrincipalQuery::for_user(user, version);
        Ok((Namespace::new(query.db, query.collection), query.filter))
    }
}

#[async_trait]
impl<S: DocumentStore + ?Sized> ExternalState for AuthzExternalState<S> {
    #[instrument(skip_all, fields(topology = ?self.topology))]
    async fn initialize(&self) -> ExternalStateResult<()> {
        let wc = WriteConcern::default();
        self.create_index(
            &users_namespace(),
            &document(serde_json::json!({"user": 1, "db": 1})),
            true,
            &wc,
        )
        .await?;
        self.create_index(
            &Namespace::new(ADMIN_DB, ROLES_COLLECTION),
            &document(serde_json::json!({"role": 1, "db": 1})),
            true,
            &wc,
        )
        .await?;
        info!("authorization collections initialized");
        Ok(())
    }

    async fn authorization_version(&self) -> ExternalStateResult<SchemaVersion> {
        let namespace = Namespace::new(ADMIN_DB, VERSION_COLLECTION);
        let query = document(serde_json::json!({"_id": SCHEMA_VERSION_DOCUMENT_ID}));
        let version_doc = match self.store.find_one(&namespace, &query).await {
            Ok(doc) => doc,
            Err(e) if e.is_not_found() => return Ok(SchemaVersion::V1),
            Err(e) => return Err(e.into()),
        };
        let number = version_doc
            .get("currentVersion")
            .and_then(Value::as_i64)
            .ok_or_else(|| DomainError::InvalidPrincipalDocument {
                principal: SCHEMA_VERSION_DOCUMENT_ID.to_string(),
                message: "\"currentVersion\" must be an integer".to_string(),
            })?;
        Ok(SchemaVersion::from_number(number)?)
    }

    #[instrument(skip_all, fields(user = %user))]
    async fn describe_user(&self, user: &UserName) -> ExternalStateResult<Document> {
        let version = self.authorization_version().await?;
        let description = self.assembler.describe_user(user, version).await?;
        Ok(description.to_document())
    }

    #[instrument(skip_all, fields(role = %role))]
    async fn describe_role(&self, role: &RoleName) -> ExternalStateResult<Document> {
        let description = self.assembler.describe_role(role).await?;
        Ok(description.to_document())
    }

    async fn get_privilege_document(
        &self,
        user: &UserName,
        version: SchemaVersion,
    ) -> ExternalStateResult<Document> {
        let reader = self.assembler.resolver().reader();
        Ok(reader.read_user_document(user, version).await?)
    }

    async fn has_any_privilege_documents(&self) -> ExternalStateResult<bool> {
        let everything = Document::new();
        match self.store.find_one(&users_namespace(), &everything).await {
            Ok(_) => return Ok(true),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        for db in self.store.list_databases().await? {
            let legacy = Namespace::new(db, USERS_COLLECTION);
            match self.store.find_one(&legacy, &everything).await {
                Ok(_) => return Ok(true),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    #[instrument(skip_all, fields(db = %db))]
    async fn insert_privilege_document(
        &self,
        db: &str,
        mut user_document: Document,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()> {
        let namespace = match self.authorization_version().await? {
            SchemaVersion::V1 => {
                let legacy = Namespace::new(db, USERS_COLLECTION);
                self.create_index(
                    &legacy,
                    &document(serde_json::json!({"user": 1, "userSource": 1})),
                    true,
                    write_concern,
                )
                .await?;
                legacy
            }
            SchemaVersion::V2 => {
                // Lookups match on {user, db}.
                if !user_document.contains_key("db") {
                    user_document.insert("db".to_string(), Value::from(db));
                }
                users_namespace()
            }
        };
        let user = UserName::new(
            user_document
                .get("user")
                .and_then(Value::as_str)
                .unwrap_or_default(),
            user_document
                .get("db")
                .and_then(Value::as_str)
                .unwrap_or(db),
        );
        match self.insert(&namespace, user_document, write_concern).await {
            Err(ExternalStateError::Storage(StorageError::DuplicateKey { .. })) => {
                Err(ExternalStateError::DuplicateUser {
                    user: user.to_string(),
                })
            }
            other => other,
        }
    }

    #[instrument(skip_all, fields(user = %user))]
    async fn update_privilege_document(
        &self,
        user: &UserName,
        update: &Document,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()> {
        let (namespace, filter) = self.user_namespace_and_filter(user).await?;
        match self
            .update_one(&namespace, &filter, update, false, write_concern)
            .await
        {
            Err(ExternalStateError::Storage(StorageError::NoMatchingDocument { .. })) => {
                Err(DomainError::UserNotFound {
                    user: user.to_string(),
                }
                .into())
            }
            other => other,
        }
    }

    async fn remove_privilege_documents(
        &self,
        query: &Document,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<u64> {
        self.remove(&users_namespace(), query, write_concern).await
    }

    async fn get_all_database_names(&self) -> ExternalStateResult<Vec<String>> {
        Ok(self.store.list_databases().await?)
    }

    async fn get_all_v1_privilege_docs_for_db(
        &self,
        db: &str,
    ) -> ExternalStateResult<Vec<Document>> {
        let mut documents = Vec::new();
        self.store
            .query(
                &Namespace::new(db, USERS_COLLECTION),
                &Document::new(),
                None,
                &mut |doc| documents.push(doc),
            )
            .await?;
        Ok(documents)
    }

    async fn find_one(
        &self,
        namespace: &Namespace,
        query: &Document,
    ) -> ExternalStateResult<Document> {
        Ok(self.store.find_one(namespace, query).await?)
    }

    async fn query(
        &self,
        namespace: &Namespace,
        query: &Document,
        projection: Option<&Document>,
        visit: &mut (dyn FnMut(Document) + Send),
    ) -> ExternalStateResult<()> {
        Ok(self.store.query(namespace, query, projection, visit).await?)
    }

    async fn insert(
        &self,
        namespace: &Namespace,
        mut document: Document,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()> {
        // Assigned here so observers see the stored id.
        if !document.contains_key("_id") {
            document.insert("_id".to_string(), Value::from(Ulid::new().to_string()));
        }
        let recorded = self.observer.as_ref().map(|_| document.clone());
        self.store.insert(namespace, document, write_concern).await?;
        self.observe(|| {
            let entry = OpEntry::new(OpKind::Insert, namespace);
            match recorded {
                Some(doc) => entry.with_document(doc),
                None => entry,
            }
        });
        Ok(())
    }

    async fn update_one(
        &self,
        namespace: &Namespace,
        query: &Document,
        update: &Document,
        upsert: bool,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()> {
        self.store
            .update_one(namespace, query, update, upsert, write_concern)
            .await?;
        self.observe(|| {
            OpEntry::new(OpKind::Update, namespace)
                .with_query(query)
                .with_document(update.clone())
                .with_count(1)
        });
        Ok(())
    }

    async fn update(
        &self,
        namespace: &Namespace,
        query: &Document,
        update: &Document,
        upsert: bool,
        multi: bool,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<u64> {
        let outcome = self
            .store
            .update(namespace, query, update, upsert, multi, write_concern)
            .await?;
        let count = outcome.count();
        if count > 0 {
            self.observe(|| {
                OpEntry::new(OpKind::Update, namespace)
                    .with_query(query)
                    .with_document(update.clone())
                    .with_count(count)
            });
        }
        Ok(count)
    }

    async fn remove(
        &self,
        namespace: &Namespace,
        query: &Document,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<u64> {
        let removed = self.store.remove(namespace, query, write_concern).await?;
        if removed > 0 {
            self.observe(|| {
                OpEntry::new(OpKind::Remove, namespace)
                    .with_query(query)
                    .with_count(removed)
            });
        }
        Ok(removed)
    }

    async fn create_index(
        &self,
        namespace: &Namespace,
        keys: &Document,
        unique: bool,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()> {
        self.store
            .create_index(namespace, keys, unique, write_concern)
            .await?;
        self.observe(|| OpEntry::new(OpKind::CreateIndex, namespace).with_document(keys.clone()));
        Ok(())
    }

    async fn drop_collection(
        &self,
        namespace: &Namespace,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()> {
        self.store.drop_collection(namespace, write_concern).await?;
        self.observe(|| OpEntry::new(OpKind::DropCollection, namespace));
        Ok(())
    }

    async fn rename_collection(
        &self,
        from: &Namespace,
        to: &Namespace,
        drop_target: bool,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()> {
        self.store
            .rename_collection(from, to, drop_target, write_concern)
            .await?;
        self.observe(|| OpEntry::new(OpKind::RenameCollection, from).with_target(to));
        Ok(())
    }

    async fn copy_collection(
        &self,
        from: &Namespace,
        to: &Namespace,
        write_concern: &WriteConcern,
    ) -> ExternalStateResult<()> {
        self.store.copy_collection(from, to, write_concern).await?;
        self.observe(|| OpEntry::new(OpKind::CopyCollection, from).with_target(to));
        Ok(())
    }

    async fn try_acquire_update_lock(
        &self,
        tenant: &str,
        reason: &str,
    ) -> ExternalStateResult<bool> {
        let acquired = self.lock.try_acquire(tenant, reason).await?;
        debug!(tenant, reason, acquired, "update lock acquisition attempted");
        Ok(acquired)
    }

    async fn release_update_lock(&self, tenant: &str) -> ExternalStateResult<()> {
        self.lock.release(tenant).await
    }
}

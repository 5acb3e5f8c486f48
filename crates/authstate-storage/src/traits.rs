//! DocumentStore trait definition.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{StorageError, StorageResult};

/// A schema-free stored document.
pub type Document = Map<String, Value>;

/// Two-part collection name: `(database, collection)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    db: String,
    collection: String,
}

impl Namespace {
    /// Creates a namespace from its parts.
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
        }
    }

    /// Parses `db.collection`. The collection part may itself contain dots.
    pub fn parse(value: &str) -> StorageResult<Self> {
        match value.split_once('.') {
            Some((db, collection)) if !db.is_empty() && !collection.is_empty() => {
                Ok(Self::new(db, collection))
            }
            _ => Err(StorageError::InvalidNamespace {
                value: value.to_string(),
            }),
        }
    }

    /// Checks that both parts are usable names.
    pub fn validate(&self) -> StorageResult<()> {
        let bad_db = self.db.is_empty() || self.db.contains(&['.', ' ', '/', '\\', '\0', '$'][..]);
        let bad_collection = self.collection.is_empty() || self.collection.contains('\0');
        if bad_db || bad_collection {
            return Err(StorageError::InvalidNamespace {
                value: self.to_string(),
            });
        }
        Ok(())
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// True for `system.*` collections.
    pub fn is_system(&self) -> bool {
        self.collection.starts_with("system.")
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}

/// How many nodes must acknowledge a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// A fixed number of nodes. `Nodes(0)` is unacknowledged.
    Nodes(u32),
    /// A majority of voting nodes.
    Majority,
}

/// Durability requirement attached to every write.
///
/// Opaque to the authorization layer; each backend decides whether it can honor it
/// and must do so before reporting success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteConcern {
    pub w: Acknowledgement,
    pub journal: bool,
    pub timeout: Option<Duration>,
}

impl Default for WriteConcern {
    fn default() -> Self {
        Self::acknowledged()
    }
}

impl WriteConcern {
    /// `w: 1`.
    pub fn acknowledged() -> Self {
        Self {
            w: Acknowledgement::Nodes(1),
            journal: false,
            timeout: None,
        }
    }

    /// `w: "majority"`, journaled.
    pub fn majority() -> Self {
        Self {
            w: Acknowledgement::Majority,
            journal: true,
            timeout: None,
        }
    }

    /// `w: n`.
    pub fn nodes(n: u32) -> Self {
        Self {
            w: Acknowledgement::Nodes(n),
            ..Self::acknowledged()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of a (possibly multi-document) update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Documents matched by the query.
    pub matched: u64,
    /// Documents whose content changed.
    pub modified: u64,
    /// `_id` of the inserted document when the update upserted.
    pub upserted_id: Option<Value>,
}

impl UpdateOutcome {
    /// Number of documents updated or inserted.
    pub fn count(&self) -> u64 {
        self.matched + u64::from(self.upserted_id.is_some())
    }
}

/// Abstract document storage for authorization collections.
///
/// Implementations must be thread-safe (Send + Sync) and must not retry internally:
/// an unreachable backend fails fast with [`StorageError::Unreachable`].
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Finds one document matching `query`.
    ///
    /// Returns [`StorageError::NoMatchingDocument`] when nothing matches.
    async fn find_one(&self, namespace: &Namespace, query: &Document) -> StorageResult<Document>;

    /// Calls `visit` once for every document matching `query`.
    ///
    /// Ordering is store-defined.
    async fn query(
        &self,
        namespace: &Namespace,
        query: &Document,
        projection: Option<&Document>,
        visit: &mut (dyn FnMut(Document) + Send),
    ) -> StorageResult<()>;

    /// Inserts a document, generating `_id` when absent.
    ///
    /// Returns [`StorageError::DuplicateKey`] on a unique-index violation.
    async fn insert(
        &self,
        namespace: &Namespace,
        document: Document,
        write_concern: &WriteConcern,
    ) -> StorageResult<()>;

    /// Updates documents matching `query`.
    ///
    /// With `upsert` and no match, inserts the query's equality fields merged with the
    /// update. With `multi` false, at most one document is touched.
    async fn update(
        &self,
        namespace: &Namespace,
        query: &Document,
        update: &Document,
        upsert: bool,
        multi: bool,
        write_concern: &WriteConcern,
    ) -> StorageResult<UpdateOutcome>;

    /// Updates a single document.
    ///
    /// Returns [`StorageError::NoMatchingDocument`] when `upsert` is false and nothing
    /// matches.
    async fn update_one(
        &self,
        namespace: &Namespace,
        query: &Document,
        update: &Document,
        upsert: bool,
        write_concern: &WriteConcern,
    ) -> StorageResult<()> {
        let outcome = self
            .update(namespace, query, update, upsert, false, write_concern)
            .await?;
        if outcome.count() == 0 {
            return Err(StorageError::NoMatchingDocument {
                namespace: namespace.to_string(),
            });
        }
        Ok(())
    }

    /// Removes all documents matching `query`, returning how many were removed.
    async fn remove(
        &self,
        namespace: &Namespace,
        query: &Document,
        write_concern: &WriteConcern,
    ) -> StorageResult<u64>;

    /// Creates an index over `keys`. Creating an identical index again is a no-op.
    async fn create_index(
        &self,
        namespace: &Namespace,
        keys: &Document,
        unique: bool,
        write_concern: &WriteConcern,
    ) -> StorageResult<()>;

    /// Drops a collection.
    async fn drop_collection(
        &self,
        namespace: &Namespace,
        write_concern: &WriteConcern,
    ) -> StorageResult<()>;

    /// Renames `from` to `to`, dropping an existing `to` only when `drop_target` is set.
    async fn rename_collection(
        &self,
        from: &Namespace,
        to: &Namespace,
        drop_target: bool,
        write_concern: &WriteConcern,
    ) -> StorageResult<()>;

    /// Copies documents and indexes of `from` into a new collection `to`.
    ///
    /// Fails with [`StorageError::NamespaceExists`] when `to` already exists.
    async fn copy_collection(
        &self,
        from: &Namespace,
        to: &Namespace,
        write_concern: &WriteConcern,
    ) -> StorageResult<()>;

    /// Names of databases holding at least one collection.
    async fn list_databases(&self) -> StorageResult<Vec<String>>;

    /// Collections of one database.
    async fn list_collections(&self, db: &str) -> StorageResult<Vec<Namespace>>;
}

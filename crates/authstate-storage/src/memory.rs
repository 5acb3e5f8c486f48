//! In-memory document store.
//!
//! Single-node reference backend used by tests and embedded deployments. Collections are
//! created implicitly on first write, as a real document database does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{debug, instrument};
use ulid::Ulid;

use crate::error::{StorageError, StorageResult};
use crate::query::{apply_update, lookup, matches, project, upsert_seed, values_equal};
use crate::traits::{
    Acknowledgement, Document, DocumentStore, Namespace, UpdateOutcome, WriteConcern,
};

/// Index definition kept per collection.
#[derive(Debug, Clone, PartialEq)]
struct IndexSpec {
    keys: Document,
    unique: bool,
}

impl IndexSpec {
    fn id_index() -> Self {
        let mut keys = Map::new();
        keys.insert("_id".to_string(), Value::from(1));
        Self { keys, unique: true }
    }

    /// Values of the indexed fields; a missing field indexes as `null`.
    fn key_of(&self, document: &Document) -> Vec<Value> {
        self.keys
            .keys()
            .map(|field| {
                lookup(document, field)
                    .first()
                    .map(|v| (*v).clone())
                    .unwrap_or(Value::Null)
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Collection {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl Default for Collection {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            indexes: vec![IndexSpec::id_index()],
        }
    }
}

impl Collection {
    /// Verifies `candidate` against every unique index, ignoring the document at `skip`.
    fn check_unique(
        &self,
        namespace: &Namespace,
        candidate: &Document,
        skip: Option<usize>,
    ) -> StorageResult<()> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let key = index.key_of(candidate);
            let clash = self
                .documents
                .iter()
                .enumerate()
                .filter(|(pos, _)| Some(*pos) != skip)
                .any(|(_, existing)| keys_equal(&index.key_of(existing), &key));
            if clash {
                return Err(StorageError::DuplicateKey {
                    namespace: namespace.to_string(),
                    key: describe_key(index, &key),
                });
            }
        }
        Ok(())
    }
}

fn keys_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

fn describe_key(index: &IndexSpec, key: &[Value]) -> String {
    let fields: Vec<String> = index
        .keys
        .keys()
        .zip(key)
        .map(|(field, value)| format!("{field}: {value}"))
        .collect();
    format!("{{ {} }}", fields.join(", "))
}

/// In-memory implementation of [`DocumentStore`].
///
/// Uses DashMap for per-collection locking; each operation on one collection is atomic.
/// Cross-collection operations (rename, copy) are not.
#[derive(Debug)]
pub struct MemoryDocumentStore {
    collections: DashMap<Namespace, Collection>,
    reachable: AtomicBool,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self {
            collections: DashMap::new(),
            reachable: AtomicBool::new(true),
        }
    }
}

impl MemoryDocumentStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Simulates losing (or regaining) the backend. While unreachable every operation
    /// fails with [`StorageError::Unreachable`].
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn ensure_reachable(&self) -> StorageResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unreachable {
                message: "in-memory store is offline".to_string(),
            })
        }
    }

    /// Single node: anything beyond one acknowledgement can never be satisfied.
    fn check_write_concern(write_concern: &WriteConcern) -> StorageResult<()> {
        match write_concern.w {
            Acknowledgement::Nodes(n) if n > 1 => Err(StorageError::WriteConcernFailed {
                message: format!("w: {n} requested but only 1 node is available"),
            }),
            _ => Ok(()),
        }
    }

    fn begin_write(
        &self,
        namespace: &Namespace,
        write_concern: &WriteConcern,
    ) -> StorageResult<()> {
        self.ensure_reachable()?;
        namespace.validate()?;
        Self::check_write_concern(write_concern)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    #[instrument(skip_all, fields(namespace = %namespace))]
    async fn find_one(&self, namespace: &Namespace, query: &Document) -> StorageResult<Document> {
        self.ensure_reachable()?;
        if let Some(collection) = self.collections.get(namespace) {
            for document in &collection.documents {
                if matches(document, query)? {
                    return Ok(document.clone());
                }
            }
        }
        Err(StorageError::NoMatchingDocument {
            namespace: namespace.to_string(),
        })
    }

    #[instrument(skip_all, fields(namespace = %namespace))]
    async fn query(
        &self,
        namespace: &Namespace,
        query: &Document,
        projection: Option<&Document>,
        visit: &mut (dyn FnMut(Document) + Send),
    ) -> StorageResult<()> {
        self.ensure_reachable()?;
        // Snapshot matches first so the visitor never runs under the shard lock.
        let matched: Vec<Document> = match self.collections.get(namespace) {
            Some(collection) => {
                let mut out = Vec::new();
                for document in &collection.documents {
                    if matches(document, query)? {
                        out.push(document.clone());
                    }
                }
                out
            }
            None => Vec::new(),
        };
        for document in matched {
            let document = match projection {
                Some(projection) => project(document, projection)?,
                None => document,
            };
            visit(document);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(namespace = %namespace))]
    async fn insert(
        &self,
        namespace: &Namespace,
        mut document: Document,
        write_concern: &WriteConcern,
    ) -> StorageResult<()> {
        self.begin_write(namespace, write_concern)?;
        if !document.contains_key("_id") {
            document.insert("_id".to_string(), Value::from(Ulid::new().to_string()));
        }
        let mut collection = self.collections.entry(namespace.clone()).or_default();
        collection.check_unique(namespace, &document, None)?;
        collection.documents.push(document);
        Ok(())
    }

    #[instrument(skip_all, fields(namespace = %namespace))]
    async fn update(
        &self,
        namespace: &Namespace,
        query: &Document,
        update: &Document,
        upsert: bool,
        multi: bool,
        write_concern: &WriteConcern,
    ) -> StorageResult<UpdateOutcome> {
        self.begin_write(namespace, write_concern)?;
        let mut outcome = UpdateOutcome::default();

        let mut collection = match self.collections.get_mut(namespace) {
            Some(collection) => collection,
            None if upsert => self.collections.entry(namespace.clone()).or_default(),
            None => return Ok(outcome),
        };

        let mut targets = Vec::new();
        for (pos, document) in collection.documents.iter().enumerate() {
            if matches(document, query)? {
                targets.push(pos);
                if !multi {
                    break;
                }
            }
        }

        for pos in targets {
            let mut updated = collection.documents[pos].clone();
            apply_update(&mut updated, update)?;
            collection.check_unique(namespace, &updated, Some(pos))?;
            outcome.matched += 1;
            if updated != collection.documents[pos] {
                outcome.modified += 1;
                collection.documents[pos] = updated;
            }
        }

        if outcome.matched == 0 && upsert {
            let mut document = upsert_seed(query)?;
            apply_update(&mut document, update)?;
            let id = document
                .entry("_id")
                .or_insert_with(|| Value::from(Ulid::new().to_string()))
                .clone();
            collection.check_unique(namespace, &document, None)?;
            collection.documents.push(document);
            outcome.upserted_id = Some(id);
            debug!(namespace = %namespace, "update upserted a new document");
        }

        Ok(outcome)
    }

    #[instrument(skip_all, fields(namespace = %namespace))]
    async fn remove(
        &self,
        namespace: &Namespace,
        query: &Document,
        write_concern: &WriteConcern,
    ) -> StorageResult<u64> {
        self.begin_write(namespace, write_concern)?;
        let Some(mut collection) = self.collections.get_mut(namespace) else {
            return Ok(0);
        };
        // Evaluate every match before mutating so a bad query leaves the collection intact.
        let mut keep = Vec::with_capacity(collection.documents.len());
        for document in &collection.documents {
            keep.push(!matches(document, query)?);
        }
        let before = collection.documents.len();
        let mut flags = keep.into_iter();
        collection
            .documents
            .retain(|_| flags.next().unwrap_or(true));
        Ok((before - collection.documents.len()) as u64)
    }

    #[instrument(skip_all, fields(namespace = %namespace))]
    async fn create_index(
        &self,
        namespace: &Namespace,
        keys: &Document,
        unique: bool,
        write_concern: &WriteConcern,
    ) -> StorageResult<()> {
        self.begin_write(namespace, write_concern)?;
        if keys.is_empty() {
            return Err(StorageError::InvalidQuery {
                message: "index key pattern must not be empty".to_string(),
            });
        }
        let index = IndexSpec {
            keys: keys.clone(),
            unique,
        };
        let mut collection = self.collections.entry(namespace.clone()).or_default();
        if collection.indexes.contains(&index) {
            return Ok(());
        }
        if unique {
            for (pos, document) in collection.documents.iter().enumerate() {
                let key = index.key_of(document);
                let clash = collection.documents[pos + 1..]
                    .iter()
                    .any(|other| keys_equal(&index.key_of(other), &key));
                if clash {
                    return Err(StorageError::DuplicateKey {
                        namespace: namespace.to_string(),
                        key: describe_key(&index, &key),
                    });
                }
            }
        }
        collection.indexes.push(index);
        Ok(())
    }

    #[instrument(skip_all, fields(namespace = %namespace))]
    async fn drop_collection(
        &self,
        namespace: &Namespace,
        write_concern: &WriteConcern,
    ) -> StorageResult<()> {
        self.begin_write(namespace, write_concern)?;
        match self.collections.remove(namespace) {
            Some(_) => Ok(()),
            None => Err(StorageError::NamespaceNotFound {
                namespace: namespace.to_string(),
            }),
        }
    }

    #[instrument(skip_all, fields(from = %from, to = %to))]
    async fn rename_collection(
        &self,
        from: &Namespace,
        to: &Namespace,
        drop_target: bool,
        write_concern: &WriteConcern,
    ) -> StorageResult<()> {
        self.begin_write(from, write_concern)?;
        to.validate()?;
        if !self.collections.contains_key(from) {
            return Err(StorageError::NamespaceNotFound {
                namespace: from.to_string(),
            });
        }
        if from == to {
            return Ok(());
        }
        if self.collections.contains_key(to) {
            if !drop_target {
                return Err(StorageError::NamespaceExists {
                    namespace: to.to_string(),
                });
            }
            self.collections.remove(to);
        }
        let (_, collection) =
            self.collections
                .remove(from)
                .ok_or_else(|| StorageError::NamespaceNotFound {
                    namespace: from.to_string(),
                })?;
        let displaced = match self.collections.entry(to.clone()) {
            Entry::Occupied(_) => Some(collection),
            Entry::Vacant(entry) => {
                entry.insert(collection);
                None
            }
        };
        if let Some(collection) = displaced {
            // A concurrent writer recreated the target; put the source back.
            self.collections.insert(from.clone(), collection);
            return Err(StorageError::NamespaceExists {
                namespace: to.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip_all, fields(from = %from, to = %to))]
    async fn copy_collection(
        &self,
        from: &Namespace,
        to: &Namespace,
        write_concern: &WriteConcern,
    ) -> StorageResult<()> {
        self.begin_write(to, write_concern)?;
        let source = self
            .collections
            .get(from)
            .map(|c| c.value().clone())
            .ok_or_else(|| StorageError::NamespaceNotFound {
                namespace: from.to_string(),
            })?;
        match self.collections.entry(to.clone()) {
            Entry::Occupied(_) => Err(StorageError::NamespaceExists {
                namespace: to.to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(source);
                Ok(())
            }
        }
    }

    async fn list_databases(&self) -> StorageResult<Vec<String>> {
        self.ensure_reachable()?;
        let mut dbs: Vec<String> = self
            .collections
            .iter()
            .map(|entry| entry.key().db().to_string())
            .collect();
        dbs.sort();
        dbs.dedup();
        Ok(dbs)
    }

    async fn list_collections(&self, db: &str) -> StorageResult<Vec<Namespace>> {
        self.ensure_reachable()?;
        let mut namespaces: Vec<Namespace> = self
            .collections
            .iter()
            .filter(|entry| entry.key().db() == db)
            .map(|entry| entry.key().clone())
            .collect();
        namespaces.sort();
        Ok(namespaces)
    }
}

//! Write observation hook.
//!
//! On the storage tier every successful write to authorization collections is reported to an
//! [`OpObserver`] so the embedding process can replicate or audit it. The router tier never
//! reports writes; they are observed where they are applied.

use authstate_storage::{Document, Namespace};

/// Kind of write that was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Insert,
    Update,
    Remove,
    CreateIndex,
    DropCollection,
    RenameCollection,
    CopyCollection,
}

/// One applied write.
#[derive(Debug, Clone, PartialEq)]
pub struct OpEntry {
    pub kind: OpKind,
    pub namespace: Namespace,
    /// Destination of a rename or copy.
    pub target: Option<Namespace>,
    /// Query selecting the affected documents, for updates and removes.
    pub query: Option<Document>,
    /// Inserted document, update document or index key pattern.
    pub document: Option<Document>,
    /// Documents affected, where the store reports it.
    pub count: Option<u64>,
}

impl OpEntry {
    pub fn new(kind: OpKind, namespace: &Namespace) -> Self {
        Self {
            kind,
            namespace: namespace.clone(),
            target: None,
            query: None,
            document: None,
            count: None,
        }
    }

    pub fn with_target(mut self, target: &Namespace) -> Self {
        self.target = Some(target.clone());
        self
    }

    pub fn with_query(mut self, query: &Document) -> Self {
        self.query = Some(query.clone());
        self
    }

    pub fn with_document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }
}

/// Receives every write applied through the storage-tier external state.
///
/// Called synchronously after the store acknowledged the write and before the facade returns.
pub trait OpObserver: Send + Sync {
    fn on_op(&self, entry: &OpEntry);
}

/// Observer that ignores every write.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOpObserver;

impl OpObserver for NoopOpObserver {
    fn on_op(&self, _entry: &OpEntry) {}
}

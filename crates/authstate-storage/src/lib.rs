//! authstate-storage: Document store abstraction for authorization state
//!
//! This crate provides the storage contract consumed by the authorization layer:
//! - `DocumentStore` trait: find/query/insert/update/remove plus index and
//!   collection management over `(database, collection)` namespaces
//! - Write concerns honored by every write
//! - A small query/update language shared by backends
//! - In-memory implementation for tests and embedded use
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             authstate-storage               │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs - DocumentStore trait, Namespace │
//! │  query.rs  - Matching, projection, updates  │
//! │  memory.rs - In-memory implementation       │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod query;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemoryDocumentStore;
pub use traits::{
    Acknowledgement, Document, DocumentStore, Namespace, UpdateOutcome, WriteConcern,
};

//! authstate-domain: principal model and role resolution
//!
//! This crate contains the storage-agnostic part of authorization state:
//! - User and role names, privileges, resource patterns and built-in roles
//! - Stored document layouts per authorization schema version
//! - Role graph resolution with cycle and inconsistency reporting
//! - Assembly of user and role descriptions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              authstate-domain               │
//! ├─────────────────────────────────────────────┤
//! │  model/     - Names, privileges, documents  │
//! │  resolver/  - Role graph resolution         │
//! │  describe/  - Description assembly          │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Documents are read through [`resolver::PrincipalDocumentReader`]; the server crate adapts
//! its document store to that trait.

pub mod describe;
pub mod error;
pub mod model;
pub mod resolver;

// Re-export commonly used types at the crate root
pub use describe::{DescriptionAssembler, ResolvedDescription};
pub use error::{BoxedStoreError, DomainError, DomainResult};
pub use resolver::{PrincipalDocumentReader, Resolution, ResolverConfig, RoleGraphResolver};

//! Role graph resolution.
//!
//! The resolver walks grant edges from a principal's direct roles and produces the indirect
//! roles, merged privileges and inconsistency warnings for that principal.
//!
//! # Design Notes
//!
//! - **Traversal**: breadth-first over a flat work queue with a visited set keyed on role
//!   name. A role is expanded at most once however many paths reach it.
//! - **Cycles**: a visited hit does not imply a cycle (diamonds revisit too). Grants are
//!   recorded as edges and cycles are found afterwards from strongly connected components.
//! - **Built-in roles**: answered from a static table before any store read.
//! - **Limits**: `ResolverConfig::max_roles` bounds expansion and `ResolverConfig::timeout`
//!   bounds the whole call. Hitting either discards the partial result.

mod config;
mod cycles;
mod graph_resolver;
mod traits;
mod types;

#[cfg(test)]
pub(crate) mod tests;

pub use config::ResolverConfig;
pub use graph_resolver::{register_resolver_metrics, RoleGraphResolver};
pub use traits::PrincipalDocumentReader;
pub use types::{Resolution, ResolutionWarning, WarningKind};

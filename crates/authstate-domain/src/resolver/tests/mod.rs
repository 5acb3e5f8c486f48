//! Tests for the role graph resolver.
//!
//! Organized by functionality:
//! - Basic expansion (chains, diamonds, built-in roles)
//! - Inconsistencies (cycles, dangling grants, malformed roles)
//! - Safety features (role limit, timeout, store failures)
//! - Properties against a reference traversal

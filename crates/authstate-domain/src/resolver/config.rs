//! Configuration for the role graph resolver.

use std::time::Duration;

/// Configuration for the role graph resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Maximum number of distinct roles one resolution may expand.
    pub max_roles: usize,
    /// Deadline for a whole resolution, store reads included.
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_roles: 10_000,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ResolverConfig {
    /// Creates a new configuration with the specified role limit.
    pub fn with_max_roles(mut self, max_roles: usize) -> Self {
        self.max_roles = max_roles;
        self
    }

    /// Creates a new configuration with the specified timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

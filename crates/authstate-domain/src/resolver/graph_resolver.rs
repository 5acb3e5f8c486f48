//! Role graph resolver.
//!
//! Expands a principal's granted roles breadth-first into the full set of reachable roles and
//! the union of their privileges. Inconsistent data never fails a resolution; it is reported as
//! warnings naming the offending role:
//!
//! - a granted role with no definition is skipped and reported as missing
//! - a malformed role document contributes nothing and is reported
//! - unrecognized actions are dropped from the privilege and reported
//! - roles on a grant cycle are reported once the traversal completes
//!
//! Each role is expanded at most once, so cyclic graphs terminate. Store failures other than
//! "not found" abort the resolution and discard everything gathered so far.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::{DomainError, DomainResult};
use crate::model::{builtin_role, PrincipalName, PrivilegeSet, RoleDocument, RoleName};

use super::config::ResolverConfig;
use super::cycles::nodes_on_cycles;
use super::traits::PrincipalDocumentReader;
use super::types::{Resolution, ResolutionWarning, WarningKind};

/// Grants recorded during one traversal, with roles numbered in discovery order.
struct GrantGraph {
    ids: HashMap<RoleName, usize>,
    /// `None` for a user principal, which is never itself a role.
    names: Vec<Option<RoleName>>,
    edges: Vec<Vec<usize>>,
}

impl GrantGraph {
    const PRINCIPAL: usize = 0;

    fn new(principal: Option<&RoleName>) -> Self {
        let mut ids = HashMap::new();
        if let Some(role) = principal {
            ids.insert(role.clone(), Self::PRINCIPAL);
        }
        Self {
            ids,
            names: vec![principal.cloned()],
            edges: vec![Vec::new()],
        }
    }

    fn node(&mut self, role: &RoleName) -> usize {
        if let Some(&id) = self.ids.get(role) {
            return id;
        }
        let id = self.names.len();
        self.ids.insert(role.clone(), id);
        self.names.push(Some(role.clone()));
        self.edges.push(Vec::new());
        id
    }

    fn add_edge(&mut self, from: usize, to: &RoleName) {
        let to = self.node(to);
        self.edges[from].push(to);
    }

    /// Roles lying on a cycle, in discovery order.
    fn cyclic_roles(&self) -> impl Iterator<Item = &RoleName> {
        nodes_on_cycles(&self.edges)
            .into_iter()
            .zip(&self.names)
            .filter_map(|(on_cycle, name)| if on_cycle { name.as_ref() } else { None })
    }
}

/// Warnings deduplicated by (kind, role), kept in the order first reported.
#[derive(Default)]
struct WarningLog {
    seen: HashSet<(WarningKind, RoleName)>,
    warnings: Vec<ResolutionWarning>,
}

impl WarningLog {
    fn push(&mut self, warning: ResolutionWarning) {
        if self.seen.insert((warning.kind, warning.role.clone())) {
            warn!(role = %warning.role, kind = ?warning.kind, "{}", warning);
            self.warnings.push(warning);
        }
    }
}

/// Resolves transitive role membership through a [`PrincipalDocumentReader`].
///
/// Built-in roles are resolved from the static table without touching the reader.
pub struct RoleGraphResolver<R: ?Sized> {
    reader: Arc<R>,
    config: ResolverConfig,
}

impl<R> RoleGraphResolver<R>
where
    R: PrincipalDocumentReader + ?Sized + 'static,
{
    /// Creates a new resolver with the default configuration.
    pub fn new(reader: Arc<R>) -> Self {
        Self::with_config(reader, ResolverConfig::default())
    }

    /// Creates a new resolver with custom configuration.
    pub fn with_config(reader: Arc<R>, config: ResolverConfig) -> Self {
        Self { reader, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    /// Resolves everything reachable from `direct_roles`.
    ///
    /// `principal` only matters for the result shape: it is never reported as an indirect role,
    /// and grants that lead back to it count as cycles.
    #[instrument(skip_all, fields(principal = %principal, direct_roles = direct_roles.len()))]
    pub async fn resolve(
        &self,
        principal: &PrincipalName,
        direct_roles: &[RoleName],
    ) -> DomainResult<Resolution> {
        metrics::counter!("authstate_resolutions_total").increment(1);

        match timeout(self.config.timeout, self.traverse(principal, direct_roles)).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::Timeout {
                duration_ms: self.config.timeout.as_millis() as u64,
            }),
        }
    }

    /// Definition of one role: built-in table first, then the stored document.
    pub async fn role_definition(&self, role: &RoleName) -> DomainResult<RoleDocument> {
        if let Some(definition) = builtin_role(role) {
            return Ok(definition);
        }
        let raw = self.reader.read_role_document(role).await?;
        RoleDocument::parse(&raw)
    }

    async fn traverse(
        &self,
        principal: &PrincipalName,
        direct_roles: &[RoleName],
    ) -> DomainResult<Resolution> {
        let principal_role = principal.as_role();
        let mut graph = GrantGraph::new(principal_role);
        let mut visited: HashSet<RoleName> = principal_role.into_iter().cloned().collect();
        let mut queue: Vec<RoleName> = Vec::with_capacity(direct_roles.len());
        let mut cursor = 0;

        for role in direct_roles {
            graph.add_edge(GrantGraph::PRINCIPAL, role);
            queue.push(role.clone());
        }

        let mut resolved: Vec<RoleName> = Vec::new();
        let mut privileges = PrivilegeSet::new();
        let mut log = WarningLog::default();
        let mut expanded = 0usize;
        let mut revisits = 0u64;

        while cursor < queue.len() {
            let role = queue[cursor].clone();
            cursor += 1;

            if !visited.insert(role.clone()) {
                revisits += 1;
                continue;
            }
            expanded += 1;
            if expanded > self.config.max_roles {
                return Err(DomainError::RoleGraphTooLarge {
                    max_roles: self.config.max_roles,
                });
            }

            let definition = match self.role_definition(&role).await {
                Ok(definition) => definition,
                Err(DomainError::RoleNotFound { .. }) => {
                    log.push(ResolutionWarning::new(WarningKind::MissingRole, role));
                    continue;
                }
                Err(DomainError::InvalidPrincipalDocument { message, .. }) => {
                    log.push(
                        ResolutionWarning::new(WarningKind::MalformedRole, role.clone())
                            .with_detail(message),
                    );
                    resolved.push(role);
                    continue;
                }
                Err(e) => return Err(e),
            };

            privileges.add_all(&definition.privileges);
            if !definition.unknown_actions.is_empty() {
                log.push(
                    ResolutionWarning::new(WarningKind::UnknownAction, role.clone())
                        .with_detail(definition.unknown_actions.join(", ")),
                );
            }

            let from = graph.node(&role);
            for granted in definition.roles {
                graph.add_edge(from, &granted);
                queue.push(granted);
            }
            resolved.push(role);
        }

        for role in graph.cyclic_roles() {
            log.push(ResolutionWarning::new(WarningKind::Cycle, role.clone()));
        }

        debug!(expanded, revisits, warnings = log.warnings.len(), "role graph resolved");
        metrics::counter!("authstate_roles_expanded_total").increment(expanded as u64);
        if !log.warnings.is_empty() {
            metrics::counter!("authstate_resolution_warnings_total")
                .increment(log.warnings.len() as u64);
        }

        let direct: HashSet<&RoleName> = direct_roles.iter().collect();
        let indirect_roles = resolved
            .into_iter()
            .filter(|role| Some(role) != principal_role && !direct.contains(role))
            .collect();

        Ok(Resolution {
            indirect_roles,
            privileges,
            warnings: log.warnings,
        })
    }
}

/// Registers resolver metric descriptions with the installed recorder.
pub fn register_resolver_metrics() {
    metrics::describe_counter!(
        "authstate_resolutions_total",
        "Total number of role graph resolutions started"
    );
    metrics::describe_counter!(
        "authstate_resolution_warnings_total",
        "Total number of inconsistency warnings reported by resolutions"
    );
    metrics::describe_counter!(
        "authstate_roles_expanded_total",
        "Total number of roles expanded across resolutions"
    );
}

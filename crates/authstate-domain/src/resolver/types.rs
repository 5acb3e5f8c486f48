//! Resolution results and warnings.

use std::collections::BTreeSet;
use std::fmt;

use crate::model::{PrivilegeSet, RoleName};

/// Kind of inconsistency found while resolving a role graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WarningKind {
    /// A granted role has no stored document and is not built in.
    MissingRole,
    /// A stored role document could not be parsed.
    MalformedRole,
    /// A stored privilege names actions that are not recognized.
    UnknownAction,
    /// The role lies on a cycle of grants.
    Cycle,
}

/// One inconsistency, naming the role it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionWarning {
    pub kind: WarningKind,
    pub role: RoleName,
    pub detail: Option<String>,
}

impl ResolutionWarning {
    pub fn new(kind: WarningKind, role: RoleName) -> Self {
        Self {
            kind,
            role,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for ResolutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            WarningKind::MissingRole => write!(f, "Could not find role: {}", self.role)?,
            WarningKind::MalformedRole => {
                write!(f, "Invalid document for role: {}", self.role)?
            }
            WarningKind::UnknownAction => {
                write!(f, "Unrecognized actions in role: {}", self.role)?
            }
            WarningKind::Cycle => write!(
                f,
                "Role graph contains a cycle through role: {}",
                self.role
            )?,
        }
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// Outcome of resolving a principal's role graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Roles reachable through grants, excluding the principal and its direct roles.
    pub indirect_roles: BTreeSet<RoleName>,
    /// Union of the privileges of every resolved role.
    pub privileges: PrivilegeSet,
    /// Inconsistencies in discovery order, one per (kind, role).
    pub warnings: Vec<ResolutionWarning>,
}

impl Resolution {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Warning messages as rendered in descriptions.
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }
}

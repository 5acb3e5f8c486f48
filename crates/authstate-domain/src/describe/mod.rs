//! Description assembly.
//!
//! Combines a principal's stored document with its resolved role graph into the document
//! returned to callers describing a user or a role.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::instrument;

use crate::error::DomainResult;
use crate::model::{
    PrincipalName, PrivilegeSet, RawDocument, RoleName, SchemaVersion, UserDocument, UserName,
    ADMIN_DB,
};
use crate::resolver::{
    PrincipalDocumentReader, ResolutionWarning, ResolverConfig, RoleGraphResolver, WarningKind,
};

/// Fully resolved view of one principal.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDescription {
    pub principal: PrincipalName,
    /// Credential material; users only.
    pub credentials: Option<RawDocument>,
    /// Direct roles in stored order.
    pub direct_roles: Vec<RoleName>,
    pub indirect_roles: BTreeSet<RoleName>,
    pub privileges: PrivilegeSet,
    pub warnings: Vec<String>,
    pub custom_data: Option<Value>,
}

fn role_array<'a>(roles: impl IntoIterator<Item = &'a RoleName>) -> Value {
    Value::Array(
        roles
            .into_iter()
            .map(|r| Value::Object(r.to_document()))
            .collect(),
    )
}

impl ResolvedDescription {
    /// Renders the description document.
    ///
    /// `warnings` is omitted when empty and `customData` when absent.
    pub fn to_document(&self) -> RawDocument {
        let mut doc = Map::new();
        match &self.principal {
            PrincipalName::User(user) => {
                doc.insert("user".to_string(), Value::from(user.name.as_str()));
                doc.insert("db".to_string(), Value::from(user.db.as_str()));
            }
            PrincipalName::Role(role) => {
                doc.insert("role".to_string(), Value::from(role.name.as_str()));
                doc.insert("db".to_string(), Value::from(role.db.as_str()));
            }
        }
        if let Some(credentials) = &self.credentials {
            doc.insert("credentials".to_string(), Value::Object(credentials.clone()));
        }
        doc.insert("roles".to_string(), role_array(&self.direct_roles));
        doc.insert("indirectRoles".to_string(), role_array(&self.indirect_roles));
        doc.insert("privileges".to_string(), self.privileges.to_document_array());
        if !self.warnings.is_empty() {
            doc.insert(
                "warnings".to_string(),
                Value::Array(self.warnings.iter().map(|w| Value::from(w.as_str())).collect()),
            );
        }
        if let Some(custom_data) = &self.custom_data {
            doc.insert("customData".to_string(), custom_data.clone());
        }
        doc
    }
}

/// Builds descriptions of users and roles.
pub struct DescriptionAssembler<R: ?Sized> {
    resolver: RoleGraphResolver<R>,
}

impl<R> DescriptionAssembler<R>
where
    R: PrincipalDocumentReader + ?Sized + 'static,
{
    pub fn new(reader: Arc<R>, config: ResolverConfig) -> Self {
        Self {
            resolver: RoleGraphResolver::with_config(reader, config),
        }
    }

    pub fn resolver(&self) -> &RoleGraphResolver<R> {
        &self.resolver
    }

    /// Describes a user stored in the given layout.
    ///
    /// Fails with `UserNotFound` when no document exists; nothing is resolved in that case.
    #[instrument(skip_all, fields(user = %user, version = version.as_number()))]
    pub async fn describe_user(
        &self,
        user: &UserName,
        version: SchemaVersion,
    ) -> DomainResult<ResolvedDescription> {
        let raw = self.resolver.reader().read_user_document(user, version).await?;
        let source_db = match version {
            SchemaVersion::V1 => user.db.as_str(),
            SchemaVersion::V2 => ADMIN_DB,
        };
        let document = UserDocument::parse(&raw, version, source_db)?;
        let principal = PrincipalName::User(document.name.clone());
        let resolution = self.resolver.resolve(&principal, &document.roles).await?;

        Ok(ResolvedDescription {
            principal,
            credentials: Some(document.credentials),
            warnings: resolution.warning_messages(),
            direct_roles: document.roles,
            indirect_roles: resolution.indirect_roles,
            privileges: resolution.privileges,
            custom_data: document.custom_data,
        })
    }

    /// Describes a stored or built-in role, including its own privileges.
    #[instrument(skip_all, fields(role = %role))]
    pub async fn describe_role(&self, role: &RoleName) -> DomainResult<ResolvedDescription> {
        let definition = self.resolver.role_definition(role).await?;
        let principal = PrincipalName::Role(role.clone());
        let resolution = self.resolver.resolve(&principal, &definition.roles).await?;

        let mut privileges: PrivilegeSet = definition.privileges.iter().collect();
        privileges.merge(&resolution.privileges);

        let mut warnings = Vec::new();
        if !definition.unknown_actions.is_empty() {
            let own = ResolutionWarning::new(WarningKind::UnknownAction, role.clone())
                .with_detail(definition.unknown_actions.join(", "));
            warnings.push(own.to_string());
        }
        warnings.extend(resolution.warning_messages());

        Ok(ResolvedDescription {
            principal,
            credentials: None,
            direct_roles: definition.roles,
            indirect_roles: resolution.indirect_roles,
            privileges,
            warnings,
            custom_data: None,
        })
    }
}

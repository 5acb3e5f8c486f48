//! Stored principal documents and schema-version dispatch.

use serde_json::{Map, Value};

use crate::error::{DomainError, DomainResult};

use super::names::{RawDocument, RoleName, UserName};
use super::privilege::Privilege;

/// Database holding the current-layout authorization collections.
pub const ADMIN_DB: &str = "admin";
/// Collection of user documents (per database in V1, on `admin` in V2).
pub const USERS_COLLECTION: &str = "system.users";
/// Collection of role documents (V2 only).
pub const ROLES_COLLECTION: &str = "system.roles";
/// Collection holding the `authSchema` version document.
pub const VERSION_COLLECTION: &str = "system.version";
/// `_id` of the version document.
pub const SCHEMA_VERSION_DOCUMENT_ID: &str = "authSchema";
/// Credential mechanism name used to present legacy `pwd` hashes.
pub const LEGACY_CREDENTIAL_MECHANISM: &str = "MONGODB-CR";

/// Layout of stored authorization documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemaVersion {
    /// Legacy: user documents live in each database's `system.users`.
    V1,
    /// Current: users and roles live in global collections on `admin`.
    V2,
}

impl SchemaVersion {
    pub const CURRENT: SchemaVersion = SchemaVersion::V2;

    pub fn from_number(version: i64) -> DomainResult<Self> {
        match version {
            1 => Ok(SchemaVersion::V1),
            2 => Ok(SchemaVersion::V2),
            other => Err(DomainError::UnsupportedSchemaVersion { version: other }),
        }
    }

    pub fn as_number(&self) -> i64 {
        match self {
            SchemaVersion::V1 => 1,
            SchemaVersion::V2 => 2,
        }
    }
}

/// Where and how to look up one principal document.
///
/// Built once per read from the principal and the schema version.
#[derive(Debug, Clone, PartialEq)]
pub struct PrincipalQuery {
    pub db: String,
    pub collection: String,
    pub filter: RawDocument,
}

impl PrincipalQuery {
    /// Query for a user's credential document in the given layout.
    pub fn for_user(user: &UserName, version: SchemaVersion) -> Self {
        match version {
            SchemaVersion::V1 => {
                let mut filter = Map::new();
                filter.insert("user".to_string(), Value::from(user.name.as_str()));
                filter.insert(
                    "userSource".to_string(),
                    serde_json::json!({ "$exists": false }),
                );
                Self {
                    db: user.db.clone(),
                    collection: USERS_COLLECTION.to_string(),
                    filter,
                }
            }
            SchemaVersion::V2 => Self {
                db: ADMIN_DB.to_string(),
                collection: USERS_COLLECTION.to_string(),
                filter: user.to_document(),
            },
        }
    }

    /// Query for a role document. Roles exist only in the current layout.
    pub fn for_role(role: &RoleName) -> Self {
        Self {
            db: ADMIN_DB.to_string(),
            collection: ROLES_COLLECTION.to_string(),
            filter: role.to_document(),
        }
    }
}

/// Parsed user document.
#[derive(Debug, Clone, PartialEq)]
pub struct UserDocument {
    pub name: UserName,
    /// Credential material, passed through untouched.
    pub credentials: RawDocument,
    /// Direct roles in stored order.
    pub roles: Vec<RoleName>,
    pub custom_data: Option<Value>,
}

fn invalid(principal: impl ToString, message: impl Into<String>) -> DomainError {
    DomainError::InvalidPrincipalDocument {
        principal: principal.to_string(),
        message: message.into(),
    }
}

fn role_array(raw: &RawDocument, principal: &str) -> DomainResult<Vec<RoleName>> {
    match raw.get("roles") {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| RoleName::from_document(item).map_err(|m| invalid(principal, m)))
            .collect(),
        Some(other) => Err(invalid(principal, format!("\"roles\" must be an array, got {other}"))),
    }
}

impl UserDocument {
    /// Parses a stored user document.
    ///
    /// `source_db` is the database whose collection held the document; legacy documents
    /// do not record it themselves.
    pub fn parse(raw: &RawDocument, version: SchemaVersion, source_db: &str) -> DomainResult<Self> {
        let name = raw
            .get("user")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                invalid(
                    format!("user in {source_db}"),
                    "missing string field \"user\"",
                )
            })?;

        match version {
            SchemaVersion::V1 => Self::parse_legacy(raw, name, source_db),
            SchemaVersion::V2 => {
                let db = raw
                    .get("db")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| invalid(name, "missing string field \"db\""))?;
                let user = UserName::new(name, db);
                let credentials = match raw.get("credentials") {
                    None => Map::new(),
                    Some(Value::Object(c)) => c.clone(),
                    Some(other) => {
                        return Err(invalid(
                            &user,
                            format!("\"credentials\" must be a document, got {other}"),
                        ))
                    }
                };
                let roles = role_array(raw, &user.to_string())?;
                Ok(Self {
                    name: user,
                    credentials,
                    roles,
                    custom_data: raw.get("customData").cloned(),
                })
            }
        }
    }

    fn parse_legacy(raw: &RawDocument, name: &str, source_db: &str) -> DomainResult<Self> {
        let db = match raw.get("userSource") {
            None => source_db,
            Some(Value::String(s)) if !s.is_empty() => s.as_str(),
            Some(other) => return Err(invalid(name, format!("invalid \"userSource\" {other}"))),
        };
        let user = UserName::new(name, db);

        let mut credentials = Map::new();
        if let Some(pwd) = raw.get("pwd") {
            credentials.insert(LEGACY_CREDENTIAL_MECHANISM.to_string(), pwd.clone());
        }

        // Legacy roles are plain names on the database that holds the document.
        let roles = match raw.get("roles") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .filter(|s| !s.is_empty())
                        .map(|role| RoleName::new(role, source_db))
                        .ok_or_else(|| {
                            invalid(&user, format!("legacy role must be a name, got {item}"))
                        })
                })
                .collect::<DomainResult<Vec<_>>>()?,
            Some(other) => {
                return Err(invalid(
                    &user,
                    format!("\"roles\" must be an array, got {other}"),
                ))
            }
            None => {
                let read_only = raw.get("readOnly").and_then(Value::as_bool).unwrap_or(false);
                let role = if read_only { "read" } else { "readWrite" };
                vec![RoleName::new(role, source_db)]
            }
        };

        Ok(Self {
            name: user,
            credentials,
            roles,
            custom_data: None,
        })
    }
}

/// Parsed role document (stored or built-in).
#[derive(Debug, Clone, PartialEq)]
pub struct RoleDocument {
    pub name: RoleName,
    pub privileges: Vec<Privilege>,
    /// Roles this role grants, in stored order.
    pub roles: Vec<RoleName>,
    /// Action names in stored privileges that are not recognized.
    pub unknown_actions: Vec<String>,
}

impl RoleDocument {
    /// Parses a stored role document.
    pub fn parse(raw: &RawDocument) -> DomainResult<Self> {
        let field = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| invalid("role document", format!("missing string field \"{key}\"")))
        };
        let name = RoleName::new(field("role")?, field("db")?);
        let label = name.to_string();

        let mut privileges = Vec::new();
        let mut unknown_actions = Vec::new();
        match raw.get("privileges") {
            None => {}
            Some(Value::Array(items)) => {
                for item in items {
                    let parsed = Privilege::from_document(item).map_err(|m| invalid(&label, m))?;
                    privileges.push(parsed.privilege);
                    unknown_actions.extend(parsed.unknown_actions);
                }
            }
            Some(other) => {
                return Err(invalid(&label, format!("\"privileges\" must be an array, got {other}")))
            }
        }

        Ok(Self {
            roles: role_array(raw, &label)?,
            name,
            privileges,
            unknown_actions,
        })
    }
}

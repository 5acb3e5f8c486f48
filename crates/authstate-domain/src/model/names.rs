//! User and role names.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DomainError, DomainResult};

/// Raw stored document as handed over by a reader.
pub type RawDocument = Map<String, Value>;

fn validate_part(value: &str, whole: &str) -> DomainResult<()> {
    if value.is_empty() || value.contains('\0') {
        return Err(DomainError::InvalidName {
            value: whole.to_string(),
        });
    }
    Ok(())
}

/// Identifies a user: `name@db`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserName {
    pub name: String,
    pub db: String,
}

impl UserName {
    pub fn new(name: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db: db.into(),
        }
    }

    /// Parses `name@db`. The last `@` separates the database.
    pub fn parse(value: &str) -> DomainResult<Self> {
        let (name, db) = value.rsplit_once('@').ok_or_else(|| DomainError::InvalidName {
            value: value.to_string(),
        })?;
        validate_part(name, value)?;
        validate_part(db, value)?;
        Ok(Self::new(name, db))
    }

    /// `{user, db}` as stored in role-membership arrays and queries.
    pub fn to_document(&self) -> RawDocument {
        let mut doc = Map::new();
        doc.insert("user".to_string(), Value::from(self.name.as_str()));
        doc.insert("db".to_string(), Value::from(self.db.as_str()));
        doc
    }

    /// `_id` used for current-layout user documents.
    pub fn document_id(&self) -> String {
        format!("{}.{}", self.db, self.name)
    }
}

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.db)
    }
}

/// Identifies a role: `name@db`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleName {
    pub name: String,
    pub db: String,
}

impl RoleName {
    pub fn new(name: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db: db.into(),
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        let user = UserName::parse(value)?;
        Ok(Self::new(user.name, user.db))
    }

    /// Reads `{role, db}`.
    pub fn from_document(doc: &Value) -> Result<Self, String> {
        let obj = doc
            .as_object()
            .ok_or_else(|| format!("role reference must be a document, got {doc}"))?;
        let field = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| format!("role reference {doc} is missing string field \"{key}\""))
        };
        Ok(Self::new(field("role")?, field("db")?))
    }

    /// `{role, db}`.
    pub fn to_document(&self) -> RawDocument {
        let mut doc = Map::new();
        doc.insert("role".to_string(), Value::from(self.name.as_str()));
        doc.insert("db".to_string(), Value::from(self.db.as_str()));
        doc
    }

    pub fn document_id(&self) -> String {
        format!("{}.{}", self.db, self.name)
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.db)
    }
}

/// Either kind of principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrincipalName {
    User(UserName),
    Role(RoleName),
}

impl PrincipalName {
    /// The role itself when the principal is a role.
    pub fn as_role(&self) -> Option<&RoleName> {
        match self {
            PrincipalName::Role(role) => Some(role),
            PrincipalName::User(_) => None,
        }
    }
}

impl fmt::Display for PrincipalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrincipalName::User(user) => write!(f, "user {user}"),
            PrincipalName::Role(role) => write!(f, "role {role}"),
        }
    }
}

impl From<UserName> for PrincipalName {
    fn from(user: UserName) -> Self {
        PrincipalName::User(user)
    }
}

impl From<RoleName> for PrincipalName {
    fn from(role: RoleName) -> Self {
        PrincipalName::Role(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_uses_last_at_sign() {
        let user = UserName::parse("a@b@test").unwrap();
        assert_eq!(user, UserName::new("a@b", "test"));
        assert_eq!(user.to_string(), "a@b@test");
        assert!(UserName::parse("nodb").is_err());
        assert!(UserName::parse("@test").is_err());
        assert!(RoleName::parse("read@").is_err());
    }

    #[test]
    fn test_role_reference_documents() {
        let role = RoleName::from_document(&json!({"role": "read", "db": "test"})).unwrap();
        assert_eq!(role, RoleName::new("read", "test"));
        assert_eq!(Value::Object(role.to_document()), json!({"role": "read", "db": "test"}));

        let err = RoleName::from_document(&json!({"role": "read"})).unwrap_err();
        assert!(err.contains("\"db\""));
        assert!(RoleName::from_document(&json!("read")).is_err());
    }
}

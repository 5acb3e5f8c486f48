//! Privileges: resource patterns, action types and merged privilege sets.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

macro_rules! action_types {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// An operation a privilege may allow.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ActionType {
            $($variant),+
        }

        impl ActionType {
            /// Every known action.
            pub const ALL: &'static [ActionType] = &[$(ActionType::$variant),+];

            /// Name as stored in role documents.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ActionType::$variant => $name),+
                }
            }
        }

        impl FromStr for ActionType {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(ActionType::$variant),)+
                    other => Err(other.to_string()),
                }
            }
        }
    };
}

action_types! {
    Find => "find",
    Insert => "insert",
    Update => "update",
    Remove => "remove",
    CreateCollection => "createCollection",
    DropCollection => "dropCollection",
    CreateIndex => "createIndex",
    DropIndex => "dropIndex",
    RenameCollectionSameDb => "renameCollectionSameDB",
    ListCollections => "listCollections",
    ListIndexes => "listIndexes",
    CollStats => "collStats",
    DbStats => "dbStats",
    DropDatabase => "dropDatabase",
    CreateUser => "createUser",
    DropUser => "dropUser",
    ChangePassword => "changePassword",
    ChangeOwnPassword => "changeOwnPassword",
    ChangeCustomData => "changeCustomData",
    GrantRole => "grantRole",
    RevokeRole => "revokeRole",
    CreateRole => "createRole",
    DropRole => "dropRole",
    ViewUser => "viewUser",
    ViewRole => "viewRole",
    ListDatabases => "listDatabases",
    ServerStatus => "serverStatus",
    Shutdown => "shutdown",
    ReplSetGetStatus => "replSetGetStatus",
    KillOp => "killop",
    InProg => "inprog",
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a privilege applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourcePattern {
    /// `{anyResource: true}`
    AnyResource,
    /// `{cluster: true}`
    Cluster,
    /// `{db: "", collection: ""}`: every non-system collection in every database.
    AnyNormalResource,
    /// `{db: "<db>", collection: ""}`
    Database(String),
    /// `{db: "", collection: "<coll>"}`
    CollectionInAnyDatabase(String),
    /// `{db: "<db>", collection: "<coll>"}`
    ExactNamespace { db: String, collection: String },
}

impl ResourcePattern {
    /// Parses the `resource` sub-document of a stored privilege.
    pub fn from_document(doc: &Value) -> Result<Self, String> {
        let obj = doc
            .as_object()
            .ok_or_else(|| format!("resource must be a document, got {doc}"))?;

        if obj.get("anyResource") == Some(&Value::Bool(true)) {
            return Ok(ResourcePattern::AnyResource);
        }
        if obj.get("cluster") == Some(&Value::Bool(true)) {
            return Ok(ResourcePattern::Cluster);
        }
        let db = obj.get("db").and_then(Value::as_str);
        let collection = obj.get("collection").and_then(Value::as_str);
        match (db, collection) {
            (Some(""), Some("")) => Ok(ResourcePattern::AnyNormalResource),
            (Some(db), Some("")) => Ok(ResourcePattern::Database(db.to_string())),
            (Some(""), Some(coll)) => {
                Ok(ResourcePattern::CollectionInAnyDatabase(coll.to_string()))
            }
            (Some(db), Some(coll)) => Ok(ResourcePattern::ExactNamespace {
                db: db.to_string(),
                collection: coll.to_string(),
            }),
            _ => Err(format!("unrecognized resource pattern {doc}")),
        }
    }

    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();
        let mut put = |key: &str, value: Value| {
            doc.insert(key.to_string(), value);
        };
        match self {
            ResourcePattern::AnyResource => put("anyResource", Value::Bool(true)),
            ResourcePattern::Cluster => put("cluster", Value::Bool(true)),
            ResourcePattern::AnyNormalResource => {
                put("db", Value::from(""));
                put("collection", Value::from(""));
            }
            ResourcePattern::Database(db) => {
                put("db", Value::from(db.as_str()));
                put("collection", Value::from(""));
            }
            ResourcePattern::CollectionInAnyDatabase(coll) => {
                put("db", Value::from(""));
                put("collection", Value::from(coll.as_str()));
            }
            ResourcePattern::ExactNamespace { db, collection } => {
                put("db", Value::from(db.as_str()));
                put("collection", Value::from(collection.as_str()));
            }
        }
        Value::Object(doc)
    }

    /// True when this pattern covers collection `collection` of database `db`.
    ///
    /// `system.*` collections are only covered by `AnyResource` and an exact namespace.
    pub fn matches_namespace(&self, db: &str, collection: &str) -> bool {
        let system = collection.starts_with("system.");
        match self {
            ResourcePattern::AnyResource => true,
            ResourcePattern::Cluster => false,
            ResourcePattern::AnyNormalResource => !system,
            ResourcePattern::Database(d) => !system && d == db,
            ResourcePattern::CollectionInAnyDatabase(c) => !system && c == collection,
            ResourcePattern::ExactNamespace {
                db: d,
                collection: c,
            } => d == db && c == collection,
        }
    }
}

impl fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourcePattern::AnyResource => f.write_str("<any resource>"),
            ResourcePattern::Cluster => f.write_str("<cluster>"),
            ResourcePattern::AnyNormalResource => f.write_str("<all normal resources>"),
            ResourcePattern::Database(db) => write!(f, "<database {db}>"),
            ResourcePattern::CollectionInAnyDatabase(c) => write!(f, "<collection {c} in any db>"),
            ResourcePattern::ExactNamespace { db, collection } => write!(f, "{db}.{collection}"),
        }
    }
}

/// A resource pattern plus the actions allowed on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Privilege {
    pub resource: ResourcePattern,
    pub actions: BTreeSet<ActionType>,
}

/// A parsed privilege together with action names that were not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPrivilege {
    pub privilege: Privilege,
    pub unknown_actions: Vec<String>,
}

impl Privilege {
    pub fn new(resource: ResourcePattern, actions: impl IntoIterator<Item = ActionType>) -> Self {
        Self {
            resource,
            actions: actions.into_iter().collect(),
        }
    }

    /// Parses `{resource: {...}, actions: [...]}`.
    ///
    /// Unknown action names do not fail the parse; they are returned for reporting.
    pub fn from_document(doc: &Value) -> Result<ParsedPrivilege, String> {
        let obj = doc
            .as_object()
            .ok_or_else(|| format!("privilege must be a document, got {doc}"))?;
        let resource = ResourcePattern::from_document(
            obj.get("resource")
                .ok_or_else(|| "privilege is missing \"resource\"".to_string())?,
        )?;
        let names = obj
            .get("actions")
            .and_then(Value::as_array)
            .ok_or_else(|| "privilege is missing an \"actions\" array".to_string())?;

        let mut actions = BTreeSet::new();
        let mut unknown_actions = Vec::new();
        for name in names {
            let name = name
                .as_str()
                .ok_or_else(|| format!("action names must be strings, got {name}"))?;
            match name.parse::<ActionType>() {
                Ok(action) => {
                    actions.insert(action);
                }
                Err(unknown) => unknown_actions.push(unknown),
            }
        }
        Ok(ParsedPrivilege {
            privilege: Privilege { resource, actions },
            unknown_actions,
        })
    }

    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("resource".to_string(), self.resource.to_document());
        doc.insert(
            "actions".to_string(),
            Value::Array(
                self.actions
                    .iter()
                    .map(|a| Value::from(a.as_str()))
                    .collect(),
            ),
        );
        Value::Object(doc)
    }
}

/// Privileges merged per resource pattern.
///
/// Adding privileges is commutative: the final set does not depend on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivilegeSet {
    by_resource: BTreeMap<ResourcePattern, BTreeSet<ActionType>>,
}

impl PrivilegeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unions `privilege.actions` into the entry for its resource.
    pub fn add(&mut self, privilege: &Privilege) {
        if privilege.actions.is_empty() {
            // Keep the resource visible even when no recognized action remains.
            self.by_resource.entry(privilege.resource.clone()).or_default();
            return;
        }
        self.by_resource
            .entry(privilege.resource.clone())
            .or_default()
            .extend(privilege.actions.iter().copied());
    }

    pub fn add_all<'a>(&mut self, privileges: impl IntoIterator<Item = &'a Privilege>) {
        for privilege in privileges {
            self.add(privilege);
        }
    }

    pub fn merge(&mut self, other: &PrivilegeSet) {
        for (resource, actions) in &other.by_resource {
            self.by_resource
                .entry(resource.clone())
                .or_default()
                .extend(actions.iter().copied());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_resource.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_resource.len()
    }

    /// Actions granted on exactly this pattern.
    pub fn actions_for(&self, resource: &ResourcePattern) -> Option<&BTreeSet<ActionType>> {
        self.by_resource.get(resource)
    }

    /// True if any pattern covering `db.collection` grants `action`.
    pub fn allows_on_namespace(&self, db: &str, collection: &str, action: ActionType) -> bool {
        self.by_resource
            .iter()
            .any(|(resource, actions)| {
                actions.contains(&action) && resource.matches_namespace(db, collection)
            })
    }

    /// True if the cluster resource (or any resource) grants `action`.
    pub fn allows_on_cluster(&self, action: ActionType) -> bool {
        [ResourcePattern::Cluster, ResourcePattern::AnyResource]
            .iter()
            .any(|r| self.by_resource.get(r).is_some_and(|a| a.contains(&action)))
    }

    /// Merged privileges in resource order.
    pub fn privileges(&self) -> Vec<Privilege> {
        self.by_resource
            .iter()
            .map(|(resource, actions)| Privilege {
                resource: resource.clone(),
                actions: actions.clone(),
            })
            .collect()
    }

    pub fn to_document_array(&self) -> Value {
        Value::Array(self.privileges().iter().map(Privilege::to_document).collect())
    }
}

impl<'a> FromIterator<&'a Privilege> for PrivilegeSet {
    fn from_iter<I: IntoIterator<Item = &'a Privilege>>(iter: I) -> Self {
        let mut set = PrivilegeSet::new();
        set.add_all(iter);
        set
    }
}

//! Built-in roles.
//!
//! Built-in roles are never stored. They resolve from the static table below and may
//! grant other built-in roles on the same database.

use super::document::RoleDocument;
use super::names::RoleName;
use super::privilege::{ActionType, Privilege, ResourcePattern};

use ActionType::*;

const READ: &[ActionType] = &[Find, ListCollections, ListIndexes, CollStats, DbStats];

const READ_WRITE_EXTRA: &[ActionType] = &[
    Insert,
    Update,
    Remove,
    CreateCollection,
    DropCollection,
    CreateIndex,
    DropIndex,
    RenameCollectionSameDb,
];

const DB_ADMIN: &[ActionType] = &[
    CollStats,
    DbStats,
    ListCollections,
    ListIndexes,
    CreateCollection,
    DropCollection,
    CreateIndex,
    DropIndex,
    RenameCollectionSameDb,
    DropDatabase,
];

const USER_ADMIN: &[ActionType] = &[
    CreateUser,
    DropUser,
    ChangePassword,
    ChangeCustomData,
    GrantRole,
    RevokeRole,
    CreateRole,
    DropRole,
    ViewUser,
    ViewRole,
];

const CLUSTER_ADMIN: &[ActionType] = &[
    ListDatabases,
    ServerStatus,
    Shutdown,
    ReplSetGetStatus,
    KillOp,
    InProg,
];

/// Built-in roles available on every database.
const DATABASE_ROLES: &[&str] = &["read", "readWrite", "dbAdmin", "userAdmin", "dbOwner"];

/// Built-in roles that exist only on `admin`.
const ADMIN_ONLY_ROLES: &[&str] = &[
    "clusterAdmin",
    "readAnyDatabase",
    "readWriteAnyDatabase",
    "userAdminAnyDatabase",
    "dbAdminAnyDatabase",
    "root",
];

/// Returns true if `role` names a built-in role.
pub fn is_builtin_role(role: &RoleName) -> bool {
    DATABASE_ROLES.contains(&role.name.as_str())
        || (role.db == "admin" && ADMIN_ONLY_ROLES.contains(&role.name.as_str()))
}

fn privilege(resource: ResourcePattern, groups: &[&[ActionType]]) -> Privilege {
    Privilege::new(resource, groups.iter().flat_map(|g| g.iter().copied()))
}

/// Definition of a built-in role, or `None` when `role` is not built in.
pub fn builtin_role(role: &RoleName) -> Option<RoleDocument> {
    if !is_builtin_role(role) {
        return None;
    }
    let db = ResourcePattern::Database(role.db.clone());
    let any = ResourcePattern::AnyNormalResource;
    let list_databases = Privilege::new(ResourcePattern::Cluster, [ListDatabases]);
    let on_db = |name: &str| RoleName::new(name, role.db.as_str());

    let (privileges, roles) = match role.name.as_str() {
        "read" => (vec![privilege(db, &[READ])], vec![]),
        "readWrite" => (vec![privilege(db, &[READ, READ_WRITE_EXTRA])], vec![]),
        "dbAdmin" => (vec![privilege(db, &[DB_ADMIN])], vec![]),
        "userAdmin" => (vec![privilege(db, &[USER_ADMIN])], vec![]),
        "dbOwner" => (
            vec![],
            vec![on_db("readWrite"), on_db("dbAdmin"), on_db("userAdmin")],
        ),
        "clusterAdmin" => (
            vec![privilege(ResourcePattern::Cluster, &[CLUSTER_ADMIN])],
            vec![],
        ),
        "readAnyDatabase" => (vec![privilege(any, &[READ]), list_databases], vec![]),
        "readWriteAnyDatabase" => (
            vec![privilege(any, &[READ, READ_WRITE_EXTRA]), list_databases],
            vec![],
        ),
        "userAdminAnyDatabase" => (vec![privilege(any, &[USER_ADMIN]), list_databases], vec![]),
        "dbAdminAnyDatabase" => (vec![privilege(any, &[DB_ADMIN]), list_databases], vec![]),
        "root" => (
            vec![],
            vec![
                on_db("readWriteAnyDatabase"),
                on_db("dbAdminAnyDatabase"),
                on_db("userAdminAnyDatabase"),
                on_db("clusterAdmin"),
            ],
        ),
        _ => return None,
    };

    Some(RoleDocument {
        name: role.clone(),
        privileges,
        roles,
        unknown_actions: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_only_roles_do_not_exist_elsewhere() {
        assert!(is_builtin_role(&RoleName::new("root", "admin")));
        assert!(!is_builtin_role(&RoleName::new("root", "test")));
        assert!(is_builtin_role(&RoleName::new("read", "test")));
        assert!(builtin_role(&RoleName::new("readAnyDatabase", "test")).is_none());
        assert!(builtin_role(&RoleName::new("custom", "admin")).is_none());
    }

    #[test]
    fn test_db_owner_grants_same_database_roles() {
        let owner = builtin_role(&RoleName::new("dbOwner", "sales")).unwrap();
        assert!(owner.privileges.is_empty());
        assert_eq!(
            owner.roles,
            vec![
                RoleName::new("readWrite", "sales"),
                RoleName::new("dbAdmin", "sales"),
                RoleName::new("userAdmin", "sales"),
            ]
        );
    }

    #[test]
    fn test_read_write_is_superset_of_read() {
        let read = builtin_role(&RoleName::new("read", "t")).unwrap();
        let read_write = builtin_role(&RoleName::new("readWrite", "t")).unwrap();
        let read_actions = &read.privileges[0].actions;
        assert!(read_actions.is_subset(&read_write.privileges[0].actions));
        assert!(read_write.privileges[0].actions.contains(&ActionType::Insert));
    }
}

//! External state integration tests over the in-memory store.

use std::sync::{Arc, Mutex};

use authstate_domain::model::{RoleName, SchemaVersion, UserName};
use authstate_domain::DomainError;
use authstate_server::{
    AuthzExternalState, ExternalState, ExternalStateError, OpEntry, OpKind, OpObserver,
};
use authstate_storage::{Document, DocumentStore, MemoryDocumentStore, Namespace, WriteConcern};
use serde_json::{json, Value};

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

fn users() -> Namespace {
    Namespace::new("admin", "system.users")
}

fn roles() -> Namespace {
    Namespace::new("admin", "system.roles")
}

#[derive(Default)]
struct RecordingObserver {
    entries: Mutex<Vec<OpEntry>>,
}

impl RecordingObserver {
    fn kinds(&self) -> Vec<OpKind> {
        self.entries.lock().unwrap().iter().map(|e| e.kind).collect()
    }
}

impl OpObserver for RecordingObserver {
    fn on_op(&self, entry: &OpEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

async fn set_schema_version(store: &MemoryDocumentStore, version: i64) {
    store
        .update_one(
            &Namespace::new("admin", "system.version"),
            &doc(json!({"_id": "authSchema"})),
            &doc(json!({"$set": {"currentVersion": version}})),
            true,
            &WriteConcern::default(),
        )
        .await
        .unwrap();
}

/// Storage-tier state on a fresh store with the current schema and indexes in place.
async fn storage_state() -> (
    Arc<MemoryDocumentStore>,
    Arc<RecordingObserver>,
    AuthzExternalState<MemoryDocumentStore>,
) {
    let store = MemoryDocumentStore::new_shared();
    set_schema_version(&store, 2).await;
    let observer = Arc::new(RecordingObserver::default());
    let state = AuthzExternalState::for_storage_tier(Arc::clone(&store), observer.clone());
    state.initialize().await.unwrap();
    (store, observer, state)
}

// ========== Update Lock ==========

#[tokio::test]
async fn test_concurrent_acquire_admits_one_writer_per_tenant() {
    for router in [false, true] {
        let store = MemoryDocumentStore::new_shared();
        let state: Arc<dyn ExternalState> = if router {
            Arc::new(AuthzExternalState::for_router_tier(store, "router-1"))
        } else {
            Arc::new(AuthzExternalState::for_storage_tier(
                store,
                Arc::new(RecordingObserver::default()),
            ))
        };

        let mut handles = Vec::new();
        for i in 0..16 {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                state
                    .try_acquire_update_lock("tenant-a", &format!("writer {i}"))
                    .await
                    .unwrap()
            }));
        }
        let winners = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(winners, 1, "router tier: {router}");

        // Independent tenants do not contend.
        assert!(state
            .try_acquire_update_lock("tenant-b", "other")
            .await
            .unwrap());
        state.release_update_lock("tenant-a").await.unwrap();
        state.release_update_lock("tenant-b").await.unwrap();
        assert!(state
            .try_acquire_update_lock("tenant-a", "again")
            .await
            .unwrap());
    }
}

#[tokio::test]
async fn test_with_update_lock_releases_on_success_and_error() {
    let (_, _, state) = storage_state().await;

    let value = state
        .with_update_lock("t1", "createUser", || async { Ok(7) })
        .await
        .unwrap();
    assert_eq!(value, 7);

    let result: Result<(), _> = state
        .with_update_lock("t1", "createUser", || async {
            Err(ExternalStateError::DuplicateUser {
                user: "alice@test".to_string(),
            })
        })
        .await;
    assert!(matches!(result, Err(ExternalStateError::DuplicateUser { .. })));

    assert!(state.try_acquire_update_lock("t1", "check").await.unwrap());
    state.release_update_lock("t1").await.unwrap();
}

#[tokio::test]
async fn test_with_update_lock_reports_busy_without_running() {
    let (_, _, state) = storage_state().await;
    assert!(state.try_acquire_update_lock("t1", "holder").await.unwrap());

    let mut ran = false;
    let result = state
        .with_update_lock("t1", "second", || {
            ran = true;
            async { Ok(()) }
        })
        .await;

    assert!(matches!(result, Err(ExternalStateError::LockBusy { ref tenant }) if tenant == "t1"));
    assert!(!ran);
    state.release_update_lock("t1").await.unwrap();
}

#[tokio::test]
async fn test_with_update_lock_releases_when_operation_panics() {
    let (_, _, state) = storage_state().await;
    let state = Arc::new(state);

    let task_state = Arc::clone(&state);
    let handle = tokio::spawn(async move {
        task_state
            .with_update_lock("t1", "dropRole", || async {
                if true {
                    panic!("write sequence failed");
                }
                Ok::<_, ExternalStateError>(())
            })
            .await
    });

    assert!(handle.await.unwrap_err().is_panic());
    assert!(state.try_acquire_update_lock("t1", "after").await.unwrap());
    state.release_update_lock("t1").await.unwrap();
}

// ========== Reads and Descriptions ==========

#[tokio::test]
async fn test_authorization_version_defaults_to_legacy() {
    let store = MemoryDocumentStore::new_shared();
    let state = AuthzExternalState::for_storage_tier(
        Arc::clone(&store),
        Arc::new(RecordingObserver::default()),
    );

    assert_eq!(state.authorization_version().await.unwrap(), SchemaVersion::V1);

    set_schema_version(&store, 2).await;
    assert_eq!(state.authorization_version().await.unwrap(), SchemaVersion::V2);

    set_schema_version(&store, 9).await;
    assert!(matches!(
        state.authorization_version().await,
        Err(ExternalStateError::Domain(DomainError::UnsupportedSchemaVersion { version: 9 }))
    ));
}

#[tokio::test]
async fn test_describe_user_resolves_role_graph() {
    let (store, _, state) = storage_state().await;
    let wc = WriteConcern::default();
    state
        .insert_privilege_document(
            "test",
            doc(json!({
                "_id": "test.alice",
                "user": "alice",
                "db": "test",
                "credentials": {"SCRAM-SHA-1": {"salt": "c2FsdA=="}},
                "roles": [{"role": "auditor", "db": "admin"}]
            })),
            &wc,
        )
        .await
        .unwrap();
    store
        .insert(
            &roles(),
            doc(json!({
                "_id": "admin.auditor",
                "role": "auditor",
                "db": "admin",
                "privileges": [{"resource": {"cluster": true}, "actions": ["serverStatus"]}],
                "roles": [{"role": "read", "db": "logs"}, {"role": "gone", "db": "admin"}]
            })),
            &wc,
        )
        .await
        .unwrap();

    let description = state
        .describe_user(&UserName::new("alice", "test"))
        .await
        .unwrap();

    assert_eq!(description["user"], json!("alice"));
    assert_eq!(description["credentials"]["SCRAM-SHA-1"]["salt"], json!("c2FsdA=="));
    assert_eq!(description["roles"], json!([{"role": "auditor", "db": "admin"}]));
    assert_eq!(description["indirectRoles"], json!([{"role": "read", "db": "logs"}]));
    assert_eq!(
        description["warnings"],
        json!(["Could not find role: gone@admin"])
    );
    let privileges = description["privileges"].as_array().unwrap();
    assert!(privileges.contains(&json!({
        "resource": {"cluster": true},
        "actions": ["serverStatus"]
    })));
}

#[tokio::test]
async fn test_describe_missing_principals() {
    let (_, _, state) = storage_state().await;

    let err = state
        .describe_user(&UserName::new("nobody", "test"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(
        err,
        ExternalStateError::Domain(DomainError::UserNotFound { .. })
    ));

    let err = state
        .describe_role(&RoleName::new("nothing", "test"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExternalStateError::Domain(DomainError::RoleNotFound { .. })
    ));
}

#[tokio::test]
async fn test_describe_builtin_role() {
    let (_, _, state) = storage_state().await;

    let description = state
        .describe_role(&RoleName::new("dbOwner", "sales"))
        .await
        .unwrap();

    assert_eq!(description["role"], json!("dbOwner"));
    assert_eq!(description["db"], json!("sales"));
    assert_eq!(description["indirectRoles"], json!([]));
    assert!(description.get("warnings").is_none());
    assert_eq!(description["roles"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_legacy_documents_are_listed_and_described() {
    let store = MemoryDocumentStore::new_shared();
    let state = AuthzExternalState::for_storage_tier(
        Arc::clone(&store),
        Arc::new(RecordingObserver::default()),
    );
    assert!(!state.has_any_privilege_documents().await.unwrap());

    state
        .insert_privilege_document(
            "sales",
            doc(json!({"user": "bob", "pwd": "5f4dcc3b", "roles": ["read"]})),
            &WriteConcern::default(),
        )
        .await
        .unwrap();

    assert!(state.has_any_privilege_documents().await.unwrap());
    assert_eq!(state.get_all_database_names().await.unwrap(), vec!["sales"]);
    let legacy = state.get_all_v1_privilege_docs_for_db("sales").await.unwrap();
    assert_eq!(legacy.len(), 1);
    assert_eq!(legacy[0]["user"], json!("bob"));

    let raw = state
        .get_privilege_document(&UserName::new("bob", "sales"), SchemaVersion::V1)
        .await
        .unwrap();
    assert_eq!(raw["pwd"], json!("5f4dcc3b"));

    let description = state
        .describe_user(&UserName::new("bob", "sales"))
        .await
        .unwrap();
    assert_eq!(description["credentials"], json!({"MONGODB-CR": "5f4dcc3b"}));
    assert_eq!(description["roles"], json!([{"role": "read", "db": "sales"}]));
}

// ========== Writes ==========

#[tokio::test]
async fn test_duplicate_user_insert_is_rejected() {
    let (store, _, state) = storage_state().await;
    let wc = WriteConcern::default();
    let alice = json!({"user": "alice", "db": "test", "credentials": {}, "roles": []});

    state
        .insert_privilege_document("test", doc(alice.clone()), &wc)
        .await
        .unwrap();
    let mut second = doc(alice);
    second.insert("roles".to_string(), json!([{"role": "root", "db": "admin"}]));
    let err = state
        .insert_privilege_document("test", second, &wc)
        .await
        .unwrap_err();

    assert!(matches!(err, ExternalStateError::DuplicateUser { ref user } if user == "alice@test"));
    let stored = store
        .find_one(&users(), &doc(json!({"user": "alice"})))
        .await
        .unwrap();
    assert_eq!(stored["roles"], json!([]));
}

#[tokio::test]
async fn test_duplicate_legacy_user_insert_is_rejected() {
    let store = MemoryDocumentStore::new_shared();
    let state = AuthzExternalState::for_storage_tier(
        Arc::clone(&store),
        Arc::new(RecordingObserver::default()),
    );
    let wc = WriteConcern::default();

    state
        .insert_privilege_document("test", doc(json!({"user": "alice", "pwd": "h1"})), &wc)
        .await
        .unwrap();
    let err = state
        .insert_privilege_document("test", doc(json!({"user": "alice", "pwd": "h2"})), &wc)
        .await
        .unwrap_err();
    assert!(matches!(err, ExternalStateError::DuplicateUser { ref user } if user == "alice@test"));

    // Same name on another database is a different user.
    state
        .insert_privilege_document("sales", doc(json!({"user": "alice", "pwd": "h3"})), &wc)
        .await
        .unwrap();

    let legacy = state.get_all_v1_privilege_docs_for_db("test").await.unwrap();
    assert_eq!(legacy.len(), 1);
    assert_eq!(legacy[0]["pwd"], json!("h1"));
}

#[tokio::test]
async fn test_insert_privilege_document_fills_missing_db() {
    let (_, _, state) = storage_state().await;

    state
        .insert_privilege_document(
            "test",
            doc(json!({"user": "frank", "credentials": {}, "roles": []})),
            &WriteConcern::default(),
        )
        .await
        .unwrap();

    let description = state
        .describe_user(&UserName::new("frank", "test"))
        .await
        .unwrap();
    assert_eq!(description["db"], json!("test"));
}

#[tokio::test]
async fn test_update_privilege_document() {
    let (_, _, state) = storage_state().await;
    let wc = WriteConcern::default();
    let carol = UserName::new("carol", "test");

    let err = state
        .update_privilege_document(&carol, &doc(json!({"$set": {"customData": {}}})), &wc)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExternalStateError::Domain(DomainError::UserNotFound { .. })
    ));

    state
        .insert_privilege_document(
            "test",
            doc(json!({"user": "carol", "db": "test", "roles": []})),
            &wc,
        )
        .await
        .unwrap();
    state
        .update_privilege_document(
            &carol,
            &doc(json!({"$push": {"roles": {"role": "read", "db": "test"}}})),
            &wc,
        )
        .await
        .unwrap();

    let stored = state
        .get_privilege_document(&carol, SchemaVersion::V2)
        .await
        .unwrap();
    assert_eq!(stored["roles"], json!([{"role": "read", "db": "test"}]));
}

#[tokio::test]
async fn test_remove_privilege_documents_returns_count() {
    let (_, _, state) = storage_state().await;
    let wc = WriteConcern::default();
    for name in ["a", "b", "c"] {
        let db = if name == "c" { "other" } else { "test" };
        state
            .insert_privilege_document("test", doc(json!({"user": name, "db": db})), &wc)
            .await
            .unwrap();
    }

    let removed = state
        .remove_privilege_documents(&doc(json!({"db": "test"})), &wc)
        .await
        .unwrap();

    assert_eq!(removed, 2);
}

#[tokio::test]
async fn test_update_one_upsert_semantics() {
    let (_, _, state) = storage_state().await;
    let wc = WriteConcern::default();
    let query = doc(json!({"role": "auditor", "db": "admin"}));
    let update = doc(json!({"$set": {"privileges": [], "roles": []}}));

    let err = state
        .update_one(&roles(), &query, &update, false, &wc)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    state
        .update_one(&roles(), &query, &update, true, &wc)
        .await
        .unwrap();
    let upserted = state.find_one(&roles(), &query).await.unwrap();
    assert_eq!(upserted["role"], json!("auditor"));
    assert_eq!(upserted["privileges"], json!([]));
}

#[tokio::test]
async fn test_storage_tier_reports_applied_writes() {
    let (store, observer, state) = storage_state().await;
    let wc = WriteConcern::default();
    let scratch = Namespace::new("admin", "tempusers");
    let backup = Namespace::new("admin", "backupusers");

    state
        .insert(&scratch, doc(json!({"user": "x", "db": "test"})), &wc)
        .await
        .unwrap();
    let stored = store
        .find_one(&scratch, &doc(json!({"user": "x"})))
        .await
        .unwrap();
    // Failed and no-op writes are not reported.
    state
        .insert(&scratch, doc(json!({"_id": "fixed"})), &wc)
        .await
        .unwrap();
    assert!(state
        .insert(&scratch, doc(json!({"_id": "fixed"})), &wc)
        .await
        .is_err());
    let touched = state
        .update(
            &scratch,
            &doc(json!({"user": "nobody"})),
            &doc(json!({"$set": {"n": 1}})),
            false,
            true,
            &wc,
        )
        .await
        .unwrap();
    assert_eq!(touched, 0);

    state
        .update(
            &scratch,
            &doc(json!({})),
            &doc(json!({"$set": {"n": 1}})),
            false,
            true,
            &wc,
        )
        .await
        .unwrap();
    state.copy_collection(&scratch, &backup, &wc).await.unwrap();
    state
        .rename_collection(&backup, &Namespace::new("admin", "oldusers"), false, &wc)
        .await
        .unwrap();
    state
        .remove(&scratch, &doc(json!({"user": "x"})), &wc)
        .await
        .unwrap();
    state.drop_collection(&scratch, &wc).await.unwrap();

    assert_eq!(
        observer.kinds(),
        vec![
            // initialize
            OpKind::CreateIndex,
            OpKind::CreateIndex,
            OpKind::Insert,
            OpKind::Insert,
            OpKind::Update,
            OpKind::CopyCollection,
            OpKind::RenameCollection,
            OpKind::Remove,
            OpKind::DropCollection,
        ]
    );
    let entries = observer.entries.lock().unwrap();
    let inserted = entries[2].document.as_ref().unwrap();
    assert_eq!(inserted.get("_id"), stored.get("_id"));
    assert!(inserted["_id"].is_string());
    let update = &entries[4];
    assert_eq!(update.count, Some(2));
    assert_eq!(update.namespace, scratch);
    assert_eq!(entries[6].target, Some(Namespace::new("admin", "oldusers")));
}

#[tokio::test]
async fn test_router_tier_uses_store_lock_document() {
    let store = MemoryDocumentStore::new_shared();
    let router_a = AuthzExternalState::for_router_tier(Arc::clone(&store), "router-a");
    let router_b = AuthzExternalState::for_router_tier(Arc::clone(&store), "router-b");

    assert!(router_a
        .try_acquire_update_lock("t1", "grantRole")
        .await
        .unwrap());
    assert!(!router_b
        .try_acquire_update_lock("t1", "grantRole")
        .await
        .unwrap());

    let lock = store
        .find_one(
            &Namespace::new("config", "locks"),
            &doc(json!({"_id": "authzUpdate/t1"})),
        )
        .await
        .unwrap();
    assert_eq!(lock["holder"], json!("router-a"));

    router_a.release_update_lock("t1").await.unwrap();
    assert!(router_b
        .try_acquire_update_lock("t1", "grantRole")
        .await
        .unwrap());
    router_b.release_update_lock("t1").await.unwrap();
}

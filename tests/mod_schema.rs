mod common;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use wyvern_data::schema::{SCHEMA_COLLECTION, SCHEMA_ID};
use wyvern_data::seed::{USER_ACCOUNTS, UserAccount, UserSeed};
use wyvern_data::{
    DatabaseFacade, DbError, Filter, SchemaSeedCoordinator, SchemaState, SchemaVersion, SeedComponent, StoreError,
};

const DB: &str = "reviews";

fn v(text: &str) -> SchemaVersion {
    text.parse().unwrap()
}

/// Records every invocation into a shared journal.
struct Recording {
    name: &'static str,
    journal: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SeedComponent for Recording {
    fn name(&self) -> &str {
        self.name
    }

    async fn seed(&self, _db: &DatabaseFacade) -> Result<(), DbError> {
        self.journal.lock().push(self.name.to_string());
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl SeedComponent for Failing {
    fn name(&self) -> &str {
        "Broken"
    }

    async fn seed(&self, _db: &DatabaseFacade) -> Result<(), DbError> {
        Err(DbError::StoreOperationFailed(StoreError::Command("seed exploded".into())))
    }
}

fn users_at(version: &str) -> SchemaSeedCoordinator {
    SchemaSeedCoordinator::new(v(version)).with_component(Arc::new(UserSeed::default()))
}

#[tokio::test]
async fn first_run_creates_one_schema_document() {
    let (service, db) = common::facade(DB).await;
    let outcome = users_at("1.0.0.0").run(&db).await.unwrap();

    assert!(outcome.committed);
    assert_eq!(outcome.state.id, SCHEMA_ID);
    assert_eq!(outcome.state.version, "1.0.0.0");
    assert_eq!(outcome.state.seeded_components, ["Users"]);
    assert_eq!(outcome.state.revision, 1);
    assert!(outcome.state.updated_at().is_some());

    let stored = service.snapshot(DB, SCHEMA_COLLECTION);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get_str("_id").unwrap(), SCHEMA_ID);
    assert_eq!(stored[0].get_str("SchemaVersion").unwrap(), "1.0.0.0");
    assert_eq!(service.snapshot(DB, USER_ACCOUNTS).len(), 2);
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let (service, db) = common::facade(DB).await;
    let seeder = users_at("1.0.0.0");
    let first = seeder.run(&db).await.unwrap();
    let snapshot = service.snapshot(DB, SCHEMA_COLLECTION);

    let second = seeder.run(&db).await.unwrap();
    assert!(!second.committed);
    assert_eq!(second.state, first.state);
    assert_eq!(service.snapshot(DB, SCHEMA_COLLECTION), snapshot);
    assert_eq!(service.snapshot(DB, USER_ACCOUNTS).len(), 2);
}

#[tokio::test]
async fn newer_code_version_commits() {
    let (_service, db) = common::facade(DB).await;
    users_at("1.0.0.0").run(&db).await.unwrap();

    let outcome = users_at("1.1.0.0").run(&db).await.unwrap();
    assert!(outcome.committed);
    assert_eq!(outcome.state.version, "1.1.0.0");
    assert_eq!(outcome.state.revision, 2);
    assert_eq!(outcome.state.schema_version().unwrap(), v("1.1"));
}

#[tokio::test]
async fn older_code_leaves_newer_state_alone() {
    let (_service, db) = common::facade(DB).await;
    users_at("2.0.0.0").run(&db).await.unwrap();

    let outcome = users_at("1.9.9.9").run(&db).await.unwrap();
    assert!(!outcome.committed);
    assert_eq!(outcome.state.version, "2.0.0.0");
}

#[tokio::test]
async fn older_code_with_new_component_keeps_newer_version() {
    let (_service, db) = common::facade(DB).await;
    users_at("2.0.0.0").run(&db).await.unwrap();

    let journal = Arc::new(Mutex::new(Vec::new()));
    let seeder = users_at("1.0.0.0").with_component(Arc::new(Recording { name: "Intents", journal }));
    let outcome = seeder.run(&db).await.unwrap();
    assert!(outcome.committed);
    assert_eq!(outcome.state.version, "2.0.0.0");
    assert_eq!(outcome.state.seeded_components, ["Users", "Intents"]);

    let stored: Option<SchemaState> = db
        .read_first_or_default(SCHEMA_COLLECTION, &Filter::eq("_id", SCHEMA_ID).into())
        .await
        .unwrap();
    assert_eq!(stored.map(|s| s.version), Some("2.0.0.0".to_string()));
}

#[tokio::test]
async fn newly_registered_component_commits_and_merges() {
    let (_service, db) = common::facade(DB).await;
    users_at("1.0.0.0").run(&db).await.unwrap();

    let journal = Arc::new(Mutex::new(Vec::new()));
    let seeder = users_at("1.0.0.0").with_component(Arc::new(Recording { name: "Intents", journal: Arc::clone(&journal) }));
    let outcome = seeder.run(&db).await.unwrap();
    assert!(outcome.committed);
    assert_eq!(outcome.state.seeded_components, ["Users", "Intents"]);
    assert_eq!(outcome.state.revision, 2);
    assert_eq!(*journal.lock(), ["Intents"]);
}

#[tokio::test]
async fn stored_components_survive_a_smaller_registry() {
    let (_service, db) = common::facade(DB).await;
    let journal = Arc::new(Mutex::new(Vec::new()));
    SchemaSeedCoordinator::new(v("1.0"))
        .with_component(Arc::new(Recording { name: "A", journal: Arc::clone(&journal) }))
        .with_component(Arc::new(Recording { name: "B", journal: Arc::clone(&journal) }))
        .run(&db)
        .await
        .unwrap();

    let outcome = SchemaSeedCoordinator::new(v("1.1"))
        .with_component(Arc::new(Recording { name: "B", journal: Arc::clone(&journal) }))
        .run(&db)
        .await
        .unwrap();
    assert!(outcome.committed);
    assert_eq!(outcome.state.seeded_components, ["A", "B"]);
}

#[tokio::test]
async fn components_run_in_registration_order_every_pass() {
    let (_service, db) = common::facade(DB).await;
    let journal = Arc::new(Mutex::new(Vec::new()));
    let seeder = SchemaSeedCoordinator::new(v("1.0"))
        .with_component(Arc::new(Recording { name: "First", journal: Arc::clone(&journal) }))
        .with_component(Arc::new(Recording { name: "Second", journal: Arc::clone(&journal) }));
    assert_eq!(seeder.component_names(), ["First", "Second"]);

    seeder.run(&db).await.unwrap();
    seeder.run(&db).await.unwrap();
    assert_eq!(*journal.lock(), ["First", "Second", "First", "Second"]);
}

#[tokio::test]
async fn partially_recorded_state_is_completed() {
    let (_service, db) = common::facade(DB).await;
    db.create_collection(SCHEMA_COLLECTION).await.unwrap();
    let partial = SchemaState { version: "1.0.0.0".into(), revision: 4, ..SchemaState::default() };
    db.insert(SCHEMA_COLLECTION, &partial).await.unwrap();

    let outcome = users_at("1.0.0.0").run(&db).await.unwrap();
    assert!(outcome.committed);
    assert_eq!(outcome.state.seeded_components, ["Users"]);
    assert_eq!(outcome.state.revision, 5);
}

#[tokio::test]
async fn unreadable_stored_version_is_rewritten() {
    let (_service, db) = common::facade(DB).await;
    let garbled = SchemaState { version: "one point oh".into(), ..SchemaState::default() };
    db.insert(SCHEMA_COLLECTION, &garbled).await.unwrap();

    let outcome = users_at("1.0.0.0").run(&db).await.unwrap();
    assert!(outcome.committed);
    assert_eq!(outcome.state.version, "1.0.0.0");
}

#[tokio::test]
async fn failing_component_commits_nothing() {
    let (service, db) = common::facade(DB).await;
    let seeder = users_at("1.0.0.0").with_component(Arc::new(Failing));
    let err = seeder.run(&db).await.unwrap_err();
    assert!(matches!(err, DbError::StoreOperationFailed(StoreError::Command(_))));
    assert!(service.snapshot(DB, SCHEMA_COLLECTION).is_empty());
    // Earlier components already ran; their own checks make the retry safe.
    assert_eq!(service.snapshot(DB, USER_ACCOUNTS).len(), 2);
}

#[tokio::test]
async fn user_seed_restores_missing_role_without_duplicating() {
    let (service, db) = common::facade(DB).await;
    let mut danielle = UserAccount::new("Danielle", "Summers", "Miss", "Owner");
    danielle.user_role = None;
    danielle.email_address = Some("danielle@example.com".into());
    db.insert(USER_ACCOUNTS, &danielle).await.unwrap();

    users_at("1.0.0.0").run(&db).await.unwrap();

    let accounts = service.snapshot(DB, USER_ACCOUNTS);
    assert_eq!(accounts.len(), 2);
    let stored: UserAccount = bson::from_document(accounts[0].clone()).unwrap();
    assert_eq!(stored.first_name, "Danielle");
    assert_eq!(stored.user_role.map(|r| r.role_name), Some("Owner".to_string()));
    assert_eq!(stored.email_address.as_deref(), Some("danielle@example.com"));
}

#[tokio::test]
async fn user_seed_accepts_custom_accounts() {
    let (service, db) = common::facade(DB).await;
    let seed = UserSeed::with_accounts(vec![UserAccount::new("Kai", "Moss", "Mx", "Reviewer")]);
    assert_eq!(seed.accounts().len(), 1);
    SchemaSeedCoordinator::new(v("1.0")).with_component(Arc::new(seed)).run(&db).await.unwrap();

    let accounts = service.snapshot(DB, USER_ACCOUNTS);
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].get_str("UserName").unwrap(), "Kai");
    assert_eq!(accounts[0].get_document("UserRole").unwrap().get_str("RoleName").unwrap(), "Reviewer");
}

#[tokio::test]
async fn existing_schema_collection_is_reused() {
    let (_service, db) = common::facade(DB).await;
    db.create_collection(SCHEMA_COLLECTION).await.unwrap();
    let outcome = users_at("1.0.0.0").run(&db).await.unwrap();
    assert!(outcome.committed);
    assert_eq!(db.collection_names().await.unwrap().iter().filter(|c| *c == SCHEMA_COLLECTION).count(), 1);
}

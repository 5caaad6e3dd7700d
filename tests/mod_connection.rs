mod common;

use std::sync::Arc;
use std::time::Duration;
use wyvern_data::store::memory::MemoryService;
use wyvern_data::store::{OpenOptions, StoreConnector};
use wyvern_data::{ConnectionManager, ConnectionSettings, ConnectionState, Credential, DbError, Role, ServerAddress, StoreError};

#[tokio::test]
async fn connect_provisions_admin_principal_once() {
    let (service, connector) = common::service();
    let manager = ConnectionManager::new(Arc::clone(&connector), ConnectionSettings::default());
    manager.connect("localhost", 27017).await.unwrap();

    assert!(manager.is_connected());
    assert!(service.has_principal("admin", "GodMode"));
    assert_eq!(service.principal_roles("admin", "GodMode"), vec![Role::new("dbAdminAnyDatabase", "admin")]);
    assert_eq!(manager.address(), Some(ServerAddress::new("localhost", 27017).unwrap()));

    // A second manager finds the principal and authenticates with it.
    let other = ConnectionManager::new(connector, ConnectionSettings::default());
    other.connect("localhost", 27017).await.unwrap();
    assert!(other.is_connected());
}

#[tokio::test]
async fn second_connect_is_rejected_and_keeps_session() {
    let (service, manager) = common::connected_manager().await;
    let before = service.calls();

    assert!(matches!(manager.connect("localhost", 27017).await, Err(DbError::AlreadyConnected)));
    assert!(matches!(manager.connect("elsewhere", 1).await, Err(DbError::AlreadyConnected)));
    assert_eq!(service.calls(), before);
    assert!(manager.is_connected());
    assert_eq!(manager.address().map(|a| a.host), Some("localhost".to_string()));
    assert!(manager.get_database("reviews").is_ok());
}

#[tokio::test]
async fn blank_host_fails_before_any_io() {
    let (service, connector) = common::service();
    let manager = ConnectionManager::new(connector, ConnectionSettings::default());
    for host in ["", "   "] {
        assert!(matches!(manager.connect(host, 27017).await, Err(DbError::InvalidArgument(_))));
    }
    assert_eq!(service.calls(), 0);
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn get_database_requires_session_and_name() {
    let (service, connector) = common::service();
    let manager = ConnectionManager::new(connector, ConnectionSettings::default());
    assert!(matches!(manager.get_database("reviews"), Err(DbError::NotConnected)));

    manager.connect("localhost", 27017).await.unwrap();
    let before = service.calls();
    assert!(matches!(manager.get_database(""), Err(DbError::InvalidArgument(_))));
    assert!(matches!(manager.get_database(" \t"), Err(DbError::InvalidArgument(_))));
    manager.get_database("reviews").unwrap();
    assert_eq!(service.calls(), before);
}

#[tokio::test]
async fn database_handles_are_cached_per_name() {
    let (_service, manager) = common::connected_manager().await;
    let a = manager.get_database("reviews").unwrap();
    let b = manager.get_database("reviews").unwrap();
    let c = manager.get_database("archive").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(manager.cached_handles(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_lookups_share_one_handle() {
    let (_service, manager) = common::connected_manager().await;
    let manager = Arc::new(manager);
    let mut tasks = Vec::new();
    for _ in 0..16 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move { manager.get_database("shared").unwrap() }));
    }
    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }
    assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(manager.cached_handles(), 1);
}

#[tokio::test]
async fn unreachable_service_fails_and_allows_retry() {
    let (service, connector) = common::service();
    let manager = ConnectionManager::new(connector, ConnectionSettings::default());
    service.set_reachable(false);

    let err = manager.connect("localhost", 27017).await.unwrap_err();
    assert!(matches!(err, DbError::ConnectionFailed(StoreError::Unreachable(_))));
    assert!(!manager.is_connected());
    assert!(matches!(manager.get_database("reviews"), Err(DbError::NotConnected)));

    service.set_reachable(true);
    manager.connect("localhost", 27017).await.unwrap();
    assert!(manager.is_connected());
}

#[tokio::test]
async fn wrong_address_is_unreachable() {
    let (_service, connector) = common::service();
    let manager = ConnectionManager::new(connector, ConnectionSettings::default());
    let err = manager.connect("db.internal", 27018).await.unwrap_err();
    assert!(matches!(err.store_cause(), Some(StoreError::Unreachable(_))));
}

#[tokio::test]
async fn slow_service_times_out() {
    let (service, connector) = common::service();
    let settings = ConnectionSettings::default().with_timeouts(Duration::from_millis(50), Duration::from_millis(20));
    assert_eq!(settings.connect_deadline(), Duration::from_millis(50));
    let manager = ConnectionManager::new(connector, settings);
    service.set_latency(Duration::from_millis(200));

    let err = manager.connect("localhost", 27017).await.unwrap_err();
    assert!(matches!(err, DbError::ConnectionFailed(StoreError::Timeout(50))));
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn dropped_connect_can_be_retried() {
    let (service, connector) = common::service();
    let manager = ConnectionManager::new(connector, ConnectionSettings::default());
    service.set_latency(Duration::from_millis(200));

    let abandoned = tokio::time::timeout(Duration::from_millis(50), manager.connect("localhost", 27017)).await;
    assert!(abandoned.is_err());
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(matches!(manager.get_database("reviews"), Err(DbError::NotConnected)));

    service.set_latency(Duration::ZERO);
    manager.connect("localhost", 27017).await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert!(manager.get_database("reviews").is_ok());
}

#[tokio::test]
async fn dispose_during_connect_stays_disposed() {
    let (service, connector) = common::service();
    let manager = Arc::new(ConnectionManager::new(connector, ConnectionSettings::default()));
    service.set_latency(Duration::from_millis(50));

    let connecting = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.connect("localhost", 27017).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.dispose();

    assert!(matches!(connecting.await.unwrap(), Err(DbError::NotConnected)));
    assert_eq!(manager.state(), ConnectionState::Disposed);
    assert!(!manager.is_connected());
    assert_eq!(manager.address(), None);
    assert!(matches!(manager.connect("localhost", 27017).await, Err(DbError::AlreadyConnected)));
}

#[tokio::test]
async fn existing_principal_with_other_password_is_rejected() {
    let (service, connector) = common::service();
    let raw = connector
        .open(service.address(), &OpenOptions::default())
        .await
        .unwrap();
    raw.create_principal(&Credential::new("admin", "GodMode", "something-else"), &[])
        .await
        .unwrap();

    let manager = ConnectionManager::new(connector, ConnectionSettings::default());
    let err = manager.connect("localhost", 27017).await.unwrap_err();
    assert!(matches!(err, DbError::ConnectionFailed(StoreError::AuthenticationFailed(_))));
}

#[tokio::test]
async fn custom_admin_is_provisioned() {
    let service = MemoryService::new(ServerAddress::new("db.local", 4000).unwrap());
    let settings = ConnectionSettings::default().with_admin(Credential::new("ops", "robot", "s3cret"));
    let manager = ConnectionManager::new(Arc::new(service.connector()), settings);
    manager.connect("db.local", 4000).await.unwrap();
    assert!(service.has_principal("ops", "robot"));
    assert!(!service.has_principal("admin", "GodMode"));
}

#[tokio::test]
async fn dispose_ends_the_session() {
    let (_service, manager) = common::connected_manager().await;
    let handle = manager.get_database("reviews").unwrap();
    manager.dispose();

    assert!(!manager.is_connected());
    assert_eq!(manager.address(), None);
    assert_eq!(manager.cached_handles(), 0);
    assert!(matches!(manager.get_database("reviews"), Err(DbError::NotConnected)));
    assert!(matches!(manager.list_databases().await, Err(DbError::NotConnected)));
    assert!(matches!(manager.connect("localhost", 27017).await, Err(DbError::AlreadyConnected)));
    // Handles handed out earlier stay usable.
    assert!(handle.list_collection_names().await.is_ok());
}

#[tokio::test]
async fn list_databases_reports_databases_with_collections() {
    let (_service, manager) = common::connected_manager().await;
    assert!(matches!(
        ConnectionManager::new(common::service().1, ConnectionSettings::default()).list_databases().await,
        Err(DbError::NotConnected)
    ));

    let db = manager.get_database("reviews").unwrap();
    assert!(!manager.list_databases().await.unwrap().contains(&"reviews".to_string()));
    db.create_collection("Posts", &Default::default()).await.unwrap();
    assert!(manager.list_databases().await.unwrap().contains(&"reviews".to_string()));
}

mod common;

use common::Person;
use wyvern_data::{BlockingAccessController, DbError, FilterExpression};

#[test]
fn blocking_controller_drives_the_async_api() {
    let (service, connector) = common::service();
    let controller = BlockingAccessController::new(connector).unwrap();
    assert!(matches!(controller.context(), Err(DbError::NotConnected)));

    let outcome = controller.connect("localhost", 27017, "reviews").unwrap();
    assert!(outcome.committed);
    assert!(controller.is_connected());
    assert!(controller.list_databases().unwrap().contains(&"reviews".to_string()));
    assert!(controller.database_list_on_host("localhost", 27017).unwrap().contains(&"reviews".to_string()));

    let db = controller.context().unwrap();
    controller.block_on(db.insert("People", &Person::new("Ann", 30))).unwrap();
    let people: Vec<Person> = controller.block_on(db.read("People", &FilterExpression::all())).unwrap();
    assert_eq!(people.len(), 1);

    controller.switch_database("localhost", 27017, "archive").unwrap();
    assert_eq!(controller.inner().current_database().as_deref(), Some("archive"));

    controller.dispose();
    assert!(!controller.is_connected());
    assert!(service.has_principal("admin", "GodMode"));
}

#[test]
fn blocking_connect_with_config() {
    use wyvern_data::Settings;
    use wyvern_data::config::{DATABASE_KEY, HOST_KEY, PORT_KEY};

    let (_service, connector) = common::service();
    let controller = BlockingAccessController::new(connector).unwrap();
    let settings = Settings::new().with(HOST_KEY, "localhost").with(PORT_KEY, "27017").with(DATABASE_KEY, "cfg");
    controller.connect_with_config(&settings).unwrap();
    assert_eq!(controller.inner().current_database().as_deref(), Some("cfg"));
}

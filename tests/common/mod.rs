#![allow(dead_code)]

use bson::Bson;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use wyvern_data::store::memory::MemoryService;
use wyvern_data::store::StoreConnector;
use wyvern_data::{ConnectionManager, ConnectionSettings, DatabaseFacade};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Bson>,
    pub name: String,
    pub age: i32,
    #[serde(default)]
    pub reviews: Vec<String>,
}

impl Person {
    pub fn new(name: &str, age: i32) -> Self {
        Self { id: None, name: name.to_string(), age, reviews: Vec::new() }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(Bson::String(id.to_string()));
        self
    }

    pub fn with_reviews(mut self, reviews: &[&str]) -> Self {
        self.reviews = reviews.iter().map(|r| (*r).to_string()).collect();
        self
    }
}

pub fn service() -> (Arc<MemoryService>, Arc<dyn StoreConnector>) {
    let service = MemoryService::localhost();
    let connector: Arc<dyn StoreConnector> = Arc::new(service.connector());
    (service, connector)
}

pub async fn connected_manager() -> (Arc<MemoryService>, ConnectionManager) {
    let (service, connector) = service();
    let manager = ConnectionManager::new(connector, ConnectionSettings::default());
    manager.connect("localhost", 27017).await.unwrap();
    (service, manager)
}

pub async fn facade(database: &str) -> (Arc<MemoryService>, DatabaseFacade) {
    let (service, manager) = connected_manager().await;
    let db = DatabaseFacade::open(&manager, database).unwrap();
    (service, db)
}

//! MongoDB implementation of the store seam.

use crate::errors::StoreError;
use crate::query::{FindOptions, sort_to_document};
use crate::store::{
    CollectionOptions, OpenOptions, ReplaceOne, StoreClient, StoreConnector, StoreDatabase,
    WriteReport,
};
use crate::types::{Credential, Document, Role, ServerAddress};
use async_trait::async_trait;
use bson::{Bson, doc};
use futures::TryStreamExt;
use mongodb::options::{ClientOptions, Credential as DriverCredential, ServerAddress as DriverAddress};
use mongodb::{Client, Database};
use std::sync::Arc;

/// Opens driver clients. Client construction does no I/O; the driver connects on first use.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnector;

#[async_trait]
impl StoreConnector for MongoConnector {
    async fn open(
        &self,
        address: &ServerAddress,
        options: &OpenOptions,
    ) -> Result<Arc<dyn StoreClient>, StoreError> {
        let mut client_options = ClientOptions::default();
        client_options.hosts =
            vec![DriverAddress::Tcp { host: address.host.clone(), port: Some(address.port) }];
        client_options.connect_timeout = Some(options.connect_timeout);
        client_options.server_selection_timeout = Some(options.server_selection_timeout);
        client_options.max_pool_size = Some(options.max_pool_size);
        if let Some(credential) = &options.credential {
            let mut driver_credential = DriverCredential::default();
            driver_credential.username = Some(credential.username.clone());
            driver_credential.password = Some(credential.password.clone());
            driver_credential.source = Some(credential.source.clone());
            client_options.credential = Some(driver_credential);
        }
        let client = Client::with_options(client_options)?;
        Ok(Arc::new(MongoClient { client }))
    }
}

struct MongoClient {
    client: Client,
}

#[async_trait]
impl StoreClient for MongoClient {
    async fn probe(&self, database: &str, collection: &str) -> Result<(), StoreError> {
        self.client.database(database).collection::<Document>(collection).find_one(doc! {}).await?;
        Ok(())
    }

    async fn principal_exists(&self, source: &str, username: &str) -> Result<bool, StoreError> {
        let reply = self
            .client
            .database(source)
            .run_command(doc! { "usersInfo": { "user": username, "db": source } })
            .await?;
        Ok(reply.get_array("users").is_ok_and(|users| !users.is_empty()))
    }

    async fn create_principal(&self, credential: &Credential, roles: &[Role]) -> Result<(), StoreError> {
        let roles: Vec<Bson> =
            roles.iter().map(|r| Bson::Document(doc! { "role": r.role.as_str(), "db": r.db.as_str() })).collect();
        self.client
            .database(&credential.source)
            .run_command(doc! {
                "createUser": credential.username.as_str(),
                "pwd": credential.password.as_str(),
                "roles": roles,
            })
            .await?;
        Ok(())
    }

    async fn list_database_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.client.list_database_names().await?)
    }

    fn database(&self, name: &str) -> Arc<dyn StoreDatabase> {
        Arc::new(MongoDatabase { db: self.client.database(name), name: name.to_string() })
    }
}

struct MongoDatabase {
    db: Database,
    name: String,
}

fn as_count(reply: &Document, key: &str) -> u64 {
    match reply.get(key) {
        Some(Bson::Int32(n)) => u64::try_from(*n).unwrap_or(0),
        Some(Bson::Int64(n)) => u64::try_from(*n).unwrap_or(0),
        _ => 0,
    }
}

#[async_trait]
impl StoreDatabase for MongoDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_collection_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.db.list_collection_names().await?)
    }

    async fn create_collection(&self, name: &str, options: &CollectionOptions) -> Result<(), StoreError> {
        let mut action = self.db.create_collection(name);
        if options.capped {
            action = action.capped(true);
            if let Some(bytes) = options.max_bytes {
                action = action.size(bytes);
            }
            if let Some(max) = options.max_documents {
                action = action.max(max);
            }
        }
        action.await?;
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        self.db.collection::<Document>(name).drop().await?;
        Ok(())
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<Bson>, StoreError> {
        let result = self.db.collection::<Document>(collection).insert_many(documents).await?;
        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: &FindOptions,
    ) -> Result<Vec<Document>, StoreError> {
        let coll = self.db.collection::<Document>(collection);
        let mut action = coll.find(filter);
        if let Some(sort) = options.sort.as_deref().filter(|s| !s.is_empty()) {
            action = action.sort(sort_to_document(sort));
        }
        if let Some(limit) = options.limit {
            action = action.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        let cursor = action.await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        Ok(documents)
    }

    async fn count(&self, collection: &str, filter: Document) -> Result<u64, StoreError> {
        Ok(self.db.collection::<Document>(collection).count_documents(filter).await?)
    }

    async fn replace_many(&self, collection: &str, operations: Vec<ReplaceOne>) -> Result<WriteReport, StoreError> {
        if operations.is_empty() {
            return Ok(WriteReport { acknowledged: true, ..WriteReport::default() });
        }
        // One `update` command carries the whole batch.
        let updates: Vec<Bson> = operations
            .into_iter()
            .map(|op| {
                Bson::Document(doc! {
                    "q": op.filter,
                    "u": op.replacement,
                    "upsert": true,
                    "multi": false,
                })
            })
            .collect();
        let reply = self
            .db
            .run_command(doc! { "update": collection, "updates": updates, "ordered": true })
            .await?;
        if let Ok(errors) = reply.get_array("writeErrors") {
            if !errors.is_empty() {
                return Err(StoreError::WriteConflict(format!("{errors:?}")));
            }
        }
        let upserted = reply.get_array("upserted").map_or(0, |u| u.len() as u64);
        let ok = matches!(reply.get("ok"), Some(Bson::Double(v)) if *v == 1.0)
            || matches!(reply.get("ok"), Some(Bson::Int32(1)));
        Ok(WriteReport {
            acknowledged: ok,
            matched: as_count(&reply, "n").saturating_sub(upserted),
            modified: as_count(&reply, "nModified"),
            upserted,
        })
    }

    async fn delete(&self, collection: &str, filter: Document, many: bool) -> Result<u64, StoreError> {
        let coll = self.db.collection::<Document>(collection);
        let result = if many { coll.delete_many(filter).await? } else { coll.delete_one(filter).await? };
        Ok(result.deleted_count)
    }
}

//! In-process document service.
//!
//! Databases hold named collections of insertion-ordered documents. A database exists once it has
//! at least one collection. Every round trip is counted and subject to the reachability and latency
//! knobs, so tests can observe exactly when I/O would have happened.

use crate::errors::StoreError;
use crate::query::{Filter, FindOptions, compare_docs, eval_filter};
use crate::store::{
    CollectionOptions, OpenOptions, ReplaceOne, StoreClient, StoreConnector, StoreDatabase,
    WriteReport,
};
use crate::types::{Credential, Document, ID_FIELD, Role, ServerAddress};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use bson::Bson;
use bson::oid::ObjectId;
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

// Kept small: principals are verified once per client, but tests open many clients.
const KDF_MEMORY_KIB: u32 = 1024;
const KDF_T_COST: u32 = 1;

struct Principal {
    salt: [u8; 16],
    hash: [u8; 32],
    roles: Vec<Role>,
}

#[derive(Debug, Clone, Copy, Default)]
struct CappedBounds {
    max_documents: Option<u64>,
    max_bytes: Option<u64>,
}

#[derive(Default)]
struct MemCollection {
    documents: Vec<Document>,
    capped: Option<CappedBounds>,
}

impl MemCollection {
    fn with_options(options: &CollectionOptions) -> Self {
        let capped = options.capped.then_some(CappedBounds {
            max_documents: options.max_documents,
            max_bytes: options.max_bytes,
        });
        Self { documents: Vec::new(), capped }
    }

    // Oldest documents go first; the newest one always survives.
    fn evict(&mut self) {
        let Some(bounds) = self.capped else { return };
        let over = |docs: &[Document]| {
            let count = docs.len() as u64;
            let too_many = bounds.max_documents.is_some_and(|max| count > max);
            let too_big = bounds
                .max_bytes
                .is_some_and(|max| docs.iter().map(encoded_len).sum::<u64>() > max);
            too_many || too_big
        };
        while self.documents.len() > 1 && over(&self.documents) {
            self.documents.remove(0);
        }
    }

    fn position(&self, filter: &Filter) -> Option<usize> {
        self.documents.iter().position(|d| eval_filter(d, filter))
    }
}

fn encoded_len(doc: &Document) -> u64 {
    bson::to_vec(doc).map(|b| b.len() as u64).unwrap_or(0)
}

fn hash_secret(password: &str, salt: &[u8]) -> Result<[u8; 32], StoreError> {
    let params = Params::new(KDF_MEMORY_KIB, KDF_T_COST, 1, Some(32))
        .map_err(|e| StoreError::Command(format!("argon2 params: {e}")))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = [0u8; 32];
    argon
        .hash_password_into(password.as_bytes(), salt, &mut out)
        .map_err(|e| StoreError::Command(format!("argon2: {e}")))?;
    Ok(out)
}

/// Puts `_id` first, assigning a fresh `ObjectId` when the document has none.
fn with_identity(mut doc: Document, fallback: Option<Bson>) -> (Bson, Document) {
    let id = match doc.remove(ID_FIELD) {
        Some(Bson::Null) | None => fallback.unwrap_or_else(|| Bson::ObjectId(ObjectId::new())),
        Some(id) => id,
    };
    let mut out = Document::new();
    out.insert(ID_FIELD, id.clone());
    for (key, value) in doc {
        out.insert(key, value);
    }
    (id, out)
}

/// An upsert takes its identity from a plain `_id` equality in the filter, as the store does.
fn identity_from_filter(filter: &Document) -> Option<Bson> {
    match filter.get(ID_FIELD) {
        None | Some(Bson::Null) => None,
        Some(Bson::Document(d)) if d.keys().any(|k| k.starts_with('$')) => None,
        Some(v) => Some(v.clone()),
    }
}

/// An in-process document service bound to one address.
pub struct MemoryService {
    address: ServerAddress,
    databases: RwLock<HashMap<String, HashMap<String, MemCollection>>>,
    principals: RwLock<HashMap<(String, String), Principal>>,
    calls: AtomicU64,
    reachable: AtomicBool,
    latency_ms: AtomicU64,
}

impl std::fmt::Debug for MemoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryService")
            .field("address", &self.address)
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl MemoryService {
    #[must_use]
    pub fn new(address: ServerAddress) -> Arc<Self> {
        Arc::new(Self {
            address,
            databases: RwLock::new(HashMap::new()),
            principals: RwLock::new(HashMap::new()),
            calls: AtomicU64::new(0),
            reachable: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        })
    }

    /// A service answering on `localhost:27017`.
    #[must_use]
    pub fn localhost() -> Arc<Self> {
        Self::new(ServerAddress { host: "localhost".into(), port: 27017 })
    }

    #[must_use]
    pub fn connector(self: &Arc<Self>) -> MemoryConnector {
        MemoryConnector { service: Arc::clone(self) }
    }

    #[must_use]
    pub const fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Number of round trips served (or refused) so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay applied to every round trip.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    pub fn has_principal(&self, source: &str, username: &str) -> bool {
        self.principals.read().contains_key(&(source.to_string(), username.to_string()))
    }

    pub fn principal_roles(&self, source: &str, username: &str) -> Vec<Role> {
        self.principals
            .read()
            .get(&(source.to_string(), username.to_string()))
            .map(|p| p.roles.clone())
            .unwrap_or_default()
    }

    /// Direct, uncounted read of a collection's contents.
    pub fn snapshot(&self, database: &str, collection: &str) -> Vec<Document> {
        self.databases
            .read()
            .get(database)
            .and_then(|db| db.get(collection))
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    async fn round_trip(&self, target: &ServerAddress) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.reachable.load(Ordering::SeqCst) || *target != self.address {
            return Err(StoreError::Unreachable(target.to_string()));
        }
        Ok(())
    }

    fn verify(&self, credential: &Credential) -> Result<(), StoreError> {
        let denied = || StoreError::AuthenticationFailed(credential.username.clone());
        let (salt, expected) = {
            let principals = self.principals.read();
            let key = (credential.source.clone(), credential.username.clone());
            let principal = principals.get(&key).ok_or_else(denied)?;
            (principal.salt, principal.hash)
        };
        if hash_secret(&credential.password, &salt)? == expected {
            Ok(())
        } else {
            Err(denied())
        }
    }

    fn insert_principal(&self, credential: &Credential, roles: &[Role]) -> Result<(), StoreError> {
        let key = (credential.source.clone(), credential.username.clone());
        if self.principals.read().contains_key(&key) {
            return Err(StoreError::Command(format!(
                "user \"{}@{}\" already exists",
                credential.username, credential.source
            )));
        }
        let mut salt = [0u8; 16];
        rand::rng().fill_bytes(&mut salt);
        let hash = hash_secret(&credential.password, &salt)?;
        self.principals.write().insert(key, Principal { salt, hash, roles: roles.to_vec() });
        Ok(())
    }
}

/// Opens clients against one [`MemoryService`].
#[derive(Clone)]
pub struct MemoryConnector {
    service: Arc<MemoryService>,
}

impl MemoryConnector {
    #[must_use]
    pub fn service(&self) -> &Arc<MemoryService> {
        &self.service
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn open(
        &self,
        address: &ServerAddress,
        options: &OpenOptions,
    ) -> Result<Arc<dyn StoreClient>, StoreError> {
        Ok(Arc::new(MemoryClient {
            shared: Arc::new(ClientShared {
                service: Arc::clone(&self.service),
                target: address.clone(),
                credential: options.credential.clone(),
                verified: Mutex::new(false),
            }),
        }))
    }
}

struct ClientShared {
    service: Arc<MemoryService>,
    target: ServerAddress,
    credential: Option<Credential>,
    verified: Mutex<bool>,
}

impl ClientShared {
    /// One counted round trip, authenticating lazily on the first one.
    async fn enter(&self) -> Result<&MemoryService, StoreError> {
        self.service.round_trip(&self.target).await?;
        if let Some(credential) = &self.credential {
            let mut verified = self.verified.lock();
            if !*verified {
                self.service.verify(credential)?;
                *verified = true;
            }
        }
        Ok(&self.service)
    }
}

struct MemoryClient {
    shared: Arc<ClientShared>,
}

#[async_trait]
impl StoreClient for MemoryClient {
    async fn probe(&self, database: &str, collection: &str) -> Result<(), StoreError> {
        let service = self.shared.enter().await?;
        let _first = service
            .databases
            .read()
            .get(database)
            .and_then(|db| db.get(collection))
            .and_then(|c| c.documents.first().cloned());
        Ok(())
    }

    async fn principal_exists(&self, source: &str, username: &str) -> Result<bool, StoreError> {
        let service = self.shared.enter().await?;
        Ok(service.has_principal(source, username))
    }

    async fn create_principal(&self, credential: &Credential, roles: &[Role]) -> Result<(), StoreError> {
        let service = self.shared.enter().await?;
        service.insert_principal(credential, roles)
    }

    async fn list_database_names(&self) -> Result<Vec<String>, StoreError> {
        let service = self.shared.enter().await?;
        let mut names: Vec<String> = service
            .databases
            .read()
            .iter()
            .filter(|(_, collections)| !collections.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    fn database(&self, name: &str) -> Arc<dyn StoreDatabase> {
        Arc::new(MemoryDatabase { shared: Arc::clone(&self.shared), name: name.to_string() })
    }
}

struct MemoryDatabase {
    shared: Arc<ClientShared>,
    name: String,
}

impl MemoryDatabase {
    fn with_collection<R>(
        service: &MemoryService,
        database: &str,
        collection: &str,
        f: impl FnOnce(&mut MemCollection) -> R,
    ) -> R {
        let mut databases = service.databases.write();
        let coll = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        f(coll)
    }

    fn read_collection<R>(
        service: &MemoryService,
        database: &str,
        collection: &str,
        f: impl FnOnce(&[Document]) -> R,
    ) -> R {
        let databases = service.databases.read();
        let docs = databases
            .get(database)
            .and_then(|db| db.get(collection))
            .map_or(&[][..], |c| c.documents.as_slice());
        f(docs)
    }
}

#[async_trait]
impl StoreDatabase for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_collection_names(&self) -> Result<Vec<String>, StoreError> {
        let service = self.shared.enter().await?;
        let mut names: Vec<String> = service
            .databases
            .read()
            .get(&self.name)
            .map(|db| db.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    async fn create_collection(&self, name: &str, options: &CollectionOptions) -> Result<(), StoreError> {
        let service = self.shared.enter().await?;
        let mut databases = service.databases.write();
        let db = databases.entry(self.name.clone()).or_default();
        if db.contains_key(name) {
            return Err(StoreError::Command(format!("collection '{}.{name}' already exists", self.name)));
        }
        db.insert(name.to_string(), MemCollection::with_options(options));
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        let service = self.shared.enter().await?;
        let mut databases = service.databases.write();
        if let Some(db) = databases.get_mut(&self.name) {
            db.remove(name);
        }
        Ok(())
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<Bson>, StoreError> {
        let service = self.shared.enter().await?;
        Self::with_collection(service, &self.name, collection, |coll| {
            let mut ids = Vec::with_capacity(documents.len());
            for doc in documents {
                let (id, doc) = with_identity(doc, None);
                let key = Filter::eq(ID_FIELD, id.clone());
                if coll.position(&key).is_some() {
                    return Err(StoreError::WriteConflict(format!("duplicate key {ID_FIELD}: {id}")));
                }
                coll.documents.push(doc);
                coll.evict();
                ids.push(id);
            }
            Ok(ids)
        })
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: &FindOptions,
    ) -> Result<Vec<Document>, StoreError> {
        let service = self.shared.enter().await?;
        let filter = Filter::from_document(&filter)?;
        let mut hits = Self::read_collection(service, &self.name, collection, |docs| {
            docs.iter().filter(|d| eval_filter(d, &filter)).cloned().collect::<Vec<_>>()
        });
        if let Some(sort) = options.sort.as_deref().filter(|s| !s.is_empty()) {
            hits.sort_by(|a, b| compare_docs(a, b, sort));
        }
        if let Some(limit) = options.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn count(&self, collection: &str, filter: Document) -> Result<u64, StoreError> {
        let service = self.shared.enter().await?;
        let filter = Filter::from_document(&filter)?;
        Ok(Self::read_collection(service, &self.name, collection, |docs| {
            docs.iter().filter(|d| eval_filter(d, &filter)).count() as u64
        }))
    }

    async fn replace_many(&self, collection: &str, operations: Vec<ReplaceOne>) -> Result<WriteReport, StoreError> {
        let parsed = operations
            .into_iter()
            .map(|op| Filter::from_document(&op.filter).map(|f| (f, op)))
            .collect::<Result<Vec<_>, _>>()?;
        let service = self.shared.enter().await?;
        Self::with_collection(service, &self.name, collection, |coll| {
            let mut report = WriteReport { acknowledged: true, ..WriteReport::default() };
            for (filter, op) in parsed {
                if let Some(idx) = coll.position(&filter) {
                    let existing = coll.documents[idx].get(ID_FIELD).cloned();
                    let (id, replacement) = with_identity(op.replacement, existing.clone());
                    if existing.as_ref() != Some(&id) {
                        return Err(StoreError::WriteConflict(format!(
                            "replacement would change immutable field {ID_FIELD}"
                        )));
                    }
                    report.matched += 1;
                    if coll.documents[idx] != replacement {
                        coll.documents[idx] = replacement;
                        report.modified += 1;
                    }
                } else {
                    let (_, doc) = with_identity(op.replacement, identity_from_filter(&op.filter));
                    coll.documents.push(doc);
                    coll.evict();
                    report.upserted += 1;
                }
            }
            Ok(report)
        })
    }

    async fn delete(&self, collection: &str, filter: Document, many: bool) -> Result<u64, StoreError> {
        let service = self.shared.enter().await?;
        let filter = Filter::from_document(&filter)?;
        let mut databases = service.databases.write();
        let Some(coll) = databases.get_mut(&self.name).and_then(|db| db.get_mut(collection)) else {
            return Ok(0);
        };
        if many {
            let before = coll.documents.len();
            coll.documents.retain(|d| !eval_filter(d, &filter));
            Ok((before - coll.documents.len()) as u64)
        } else if let Some(idx) = coll.position(&filter) {
            coll.documents.remove(idx);
            Ok(1)
        } else {
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn local() -> ServerAddress {
        ServerAddress { host: "localhost".into(), port: 27017 }
    }

    #[tokio::test]
    async fn capped_collection_evicts_oldest() {
        let service = MemoryService::localhost();
        let client = service.connector().open(&local(), &OpenOptions::default()).await.unwrap();
        let db = client.database("t");
        db.create_collection("log", &CollectionOptions::capped(2, 1 << 20)).await.unwrap();
        for i in 0..4 {
            db.insert_many("log", vec![doc! { "n": i }]).await.unwrap();
        }
        let ns: Vec<i32> = service
            .snapshot("t", "log")
            .iter()
            .map(|d| d.get_i32("n").unwrap())
            .collect();
        assert_eq!(ns, vec![2, 3]);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_on_first_use() {
        let service = MemoryService::localhost();
        let admin = Credential::new("admin", "root", "secret");
        let anon = service.connector().open(&local(), &OpenOptions::default()).await.unwrap();
        anon.create_principal(&admin, &[Role::new("root", "admin")]).await.unwrap();

        let bad = OpenOptions {
            credential: Some(Credential::new("admin", "root", "wrong")),
            ..OpenOptions::default()
        };
        let client = service.connector().open(&local(), &bad).await.unwrap();
        let err = client.probe("local", "startup_log").await.unwrap_err();
        assert!(matches!(err, StoreError::AuthenticationFailed(u) if u == "root"));

        let good = OpenOptions { credential: Some(admin), ..OpenOptions::default() };
        let client = service.connector().open(&local(), &good).await.unwrap();
        client.probe("local", "startup_log").await.unwrap();
    }

    #[tokio::test]
    async fn upsert_takes_identity_from_filter() {
        let service = MemoryService::localhost();
        let client = service.connector().open(&local(), &OpenOptions::default()).await.unwrap();
        let db = client.database("t");
        let op = ReplaceOne { filter: doc! { "_id": "k" }, replacement: doc! { "v": 1 } };
        let report = db.replace_many("c", vec![op]).await.unwrap();
        assert_eq!(report.upserted, 1);
        assert_eq!(service.snapshot("t", "c"), vec![doc! { "_id": "k", "v": 1 }]);
    }

    #[tokio::test]
    async fn opening_a_client_is_not_a_round_trip() {
        let service = MemoryService::localhost();
        let _client = service.connector().open(&local(), &OpenOptions::default()).await.unwrap();
        assert_eq!(service.calls(), 0);
    }
}

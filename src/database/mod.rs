//! Typed CRUD over the collections of one database.
//!
//! Every method checks its arguments before touching the store: blank names, empty batches and
//! badly shaped native filter text fail with `InvalidArgument` (or `StoreOperationFailed` for text
//! that is not a filter document) without a single round trip. Failures reported by the store,
//! including operators it does not support, come back as `StoreOperationFailed` with the store's
//! cause attached.

mod upsert;

pub use upsert::{derive_upsert, has_identity};

use crate::connection::{ConnectionManager, DatabaseHandle};
use crate::errors::{DbError, StoreError};
use crate::query::{FilterExpression, FindOptions, NativeFilter, Query, SortExpression};
use crate::store::{CollectionOptions, WriteReport};
use crate::types::{Document, ID_FIELD, guard_name};
use bson::{Bson, doc};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Bytes reserved per document when sizing a capped collection.
pub const CAPPED_BYTES_PER_DOCUMENT: u64 = 256;

// Identities per `$in` when deleting by in-process predicate.
const DELETE_BATCH: usize = 1000;

fn failed<'a>(op: &'static str, collection: &'a str) -> impl FnOnce(StoreError) -> DbError + 'a {
    move |e| {
        log::warn!("{op} on '{collection}' failed: {e}");
        DbError::StoreOperationFailed(e)
    }
}

fn to_document<T: Serialize>(item: &T) -> Result<Document, DbError> {
    bson::to_document(item).map_err(|e| {
        log::error!("entity serialization failed: {e}");
        DbError::from(e)
    })
}

fn acknowledged(report: WriteReport, collection: &str) -> Result<WriteReport, DbError> {
    if report.acknowledged {
        Ok(report)
    } else {
        Err(DbError::StoreOperationFailed(StoreError::NotAcknowledged(collection.to_string())))
    }
}

#[derive(Clone)]
pub struct DatabaseFacade {
    handle: DatabaseHandle,
}

impl std::fmt::Debug for DatabaseFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseFacade").field("database", &self.handle.name()).finish()
    }
}

impl DatabaseFacade {
    #[must_use]
    pub fn new(handle: DatabaseHandle) -> Self {
        Self { handle }
    }

    /// Resolves `database` through the manager's handle cache.
    ///
    /// # Errors
    /// `NotConnected` or `InvalidArgument`, see [`ConnectionManager::get_database`].
    pub fn open(manager: &ConnectionManager, database: &str) -> Result<Self, DbError> {
        manager.get_database(database).map(Self::new)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    // ---- collections -------------------------------------------------------------------------

    pub async fn collection_names(&self) -> Result<Vec<String>, DbError> {
        self.handle.list_collection_names().await.map_err(failed("list collections", self.name()))
    }

    pub async fn create_collection(&self, name: &str) -> Result<(), DbError> {
        guard_name(name, "collection name")?;
        self.handle
            .create_collection(name, &CollectionOptions::default())
            .await
            .map_err(failed("create collection", name))
    }

    /// Creates a capped collection bounded to `max_documents`, with a byte cap of
    /// `max_documents * 256`. The byte figure is a placeholder, not a measured document size.
    pub async fn create_capped_collection(&self, name: &str, max_documents: u64) -> Result<(), DbError> {
        guard_name(name, "collection name")?;
        if max_documents == 0 {
            return Err(DbError::invalid_argument("max documents"));
        }
        let max_bytes = max_documents.saturating_mul(CAPPED_BYTES_PER_DOCUMENT);
        self.handle
            .create_collection(name, &CollectionOptions::capped(max_documents, max_bytes))
            .await
            .map_err(failed("create capped collection", name))
    }

    /// Dropping a collection that does not exist succeeds.
    pub async fn drop_collection(&self, name: &str) -> Result<(), DbError> {
        guard_name(name, "collection name")?;
        self.handle.drop_collection(name).await.map_err(failed("drop collection", name))
    }

    /// Not implemented: arguments are checked, nothing is sent to the store.
    pub async fn create_index(&self, collection: &str, field: &str, ascending: bool) -> Result<(), DbError> {
        guard_name(collection, "collection name")?;
        guard_name(field, "field")?;
        log::debug!(
            "create_index({collection}.{field}, {}) ignored: index management is not implemented",
            if ascending { "asc" } else { "desc" }
        );
        Ok(())
    }

    // ---- inserts ------------------------------------------------------------------------------

    /// Appends one entity. Returns the stored identity.
    pub async fn insert<T: Serialize>(&self, collection: &str, item: &T) -> Result<Bson, DbError> {
        guard_name(collection, "collection name")?;
        let document = to_document(item)?;
        let mut ids = self
            .handle
            .insert_many(collection, vec![document])
            .await
            .map_err(failed("insert", collection))?;
        ids.pop().ok_or_else(|| {
            DbError::StoreOperationFailed(StoreError::NotAcknowledged(collection.to_string()))
        })
    }

    pub async fn insert_many<T: Serialize>(&self, collection: &str, items: &[T]) -> Result<Vec<Bson>, DbError> {
        guard_name(collection, "collection name")?;
        if items.is_empty() {
            return Err(DbError::invalid_argument("items"));
        }
        let documents = items.iter().map(to_document).collect::<Result<Vec<_>, _>>()?;
        self.handle.insert_many(collection, documents).await.map_err(failed("insert many", collection))
    }

    // ---- reads --------------------------------------------------------------------------------

    /// Reads every entity matching `filter`, in store order.
    pub async fn read<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: &FilterExpression<T>,
    ) -> Result<Vec<T>, DbError> {
        self.read_query(collection, &Query::new(filter.clone())).await
    }

    /// Reads with store-native filter text, validated before anything is sent.
    pub async fn read_native<T: DeserializeOwned>(&self, collection: &str, filter: &str) -> Result<Vec<T>, DbError> {
        guard_name(collection, "collection name")?;
        let filter = FilterExpression::native(filter)?;
        self.read_query(collection, &Query::new(filter)).await
    }

    /// Reads with store-native filter and sort text and an optional result cap.
    pub async fn read_sorted<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: &str,
        sort: &str,
        limit: Option<usize>,
    ) -> Result<Vec<T>, DbError> {
        guard_name(collection, "collection name")?;
        let mut query = Query::new(FilterExpression::native(filter)?).sorted(SortExpression::native(sort)?);
        query.limit = limit;
        self.read_query(collection, &query).await
    }

    /// The single execution path behind every read.
    ///
    /// Native filters and sorts run in the store. In-process predicates and comparators run
    /// here, over the documents the store returned. The limit is pushed down only when nothing is
    /// filtered or reordered afterwards.
    pub async fn read_query<T: DeserializeOwned>(&self, collection: &str, query: &Query<T>) -> Result<Vec<T>, DbError> {
        guard_name(collection, "collection name")?;
        if query.limit == Some(0) {
            return Err(DbError::invalid_argument("limit"));
        }
        let (store_sort, comparator) = match &query.sort {
            Some(SortExpression::Native(sort)) => (Some(sort.specs().to_vec()), None),
            Some(SortExpression::By(comparator)) => (None, Some(comparator.clone())),
            None => (None, None),
        };
        let push_limit = query.filter.is_native() && comparator.is_none();
        let options = FindOptions { sort: store_sort, limit: query.limit.filter(|_| push_limit) };

        let documents = self
            .handle
            .find(collection, query.filter.store_filter(), &options)
            .await
            .map_err(failed("read", collection))?;

        let mut items = Vec::with_capacity(documents.len());
        for document in documents {
            let item: T = bson::from_document(document)?;
            if query.filter.accepts(&item) {
                items.push(item);
            }
        }
        if let Some(comparator) = comparator {
            items.sort_by(|a, b| comparator(a, b));
        }
        if let Some(limit) = query.limit {
            items.truncate(limit);
        }
        log::debug!("read {} item(s) from '{collection}'", items.len());
        Ok(items)
    }

    /// Reads matches and maps each through `projection`.
    pub async fn read_select<T, R, F>(
        &self,
        collection: &str,
        filter: &FilterExpression<T>,
        projection: F,
    ) -> Result<Vec<R>, DbError>
    where
        T: DeserializeOwned,
        F: Fn(T) -> R,
    {
        Ok(self.read(collection, filter).await?.into_iter().map(projection).collect())
    }

    /// First match, or `None`. Never an error for "not found".
    pub async fn read_first_or_default<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: &FilterExpression<T>,
    ) -> Result<Option<T>, DbError> {
        let query = Query::new(filter.clone()).limit(1);
        Ok(self.read_query(collection, &query).await?.into_iter().next())
    }

    pub async fn read_first_or_default_select<T, R, F>(
        &self,
        collection: &str,
        filter: &FilterExpression<T>,
        projection: F,
    ) -> Result<Option<R>, DbError>
    where
        T: DeserializeOwned,
        F: FnOnce(T) -> R,
    {
        Ok(self.read_first_or_default(collection, filter).await?.map(projection))
    }

    /// Selects entities with `filter`, expands each through `flatten` and concatenates the
    /// results in match order.
    pub async fn read_many<T, R, I, F>(
        &self,
        collection: &str,
        filter: &FilterExpression<T>,
        flatten: F,
    ) -> Result<Vec<R>, DbError>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = R>,
        F: Fn(T) -> I,
    {
        Ok(self.read(collection, filter).await?.into_iter().flat_map(flatten).collect())
    }

    /// Exact number of matches.
    pub async fn count<T: DeserializeOwned>(&self, collection: &str, filter: &FilterExpression<T>) -> Result<u64, DbError> {
        guard_name(collection, "collection name")?;
        match filter {
            FilterExpression::Native(native) => self
                .handle
                .count(collection, native.document().clone())
                .await
                .map_err(failed("count", collection)),
            FilterExpression::Where(_) => Ok(self.read(collection, filter).await?.len() as u64),
        }
    }

    // ---- writes -------------------------------------------------------------------------------

    /// Upserts one entity; see [`derive_upsert`] for how the target document is chosen.
    pub async fn write<T: Serialize>(&self, collection: &str, item: &T) -> Result<WriteReport, DbError> {
        guard_name(collection, "collection name")?;
        let operation = derive_upsert(to_document(item)?);
        let report = self
            .handle
            .replace_many(collection, vec![operation])
            .await
            .map_err(failed("write", collection))?;
        acknowledged(report, collection)
    }

    /// Upserts every entity in one batch. The batch must be acknowledged.
    pub async fn write_many<T: Serialize>(&self, collection: &str, items: &[T]) -> Result<WriteReport, DbError> {
        guard_name(collection, "collection name")?;
        if items.is_empty() {
            return Err(DbError::invalid_argument("items"));
        }
        let operations =
            items.iter().map(|item| to_document(item).map(derive_upsert)).collect::<Result<Vec<_>, _>>()?;
        let report = self
            .handle
            .replace_many(collection, operations)
            .await
            .map_err(failed("write many", collection))?;
        log::debug!(
            "write many '{collection}': matched {}, modified {}, upserted {}",
            report.matched,
            report.modified,
            report.upserted
        );
        acknowledged(report, collection)
    }

    // ---- deletes ------------------------------------------------------------------------------

    /// Deletes the document with the item's identity. Succeeds when nothing matches.
    pub async fn delete<T: Serialize>(&self, collection: &str, item: &T) -> Result<u64, DbError> {
        guard_name(collection, "collection name")?;
        let document = to_document(item)?;
        if !has_identity(&document) {
            return Err(DbError::invalid_argument("item identity"));
        }
        let id = document.get(ID_FIELD).cloned().unwrap_or(Bson::Null);
        self.handle
            .delete(collection, doc! { ID_FIELD: id }, false)
            .await
            .map_err(failed("delete", collection))
    }

    /// Deletes every match. Succeeds when nothing matches.
    ///
    /// In-process predicates are resolved to identities first, then removed by identity.
    pub async fn delete_where<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: &FilterExpression<T>,
    ) -> Result<u64, DbError> {
        guard_name(collection, "collection name")?;
        let FilterExpression::Where(_) = filter else {
            let native = filter.store_filter();
            return self.handle.delete(collection, native, true).await.map_err(failed("delete", collection));
        };
        let documents = self
            .handle
            .find(collection, NativeFilter::all().into_document(), &FindOptions::default())
            .await
            .map_err(failed("delete", collection))?;
        let mut ids = Vec::new();
        for document in documents {
            let id = document.get(ID_FIELD).cloned();
            let item: T = bson::from_document(document)?;
            if filter.accepts(&item) {
                ids.extend(id);
            }
        }
        let mut removed = 0;
        for chunk in ids.chunks(DELETE_BATCH) {
            removed += self
                .handle
                .delete(collection, doc! { ID_FIELD: { "$in": chunk.to_vec() } }, true)
                .await
                .map_err(failed("delete", collection))?;
        }
        Ok(removed)
    }
}

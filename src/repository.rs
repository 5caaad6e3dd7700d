//! One collection of one entity type, bound to the controller's current database.
//!
//! The façade is looked up on every call, so a repository follows `switch_database`.

use crate::controller::AccessController;
use crate::database::DatabaseFacade;
use crate::errors::DbError;
use crate::query::{Filter, FilterExpression, Query, SortExpression};
use crate::store::WriteReport;
use crate::types::{ID_FIELD, guard_name};
use bson::Bson;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;

fn by_id<T>(id: Bson) -> Result<FilterExpression<T>, DbError> {
    match &id {
        Bson::Null => Err(DbError::invalid_argument("id")),
        Bson::String(s) if s.trim().is_empty() => Err(DbError::invalid_argument("id")),
        _ => Ok(Filter::eq(ID_FIELD, id).into()),
    }
}

pub struct Repository<T> {
    controller: Arc<AccessController>,
    collection: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            collection: self.collection.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").field("collection", &self.collection).finish()
    }
}

impl<T> Repository<T>
where
    T: Serialize + DeserializeOwned,
{
    /// # Errors
    /// `InvalidArgument` for a blank collection name.
    pub fn new(controller: Arc<AccessController>, collection: &str) -> Result<Self, DbError> {
        guard_name(collection, "collection name")?;
        Ok(Self { controller, collection: collection.to_string(), _entity: PhantomData })
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn db(&self) -> Result<DatabaseFacade, DbError> {
        self.controller.context()
    }

    /// Inserts `item`, returning its stored identity.
    pub async fn create(&self, item: &T) -> Result<Bson, DbError> {
        self.db()?.insert(&self.collection, item).await
    }

    pub async fn read_by_id(&self, id: impl Into<Bson>) -> Result<Option<T>, DbError> {
        let filter: FilterExpression<T> = by_id(id.into())?;
        self.db()?.read_first_or_default(&self.collection, &filter).await
    }

    pub async fn read_where<F>(&self, predicate: F) -> Result<Vec<T>, DbError>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.db()?.read(&self.collection, &FilterExpression::matching(predicate)).await
    }

    /// Native filter and sort text, both validated before anything is sent.
    pub async fn read_native(&self, filter: &str, sort: Option<&str>) -> Result<Vec<T>, DbError> {
        let mut query = Query::new(FilterExpression::native(filter)?);
        if let Some(sort) = sort {
            query = query.sorted(SortExpression::native(sort)?);
        }
        self.db()?.read_query(&self.collection, &query).await
    }

    pub async fn read_first_or_default<F>(&self, predicate: F) -> Result<Option<T>, DbError>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.db()?.read_first_or_default(&self.collection, &FilterExpression::matching(predicate)).await
    }

    pub async fn count(&self, filter: &FilterExpression<T>) -> Result<u64, DbError> {
        self.db()?.count(&self.collection, filter).await
    }

    /// Upserts `item`.
    pub async fn update(&self, item: &T) -> Result<WriteReport, DbError> {
        self.db()?.write(&self.collection, item).await
    }

    pub async fn update_many(&self, items: &[T]) -> Result<WriteReport, DbError> {
        self.db()?.write_many(&self.collection, items).await
    }

    /// Deletes by identity. Deleting an identity that is not stored succeeds.
    pub async fn delete_by_id(&self, id: impl Into<Bson>) -> Result<u64, DbError> {
        let filter: FilterExpression<T> = by_id(id.into())?;
        self.db()?.delete_where(&self.collection, &filter).await
    }
}

//! Filter and sort expressions accepted by the database facade.
//!
//! Every read or delete takes either a typed, in-process predicate over the entity type or a
//! store-native filter. Native filters arrive as text (built dynamically by query builders) or as a
//! structured [`Filter`]; the shape of text is checked when the expression is built, and the store
//! judges the operators when it executes.

use crate::errors::{DbError, StoreError};
use crate::types::Document;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use super::parse::{parse_filter_shape, parse_sort_json, sort_to_document, validate_filter_shape};
use super::types::{Filter, SortSpec};

pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// A validated store-native filter document.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeFilter {
    document: Document,
}

impl NativeFilter {
    /// Parses filter text such as `{"age": {"$gte": 18}}`. Only the shape is checked here; an
    /// operator the store does not support fails when the filter executes.
    ///
    /// # Errors
    /// `InvalidArgument` for blank text, `StoreOperationFailed(MalformedFilter)` for text that is
    /// not a well-shaped filter document.
    pub fn parse(text: &str) -> Result<Self, DbError> {
        if text.trim().is_empty() {
            return Err(DbError::invalid_argument("filter"));
        }
        let document = parse_filter_shape(text).map_err(|e| {
            log::warn!("rejected filter text: {e}");
            DbError::StoreOperationFailed(e)
        })?;
        Ok(Self { document })
    }

    /// Shape-checks an already-built filter document.
    ///
    /// # Errors
    /// `StoreOperationFailed(MalformedFilter)`, as for [`NativeFilter::parse`].
    pub fn from_document(document: Document) -> Result<Self, DbError> {
        validate_filter_shape(&document).map_err(DbError::StoreOperationFailed)?;
        Ok(Self { document })
    }

    /// Matches every document.
    #[must_use]
    pub fn all() -> Self {
        Self { document: Document::new() }
    }

    #[must_use]
    pub const fn document(&self) -> &Document {
        &self.document
    }

    #[must_use]
    pub fn into_document(self) -> Document {
        self.document
    }
}

impl From<Filter> for NativeFilter {
    fn from(filter: Filter) -> Self {
        Self { document: filter.to_document() }
    }
}

/// A validated store-native sort specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeSort {
    specs: Vec<SortSpec>,
}

impl NativeSort {
    /// Parses and validates sort text such as `{"lastName": 1, "age": -1}`.
    ///
    /// # Errors
    /// `InvalidArgument` for blank text, `StoreOperationFailed(MalformedSort)` otherwise.
    pub fn parse(text: &str) -> Result<Self, DbError> {
        if text.trim().is_empty() {
            return Err(DbError::invalid_argument("sort"));
        }
        let specs = parse_sort_json(text).map_err(|e| {
            log::warn!("rejected sort text: {e}");
            DbError::StoreOperationFailed(e)
        })?;
        if specs.is_empty() {
            return Err(DbError::StoreOperationFailed(StoreError::MalformedSort(
                "sort must name at least one field".into(),
            )));
        }
        Ok(Self { specs })
    }

    #[must_use]
    pub fn specs(&self) -> &[SortSpec] {
        &self.specs
    }

    #[must_use]
    pub fn to_document(&self) -> Document {
        sort_to_document(&self.specs)
    }
}

impl From<Vec<SortSpec>> for NativeSort {
    fn from(specs: Vec<SortSpec>) -> Self {
        Self { specs }
    }
}

pub enum FilterExpression<T> {
    /// Evaluated in-process against each deserialized entity.
    Where(Predicate<T>),
    /// Executed by the store.
    Native(NativeFilter),
}

impl<T> FilterExpression<T> {
    pub fn matching<F>(predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::Where(Arc::new(predicate))
    }

    /// # Errors
    /// See [`NativeFilter::parse`].
    pub fn native(text: &str) -> Result<Self, DbError> {
        NativeFilter::parse(text).map(Self::Native)
    }

    #[must_use]
    pub fn all() -> Self {
        Self::Native(NativeFilter::all())
    }

    /// The document sent to the store: the native filter, or "everything" for in-process predicates.
    pub(crate) fn store_filter(&self) -> Document {
        match self {
            Self::Where(_) => Document::new(),
            Self::Native(n) => n.document().clone(),
        }
    }

    pub(crate) fn accepts(&self, item: &T) -> bool {
        match self {
            Self::Where(p) => p(item),
            Self::Native(_) => true,
        }
    }

    pub(crate) const fn is_native(&self) -> bool {
        matches!(self, Self::Native(_))
    }
}

impl<T> Clone for FilterExpression<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Where(p) => Self::Where(Arc::clone(p)),
            Self::Native(n) => Self::Native(n.clone()),
        }
    }
}

impl<T> fmt::Debug for FilterExpression<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Where(_) => f.write_str("Where(<predicate>)"),
            Self::Native(n) => f.debug_tuple("Native").field(n.document()).finish(),
        }
    }
}

impl<T> From<Filter> for FilterExpression<T> {
    fn from(filter: Filter) -> Self {
        Self::Native(filter.into())
    }
}

impl<T> From<NativeFilter> for FilterExpression<T> {
    fn from(filter: NativeFilter) -> Self {
        Self::Native(filter)
    }
}

pub enum SortExpression<T> {
    By(Comparator<T>),
    Native(NativeSort),
}

impl<T> SortExpression<T> {
    pub fn by<F>(comparator: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        Self::By(Arc::new(comparator))
    }

    /// # Errors
    /// See [`NativeSort::parse`].
    pub fn native(text: &str) -> Result<Self, DbError> {
        NativeSort::parse(text).map(Self::Native)
    }
}

impl<T> Clone for SortExpression<T> {
    fn clone(&self) -> Self {
        match self {
            Self::By(c) => Self::By(Arc::clone(c)),
            Self::Native(n) => Self::Native(n.clone()),
        }
    }
}

impl<T> fmt::Debug for SortExpression<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::By(_) => f.write_str("By(<comparator>)"),
            Self::Native(n) => f.debug_tuple("Native").field(&n.specs).finish(),
        }
    }
}

/// A complete read request: filter, optional sort, optional result-count cap.
pub struct Query<T> {
    pub filter: FilterExpression<T>,
    pub sort: Option<SortExpression<T>>,
    pub limit: Option<usize>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self { filter: self.filter.clone(), sort: self.sort.clone(), limit: self.limit }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("filter", &self.filter)
            .field("sort", &self.sort)
            .field("limit", &self.limit)
            .finish()
    }
}

impl<T> Query<T> {
    pub fn new(filter: impl Into<FilterExpression<T>>) -> Self {
        Self { filter: filter.into(), sort: None, limit: None }
    }

    #[must_use]
    pub fn sorted(mut self, sort: SortExpression<T>) -> Self {
        self.sort = Some(sort);
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl<T> From<FilterExpression<T>> for Query<T> {
    fn from(filter: FilterExpression<T>) -> Self {
        Self::new(filter)
    }
}

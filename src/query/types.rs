use bson::Bson;
use serde::{Deserialize, Serialize};

// Safety limits to prevent resource abuse
pub(crate) const MAX_PATH_DEPTH: usize = 32;
pub(crate) const MAX_IN_SET: usize = 1000;
pub(crate) const MAX_SORT_FIELDS: usize = 8;
pub(crate) const MAX_FILTER_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: Order,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), order: Order::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), order: Order::Desc }
    }
}

/// Options passed down to the store for a find.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindOptions {
    pub sort: Option<Vec<SortSpec>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    pub(crate) const fn operator(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
        }
    }
}

/// Structured filter, compiled client-side into a store-native filter document.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    True,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Not(Box<Filter>),
    Exists { path: String, exists: bool },
    In { path: String, values: Vec<Bson> },
    Nin { path: String, values: Vec<Bson> },
    Cmp { path: String, op: CmpOp, value: Bson },
    #[cfg(feature = "regex")]
    Regex { path: String, pattern: String, case_insensitive: bool },
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::Cmp { path: path.into(), op: CmpOp::Eq, value: value.into() }
    }

    pub fn cmp(path: impl Into<String>, op: CmpOp, value: impl Into<Bson>) -> Self {
        Self::Cmp { path: path.into(), op, value: value.into() }
    }

    pub fn exists(path: impl Into<String>, exists: bool) -> Self {
        Self::Exists { path: path.into(), exists }
    }

    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::True => other,
            Self::And(mut fs) => {
                fs.push(other);
                Self::And(fs)
            }
            f => Self::And(vec![f, other]),
        }
    }
}

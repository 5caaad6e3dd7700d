use crate::errors::DbError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type CollectionName = String;
pub type DatabaseName = String;

/// A document is a BSON document. Entities are serialized into one before they reach the store.
pub type Document = bson::Document;

/// Name of the identity field every stored document carries.
pub const ID_FIELD: &str = "_id";

/// Endpoint of the document service. Immutable once a session exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    /// # Errors
    /// Returns `InvalidArgument` if the host is blank.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, DbError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(DbError::invalid_argument("host"));
        }
        Ok(Self { host, port })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A role grant: role name scoped to the database it is defined on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub role: String,
    pub db: String,
}

impl Role {
    pub fn new(role: impl Into<String>, db: impl Into<String>) -> Self {
        Self { role: role.into(), db: db.into() }
    }
}

/// Username/password pair authenticated against `source` (the auth database).
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub source: String,
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(
        source: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self { source: source.into(), username: username.into(), password: password.into() }
    }
}

// Never print the password.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("source", &self.source)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Rejects blank names before anything touches the store.
pub(crate) fn guard_name(value: &str, name: &str) -> Result<(), DbError> {
    if value.trim().is_empty() {
        return Err(DbError::invalid_argument(name));
    }
    Ok(())
}

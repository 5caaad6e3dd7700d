//! Data-access layer over a document database.
//!
//! [`AccessController`] is the entry point: it connects once through a [`ConnectionManager`],
//! exposes a [`DatabaseFacade`] over the selected database and runs the
//! [`SchemaSeedCoordinator`] after connecting. The store itself sits behind the traits in
//! [`store`]; [`store::memory`] is an in-process implementation and the `mongo` feature adds the
//! MongoDB driver.

pub mod blocking;
pub mod config;
pub mod connection;
pub mod controller;
pub mod database;
pub mod errors;
pub mod logger;
pub mod query;
pub mod repository;
pub mod schema;
pub mod seed;
pub mod store;
pub mod types;

pub use crate::blocking::BlockingAccessController;
pub use crate::config::{ConnectionSettings, Settings};
pub use crate::connection::{ConnectionManager, ConnectionState, DatabaseHandle};
pub use crate::controller::{AccessController, SCHEMA_VERSION};
pub use crate::database::DatabaseFacade;
pub use crate::errors::{DbError, StoreError};
pub use crate::query::{Filter, FilterExpression, NativeFilter, NativeSort, Query, SortExpression};
pub use crate::repository::Repository;
pub use crate::schema::{SchemaSeedCoordinator, SchemaState, SchemaVersion, SeedComponent, SeedOutcome};
pub use crate::store::WriteReport;
pub use crate::types::{Credential, Document, Role, ServerAddress};

mod built {
    include!(concat!(env!("OUT_DIR"), "/compiled_features.rs"));
}

/// Cargo features this build was compiled with, sorted.
#[must_use]
pub fn compiled_features() -> &'static [&'static str] {
    built::COMPILED_FEATURES
}

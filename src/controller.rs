//! Public entry point: connect, expose the current database, seed it.

use crate::config::{ConnectionSettings, Settings};
use crate::connection::ConnectionManager;
use crate::database::DatabaseFacade;
use crate::errors::DbError;
use crate::logger::AUDIT_TARGET;
use crate::schema::{SchemaSeedCoordinator, SchemaVersion, SeedOutcome};
use crate::seed::UserSeed;
use crate::store::StoreConnector;
use crate::types::{ServerAddress, guard_name};
use parking_lot::RwLock;
use std::sync::Arc;

/// Schema version stamped by the default coordinator.
pub const SCHEMA_VERSION: SchemaVersion = SchemaVersion::new(1, 0, 0, 0);

#[derive(Debug, Clone)]
struct Current {
    host: String,
    database: String,
    facade: DatabaseFacade,
}

pub struct AccessController {
    connector: Arc<dyn StoreConnector>,
    settings: ConnectionSettings,
    seeder: SchemaSeedCoordinator,
    manager: ConnectionManager,
    current: RwLock<Option<Current>>,
}

impl std::fmt::Debug for AccessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessController")
            .field("manager", &self.manager)
            .field("seeder", &self.seeder)
            .field("current", &self.current_database())
            .finish_non_exhaustive()
    }
}

/// Version 1.0.0.0 with the baseline user accounts.
#[must_use]
pub fn default_seeder() -> SchemaSeedCoordinator {
    SchemaSeedCoordinator::new(SCHEMA_VERSION).with_component(Arc::new(UserSeed::default()))
}

impl AccessController {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self::with_parts(connector, ConnectionSettings::default(), default_seeder())
    }

    pub fn with_parts(
        connector: Arc<dyn StoreConnector>,
        settings: ConnectionSettings,
        seeder: SchemaSeedCoordinator,
    ) -> Self {
        let manager = ConnectionManager::new(Arc::clone(&connector), settings.clone());
        Self { connector, settings, seeder, manager, current: RwLock::new(None) }
    }

    /// A controller talking to MongoDB.
    #[cfg(feature = "mongo")]
    #[must_use]
    pub fn mongo() -> Self {
        Self::new(Arc::new(crate::store::mongo::MongoConnector))
    }

    /// Connects, selects `database` and runs one seeding pass over it.
    ///
    /// # Errors
    /// `InvalidArgument` for a blank host or database name, then anything
    /// [`ConnectionManager::connect`] or [`SchemaSeedCoordinator::run`] returns.
    pub async fn connect(&self, host: &str, port: u16, database: &str) -> Result<SeedOutcome, DbError> {
        ServerAddress::new(host, port)?;
        guard_name(database, "database name")?;
        self.manager.connect(host, port).await?;
        let facade = DatabaseFacade::open(&self.manager, database)?;
        *self.current.write() =
            Some(Current { host: host.to_string(), database: database.to_string(), facade: facade.clone() });
        self.seeder.run(&facade).await
    }

    /// Connects using the host, port and database name keys of `config`.
    ///
    /// # Errors
    /// `InvalidArgument` naming a missing key, then see [`AccessController::connect`].
    pub async fn connect_with_config(&self, config: &Settings) -> Result<SeedOutcome, DbError> {
        let (address, database) = config.connection_target()?;
        self.connect(&address.host, address.port, &database).await
    }

    /// Points the controller at another database on the existing session, or performs a full
    /// connect when there is none. Switching does not seed.
    ///
    /// # Errors
    /// `InvalidArgument` for a blank database name; connect errors when not yet connected.
    pub async fn switch_database(&self, host: &str, port: u16, database: &str) -> Result<(), DbError> {
        guard_name(database, "database name")?;
        if !self.manager.is_connected() {
            self.connect(host, port, database).await?;
            return Ok(());
        }
        let facade = DatabaseFacade::open(&self.manager, database)?;
        let mut current = self.current.write();
        let host = current.as_ref().map_or_else(|| host.to_string(), |c| c.host.clone());
        log::info!(target: AUDIT_TARGET, "switched to database '{database}' on {host}");
        *current = Some(Current { host, database: database.to_string(), facade });
        Ok(())
    }

    /// Lists databases on any host through a separate, short-lived manager.
    ///
    /// # Errors
    /// Connect errors for that host, or `StoreOperationFailed` from the listing.
    pub async fn database_list_on_host(&self, host: &str, port: u16) -> Result<Vec<String>, DbError> {
        let manager = ConnectionManager::new(Arc::clone(&self.connector), self.settings.clone());
        manager.connect(host, port).await?;
        let names = manager.list_databases().await;
        manager.dispose();
        names
    }

    /// Databases visible on the current session.
    ///
    /// # Errors
    /// `NotConnected` or `StoreOperationFailed`.
    pub async fn list_databases(&self) -> Result<Vec<String>, DbError> {
        self.manager.list_databases().await
    }

    /// The façade over the current database.
    ///
    /// # Errors
    /// `NotConnected` before a successful connect.
    pub fn context(&self) -> Result<DatabaseFacade, DbError> {
        if !self.manager.is_connected() {
            return Err(DbError::NotConnected);
        }
        self.current.read().as_ref().map(|c| c.facade.clone()).ok_or(DbError::NotConnected)
    }

    /// Runs another seeding pass over the current database.
    ///
    /// # Errors
    /// `NotConnected`, or whatever the pass returns.
    pub async fn reseed(&self) -> Result<SeedOutcome, DbError> {
        let facade = self.context()?;
        self.seeder.run(&facade).await
    }

    #[must_use]
    pub fn current_host(&self) -> Option<String> {
        self.current.read().as_ref().map(|c| c.host.clone())
    }

    #[must_use]
    pub fn current_database(&self) -> Option<String> {
        self.current.read().as_ref().map(|c| c.database.clone())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    #[must_use]
    pub const fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    #[must_use]
    pub const fn seeder(&self) -> &SchemaSeedCoordinator {
        &self.seeder
    }

    pub fn dispose(&self) {
        self.manager.dispose();
        self.current.write().take();
    }
}

//! Synchronous wrapper over [`AccessController`] for callers without a runtime.
//!
//! Every method drives the async implementation to completion on a private current-thread
//! runtime. Do not call these from inside an async context.

use crate::config::Settings;
use crate::controller::AccessController;
use crate::database::DatabaseFacade;
use crate::errors::DbError;
use crate::schema::SeedOutcome;
use crate::store::StoreConnector;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

pub struct BlockingAccessController {
    runtime: Runtime,
    inner: Arc<AccessController>,
}

impl std::fmt::Debug for BlockingAccessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingAccessController").field("inner", &self.inner).finish_non_exhaustive()
    }
}

impl BlockingAccessController {
    /// # Errors
    /// `Runtime` if the runtime cannot be built.
    pub fn new(connector: Arc<dyn StoreConnector>) -> Result<Self, DbError> {
        Self::wrap(Arc::new(AccessController::new(connector)))
    }

    /// # Errors
    /// `Runtime` if the runtime cannot be built.
    pub fn wrap(inner: Arc<AccessController>) -> Result<Self, DbError> {
        let runtime =
            Builder::new_current_thread().enable_all().build().map_err(|e| DbError::Runtime(e.to_string()))?;
        Ok(Self { runtime, inner })
    }

    /// The wrapped async controller, for sharing with async code.
    #[must_use]
    pub fn inner(&self) -> &Arc<AccessController> {
        &self.inner
    }

    /// Runs any future (typically a [`DatabaseFacade`] call) to completion.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// # Errors
    /// See [`AccessController::connect`].
    pub fn connect(&self, host: &str, port: u16, database: &str) -> Result<SeedOutcome, DbError> {
        self.block_on(self.inner.connect(host, port, database))
    }

    /// # Errors
    /// See [`AccessController::connect_with_config`].
    pub fn connect_with_config(&self, config: &Settings) -> Result<SeedOutcome, DbError> {
        self.block_on(self.inner.connect_with_config(config))
    }

    /// # Errors
    /// See [`AccessController::switch_database`].
    pub fn switch_database(&self, host: &str, port: u16, database: &str) -> Result<(), DbError> {
        self.block_on(self.inner.switch_database(host, port, database))
    }

    /// # Errors
    /// See [`AccessController::database_list_on_host`].
    pub fn database_list_on_host(&self, host: &str, port: u16) -> Result<Vec<String>, DbError> {
        self.block_on(self.inner.database_list_on_host(host, port))
    }

    /// # Errors
    /// See [`AccessController::list_databases`].
    pub fn list_databases(&self) -> Result<Vec<String>, DbError> {
        self.block_on(self.inner.list_databases())
    }

    /// # Errors
    /// `NotConnected` before a successful connect.
    pub fn context(&self) -> Result<DatabaseFacade, DbError> {
        self.inner.context()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

//! The single authenticated session to the document service.
//!
//! `connect` runs once per manager: an unauthenticated client checks for the administrative
//! principal and creates it when missing, then an authenticated client is opened and forced through
//! a round trip so that unreachable services and rejected credentials fail here rather than on the
//! caller's first operation. The whole sequence runs under one deadline.

use crate::config::ConnectionSettings;
use crate::errors::{DbError, StoreError};
use crate::logger::AUDIT_TARGET;
use crate::store::{StoreClient, StoreConnector, StoreDatabase};
use crate::types::{ServerAddress, guard_name};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// A resolved, shareable database handle.
pub type DatabaseHandle = Arc<dyn StoreDatabase>;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    /// Terminal; a disposed manager never connects again.
    Disposed = 3,
}

impl From<ConnectionState> for u8 {
    fn from(state: ConnectionState) -> Self {
        state as Self
    }
}

impl TryFrom<u8> for ConnectionState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Disconnected),
            1 => Ok(Self::Connecting),
            2 => Ok(Self::Connected),
            3 => Ok(Self::Disposed),
            other => Err(other),
        }
    }
}

/// Returns a `Connecting` manager to `Disconnected` unless the connect committed, so a dropped
/// connect future can be retried.
struct ConnectingGuard<'a> {
    state: &'a AtomicU8,
    committed: bool,
}

impl ConnectingGuard<'_> {
    fn commit(mut self) -> bool {
        self.committed = true;
        self.state
            .compare_exchange(
                ConnectionState::Connecting.into(),
                ConnectionState::Connected.into(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            // Fails harmlessly when dispose() already moved the manager on.
            let _ = self.state.compare_exchange(
                ConnectionState::Connecting.into(),
                ConnectionState::Disconnected.into(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
    }
}

/// The authenticated client plus the address it was opened against.
#[derive(Clone)]
pub struct Session {
    address: ServerAddress,
    client: Arc<dyn StoreClient>,
}

impl Session {
    #[must_use]
    pub const fn address(&self) -> &ServerAddress {
        &self.address
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("address", &self.address).finish_non_exhaustive()
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn StoreConnector>,
    settings: ConnectionSettings,
    state: AtomicU8,
    session: RwLock<Option<Session>>,
    handles: Mutex<HashMap<String, DatabaseHandle>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("session", &*self.session.read())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn StoreConnector>, settings: ConnectionSettings) -> Self {
        Self {
            connector,
            settings,
            state: AtomicU8::new(ConnectionState::Disconnected.into()),
            session: RwLock::new(None),
            handles: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::try_from(self.state.load(Ordering::SeqCst)).unwrap_or(ConnectionState::Disposed)
    }

    #[must_use]
    pub const fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Establishes the one session for this manager.
    ///
    /// # Errors
    /// - `InvalidArgument` if `host` is blank (before any I/O).
    /// - `AlreadyConnected` if a session exists, another connect is in flight or the manager was
    ///   disposed; the existing session is left untouched.
    /// - `NotConnected` if `dispose` ran while this connect was in flight; the new client is dropped.
    /// - `ConnectionFailed` if the service is unreachable, rejects the credential, or the whole
    ///   sequence exceeds the connect deadline. The manager may be connected again afterwards, as it
    ///   may when the returned future is dropped before completing.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), DbError> {
        let address = ServerAddress::new(host, port)?;
        if self
            .state
            .compare_exchange(
                ConnectionState::Disconnected.into(),
                ConnectionState::Connecting.into(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            log::warn!("connect to {address} refused: already connected");
            return Err(DbError::AlreadyConnected);
        }
        let guard = ConnectingGuard { state: &self.state, committed: false };

        let deadline = self.settings.connect_deadline();
        let outcome = match tokio::time::timeout(deadline, self.bootstrap(&address)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX))),
        };

        match outcome {
            Ok(client) => {
                let mut session = self.session.write();
                if !guard.commit() {
                    log::warn!("connect to {address} abandoned: manager disposed while connecting");
                    return Err(DbError::NotConnected);
                }
                *session = Some(Session { address: address.clone(), client });
                drop(session);
                log::info!(target: AUDIT_TARGET, "connected to {address} as '{}'", self.settings.admin.username);
                Ok(())
            }
            Err(e) => {
                drop(guard);
                log::error!("connect to {address} failed: {e}");
                Err(DbError::ConnectionFailed(e))
            }
        }
    }

    async fn bootstrap(&self, address: &ServerAddress) -> Result<Arc<dyn StoreClient>, StoreError> {
        let admin = &self.settings.admin;
        let unauthenticated = self.connector.open(address, &self.settings.open_options(false)).await?;
        if unauthenticated.principal_exists(&admin.source, &admin.username).await? {
            log::debug!("administrative principal '{}' present", admin.username);
        } else {
            unauthenticated.create_principal(admin, &self.settings.admin_roles).await?;
            log::info!(
                target: AUDIT_TARGET,
                "created administrative principal '{}@{}'",
                admin.username,
                admin.source
            );
        }

        let client = self.connector.open(address, &self.settings.open_options(true)).await?;
        client.probe(&self.settings.probe_database, &self.settings.probe_collection).await?;
        Ok(client)
    }

    fn session(&self) -> Result<Session, DbError> {
        if self.state() != ConnectionState::Connected {
            return Err(DbError::NotConnected);
        }
        self.session.read().clone().ok_or(DbError::NotConnected)
    }

    /// Returns the cached handle for `name`, resolving it on first request.
    ///
    /// # Errors
    /// `NotConnected` without a session, `InvalidArgument` for a blank name.
    pub fn get_database(&self, name: &str) -> Result<DatabaseHandle, DbError> {
        let session = self.session()?;
        guard_name(name, "database name")?;
        let mut handles = self.handles.lock();
        let handle = handles.entry(name.to_string()).or_insert_with(|| {
            log::debug!("resolved database handle '{name}'");
            session.client.database(name)
        });
        Ok(Arc::clone(handle))
    }

    /// Names of all databases visible to the administrative principal.
    ///
    /// # Errors
    /// `NotConnected` without a session, `StoreOperationFailed` if the listing fails.
    pub async fn list_databases(&self) -> Result<Vec<String>, DbError> {
        let session = self.session()?;
        session.client.list_database_names().await.map_err(DbError::StoreOperationFailed)
    }

    /// Marks the manager disconnected. Handles already handed out keep working; the transport
    /// owns its sockets.
    pub fn dispose(&self) {
        let mut session = self.session.write();
        self.state.store(ConnectionState::Disposed.into(), Ordering::SeqCst);
        session.take();
        drop(session);
        self.handles.lock().clear();
        log::info!("connection manager disposed");
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    #[must_use]
    pub fn address(&self) -> Option<ServerAddress> {
        self.session.read().as_ref().map(|s| s.address.clone())
    }

    #[must_use]
    pub fn cached_handles(&self) -> usize {
        self.handles.lock().len()
    }
}

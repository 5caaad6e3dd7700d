//! Configuration sources and connection settings.
//!
//! [`Settings`] is a flat `key -> string` map with dotted keys. TOML files flatten into it (nested
//! tables join with `.`), and a small set of environment variables override the well-known keys.

use crate::errors::DbError;
use crate::store::OpenOptions;
use crate::types::{Credential, Role, ServerAddress};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const HOST_KEY: &str = "MongoSettings.Connection.host";
pub const PORT_KEY: &str = "MongoSettings.Connection.port";
pub const DATABASE_KEY: &str = "MongoSettings.DatabaseName";

pub const HOST_ENV: &str = "WYVERN_DB_HOST";
pub const PORT_ENV: &str = "WYVERN_DB_PORT";
pub const DATABASE_ENV: &str = "WYVERN_DB_NAME";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// # Errors
    /// Returns `Config` if the text is not valid TOML.
    pub fn from_toml_str(text: &str) -> Result<Self, DbError> {
        let table: toml::Table = toml::from_str(text)?;
        let mut settings = Self::new();
        flatten(&mut settings, None, &table);
        Ok(settings)
    }

    /// # Errors
    /// Returns `Config` if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, DbError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DbError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Applies `WYVERN_DB_HOST`, `WYVERN_DB_PORT` and `WYVERN_DB_NAME` from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Same as [`Settings::with_env_overrides`] with an explicit variable lookup.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        for (env, key) in [(HOST_ENV, HOST_KEY), (PORT_ENV, PORT_KEY), (DATABASE_ENV, DATABASE_KEY)] {
            if let Some(value) = lookup(env) {
                log::debug!("config: {key} overridden by {env}");
                self.set(key, value);
            }
        }
        self
    }

    /// Resolves the service address and database name from the three well-known keys.
    ///
    /// # Errors
    /// `InvalidArgument` naming the key that is missing, blank or (for the port) not a port number.
    pub fn connection_target(&self) -> Result<(ServerAddress, String), DbError> {
        let required = |key: &str| match self.get(key) {
            Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
            _ => Err(DbError::invalid_argument(key)),
        };
        let host = required(HOST_KEY)?;
        let port = required(PORT_KEY)?.parse::<u16>().map_err(|_| DbError::invalid_argument(PORT_KEY))?;
        let database = required(DATABASE_KEY)?;
        Ok((ServerAddress::new(host, port)?, database))
    }
}

fn flatten(settings: &mut Settings, prefix: Option<&str>, table: &toml::Table) {
    for (key, value) in table {
        let full = prefix.map_or_else(|| key.clone(), |p| format!("{p}.{key}"));
        match value {
            toml::Value::Table(inner) => flatten(settings, Some(&full), inner),
            toml::Value::String(s) => settings.set(full, s.clone()),
            other => settings.set(full, other.to_string()),
        }
    }
}

/// Administrative principal and client negotiation parameters used by `ConnectionManager`.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Principal created on first connect and used for every session. The default is a fixed,
    /// publicly known credential kept for compatibility with existing deployments; anything
    /// reachable beyond a development machine must replace it through [`Self::with_admin`].
    pub admin: Credential,
    pub admin_roles: Vec<Role>,
    pub connect_timeout: Duration,
    pub server_selection_timeout: Duration,
    pub max_pool_size: u32,
    /// Database and collection read by the post-connect reachability probe.
    pub probe_database: String,
    pub probe_collection: String,
}

/// Defaults match the historical deployment, including its well-known admin password.
impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            admin: Credential::new("admin", "GodMode", "BallisticGamesFTW"),
            admin_roles: vec![Role::new("dbAdminAnyDatabase", "admin")],
            connect_timeout: Duration::from_secs(10),
            server_selection_timeout: Duration::from_secs(10),
            max_pool_size: 10_000,
            probe_database: "local".into(),
            probe_collection: "startup_log".into(),
        }
    }
}

impl ConnectionSettings {
    /// Replaces the default administrative principal.
    #[must_use]
    pub fn with_admin(mut self, admin: Credential) -> Self {
        self.admin = admin;
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, connect: Duration, server_selection: Duration) -> Self {
        self.connect_timeout = connect;
        self.server_selection_timeout = server_selection;
        self
    }

    /// The overall deadline for one connect attempt, probe included.
    #[must_use]
    pub fn connect_deadline(&self) -> Duration {
        self.connect_timeout.max(self.server_selection_timeout)
    }

    pub(crate) fn open_options(&self, authenticated: bool) -> OpenOptions {
        OpenOptions {
            credential: authenticated.then(|| self.admin.clone()),
            connect_timeout: self.connect_timeout,
            server_selection_timeout: self.server_selection_timeout,
            max_pool_size: self.max_pool_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_tables_flatten_to_dotted_keys() {
        let s = Settings::from_toml_str(
            r#"
            [MongoSettings]
            DatabaseName = "reviews"
            [MongoSettings.Connection]
            host = "localhost"
            port = 27017
            "#,
        )
        .unwrap();
        assert_eq!(s.get(HOST_KEY), Some("localhost"));
        assert_eq!(s.get(PORT_KEY), Some("27017"));
        assert_eq!(s.get(DATABASE_KEY), Some("reviews"));
    }

    #[test]
    fn bad_port_names_the_key() {
        let s = Settings::new().with(HOST_KEY, "h").with(PORT_KEY, "99999").with(DATABASE_KEY, "d");
        match s.connection_target() {
            Err(DbError::InvalidArgument(k)) => assert_eq!(k, PORT_KEY),
            other => panic!("unexpected: {other:?}"),
        }
    }
}

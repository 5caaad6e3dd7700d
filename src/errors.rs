use thiserror::Error;

/// Failures reported by the document service itself (or the transport to it).
///
/// These never originate from argument checking; they always describe something the
/// service said or failed to say. `DbError` wraps them as either a connection failure
/// or a store operation failure depending on where they surfaced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("service unreachable at {0}")]
    Unreachable(String),

    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    #[error("authentication failed for principal '{0}'")]
    AuthenticationFailed(String),

    #[error("malformed filter: {0}")]
    MalformedFilter(String),

    #[error("malformed sort: {0}")]
    MalformedSort(String),

    #[error("write conflict: {0}")]
    WriteConflict(String),

    #[error("write not acknowledged: {0}")]
    NotAcknowledged(String),

    #[error("command failed: {0}")]
    Command(String),
}

#[cfg(feature = "mongo")]
impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        match err.kind.as_ref() {
            ErrorKind::ServerSelection { message, .. } => Self::Unreachable(message.clone()),
            ErrorKind::Authentication { message, .. } => Self::AuthenticationFailed(message.clone()),
            ErrorKind::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => Self::Timeout(0),
            ErrorKind::Io(e) => Self::Unreachable(e.to_string()),
            ErrorKind::Write(_) | ErrorKind::InsertMany(_) => Self::WriteConflict(err.to_string()),
            _ => Self::Command(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cannot connect more than once")]
    AlreadyConnected,

    #[error("not connected to a document service")]
    NotConnected,

    #[error("failed to connect: {0}")]
    ConnectionFailed(#[source] StoreError),

    #[error("store operation failed: {0}")]
    StoreOperationFailed(#[source] StoreError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl DbError {
    /// Argument failures are logged where they are raised, then returned.
    pub(crate) fn invalid_argument(name: &str) -> Self {
        log::error!("invalid argument: {name}");
        Self::InvalidArgument(name.to_string())
    }

    /// The underlying store cause, if this error carries one.
    #[must_use]
    pub fn store_cause(&self) -> Option<&StoreError> {
        match self {
            Self::ConnectionFailed(e) | Self::StoreOperationFailed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<bson::ser::Error> for DbError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bson::de::Error> for DbError {
    fn from(err: bson::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for DbError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

//! Error hierarchy for the configuration mirror
//!
//! Only [`ValidationError`] and [`RemoteError`] ever reach a direct API caller.
//! [`DispatchError`] and [`LockError`] stay inside the watch and lock paths and
//! are turned into log records, diagnostic values or fallback invocations.

use std::time::Duration;

use config::ConfigError;

use crate::ValueType;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by listener callbacks and critical sections
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Local rejection before any remote call was issued
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Failure talking to the remote store
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Property name must not be empty")]
    EmptyKey,

    /// No exact or prefix listener covers the key
    #[error("Unable to handle property: {key}. Property is not updatable")]
    NotUpdatable { key: String },

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

/// Raw string could not be converted into the registered value type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unable to convert value <{value}> into {expected}: {reason}")]
pub struct ConversionError {
    pub value: String,
    pub expected: ValueType,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Store endpoint unreachable or switched off
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// Request did not complete in time
    #[error("Remote store request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Lease {0} not found")]
    LeaseNotFound(i64),

    /// Key or value bytes are not valid UTF-8
    #[error("Unable to decode store payload: {0}")]
    Decode(String),

    #[error("Watch stream closed by remote store")]
    WatchClosed,

    #[error(transparent)]
    Etcd(#[from] etcd_client::Error),
}

/// Failure while applying a single watch event. Never propagated.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("Listener for <{key}> failed: {message}")]
    Listener { key: String, message: String },

    #[error("Listener for <{key}> panicked")]
    ListenerPanicked { key: String },
}

/// Reasons a lock attempt ends on the fallback path
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Unable to grant lease for lock <{lock_name}>: {source}")]
    LeaseGrant {
        lock_name: String,
        #[source]
        source: RemoteError,
    },

    #[error("Acquire lock timeout exceeded for <{lock_name}> after {waited:?}")]
    Timeout { lock_name: String, waited: Duration },

    #[error("Unable to acquire lock <{lock_name}>: {source}")]
    Acquire {
        lock_name: String,
        #[source]
        source: RemoteError,
    },
}

// ============== Conversion Implementations ============== //
impl From<ConversionError> for Error {
    fn from(e: ConversionError) -> Self {
        Error::Validation(ValidationError::Conversion(e))
    }
}

impl From<etcd_client::Error> for Error {
    fn from(e: etcd_client::Error) -> Self {
        Error::Remote(RemoteError::Etcd(e))
    }
}

impl Error {
    /// True for errors raised locally before reaching the store
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

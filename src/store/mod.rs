//! Remote store abstraction
//!
//! Everything the configuration mirror needs from the consistent store sits
//! behind [`RemoteStore`]:
//! - point and prefix reads, writes and deletes
//! - a live prefix watch starting at subscription time (no history replay)
//! - leases with time-to-live, keep-alive and revocation
//! - named locks bound to a lease
//!
//! [`EtcdStore`] is the production implementation. One instance is created per
//! process and shared by reference counting between the watch consumer, the
//! lock coordinator and the property service.

mod etcd;

pub use etcd::*;


#[cfg(test)]
use mockall::automock;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::RemoteError;

pub type StoreResult<T> = std::result::Result<T, RemoteError>;

/// Live change notifications for a key prefix
pub type StoreEventStream = BoxStream<'static, StoreResult<StoreEvent>>;

/// Key/value pair as stored remotely. Keys are global (store path included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    /// 0 when the key is not attached to a lease
    pub lease_id: i64,
    /// Store revision of the last write to this key
    pub mod_revision: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    Put,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub kind: StoreEventKind,
    pub key: String,
    /// Empty for deletes
    pub value: String,
    /// Store revision of the change, 0 when unknown
    pub revision: i64,
}

impl StoreEvent {
    pub fn put(
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            kind: StoreEventKind::Put,
            key: key.into(),
            value: value.into(),
            revision: 0,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            kind: StoreEventKind::Delete,
            key: key.into(),
            value: String::new(),
            revision: 0,
        }
    }

    pub fn at_revision(
        mut self,
        revision: i64,
    ) -> Self {
        self.revision = revision;
        self
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Point read of a global key
    async fn get(
        &self,
        key: &str,
    ) -> StoreResult<Option<KeyValue>>;

    /// Range read of every key starting with `prefix`
    async fn get_prefix(
        &self,
        prefix: &str,
        limit: Option<i64>,
    ) -> StoreResult<Vec<KeyValue>>;

    /// Write `value`, optionally attached to a lease.
    /// Returns the previous pair when `fetch_previous` is set.
    async fn put(
        &self,
        key: &str,
        value: &str,
        lease_id: Option<i64>,
        fetch_previous: bool,
    ) -> StoreResult<Option<KeyValue>>;

    /// Delete one key, or every key under it when `as_prefix` is set.
    /// The previous pair is only reported for single key deletes.
    async fn delete(
        &self,
        key: &str,
        as_prefix: bool,
    ) -> StoreResult<Option<KeyValue>>;

    /// Subscribe to changes of every key under `prefix` from now on
    async fn watch(
        &self,
        prefix: &str,
    ) -> StoreResult<StoreEventStream>;

    /// Grant a lease and return its id
    async fn lease_grant(
        &self,
        ttl_secs: i64,
    ) -> StoreResult<i64>;

    /// Renew a lease once, returning its remaining ttl in seconds
    async fn lease_keep_alive(
        &self,
        lease_id: i64,
    ) -> StoreResult<i64>;

    /// Revoke a lease. Keys and locks attached to it are removed atomically.
    async fn lease_revoke(
        &self,
        lease_id: i64,
    ) -> StoreResult<()>;

    /// Block until the named lock is owned through `lease_id`; returns the lock key
    async fn lock(
        &self,
        name: &str,
        lease_id: i64,
    ) -> StoreResult<String>;
}

/// Logical value of a stored payload: everything before the first `separator`.
/// An empty separator disables the convention.
pub fn logical_value<'a>(
    raw: &'a str,
    separator: &str,
) -> &'a str {
    if separator.is_empty() {
        return raw;
    }
    match raw.find(separator) {
        Some(end) => &raw[..end],
        None => raw,
    }
}

/// Strip the store path from a global key; `None` when the key lives elsewhere
pub fn local_key<'a>(
    global_key: &'a str,
    store_path: &str,
) -> Option<&'a str> {
    global_key.strip_prefix(store_path)
}

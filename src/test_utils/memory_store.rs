use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

use crate::KeyValue;
use crate::RemoteError;
use crate::RemoteStore;
use crate::StoreEvent;
use crate::StoreEventStream;
use crate::StoreResult;

struct Lease {
    ttl_secs: i64,
    deadline: Instant,
}

#[derive(Default)]
struct MemoryState {
    kv: BTreeMap<String, KeyValue>,
    leases: HashMap<i64, Lease>,
    /// lock name -> owning lease
    locks: HashMap<String, i64>,
    next_lease: i64,
    revision: i64,
}

/// In-process [`RemoteStore`] fake
///
/// Leases expire on tokio time, so tests running with a paused clock control
/// expiry. Locks block until free, the owning lease is revoked or it expires.
pub(crate) struct InMemoryStore {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<StoreEvent>,
    lock_released: Notify,
    online: AtomicBool,
    calls: DashMap<&'static str, usize>,
}

impl InMemoryStore {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            state: Mutex::new(MemoryState {
                next_lease: 1,
                ..Default::default()
            }),
            events,
            lock_released: Notify::new(),
            online: AtomicBool::new(true),
            calls: DashMap::new(),
        }
    }

    /// Switch the store off; every subsequent call fails with `Unavailable`
    pub(crate) fn set_online(
        &self,
        online: bool,
    ) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub(crate) fn call_count(
        &self,
        op: &'static str,
    ) -> usize {
        self.calls.get(op).map(|c| *c).unwrap_or(0)
    }

    pub(crate) fn active_leases(&self) -> usize {
        let mut state = self.state.lock();
        self.purge_expired(&mut state);
        state.leases.len()
    }

    pub(crate) fn lock_holder(
        &self,
        name: &str,
    ) -> Option<i64> {
        let mut state = self.state.lock();
        self.purge_expired(&mut state);
        state.locks.get(name).copied()
    }

    /// Deliver an arbitrary event to watchers without touching stored data
    pub(crate) fn emit(
        &self,
        event: StoreEvent,
    ) {
        let _ = self.events.send(event);
    }

    fn enter(
        &self,
        op: &'static str,
    ) -> StoreResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Unavailable(format!("in-memory store offline during {op}")))
        }
    }

    /// Drop expired leases together with their keys and locks
    fn purge_expired(
        &self,
        state: &mut MemoryState,
    ) {
        let now = Instant::now();
        let expired: Vec<i64> = state
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for lease_id in expired {
            self.drop_lease(state, lease_id);
        }
    }

    fn drop_lease(
        &self,
        state: &mut MemoryState,
        lease_id: i64,
    ) -> bool {
        if state.leases.remove(&lease_id).is_none() {
            return false;
        }
        let attached: Vec<String> = state
            .kv
            .iter()
            .filter(|(_, kv)| kv.lease_id == lease_id)
            .map(|(k, _)| k.clone())
            .collect();
        self.remove_keys(state, attached);
        let before = state.locks.len();
        state.locks.retain(|_, owner| *owner != lease_id);
        if state.locks.len() != before {
            self.lock_released.notify_waiters();
        }
        true
    }

    /// Delete `keys` in one revision, emitting a delete event per key
    fn remove_keys(
        &self,
        state: &mut MemoryState,
        keys: Vec<String>,
    ) {
        if keys.is_empty() {
            return;
        }
        state.revision += 1;
        for key in keys {
            state.kv.remove(&key);
            let _ = self.events.send(StoreEvent::delete(key).at_revision(state.revision));
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn get(
        &self,
        key: &str,
    ) -> StoreResult<Option<KeyValue>> {
        self.enter("get")?;
        let mut state = self.state.lock();
        self.purge_expired(&mut state);
        Ok(state.kv.get(key).cloned())
    }

    async fn get_prefix(
        &self,
        prefix: &str,
        limit: Option<i64>,
    ) -> StoreResult<Vec<KeyValue>> {
        self.enter("get_prefix")?;
        let mut state = self.state.lock();
        self.purge_expired(&mut state);
        let matching = state.kv.values().filter(|kv| kv.key.starts_with(prefix)).cloned();
        Ok(match limit {
            Some(limit) => matching.take(limit.max(0) as usize).collect(),
            None => matching.collect(),
        })
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        lease_id: Option<i64>,
        fetch_previous: bool,
    ) -> StoreResult<Option<KeyValue>> {
        self.enter("put")?;
        let mut state = self.state.lock();
        self.purge_expired(&mut state);
        if let Some(lease_id) = lease_id {
            if !state.leases.contains_key(&lease_id) {
                return Err(RemoteError::LeaseNotFound(lease_id));
            }
        }
        state.revision += 1;
        let revision = state.revision;
        let previous = state.kv.insert(
            key.to_string(),
            KeyValue {
                key: key.to_string(),
                value: value.to_string(),
                lease_id: lease_id.unwrap_or(0),
                mod_revision: revision,
            },
        );
        let _ = self.events.send(StoreEvent::put(key, value).at_revision(revision));
        Ok(if fetch_previous { previous } else { None })
    }

    async fn delete(
        &self,
        key: &str,
        as_prefix: bool,
    ) -> StoreResult<Option<KeyValue>> {
        self.enter("delete")?;
        let mut state = self.state.lock();
        self.purge_expired(&mut state);
        if as_prefix {
            let keys: Vec<String> = state.kv.keys().filter(|k| k.starts_with(key)).cloned().collect();
            self.remove_keys(&mut state, keys);
            return Ok(None);
        }
        let previous = state.kv.get(key).cloned();
        if previous.is_some() {
            self.remove_keys(&mut state, vec![key.to_string()]);
        }
        Ok(previous)
    }

    async fn watch(
        &self,
        prefix: &str,
    ) -> StoreResult<StoreEventStream> {
        self.enter("watch")?;
        let prefix = prefix.to_string();
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(move |item| {
            future::ready(match item {
                Ok(event) if event.key.starts_with(&prefix) => Some(Ok(event)),
                Ok(_) => None,
                Err(lagged) => Some(Err(RemoteError::Unavailable(lagged.to_string()))),
            })
        });
        Ok(stream.boxed())
    }

    async fn lease_grant(
        &self,
        ttl_secs: i64,
    ) -> StoreResult<i64> {
        self.enter("lease_grant")?;
        let mut state = self.state.lock();
        let lease_id = state.next_lease;
        state.next_lease += 1;
        state.leases.insert(
            lease_id,
            Lease {
                ttl_secs,
                deadline: Instant::now() + Duration::from_secs(ttl_secs.max(1) as u64),
            },
        );
        Ok(lease_id)
    }

    async fn lease_keep_alive(
        &self,
        lease_id: i64,
    ) -> StoreResult<i64> {
        self.enter("lease_keep_alive")?;
        let mut state = self.state.lock();
        self.purge_expired(&mut state);
        match state.leases.get_mut(&lease_id) {
            Some(lease) => {
                lease.deadline = Instant::now() + Duration::from_secs(lease.ttl_secs.max(1) as u64);
                Ok(lease.ttl_secs)
            }
            None => Err(RemoteError::LeaseNotFound(lease_id)),
        }
    }

    async fn lease_revoke(
        &self,
        lease_id: i64,
    ) -> StoreResult<()> {
        self.enter("lease_revoke")?;
        let mut state = self.state.lock();
        self.purge_expired(&mut state);
        if self.drop_lease(&mut state, lease_id) {
            Ok(())
        } else {
            Err(RemoteError::LeaseNotFound(lease_id))
        }
    }

    async fn lock(
        &self,
        name: &str,
        lease_id: i64,
    ) -> StoreResult<String> {
        self.enter("lock")?;
        loop {
            let (released, holder_deadline) = {
                let mut state = self.state.lock();
                self.purge_expired(&mut state);
                if !state.leases.contains_key(&lease_id) {
                    return Err(RemoteError::LeaseNotFound(lease_id));
                }
                match state.locks.get(name).copied() {
                    None => {
                        state.locks.insert(name.to_string(), lease_id);
                        return Ok(format!("{name}/{lease_id:x}"));
                    }
                    Some(owner) if owner == lease_id => return Ok(format!("{name}/{lease_id:x}")),
                    Some(owner) => {
                        let deadline = state.leases.get(&owner).map(|l| l.deadline);
                        // registered before the state lock is released so a
                        // concurrent revoke cannot slip between check and wait
                        (self.lock_released.notified(), deadline)
                    }
                }
            };

            match holder_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = released => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => released.await,
            }
        }
    }
}

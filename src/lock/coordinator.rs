use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use crate::time::ceil_secs;
use crate::BoxError;
use crate::LockConfig;
use crate::LockError;
use crate::RemoteStore;

/// Metadata of a lock currently held by this process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub lock_name: String,
    /// Milliseconds
    pub lease_ttl: u64,
    /// Milliseconds
    pub acquire_timeout: u64,
    pub lease_id: i64,
}

/// Parameters of one [`LockCoordinator::synchronize_with_lock`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    name: String,
    ttl: Duration,
    acquire_timeout: Duration,
    release_on_finish: bool,
}

impl LockRequest {
    /// Request for `name` using the configured defaults
    pub fn new(
        name: impl Into<String>,
        defaults: &LockConfig,
    ) -> Self {
        Self {
            name: name.into(),
            ttl: defaults.lease_ttl(),
            acquire_timeout: defaults.acquire_timeout(),
            release_on_finish: defaults.release_on_finish,
        }
    }

    /// Upper bound on how long the lock is held without renewal
    pub fn with_ttl(
        mut self,
        ttl: Duration,
    ) -> Self {
        self.ttl = ttl;
        self
    }

    /// Upper bound on lease grant plus lock wait
    pub fn with_acquire_timeout(
        mut self,
        acquire_timeout: Duration,
    ) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    /// When false the lock stays held until its lease expires
    pub fn with_release_on_finish(
        mut self,
        release_on_finish: bool,
    ) -> Self {
        self.release_on_finish = release_on_finish;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    pub fn release_on_finish(&self) -> bool {
        self.release_on_finish
    }
}

/// Lifecycle of a single lock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Idle,
    LeaseRequested,
    LeaseGranted,
    LockRequested,
    LockHeld,
    LockTimeout,
    LockError,
    Released,
}

/// Runs critical sections under lease backed remote locks
///
/// Every failure on the way to the lock, and every failure of the critical
/// section itself, ends on the caller supplied fallback. Nothing is surfaced
/// as an error.
pub struct LockCoordinator {
    store: Arc<dyn RemoteStore>,
    held: Arc<DashMap<String, LockInfo>>,
}

impl std::fmt::Debug for LockCoordinator {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LockCoordinator").field("held", &self.held.len()).finish()
    }
}

impl LockCoordinator {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            held: Arc::new(DashMap::new()),
        }
    }

    /// Run `critical` while holding the lock described by `request`
    ///
    /// Returns the critical section's value, or `fallback()`'s value when the
    /// lease or lock cannot be obtained within the acquire timeout, or when
    /// the critical section fails or panics.
    pub async fn synchronize_with_lock<T, C, CFut, F, FFut>(
        &self,
        request: LockRequest,
        critical: C,
        fallback: F,
    ) -> T
    where
        C: FnOnce() -> CFut,
        CFut: Future<Output = std::result::Result<T, BoxError>>,
        F: FnOnce() -> FFut,
        FFut: Future<Output = T>,
    {
        let lease_id = match self.acquire(&request).await {
            Ok(lease_id) => lease_id,
            Err(e) => {
                error!("{}", e);
                return fallback().await;
            }
        };

        self.track(&request, lease_id);
        transition(&request.name, LockState::LockHeld);

        let outcome = AssertUnwindSafe(async move { critical().await }).catch_unwind().await;
        let value = match outcome {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                error!("Critical section under lock <{}> failed: {}", request.name, e);
                None
            }
            Err(_) => {
                error!("Critical section under lock <{}> panicked", request.name);
                None
            }
        };

        self.finish(&request, lease_id).await;

        match value {
            Some(value) => value,
            None => fallback().await,
        }
    }

    /// Lease grant then lock wait, both bounded by one acquire deadline
    async fn acquire(
        &self,
        request: &LockRequest,
    ) -> std::result::Result<i64, LockError> {
        let deadline = Instant::now() + request.acquire_timeout;
        let lock_name = request.name.clone();

        transition(&lock_name, LockState::LeaseRequested);
        let lease_id = match timeout_at(deadline, self.store.lease_grant(ceil_secs(request.ttl))).await {
            Ok(Ok(lease_id)) => lease_id,
            Ok(Err(source)) => {
                transition(&lock_name, LockState::LockError);
                return Err(LockError::LeaseGrant { lock_name, source });
            }
            Err(_) => {
                transition(&lock_name, LockState::LockTimeout);
                return Err(LockError::Timeout {
                    lock_name,
                    waited: request.acquire_timeout,
                });
            }
        };
        transition(&lock_name, LockState::LeaseGranted);

        transition(&lock_name, LockState::LockRequested);
        match timeout_at(deadline, self.store.lock(&lock_name, lease_id)).await {
            Ok(Ok(lock_key)) => {
                debug!(lock_key, lease_id, "lock <{}> acquired", lock_name);
                Ok(lease_id)
            }
            Ok(Err(source)) => {
                transition(&lock_name, LockState::LockError);
                self.revoke(&lock_name, lease_id).await;
                Err(LockError::Acquire { lock_name, source })
            }
            Err(_) => {
                transition(&lock_name, LockState::LockTimeout);
                self.revoke(&lock_name, lease_id).await;
                Err(LockError::Timeout {
                    lock_name,
                    waited: request.acquire_timeout,
                })
            }
        }
    }

    fn track(
        &self,
        request: &LockRequest,
        lease_id: i64,
    ) {
        let info = LockInfo {
            lock_name: request.name.clone(),
            lease_ttl: request.ttl.as_millis() as u64,
            acquire_timeout: request.acquire_timeout.as_millis() as u64,
            lease_id,
        };
        if let Some(previous) = self.held.insert(request.name.clone(), info) {
            warn!(
                previous_lease = previous.lease_id,
                lease_id, "lock <{}> was already tracked locally", request.name
            );
        }
    }

    async fn finish(
        &self,
        request: &LockRequest,
        lease_id: i64,
    ) {
        if request.release_on_finish {
            self.revoke(&request.name, lease_id).await;
            self.held.remove_if(&request.name, |_, info| info.lease_id == lease_id);
            transition(&request.name, LockState::Released);
            return;
        }

        debug!(
            lease_id,
            ttl = ?request.ttl,
            "lock <{}> stays held until its lease expires", request.name
        );
        let held = self.held.clone();
        let name = request.name.clone();
        let ttl = request.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            held.remove_if(&name, |_, info| info.lease_id == lease_id);
            transition(&name, LockState::Released);
        });
    }

    /// Best effort; a failed revoke leaves the lease to expire on its own
    async fn revoke(
        &self,
        lock_name: &str,
        lease_id: i64,
    ) {
        if let Err(e) = self.store.lease_revoke(lease_id).await {
            warn!(lease_id, "Unable to revoke lease of lock <{}>: {}", lock_name, e);
        }
    }

    pub fn is_held(
        &self,
        lock_name: &str,
    ) -> bool {
        self.held.contains_key(lock_name)
    }

    /// Locks currently held by this process, ordered by name
    pub fn held_locks(&self) -> BTreeMap<String, LockInfo> {
        self.held
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

fn transition(
    lock_name: &str,
    state: LockState,
) {
    trace!(lock_name, ?state, "lock state changed");
}

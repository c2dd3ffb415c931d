use std::collections::HashMap;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::local_key;
use crate::logical_value;
use crate::BackoffPolicy;
use crate::ChangeEvent;
use crate::ChangeHistory;
use crate::DispatchError;
use crate::ListenerRegistry;
use crate::PropertyCache;
use crate::PropertyValue;
use crate::RemoteStore;
use crate::StoreEvent;
use crate::StoreEventKind;
use crate::StoreEventStream;

/// Separates the rejected value from the failure message in `errorValue`
pub const ERROR_VALUE_SEPARATOR: &str = "~~~";

/// Where a value handed to [`WatchDispatcher::dispatch`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOrigin {
    /// Live watch notification
    Watch,
    /// Bulk load performed on first listener registration
    InitialLoad,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Key lives outside the store path
    Ignored,
    /// Cached value already equals the delivered one
    Unchanged,
    /// Older than a revision already seen for the key
    Superseded,
    /// Cache and history updated, `listeners` callbacks invoked
    Applied { listeners: usize },
    /// Key deleted upstream and evicted locally
    Removed,
    /// Conversion or a listener failed; later events are still processed
    Failed,
}

/// Single sequential consumer of the remote watch stream
///
/// Applies each event to the [`PropertyCache`], appends to the
/// [`ChangeHistory`] and fans out to the listeners returned by the
/// [`ListenerRegistry`], strictly in delivery order.
///
/// Values from the initial bulk load go through the same pipeline. Each
/// dispatch holds the per-key revision table for its whole run, so a bulk
/// loaded value never overtakes a newer live event for the same key.
pub struct WatchDispatcher {
    store_path: String,
    value_separator: String,
    cache: Arc<PropertyCache>,
    registry: Arc<ListenerRegistry>,
    history: Arc<ChangeHistory>,
    /// Latest store revision seen per key, deleted keys included
    revisions: Mutex<HashMap<String, i64>>,
    /// Last known reachability of the remote store
    available: AtomicBool,
}

impl std::fmt::Debug for WatchDispatcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatchDispatcher")
            .field("store_path", &self.store_path)
            .field("value_separator", &self.value_separator)
            .field("available", &self.is_available())
            .finish_non_exhaustive()
    }
}

impl WatchDispatcher {
    pub fn new(
        store_path: impl Into<String>,
        value_separator: impl Into<String>,
        cache: Arc<PropertyCache>,
        registry: Arc<ListenerRegistry>,
        history: Arc<ChangeHistory>,
    ) -> Self {
        Self {
            store_path: store_path.into(),
            value_separator: value_separator.into(),
            cache,
            registry,
            history,
            revisions: Mutex::new(HashMap::new()),
            available: AtomicBool::new(false),
        }
    }

    pub fn store_path(&self) -> &str {
        &self.store_path
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn set_available(
        &self,
        available: bool,
    ) {
        let previous = self.available.swap(available, Ordering::AcqRel);
        if previous != available {
            info!(available, "remote store availability changed");
        }
    }

    /// Apply one notification from the watch stream
    pub fn handle_event(
        &self,
        event: &StoreEvent,
    ) -> DispatchOutcome {
        let Some(key) = local_key(&event.key, &self.store_path) else {
            trace!(key = %event.key, "event outside store path discarded");
            return DispatchOutcome::Ignored;
        };

        match event.kind {
            StoreEventKind::Put => self.dispatch(key, &event.value, event.revision, DispatchOrigin::Watch),
            StoreEventKind::Delete => self.evict(key, event.revision),
        }
    }

    /// Drop the model and the change history of a key deleted upstream
    fn evict(
        &self,
        key: &str,
        revision: i64,
    ) -> DispatchOutcome {
        let mut revisions = self.revisions.lock();
        if !advance(&mut revisions, key, revision) {
            return DispatchOutcome::Superseded;
        }
        self.history.remove(key);
        match self.cache.remove(key) {
            Some(_) => {
                debug!(key, revision, "property removed upstream");
                DispatchOutcome::Removed
            }
            None => DispatchOutcome::Ignored,
        }
    }

    /// Run `raw` for local `key` through the conversion, cache, history and
    /// listener pipeline. Never fails: problems are logged, and on the initial
    /// load path also recorded as the model's error value.
    ///
    /// `revision` is the store revision of the value; 0 skips the ordering check.
    pub fn dispatch(
        &self,
        key: &str,
        raw: &str,
        revision: i64,
        origin: DispatchOrigin,
    ) -> DispatchOutcome {
        let mut revisions = self.revisions.lock();
        if !advance(&mut revisions, key, revision) {
            debug!(key, revision, ?origin, "value older than the last seen revision skipped");
            return DispatchOutcome::Superseded;
        }

        let value = logical_value(raw, &self.value_separator);

        if self.cache.value_of(key).as_deref() == Some(value) {
            trace!(key, "value unchanged, skipping dispatch");
            return DispatchOutcome::Unchanged;
        }

        match self.apply(key, value) {
            Ok(listeners) => {
                self.cache.set_error_value(key, None);
                DispatchOutcome::Applied { listeners }
            }
            Err(e) => {
                match origin {
                    DispatchOrigin::Watch => {
                        error!("Unable to handle watch event for <{}>: {}", key, e);
                    }
                    DispatchOrigin::InitialLoad => {
                        error!("Unable to load value of <{}>: {}", key, e);
                        self.record_error_value(key, value, &e);
                    }
                }
                DispatchOutcome::Failed
            }
        }
    }

    fn apply(
        &self,
        key: &str,
        value: &str,
    ) -> Result<usize, DispatchError> {
        let raw_type = self.registry.type_for(key).unwrap_or_default();
        let converted = raw_type.convert(value)?;

        let description = self.registry.description_for(key).unwrap_or_default();
        self.cache.upsert(key, raw_type, &description, value);
        self.history.record(key, ChangeEvent::now(converted.clone()));

        self.notify_listeners(key, &converted)
    }

    /// Invoke every listener for `key` in order. A failing listener does not
    /// stop the remaining ones; the first failure is reported.
    fn notify_listeners(
        &self,
        key: &str,
        value: &PropertyValue,
    ) -> Result<usize, DispatchError> {
        let listeners = self.registry.listeners_for(key);
        let mut first_error = None;

        for registration in &listeners {
            let callback = registration.callback();
            let result = match catch_unwind(AssertUnwindSafe(|| callback(key, value))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => DispatchError::Listener {
                    key: key.to_string(),
                    message: e.to_string(),
                },
                Err(_) => DispatchError::ListenerPanicked { key: key.to_string() },
            };
            warn!(
                listener = registration.key(),
                match_mode = ?registration.match_mode(),
                "listener failed: {}",
                result
            );
            first_error.get_or_insert(result);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(listeners.len()),
        }
    }

    fn record_error_value(
        &self,
        key: &str,
        value: &str,
        e: &DispatchError,
    ) {
        let error_value = format!("{value}{ERROR_VALUE_SEPARATOR}{e}");
        let raw_type = self.registry.type_for(key).unwrap_or_default();
        let description = self.registry.description_for(key).unwrap_or_default();
        self.cache.set_rejected(key, raw_type, &description, error_value);
    }

    /// Consume the store's watch stream for the store path until the retry
    /// policy is exhausted. Reopens the stream after errors or closure.
    ///
    /// `opened` is a stream the caller already subscribed, consumed before the
    /// first reconnect.
    pub async fn run(
        self: Arc<Self>,
        store: Arc<dyn RemoteStore>,
        policy: BackoffPolicy,
        mut opened: Option<StoreEventStream>,
    ) {
        let prefix = self.store_path.clone();
        let mut attempt = 0usize;

        loop {
            let subscription = match opened.take() {
                Some(events) => Ok(events),
                None => store.watch(&prefix).await,
            };
            match subscription {
                Ok(mut events) => {
                    attempt = 0;
                    self.set_available(true);
                    info!("Watching remote store path <{}>", prefix);

                    while let Some(item) = events.next().await {
                        match item {
                            Ok(event) => {
                                debug!(key = %event.key, kind = ?event.kind, "watch event received");
                                self.handle_event(&event);
                            }
                            Err(e) => {
                                warn!("Watch stream on <{}> failed: {}", prefix, e);
                                break;
                            }
                        }
                    }
                    self.set_available(false);
                }
                Err(e) => {
                    self.set_available(false);
                    warn!("Unable to open watch on <{}>: {}", prefix, e);
                }
            }

            attempt += 1;
            if policy.is_exhausted(attempt) {
                error!(
                    "Watch on <{}> abandoned after {} reconnect attempts",
                    prefix, policy.max_retries
                );
                return;
            }
            let delay = policy.delay_for(attempt);
            warn!(attempt, ?delay, "reconnecting watch stream");
            tokio::time::sleep(delay).await;
        }
    }
}

/// Record `revision` as the latest seen for `key`. False when it is older than
/// the one already recorded.
fn advance(
    revisions: &mut HashMap<String, i64>,
    key: &str,
    revision: i64,
) -> bool {
    if revision == 0 {
        return true;
    }
    match revisions.get_mut(key) {
        Some(last) if revision < *last => false,
        Some(last) => {
            *last = revision;
            true
        }
        None => {
            revisions.insert(key.to_string(), revision);
            true
        }
    }
}

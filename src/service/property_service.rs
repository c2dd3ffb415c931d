use std::collections::BTreeMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::StoreStat;
use crate::local_key;
use crate::logical_value;
use crate::mask::masked_endpoints;
use crate::time::ceil_secs;
use crate::BoxError;
use crate::ChangeHistory;
use crate::DispatchOrigin;
use crate::EnvSyncConfig;
use crate::EtcdStore;
use crate::ListenerRegistry;
use crate::LockCoordinator;
use crate::LockRequest;
use crate::PropertyCache;
use crate::PropertyListener;
use crate::PropertyModel;
use crate::RemoteError;
use crate::RemoteStore;
use crate::Result;
use crate::ValidationError;
use crate::ValueType;
use crate::WatchDispatcher;

/// Key probed by [`PropertyService::check_availability`]
const AVAILABILITY_PROBE_KEY: &str = "alive";

/// Options of [`PropertyService::update_property`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Require a covering listener and a convertible value
    pub validate: bool,
    /// Return the value replaced by the write
    pub fetch_previous: bool,
    /// Attach the key to a lease so it disappears when the lease ends
    pub lease_id: Option<i64>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            validate: true,
            fetch_previous: false,
            lease_id: None,
        }
    }
}

impl UpdateOptions {
    /// Skip the local registration and conversion checks
    pub fn unchecked() -> Self {
        Self {
            validate: false,
            ..Default::default()
        }
    }

    pub fn with_previous(mut self) -> Self {
        self.fetch_previous = true;
        self
    }

    pub fn with_lease(
        mut self,
        lease_id: i64,
    ) -> Self {
        self.lease_id = Some(lease_id);
        self
    }
}

/// Entry point of the configuration mirror
///
/// Owns the single remote store connection of the process and wires it to
/// the cache, the listener registry, the watch consumer and the lock
/// coordinator. Keys passed in and returned are local: the configured store
/// path is added and removed here.
///
/// Dropping the service stops its watch consumer.
pub struct PropertyService {
    config: EnvSyncConfig,
    store: Arc<dyn RemoteStore>,
    cache: Arc<PropertyCache>,
    registry: Arc<ListenerRegistry>,
    history: Arc<ChangeHistory>,
    dispatcher: Arc<WatchDispatcher>,
    locks: LockCoordinator,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PropertyService {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("PropertyService")
            .field("config", &self.config)
            .field("properties", &self.cache.len())
            .field("listeners", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl PropertyService {
    /// Connect to etcd with `config` and verify the store is reachable
    pub async fn connect(config: EnvSyncConfig) -> Result<Self> {
        let config = config.validate()?;
        let store = EtcdStore::connect(&config.store).await?;
        let service = Self::new(config, Arc::new(store));
        service.check_availability().await?;
        Ok(service)
    }

    /// Build a service over an already connected store
    pub fn new(
        config: EnvSyncConfig,
        store: Arc<dyn RemoteStore>,
    ) -> Self {
        info!(
            "Initializing property service: store path <{}>, load values {}, endpoints <{}>",
            config.store.store_path,
            config.watch.load_values,
            masked_endpoints(&config.store.endpoints)
        );

        let cache = Arc::new(PropertyCache::new());
        let registry = Arc::new(ListenerRegistry::new());
        let history = Arc::new(ChangeHistory::new(config.watch.history_limit));
        let dispatcher = Arc::new(WatchDispatcher::new(
            config.store.store_path.clone(),
            config.store.value_separator.clone(),
            cache.clone(),
            registry.clone(),
            history.clone(),
        ));
        let locks = LockCoordinator::new(store.clone());

        Self {
            config,
            store,
            cache,
            registry,
            history,
            dispatcher,
            locks,
            watch_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EnvSyncConfig {
        &self.config
    }

    /// Local read of `key`
    ///
    /// Falls back to the process environment variable of the same name; a
    /// value found there is cached as a `String` property.
    pub fn property(
        &self,
        key: &str,
    ) -> Result<Option<String>> {
        ensure_key(key)?;
        if let Some(value) = self.cache.value_of(key) {
            return Ok(Some(value));
        }
        match std::env::var(key) {
            Ok(value) => {
                self.cache.get_or_create(key, ValueType::String, "", &value);
                Ok(Some(value))
            }
            Err(_) => Ok(None),
        }
    }

    /// Make `key` known locally with a default value
    pub fn define_property(
        &self,
        key: &str,
        raw_type: ValueType,
        description: &str,
        default_value: &str,
    ) -> Result<PropertyModel> {
        ensure_key(key)?;
        Ok(self.cache.get_or_create(key, raw_type, description, default_value))
    }

    /// Write `value` for `key` to the remote store
    ///
    /// With `options.validate` the key must be covered by a listener and the
    /// value must convert to the registered type; both checks run before any
    /// remote call. The local cache follows once the watch event arrives.
    pub async fn update_property(
        &self,
        key: &str,
        value: &str,
        options: UpdateOptions,
    ) -> Result<Option<String>> {
        ensure_key(key)?;
        if options.validate {
            self.validate_update(key, value)?;
        }

        let previous = self
            .store
            .put(
                &self.config.store.global_key(key),
                value,
                options.lease_id,
                options.fetch_previous,
            )
            .await?;
        debug!(key, lease_id = ?options.lease_id, "property written");
        Ok(previous.map(|kv| self.logical(&kv.value)))
    }

    fn validate_update(
        &self,
        key: &str,
        value: &str,
    ) -> Result<()> {
        if !self.registry.is_updatable(key) {
            return Err(ValidationError::NotUpdatable { key: key.to_string() }.into());
        }
        let raw_type = self.registry.type_for(key).unwrap_or_default();
        raw_type.convert(logical_value(value, &self.config.store.value_separator))?;
        Ok(())
    }

    /// Write every pair concurrently, without validation
    pub async fn update_properties(
        &self,
        values: &HashMap<String, String>,
    ) -> Result<()> {
        let writes = values.iter().map(|(key, value)| async move {
            ensure_key(key)?;
            self.store
                .put(&self.config.store.global_key(key), value, None, false)
                .await?;
            Ok::<_, crate::Error>(())
        });
        try_join_all(writes).await?;
        Ok(())
    }

    /// Remote range read of every key under `prefix`
    ///
    /// Keys are relative to the store path, or to the store path plus
    /// `prefix` when `strip_prefix` is set.
    pub async fn properties(
        &self,
        prefix: &str,
        strip_prefix: bool,
        limit: Option<i64>,
    ) -> Result<BTreeMap<String, String>> {
        let global_prefix = self.config.store.global_key(prefix);
        let root = if strip_prefix {
            global_prefix.as_str()
        } else {
            self.config.store.store_path.as_str()
        };

        let kvs = self.store.get_prefix(&global_prefix, limit).await?;
        Ok(kvs
            .iter()
            .filter_map(|kv| local_key(&kv.key, root).map(|key| (key.to_string(), self.logical(&kv.value))))
            .collect())
    }

    /// Remote point read of `key`
    pub async fn fetch_property(
        &self,
        key: &str,
    ) -> Result<Option<String>> {
        ensure_key(key)?;
        let kv = self.store.get(&self.config.store.global_key(key)).await?;
        Ok(kv.map(|kv| self.logical(&kv.value)))
    }

    /// Delete `name`, or every key under it with `as_prefix`
    ///
    /// The previous value is only reported for single key deletes.
    pub async fn remove_property(
        &self,
        name: &str,
        as_prefix: bool,
    ) -> Result<Option<String>> {
        if !as_prefix {
            ensure_key(name)?;
        }
        let previous = self
            .store
            .delete(&self.config.store.global_key(name), as_prefix)
            .await?;
        Ok(previous.map(|kv| self.logical(&kv.value)))
    }

    /// Register `callback` for changes of exactly `key`
    ///
    /// The watch stream is open when this returns, so every later write
    /// reaches the callback.
    pub async fn add_listener(
        &self,
        key: &str,
        raw_type: ValueType,
        description: &str,
        callback: PropertyListener,
    ) -> Result<()> {
        ensure_key(key)?;
        self.registry.register_exact(key, raw_type, description, callback);
        self.ensure_watching().await?;

        if self.config.watch.load_values {
            if let Some(kv) = self.store.get(&self.config.store.global_key(key)).await? {
                self.dispatcher
                    .dispatch(key, &kv.value, kv.mod_revision, DispatchOrigin::InitialLoad);
            }
        }
        Ok(())
    }

    /// Register `callback` for changes of every key starting with `prefix`
    ///
    /// See [`PropertyService::add_listener`].
    pub async fn add_prefix_listener(
        &self,
        prefix: &str,
        raw_type: ValueType,
        description: &str,
        callback: PropertyListener,
    ) -> Result<()> {
        self.registry.register_prefix(prefix, raw_type, description, callback);
        self.ensure_watching().await?;

        if self.config.watch.load_values {
            let store_path = &self.config.store.store_path;
            let kvs = self
                .store
                .get_prefix(&self.config.store.global_key(prefix), None)
                .await?;
            for kv in &kvs {
                if let Some(key) = local_key(&kv.key, store_path) {
                    self.dispatcher
                        .dispatch(key, &kv.value, kv.mod_revision, DispatchOrigin::InitialLoad);
                }
            }
        }
        Ok(())
    }

    /// Start the watch consumer once, subscribed before this returns
    ///
    /// When the subscription fails the consumer is still started and keeps
    /// reconnecting in the background; the error is reported to the caller.
    async fn ensure_watching(&self) -> Result<()> {
        let mut task = self.watch_task.lock().await;
        if task.is_some() {
            return Ok(());
        }

        let store_path = self.dispatcher.store_path();
        info!("Starting watch consumer on <{}>", store_path);
        let (opened, result) = match self.store.watch(store_path).await {
            Ok(events) => (Some(events), Ok(())),
            Err(e) => {
                warn!("Unable to open watch on <{}>, retrying in background: {}", store_path, e);
                (None, Err(e.into()))
            }
        };
        *task = Some(tokio::spawn(self.dispatcher.clone().run(
            self.store.clone(),
            self.config.watch.reconnect,
            opened,
        )));
        result
    }

    /// Cached properties covered by a listener registration
    pub fn updatable_properties(&self) -> Vec<PropertyModel> {
        self.registry.list_updatable(&self.cache)
    }

    /// Every cached property, ordered by key
    pub fn all_properties(&self) -> Vec<PropertyModel> {
        self.cache.snapshot()
    }

    /// Grant a lease of `ttl` rounded up to whole seconds
    pub async fn create_lease(
        &self,
        ttl: Duration,
    ) -> Result<i64> {
        Ok(self.store.lease_grant(ceil_secs(ttl)).await?)
    }

    /// Renew `lease_id` once and return its remaining ttl in seconds
    pub async fn refresh_lease(
        &self,
        lease_id: i64,
    ) -> Result<i64> {
        Ok(self.store.lease_keep_alive(lease_id).await?)
    }

    /// [`LockRequest`] for `name` with the configured lock defaults
    pub fn lock_request(
        &self,
        name: &str,
    ) -> LockRequest {
        LockRequest::new(name, &self.config.lock)
    }

    /// See [`LockCoordinator::synchronize_with_lock`]
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
        self.locks.synchronize_with_lock(request, critical, fallback).await
    }

    /// Probe the store with a point read bounded by the max check timeout
    pub async fn check_availability(&self) -> Result<()> {
        let max_timeout = self.config.store.max_check_timeout();
        let result = match tokio::time::timeout(max_timeout, self.store.get(AVAILABILITY_PROBE_KEY)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                error!("Unable to reach remote store: {}", e);
                Err(e)
            }
            Err(_) => {
                error!("Remote store availability check timed out after {:?}", max_timeout);
                Err(RemoteError::Timeout(max_timeout))
            }
        };
        self.dispatcher.set_available(result.is_ok());
        Ok(result?)
    }

    /// Diagnostics snapshot
    pub fn stat(&self) -> StoreStat {
        StoreStat {
            store_available: self.dispatcher.is_available(),
            lock_info: self.locks.held_locks(),
            watch_history: self.history.snapshot(),
        }
    }

    fn logical(
        &self,
        raw: &str,
    ) -> String {
        logical_value(raw, &self.config.store.value_separator).to_string()
    }
}

impl Drop for PropertyService {
    fn drop(&mut self) {
        if let Some(task) = self.watch_task.get_mut().take() {
            debug!("stopping watch consumer");
            task.abort();
        }
    }
}

fn ensure_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(ValidationError::EmptyKey.into());
    }
    Ok(())
}

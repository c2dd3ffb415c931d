use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::Client;
use etcd_client::ConnectOptions;
use etcd_client::DeleteOptions;
use etcd_client::EventType;
use etcd_client::GetOptions;
use etcd_client::LockOptions;
use etcd_client::PutOptions;
use etcd_client::WatchOptions;
use etcd_client::WatchStream;
use etcd_client::Watcher;
use futures::stream;
use futures::StreamExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::KeyValue;
use super::RemoteStore;
use super::StoreEvent;
use super::StoreEventStream;
use super::StoreResult;
use crate::mask::masked_endpoints;
use crate::RemoteError;
use crate::StoreConfig;

/// [`RemoteStore`] backed by an etcd cluster
///
/// The underlying client multiplexes every request over one gRPC channel;
/// cloning it is cheap and clones share that channel.
///
/// Every call except [`RemoteStore::lock`] is bounded by the request timeout.
/// A lock request blocks until the lock is free, so its wait is bounded by the
/// caller's acquire timeout instead.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    request_timeout: Duration,
}

impl std::fmt::Debug for EtcdStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EtcdStore")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl EtcdStore {
    /// Connect to the configured endpoints
    ///
    /// Basic authentication is used when both `user` and `password` are set.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let mut options = ConnectOptions::new().with_connect_timeout(config.connect_timeout());

        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            options = options.with_user(user.clone(), password.clone());
        }

        info!(
            "Connecting to etcd endpoints <{}>",
            masked_endpoints(&config.endpoints)
        );
        let client = Client::connect(&config.endpoints, Some(options)).await?;
        Ok(Self::from_client(client, config.request_timeout()))
    }

    pub fn from_client(
        client: Client,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            request_timeout,
        }
    }

    async fn bounded<T, F>(
        &self,
        request: F,
    ) -> StoreResult<T>
    where
        F: Future<Output = Result<T, etcd_client::Error>>,
    {
        with_deadline(self.request_timeout, request).await
    }
}

/// Run `request`, failing with [`RemoteError::Timeout`] once `timeout` elapses
pub(crate) async fn with_deadline<T, E, F>(
    timeout: Duration,
    request: F,
) -> StoreResult<T>
where
    F: Future<Output = Result<T, E>>,
    RemoteError: From<E>,
{
    match tokio::time::timeout(timeout, request).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(RemoteError::Timeout(timeout)),
    }
}

fn convert_kv(kv: &etcd_client::KeyValue) -> StoreResult<KeyValue> {
    let key = kv.key_str().map_err(|e| RemoteError::Decode(e.to_string()))?;
    let value = kv.value_str().map_err(|e| RemoteError::Decode(e.to_string()))?;
    Ok(KeyValue {
        key: key.to_string(),
        value: value.to_string(),
        lease_id: kv.lease(),
        mod_revision: kv.mod_revision(),
    })
}

fn convert_event(event: &etcd_client::Event) -> Option<StoreResult<StoreEvent>> {
    let kv = event.kv()?;
    Some(convert_kv(kv).map(|kv| {
        let revision = kv.mod_revision;
        let event = match event.event_type() {
            EventType::Put => StoreEvent::put(kv.key, kv.value),
            EventType::Delete => StoreEvent::delete(kv.key),
        };
        event.at_revision(revision)
    }))
}

/// Watch state; the watcher handle must outlive the stream or etcd cancels it
type WatchState = Option<(Watcher, WatchStream)>;

#[async_trait]
impl RemoteStore for EtcdStore {
    async fn get(
        &self,
        key: &str,
    ) -> StoreResult<Option<KeyValue>> {
        let mut client = self.client.clone();
        let response = self.bounded(client.get(key, None)).await?;
        response.kvs().first().map(convert_kv).transpose()
    }

    async fn get_prefix(
        &self,
        prefix: &str,
        limit: Option<i64>,
    ) -> StoreResult<Vec<KeyValue>> {
        let mut client = self.client.clone();
        let mut options = GetOptions::new().with_prefix();
        if let Some(limit) = limit {
            options = options.with_limit(limit);
        }
        let response = self.bounded(client.get(prefix, Some(options))).await?;
        response.kvs().iter().map(convert_kv).collect()
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        lease_id: Option<i64>,
        fetch_previous: bool,
    ) -> StoreResult<Option<KeyValue>> {
        let mut client = self.client.clone();
        let mut options = PutOptions::new();
        if fetch_previous {
            options = options.with_prev_key();
        }
        if let Some(lease_id) = lease_id {
            options = options.with_lease(lease_id);
        }
        let response = self.bounded(client.put(key, value, Some(options))).await?;
        response.prev_key().map(convert_kv).transpose()
    }

    async fn delete(
        &self,
        key: &str,
        as_prefix: bool,
    ) -> StoreResult<Option<KeyValue>> {
        let mut client = self.client.clone();
        let options = if as_prefix {
            DeleteOptions::new().with_prefix()
        } else {
            DeleteOptions::new().with_prev_key()
        };
        let response = self.bounded(client.delete(key, Some(options))).await?;
        debug!("etcd deleted {} key(s) for <{}>", response.deleted(), key);
        response.prev_kvs().first().map(convert_kv).transpose()
    }

    async fn watch(
        &self,
        prefix: &str,
    ) -> StoreResult<StoreEventStream> {
        let mut client = self.client.clone();
        let (watcher, watch_stream) = self
            .bounded(client.watch(prefix, Some(WatchOptions::new().with_prefix())))
            .await?;
        debug!(watch_id = watcher.watch_id(), prefix, "etcd watch created");

        let initial: WatchState = Some((watcher, watch_stream));
        let events = stream::unfold(initial, |state| async move {
            let (watcher, mut watch_stream) = state?;
            match watch_stream.message().await {
                Ok(Some(response)) if response.canceled() => {
                    warn!("etcd watch canceled: {}", response.cancel_reason());
                    Some((vec![Err(RemoteError::WatchClosed)], None))
                }
                Ok(Some(response)) => {
                    let batch: Vec<_> = response.events().iter().filter_map(convert_event).collect();
                    Some((batch, Some((watcher, watch_stream))))
                }
                Ok(None) => None,
                Err(e) => Some((vec![Err(RemoteError::from(e))], None)),
            }
        })
        .flat_map(stream::iter);

        Ok(events.boxed())
    }

    async fn lease_grant(
        &self,
        ttl_secs: i64,
    ) -> StoreResult<i64> {
        let mut client = self.client.clone();
        let response = self.bounded(client.lease_grant(ttl_secs, None)).await?;
        Ok(response.id())
    }

    async fn lease_keep_alive(
        &self,
        lease_id: i64,
    ) -> StoreResult<i64> {
        let mut client = self.client.clone();
        let renewal = async move {
            let (mut keeper, mut responses) = client.lease_keep_alive(lease_id).await?;
            keeper.keep_alive().await?;
            responses.message().await
        };
        match self.bounded(renewal).await? {
            Some(response) if response.ttl() > 0 => Ok(response.ttl()),
            _ => Err(RemoteError::LeaseNotFound(lease_id)),
        }
    }

    async fn lease_revoke(
        &self,
        lease_id: i64,
    ) -> StoreResult<()> {
        let mut client = self.client.clone();
        self.bounded(client.lease_revoke(lease_id)).await?;
        Ok(())
    }

    async fn lock(
        &self,
        name: &str,
        lease_id: i64,
    ) -> StoreResult<String> {
        // unbounded here; the lock coordinator applies the acquire deadline
        let mut client = self.client.clone();
        let response = client.lock(name, Some(LockOptions::new().with_lease(lease_id))).await?;
        Ok(String::from_utf8_lossy(response.key()).into_owned())
    }
}

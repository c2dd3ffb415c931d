//! Shared fixtures for unit tests

mod memory_store;

pub(crate) use memory_store::*;

use crate::EnvSyncConfig;

/// Config rooted at `store_path` with bulk load switched on or off
pub(crate) fn test_config(
    store_path: &str,
    load_values: bool,
) -> EnvSyncConfig {
    let mut config = EnvSyncConfig::default();
    config.store.store_path = store_path.to_string();
    config.watch.load_values = load_values;
    config.watch.reconnect.base_delay_ms = 10;
    config.watch.reconnect.max_delay_ms = 100;
    config
}

/// Give spawned tasks a chance to drain their queues
pub(crate) async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Defaults applied by [`crate::LockRequest::new`]
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LockConfig {
    /// How long a lock may be held without renewal
    ///
    /// Default: 30000
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,

    /// How long a contender waits before running the fallback
    ///
    /// Covers the lease grant and the lock wait together, independent of
    /// `store.request_timeout_ms`.
    ///
    /// Default: 10000
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Revoke the lease as soon as the critical section finishes
    ///
    /// Default: true
    #[serde(default = "default_release_on_finish")]
    pub release_on_finish: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ttl_ms: default_lease_ttl_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            release_on_finish: default_release_on_finish(),
        }
    }
}

impl LockConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lease_ttl_ms == 0 || self.acquire_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "lock lease_ttl_ms and acquire_timeout_ms must be positive, got {} and {}",
                self.lease_ttl_ms, self.acquire_timeout_ms
            ))));
        }
        Ok(())
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

fn default_lease_ttl_ms() -> u64 {
    30_000
}
fn default_acquire_timeout_ms() -> u64 {
    10_000
}
fn default_release_on_finish() -> bool {
    true
}

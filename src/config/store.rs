use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Connection settings and key namespace of the remote store
///
/// Every logical key handled by this crate lives under `store_path`, which lets
/// several application instances share one store without seeing each other.
#[derive(Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    /// Store endpoint urls, e.g. `http://localhost:2379`
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Prefix prepended to every logical key, e.g. `/dev/infrastructure/web-services/`
    #[serde(default)]
    pub store_path: String,

    /// Basic authentication user. Must be set together with `password`
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Default: 3000
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per request timeout for get/put/delete/watch/lease calls
    ///
    /// Lock requests are not bounded by it; they wait up to
    /// `lock.acquire_timeout_ms`, which may be longer.
    /// Default: 5000
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Upper bound for the startup availability probe
    /// Default: 60
    #[serde(default = "default_max_check_timeout_secs")]
    pub max_check_timeout_secs: u64,

    /// Stored values may carry metadata after this token; only the part
    /// before its first occurrence is the logical value. Empty disables it.
    #[serde(default = "default_value_separator")]
    pub value_separator: String,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoints", &self.endpoints)
            .field("store_path", &self.store_path)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "*****"))
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("max_check_timeout_secs", &self.max_check_timeout_secs)
            .field("value_separator", &self.value_separator)
            .finish()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            store_path: String::new(),
            user: None,
            password: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_check_timeout_secs: default_max_check_timeout_secs(),
            value_separator: default_value_separator(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.iter().all(|e| e.trim().is_empty()) {
            return Err(Error::Config(ConfigError::Message(
                "at least one store endpoint is required".into(),
            )));
        }

        if self.user.is_some() != self.password.is_some() {
            return Err(Error::Config(ConfigError::Message(
                "store user and password must be configured together".into(),
            )));
        }

        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "store timeouts must be positive, got connect={}ms request={}ms",
                self.connect_timeout_ms, self.request_timeout_ms
            ))));
        }

        if self.max_check_timeout_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_check_timeout_secs must be positive".into(),
            )));
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn max_check_timeout(&self) -> Duration {
        Duration::from_secs(self.max_check_timeout_secs)
    }

    /// Global store key for a logical key
    pub fn global_key(
        &self,
        key: &str,
    ) -> String {
        format!("{}{}", self.store_path, key)
    }
}

fn default_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_max_check_timeout_secs() -> u64 {
    60
}
fn default_value_separator() -> String {
    ":".to_string()
}

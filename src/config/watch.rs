//! Watch stream configuration
//!
//! ```toml
//! [watch]
//! load_values = true    # read current values on first listener registration
//! history_limit = 100   # change events kept per key
//!
//! [watch.reconnect]
//! max_retries = 0       # unlimited
//! base_delay_ms = 500
//! max_delay_ms = 30000
//! ```

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::BackoffPolicy;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Read the current remote value when a listener is first registered
    ///
    /// Default: false
    #[serde(default)]
    pub load_values: bool,

    /// Maximum number of change events kept per key
    ///
    /// Default: 100
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Reconnect policy when the watch stream breaks
    #[serde(default)]
    pub reconnect: BackoffPolicy,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            load_values: false,
            history_limit: default_history_limit(),
            reconnect: BackoffPolicy::default(),
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.history_limit == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch history_limit must be at least 1".into(),
            )));
        }
        self.reconnect.validate()
    }
}

fn default_history_limit() -> usize {
    100
}

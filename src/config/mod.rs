//! Configuration management for the configuration mirror.
//!
//! Settings are layered with increasing priority:
//! 1. Default values (hardcoded)
//! 2. File named by the `CONFIG_PATH` environment variable
//! 3. Environment variables prefixed with `ENVSYNC` and `__` as separator,
//!    e.g. `ENVSYNC__STORE__STORE_PATH=/dev/web-services/`
//!

mod lock;
mod retry;
mod store;
mod watch;
pub use lock::*;
pub use retry::*;
pub use store::*;
pub use watch::*;


//---
use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "ENVSYNC";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct EnvSyncConfig {
    /// Remote store connection and key namespace
    #[serde(default)]
    pub store: StoreConfig,
    /// Watch stream and change history
    #[serde(default)]
    pub watch: WatchConfig,
    /// Defaults for lease based locks
    #[serde(default)]
    pub lock: LockConfig,
}

impl EnvSyncConfig {
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(environment_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config) // No validation - deferred to validate()
    }

    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment_source())
            .build()?
            .try_deserialize()?;
        Ok(config) // No validation - deferred to validate()
    }

    pub fn validate(self) -> Result<Self> {
        self.store.validate()?;
        self.watch.validate()?;
        self.lock.validate()?;
        Ok(self)
    }
}

fn environment_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("store.endpoints")
}

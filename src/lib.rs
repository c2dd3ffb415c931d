//! Client side mirror of configuration held in etcd
//!
//! - [`PropertyService`] - facade used by applications
//! - [`WatchDispatcher`] - applies remote changes to the local cache and listeners
//! - [`LockCoordinator`] - runs a critical section on at most one instance
//! - [`RemoteStore`] - what the mirror needs from the consistent store
//!
//! ```ignore
//! let service = PropertyService::connect(EnvSyncConfig::new()?).await?;
//! service
//!     .add_listener("pool.size", ValueType::Integer, "db pool", listener(|_, v| {
//!         tracing::info!("pool size is now {}", v);
//!         Ok(())
//!     }))
//!     .await?;
//! ```

mod config;
mod errors;
mod history;
mod listener;
mod lock;
mod property;
mod service;
mod store;
pub mod utils;
mod watch;

pub use config::*;
pub use errors::*;
pub use history::*;
pub use listener::*;
pub use lock::*;
pub use property::*;
pub use service::*;
pub use store::*;
pub use utils::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ChangeEvent;
use crate::LockInfo;

/// Read-only diagnostics snapshot for an external status endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStat {
    /// Last known reachability of the remote store
    pub store_available: bool,
    /// Locks held by this process keyed by lock name
    pub lock_info: BTreeMap<String, LockInfo>,
    /// Recent applied changes per key, oldest first
    pub watch_history: BTreeMap<String, Vec<ChangeEvent>>,
}

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::Serialize;

use super::HistoryRing;
use crate::time::get_now_as_millis;
use crate::PropertyValue;

/// One applied value change
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub value: PropertyValue,
    /// Milliseconds since the unix epoch
    pub timestamp: u64,
}

impl ChangeEvent {
    pub fn now(value: PropertyValue) -> Self {
        Self {
            value,
            timestamp: get_now_as_millis(),
        }
    }
}

/// Bounded per-key history of applied changes, kept for diagnostics
#[derive(Debug)]
pub struct ChangeHistory {
    entries: DashMap<String, HistoryRing<ChangeEvent>>,
    limit: usize,
}

impl ChangeHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: DashMap::new(),
            limit: limit.max(1),
        }
    }

    pub fn record(
        &self,
        key: &str,
        event: ChangeEvent,
    ) {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| HistoryRing::with_capacity(self.limit))
            .push(event);
    }

    /// Forget every recorded change of `key`
    pub fn remove(
        &self,
        key: &str,
    ) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Recorded changes for `key`, oldest first
    pub fn events(
        &self,
        key: &str,
    ) -> Vec<ChangeEvent> {
        self.entries
            .get(key)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(
        &self,
        key: &str,
    ) -> usize {
        self.entries.get(key).map(|ring| ring.len()).unwrap_or(0)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Copy of every key's history ordered by key
    pub fn snapshot(&self) -> BTreeMap<String, Vec<ChangeEvent>> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().iter().cloned().collect()))
            .collect()
    }
}

impl Default for ChangeHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

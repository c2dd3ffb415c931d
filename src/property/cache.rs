use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::trace;

use super::PropertyModel;
use crate::ValueType;

/// Thread safe key -> [`PropertyModel`] map
///
/// Single source of truth for known configuration. Locks are held only for the
/// map operation itself; callers get cloned models back, never references into
/// the map, so no lock outlives a call.
#[derive(Debug, Default)]
pub struct PropertyCache {
    properties: RwLock<BTreeMap<String, PropertyModel>>,
}

impl PropertyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<PropertyModel> {
        self.properties.read().get(key).cloned()
    }

    pub fn contains_key(
        &self,
        key: &str,
    ) -> bool {
        self.properties.read().contains_key(key)
    }

    /// Current raw value of `key`, if known
    pub fn value_of(
        &self,
        key: &str,
    ) -> Option<String> {
        self.properties.read().get(key).map(|m| m.value().to_string())
    }

    /// Return the existing model or insert a new one built from the arguments
    pub fn get_or_create(
        &self,
        key: &str,
        raw_type: ValueType,
        description: &str,
        value: &str,
    ) -> PropertyModel {
        let mut properties = self.properties.write();
        properties
            .entry(key.to_string())
            .or_insert_with(|| {
                trace!(key, ?raw_type, "property created");
                PropertyModel::new(key, raw_type, description, value)
            })
            .clone()
    }

    /// Update the value of a known key. Returns false when the key is unknown.
    pub fn set_value(
        &self,
        key: &str,
        value: &str,
    ) -> bool {
        match self.properties.write().get_mut(key) {
            Some(model) => {
                model.set_value(value);
                true
            }
            None => false,
        }
    }

    /// Update the value of `key`, creating the model on first sight
    pub fn upsert(
        &self,
        key: &str,
        raw_type: ValueType,
        description: &str,
        value: &str,
    ) {
        let mut properties = self.properties.write();
        match properties.get_mut(key) {
            Some(model) => model.set_value(value),
            None => {
                properties.insert(key.to_string(), PropertyModel::new(key, raw_type, description, value));
            }
        }
    }

    pub fn set_error_value(
        &self,
        key: &str,
        error_value: Option<String>,
    ) -> bool {
        match self.properties.write().get_mut(key) {
            Some(model) => {
                model.set_error_value(error_value);
                true
            }
            None => false,
        }
    }

    /// Record `error_value` for `key`. An unknown key gets a model without a
    /// value, so the rejected value is neither its value nor its init value.
    pub fn set_rejected(
        &self,
        key: &str,
        raw_type: ValueType,
        description: &str,
        error_value: String,
    ) {
        let mut properties = self.properties.write();
        properties
            .entry(key.to_string())
            .or_insert_with(|| PropertyModel::without_value(key, raw_type, description))
            .set_error_value(Some(error_value));
    }

    pub fn remove(
        &self,
        key: &str,
    ) -> Option<PropertyModel> {
        self.properties.write().remove(key)
    }

    /// All known properties ordered by key
    pub fn snapshot(&self) -> Vec<PropertyModel> {
        self.properties.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.properties.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.read().is_empty()
    }
}

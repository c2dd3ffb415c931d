use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::BoxError;
use crate::PropertyCache;
use crate::PropertyModel;
use crate::PropertyValue;
use crate::ValueType;

/// Callback invoked with `(key, converted value)` when a watched key changes
///
/// Listeners run on the single watch consumer task. A slow listener delays
/// every event queued behind it, so handlers must return quickly.
pub type PropertyListener = Arc<dyn Fn(&str, &PropertyValue) -> Result<(), BoxError> + Send + Sync>;

/// Wrap a closure as a [`PropertyListener`]
pub fn listener<F>(f: F) -> PropertyListener
where
    F: Fn(&str, &PropertyValue) -> Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Exact,
    Prefix,
}

/// Immutable listener registration
pub struct Registration {
    key: String,
    match_mode: MatchMode,
    expected_type: ValueType,
    description: String,
    sequence: u64,
    callback: PropertyListener,
}

impl Registration {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn match_mode(&self) -> MatchMode {
        self.match_mode
    }

    pub fn expected_type(&self) -> ValueType {
        self.expected_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn callback(&self) -> &PropertyListener {
        &self.callback
    }

    fn covers(
        &self,
        key: &str,
    ) -> bool {
        match self.match_mode {
            MatchMode::Exact => self.key == key,
            MatchMode::Prefix => key.starts_with(&self.key),
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("match_mode", &self.match_mode)
            .field("expected_type", &self.expected_type)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryInner {
    exact: HashMap<String, Vec<Arc<Registration>>>,
    /// Kept in registration order
    prefix: Vec<Arc<Registration>>,
}

/// Append-only registry of exact-key and prefix listeners
#[derive(Default)]
pub struct ListenerRegistry {
    inner: RwLock<RegistryInner>,
    next_sequence: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_exact(
        &self,
        key: &str,
        expected_type: ValueType,
        description: &str,
        callback: PropertyListener,
    ) -> Arc<Registration> {
        self.register(key, MatchMode::Exact, expected_type, description, callback)
    }

    pub fn register_prefix(
        &self,
        prefix: &str,
        expected_type: ValueType,
        description: &str,
        callback: PropertyListener,
    ) -> Arc<Registration> {
        self.register(prefix, MatchMode::Prefix, expected_type, description, callback)
    }

    fn register(
        &self,
        key: &str,
        match_mode: MatchMode,
        expected_type: ValueType,
        description: &str,
        callback: PropertyListener,
    ) -> Arc<Registration> {
        let registration = Arc::new(Registration {
            key: key.to_string(),
            match_mode,
            expected_type,
            description: description.trim().to_string(),
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            callback,
        });

        let mut inner = self.inner.write();
        match match_mode {
            MatchMode::Exact => inner.exact.entry(key.to_string()).or_default().push(registration.clone()),
            MatchMode::Prefix => inner.prefix.push(registration.clone()),
        }

        info!(
            key,
            ?match_mode,
            ?expected_type,
            sequence = registration.sequence,
            "property listener registered"
        );
        registration
    }

    /// Registrations to notify for `key`: exact matches first, then covering
    /// prefixes, each group in registration order.
    ///
    /// The returned registrations are detached from the registry lock so the
    /// caller can invoke callbacks without holding it.
    pub fn listeners_for(
        &self,
        key: &str,
    ) -> Vec<Arc<Registration>> {
        let inner = self.inner.read();
        let mut listeners: Vec<Arc<Registration>> = inner.exact.get(key).cloned().unwrap_or_default();
        listeners.extend(inner.prefix.iter().filter(|r| r.covers(key)).cloned());
        listeners
    }

    /// True iff an exact or prefix registration covers `key`
    pub fn is_updatable(
        &self,
        key: &str,
    ) -> bool {
        let inner = self.inner.read();
        inner.exact.contains_key(key) || inner.prefix.iter().any(|r| r.covers(key))
    }

    /// Type used to convert values of `key`
    ///
    /// The first exact registration wins, otherwise the longest covering
    /// prefix. `None` means no registration covers the key.
    pub fn type_for(
        &self,
        key: &str,
    ) -> Option<ValueType> {
        let inner = self.inner.read();
        if let Some(first) = inner.exact.get(key).and_then(|regs| regs.first()) {
            return Some(first.expected_type);
        }
        inner
            .prefix
            .iter()
            .filter(|r| r.covers(key))
            .max_by(|a, b| a.key.len().cmp(&b.key.len()).then(b.sequence.cmp(&a.sequence)))
            .map(|r| r.expected_type)
    }

    /// Description of the registration that owns `key`
    pub fn description_for(
        &self,
        key: &str,
    ) -> Option<String> {
        self.inner
            .read()
            .exact
            .get(key)
            .and_then(|regs| regs.first())
            .map(|r| r.description.clone())
    }

    /// Cached properties that are covered by a registration
    pub fn list_updatable(
        &self,
        cache: &PropertyCache,
    ) -> Vec<PropertyModel> {
        cache.snapshot().into_iter().filter(|m| self.is_updatable(m.id())).collect()
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.exact.values().map(Vec::len).sum::<usize>() + inner.prefix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Per-event keyed blackboard.
//!
//! The store holds arbitrary payloads by value under string keys and
//! remembers the runtime type of each entry. Its definition never changes
//! when a new algorithm output type is added. Entries live for exactly one
//! event; the event loop clears the store after the last algorithm ran.

use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Recoverable access failures of the [`EventStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested key is not present in this event.
    #[error("missing key '{0}'")]
    MissingKey(String),
    /// The entry exists but was stored with a different type.
    #[error("type mismatch for key '{key}' (stored={stored}, requested={requested})")]
    TypeMismatch {
        /// Key of the offending entry.
        key: String,
        /// Type name captured when the entry was stored.
        stored: &'static str,
        /// Type name of the failed access.
        requested: &'static str,
    },
}

struct Item {
    type_id: TypeId,
    type_name: &'static str,
    payload: Box<dyn Any + Send>,
}

/// Type-erased view of one entry, used by generic writers.
pub struct AnyView<'a> {
    /// Runtime type identity captured at `put`.
    pub type_id: TypeId,
    /// Human-readable type name, for diagnostics.
    pub type_name: &'static str,
    /// The payload itself.
    pub payload: &'a (dyn Any + Send),
}

/// Per-event key-value container with enforced type identity.
#[derive(Default)]
pub struct EventStore {
    map: HashMap<String, Item>,
}

impl EventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a payload under `key`, replacing any previous entry for this
    /// event. The runtime type of `value` is captured alongside it.
    pub fn put<T: Send + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.map.insert(
            key.into(),
            Item {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
                payload: Box::new(value),
            },
        );
    }

    /// Borrow the entry under `key` as `T`.
    pub fn get<T: 'static>(&self, key: &str) -> Result<&T, StoreError> {
        let item = self
            .map
            .get(key)
            .ok_or_else(|| StoreError::MissingKey(key.to_owned()))?;
        item.payload
            .downcast_ref::<T>()
            .ok_or_else(|| StoreError::TypeMismatch {
                key: key.to_owned(),
                stored: item.type_name,
                requested: std::any::type_name::<T>(),
            })
    }

    /// Mutably borrow the entry under `key` as `T`.
    pub fn get_mut<T: 'static>(&mut self, key: &str) -> Result<&mut T, StoreError> {
        let item = self
            .map
            .get_mut(key)
            .ok_or_else(|| StoreError::MissingKey(key.to_owned()))?;
        let type_name = item.type_name;
        item.payload
            .downcast_mut::<T>()
            .ok_or_else(|| StoreError::TypeMismatch {
                key: key.to_owned(),
                stored: type_name,
                requested: std::any::type_name::<T>(),
            })
    }

    /// Borrow the entry under `key` as `T`, or `None` when the key is
    /// absent or was stored with a different type.
    pub fn try_get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.map.get(key).and_then(|i| i.payload.downcast_ref())
    }

    /// Type-erased view of the entry under `key`.
    pub fn any(&self, key: &str) -> Result<AnyView<'_>, StoreError> {
        let item = self
            .map
            .get(key)
            .ok_or_else(|| StoreError::MissingKey(key.to_owned()))?;
        Ok(AnyView {
            type_id: item.type_id,
            type_name: item.type_name,
            payload: item.payload.as_ref(),
        })
    }

    /// Whether `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Remove the entry under `key`. Returns whether it existed.
    pub fn erase(&mut self, key: &str) -> bool {
        self.map.remove(key).is_some()
    }

    /// All keys of the current event, sorted for reproducible iteration.
    pub fn keys(&self) -> Vec<String> {
        let mut ks: Vec<String> = self.map.keys().cloned().collect();
        ks.sort();
        ks
    }

    /// Number of entries in the current event.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop all entries; called at the end of every event.
    pub fn clear(&mut self) {
        self.map.clear();
    }
}

//! Per-owner key/value storage
//!
//! Each ECU and each request matcher owns one store. Values are created on
//! first access from a caller-supplied default and live until `clear()`.

use std::any::Any;
use std::collections::HashMap;

use parking_lot::RwLock;

type Value = Box<dyn Any + Send + Sync>;

/// Typed property map with explicit get-or-init semantics
#[derive(Default)]
pub struct PropertyStore {
    values: RwLock<HashMap<String, Value>>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the stored value, initializing it with `init` when the key is
    /// absent or holds a value of another type.
    pub fn get_or_init<T, F>(&self, key: &str, init: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get::<T>(key) {
            return value;
        }

        let mut values = self.values.write();
        // Another writer may have won the race between the two locks
        if let Some(value) = values.get(key).and_then(|v| v.downcast_ref::<T>()) {
            return value.clone();
        }
        let value = init();
        values.insert(key.to_string(), Box::new(value.clone()));
        value
    }

    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + 'static,
    {
        self.values
            .read()
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn set<T>(&self, key: &str, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.values.write().insert(key.to_string(), Box::new(value));
    }

    /// Mutate a value in place under the write lock and return the result
    pub fn update<T, I, F>(&self, key: &str, init: I, f: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        I: FnOnce() -> T,
        F: FnOnce(&mut T),
    {
        let mut values = self.values.write();
        let mut value = values
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
            .unwrap_or_else(init);
        f(&mut value);
        values.insert(key.to_string(), Box::new(value.clone()));
        value
    }

    pub fn remove(&self, key: &str) -> bool {
        self.values.write().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    pub fn clear(&self) {
        self.values.write().clear();
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl std::fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let values = self.values.read();
        let mut keys: Vec<_> = values.keys().collect();
        keys.sort();
        f.debug_struct("PropertyStore").field("keys", &keys).finish()
    }
}

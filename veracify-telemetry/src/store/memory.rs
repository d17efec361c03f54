//! In-memory store for tests and hosts that bring their own persistence

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;

use super::Store;

/// A [`Store`] backed by a `HashMap`.
///
/// Not durable; useful for tests and for embedding hosts that mirror the
/// keys into their own storage layer.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently set
    pub fn len(&self) -> usize {
        self.values.lock().unwrap().len()
    }

    /// True if no keys are set
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("missing").unwrap().is_none());

        store.set("k", &serde_json::json!({"a": 1})).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(serde_json::json!({"a": 1})));

        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
        // Removing again is fine
        store.remove("k").unwrap();
    }
}

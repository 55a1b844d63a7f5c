//! In-memory storage backend.

use crate::{KeyValueStore, StorageResult};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory key-value store.
///
/// Used in tests and for ephemeral sessions where durability is not
/// required.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.data
            .lock()
            .expect("lock poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.lock().expect("lock poisoned").get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self
            .data
            .lock()
            .expect("lock poisoned")
            .remove(key)
            .is_some())
    }
}

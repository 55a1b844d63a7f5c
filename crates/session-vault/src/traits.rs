//! Storage trait definitions.

use crate::StorageResult;

/// Trait for durable key-value storage backends.
///
/// The external identity SDK reads session keys directly from the same
/// store, so implementations must persist values exactly as written.
pub trait KeyValueStore: Send + Sync {
    /// Store a value
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value, returning whether it existed
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

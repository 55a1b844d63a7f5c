//! Durable key-value storage and session materialization.
//!
//! This crate provides:
//! - A [`KeyValueStore`] trait with in-memory and JSON-file backends
//! - The provider-scoped key layout the external identity SDK reads
//! - [`SessionVault`], which writes a materialized session in that layout

mod error;
mod file;
mod keys;
mod memory;
mod traits;
mod vault;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use keys::ProviderKeys;
pub use memory::MemoryStore;
pub use traits::KeyValueStore;
pub use vault::{MaterializedSession, SessionVault, SignInDetails, TokenEntry};

//! Shared counter store contract.
//!
//! Admission state lives in a store shared by every process serving the same
//! fleet: one string record per client for the centrally overridable limit,
//! and one hash per client mapping in-flight request ids to issue timestamps.
//! The limiter owns all key naming and value encoding; implementations map
//! these primitives onto the backend verbatim.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

mod memory;
mod redis;
#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemoryStore;
pub use redis::RedisStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected value at {key}: {reason}")]
    UnexpectedValue { key: String, reason: String },
}

/// Key/hash primitives the limiter needs from a shared store.
///
/// Backend failures surface as [`StoreError`] and are never retried or
/// masked at this layer.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Refresh a key's expiry. Returns false if the key does not exist.
    async fn refresh_expiry(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// All fields of a hash. A missing hash reads as empty.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Number of fields in a hash. A missing hash counts as zero.
    async fn hash_len(&self, key: &str) -> Result<u64, StoreError>;

    /// Delete fields from a hash. Returns the number actually removed.
    async fn hash_delete(&self, key: &str, fields: &[String]) -> Result<u64, StoreError>;
}

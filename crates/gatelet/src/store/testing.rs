//! Test doubles for the counter store seam.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{CounterStore, MemoryStore, StoreError};

/// Delegates to a [`MemoryStore`] while counting every call.
pub(crate) struct RecordingStore {
    inner: MemoryStore,
    calls: AtomicUsize,
    hash_deletes: AtomicUsize,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            calls: AtomicUsize::new(0),
            hash_deletes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn hash_deletes(&self) -> usize {
        self.hash_deletes.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CounterStore for RecordingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.record();
        self.inner.get(key).await
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.record();
        self.inner.set_with_expiry(key, value, ttl).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.record();
        self.inner.exists(key).await
    }

    async fn refresh_expiry(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.record();
        self.inner.refresh_expiry(key, ttl).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.record();
        self.inner.hash_set(key, field, value).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.record();
        self.inner.hash_get_all(key).await
    }

    async fn hash_len(&self, key: &str) -> Result<u64, StoreError> {
        self.record();
        self.inner.hash_len(key).await
    }

    async fn hash_delete(&self, key: &str, fields: &[String]) -> Result<u64, StoreError> {
        self.record();
        self.hash_deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.hash_delete(key, fields).await
    }
}

/// Fails every operation, as an unreachable backend would.
pub(crate) struct FailingStore;

fn unreachable_backend() -> StoreError {
    StoreError::Unavailable("injected backend failure".to_string())
}

#[async_trait]
impl CounterStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(unreachable_backend())
    }

    async fn set_with_expiry(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        Err(unreachable_backend())
    }

    async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        Err(unreachable_backend())
    }

    async fn refresh_expiry(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
        Err(unreachable_backend())
    }

    async fn hash_set(&self, _key: &str, _field: &str, _value: &str) -> Result<(), StoreError> {
        Err(unreachable_backend())
    }

    async fn hash_get_all(&self, _key: &str) -> Result<HashMap<String, String>, StoreError> {
        Err(unreachable_backend())
    }

    async fn hash_len(&self, _key: &str) -> Result<u64, StoreError> {
        Err(unreachable_backend())
    }

    async fn hash_delete(&self, _key: &str, _fields: &[String]) -> Result<u64, StoreError> {
        Err(unreachable_backend())
    }
}

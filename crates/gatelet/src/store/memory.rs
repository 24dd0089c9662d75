//! In-process counter store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CounterStore, StoreError};

/// In-process [`CounterStore`] for tests and single-node deployments.
///
/// Expiry is lazy: deadlines are checked on access, and an expired key
/// behaves exactly as an absent one.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

enum Value {
    Text(String),
    Hash(HashMap<String, String>),
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

fn wrong_kind(key: &str, expected: &str) -> StoreError {
    StoreError::UnexpectedValue {
        key: key.to_string(),
        reason: format!("holds the wrong kind of value, expected {expected}"),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn drop_expired(&self, key: &str) {
        self.entries.remove_if(key, |_, entry| entry.expired());
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.drop_expired(key);
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Text(text) => Ok(Some(text.clone())),
                Value::Hash(_) => Err(wrong_kind(key, "a string")),
            },
        }
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.drop_expired(key);
        Ok(self.entries.contains_key(key))
    }

    async fn refresh_expiry(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.drop_expired(key);
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.drop_expired(key);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Hash(fields) => {
                fields.insert(field.to_string(), value.to_string());
                Ok(())
            }
            Value::Text(_) => Err(wrong_kind(key, "a hash")),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.drop_expired(key);
        match self.entries.get(key) {
            None => Ok(HashMap::new()),
            Some(entry) => match &entry.value {
                Value::Hash(fields) => Ok(fields.clone()),
                Value::Text(_) => Err(wrong_kind(key, "a hash")),
            },
        }
    }

    async fn hash_len(&self, key: &str) -> Result<u64, StoreError> {
        self.drop_expired(key);
        match self.entries.get(key) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::Hash(fields) => Ok(fields.len() as u64),
                Value::Text(_) => Err(wrong_kind(key, "a hash")),
            },
        }
    }

    async fn hash_delete(&self, key: &str, fields: &[String]) -> Result<u64, StoreError> {
        self.drop_expired(key);
        let mut removed = 0;
        let now_empty = match self.entries.get_mut(key) {
            None => return Ok(0),
            Some(mut entry) => match &mut entry.value {
                Value::Hash(map) => {
                    for field in fields {
                        if map.remove(field).is_some() {
                            removed += 1;
                        }
                    }
                    map.is_empty()
                }
                Value::Text(_) => return Err(wrong_kind(key, "a hash")),
            },
        };
        if now_empty {
            // A hash whose last field is deleted disappears, as in Redis.
            self.entries
                .remove_if(key, |_, entry| matches!(&entry.value, Value::Hash(map) if map.is_empty()));
        }
        Ok(removed)
    }
}

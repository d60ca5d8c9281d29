use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ChatError;

/// Abstraction over a key-value store with per-key expiry, used for
/// short-lived state such as the per-IP comment cooldown and the current
/// match info.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), ChatError>;
    /// Set `key` only if it is absent (or expired). Returns `true` if the value was written.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, ChatError>;
    async fn get(&self, key: &str) -> Result<Option<String>, ChatError>;
    async fn del(&self, key: &str) -> Result<(), ChatError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

struct Entry {
    value: String,
    expires_at: Instant,
}

pub struct MemoryStore {
    data: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }

    /// Drop expired keys. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|_, e| e.expires_at > now);
        before - data.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), ChatError> {
        self.data.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, ChatError> {
        let now = Instant::now();
        let mut data = self.data.lock();
        if data.get(key).is_some_and(|e| e.expires_at > now) {
            return Ok(false);
        }
        data.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + Duration::from_secs(ttl_secs),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        let now = Instant::now();
        Ok(self
            .data
            .lock()
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone()))
    }

    async fn del(&self, key: &str) -> Result<(), ChatError> {
        self.data.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_only_writes_once_while_live() {
        let kv = MemoryStore::new();
        assert!(kv.set_nx_ex("k", "1", 60).await.unwrap());
        assert!(!kv.set_nx_ex("k", "2", 60).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn zero_ttl_keys_are_already_expired() {
        let kv = MemoryStore::new();
        kv.set_ex("k", "v", 0).await.unwrap();
        assert!(kv.get("k").await.unwrap().is_none());
        assert!(kv.set_nx_ex("k", "v", 60).await.unwrap());
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let kv = MemoryStore::new();
        kv.set_ex("dead", "v", 0).await.unwrap();
        kv.set_ex("live", "v", 60).await.unwrap();
        assert_eq!(kv.purge_expired(), 1);
        assert!(kv.get("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn del_removes_key() {
        let kv = MemoryStore::new();
        kv.set_ex("k", "v", 60).await.unwrap();
        kv.del("k").await.unwrap();
        assert!(kv.get("k").await.unwrap().is_none());
    }
}

//! IP block list consulted on every connection attempt and every submission.
//!
//! Lookups hit an in-memory mirror so `is_blocked` never waits on storage;
//! writes go to the durable [`BlockListStore`] first and are mirrored after.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use crate::db::blocked_ips::BlockListStore;
use crate::error::ChatError;
use crate::models::blocked_ip::BlockedIp;

pub struct ModerationRegistry {
    blocked: DashMap<String, BlockedIp>,
    store: Arc<dyn BlockListStore>,
    /// Serializes `block` so two admins blocking the same IP agree on one record.
    write_lock: tokio::sync::Mutex<()>,
}

impl ModerationRegistry {
    pub fn new(store: Arc<dyn BlockListStore>) -> Self {
        Self {
            blocked: DashMap::new(),
            store,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Warm the mirror from durable storage. Call once at startup.
    pub async fn load(&self) -> Result<usize, ChatError> {
        let rows = self.store.load_all().await?;
        let n = rows.len();
        for row in rows {
            self.blocked.insert(row.ip_address.clone(), row);
        }
        tracing::info!(count = n, "block list loaded");
        Ok(n)
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        self.blocked.contains_key(ip)
    }

    /// Block `ip`. Blocking an already-blocked IP is a no-op that returns the
    /// original record: the first reason wins.
    pub async fn block(&self, ip: &str, reason: &str, admin: &str) -> Result<BlockedIp, ChatError> {
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.blocked.get(ip) {
            return Ok(existing.clone());
        }

        let stored = self
            .store
            .insert_if_absent(BlockedIp {
                ip_address: ip.to_string(),
                reason: reason.to_string(),
                blocked_at: Utc::now(),
                blocked_by: admin.to_string(),
            })
            .await?;

        self.blocked.insert(stored.ip_address.clone(), stored.clone());
        tracing::info!(ip = %ip, blocked_by = %stored.blocked_by, "ip blocked");
        Ok(stored)
    }

    /// All blocked IPs, oldest block first.
    pub fn list(&self) -> Vec<BlockedIp> {
        let mut all: Vec<BlockedIp> = self.blocked.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| {
            a.blocked_at
                .cmp(&b.blocked_at)
                .then_with(|| a.ip_address.cmp(&b.ip_address))
        });
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::blocked_ips::MemoryBlockList;

    fn registry() -> ModerationRegistry {
        ModerationRegistry::new(Arc::new(MemoryBlockList::new()))
    }

    #[tokio::test]
    async fn block_then_check() {
        let reg = registry();
        assert!(!reg.is_blocked("1.2.3.4"));
        let entry = reg.block("1.2.3.4", "spam", "admin").await.unwrap();
        assert_eq!(entry.reason, "spam");
        assert!(reg.is_blocked("1.2.3.4"));
        assert!(!reg.is_blocked("1.2.3.5"));
    }

    #[tokio::test]
    async fn repeated_block_keeps_first_record() {
        let reg = registry();
        let first = reg.block("1.2.3.4", "spam", "alice").await.unwrap();
        let second = reg.block("1.2.3.4", "abuse", "bob").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(reg.list().len(), 1);
        assert_eq!(reg.list()[0].blocked_by, "alice");
    }

    #[tokio::test]
    async fn concurrent_blocks_of_one_ip_agree() {
        let reg = Arc::new(registry());
        let mut tasks = Vec::new();
        for i in 0..16 {
            let reg = reg.clone();
            tasks.push(tokio::spawn(async move {
                reg.block("9.9.9.9", &format!("r{i}"), "admin").await.unwrap()
            }));
        }
        let mut results = Vec::new();
        for t in tasks {
            results.push(t.await.unwrap());
        }
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(reg.list().len(), 1);
    }

    #[tokio::test]
    async fn load_restores_from_store() {
        let store = Arc::new(MemoryBlockList::new());
        let first = ModerationRegistry::new(store.clone());
        first.block("5.5.5.5", "spam", "admin").await.unwrap();

        let second = ModerationRegistry::new(store);
        assert!(!second.is_blocked("5.5.5.5"));
        assert_eq!(second.load().await.unwrap(), 1);
        assert!(second.is_blocked("5.5.5.5"));
    }
}

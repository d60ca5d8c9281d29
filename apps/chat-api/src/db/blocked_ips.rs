use std::collections::HashMap;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::OptionalExtension;
use parking_lot::Mutex;

use crate::db::pool::DbPool;
use crate::db::schema::blocked_ips;
use crate::error::ChatError;
use crate::models::blocked_ip::BlockedIp;

/// Durable record of blocked IP addresses.
#[async_trait]
pub trait BlockListStore: Send + Sync {
    /// Insert `entry` unless its IP is already present. Returns the stored
    /// record, which is the pre-existing one when the IP was already blocked.
    async fn insert_if_absent(&self, entry: BlockedIp) -> Result<BlockedIp, ChatError>;

    async fn load_all(&self) -> Result<Vec<BlockedIp>, ChatError>;
}

pub struct MemoryBlockList {
    entries: Mutex<HashMap<String, BlockedIp>>,
}

impl MemoryBlockList {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBlockList {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockListStore for MemoryBlockList {
    async fn insert_if_absent(&self, entry: BlockedIp) -> Result<BlockedIp, ChatError> {
        let mut entries = self.entries.lock();
        Ok(entries
            .entry(entry.ip_address.clone())
            .or_insert(entry)
            .clone())
    }

    async fn load_all(&self) -> Result<Vec<BlockedIp>, ChatError> {
        Ok(self.entries.lock().values().cloned().collect())
    }
}

pub struct PgBlockList {
    db: DbPool,
}

impl PgBlockList {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BlockListStore for PgBlockList {
    async fn insert_if_absent(&self, entry: BlockedIp) -> Result<BlockedIp, ChatError> {
        let mut conn = self.db.get().await?;

        let inserted: Option<BlockedIp> = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(blocked_ips::table)
                .values(&entry)
                .on_conflict_do_nothing()
                .returning(BlockedIp::as_returning()),
            &mut conn,
        )
        .await
        .optional()?;

        if let Some(row) = inserted {
            return Ok(row);
        }

        let existing: BlockedIp = diesel_async::RunQueryDsl::get_result(
            blocked_ips::table
                .find(&entry.ip_address)
                .select(BlockedIp::as_select()),
            &mut conn,
        )
        .await?;

        Ok(existing)
    }

    async fn load_all(&self) -> Result<Vec<BlockedIp>, ChatError> {
        let mut conn = self.db.get().await?;

        let rows: Vec<BlockedIp> = diesel_async::RunQueryDsl::load(
            blocked_ips::table
                .order(blocked_ips::blocked_at.asc())
                .select(BlockedIp::as_select()),
            &mut conn,
        )
        .await?;

        Ok(rows)
    }
}

//! The channel's append-only comment log.
//!
//! Ids are assigned by the store at append time and are strictly increasing.
//! Deletion is soft: the row stays so replies can keep pointing at it, but it
//! no longer shows up in history reads or replays.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::OptionalExtension;
use parking_lot::Mutex;

use crate::db::pool::DbPool;
use crate::db::schema::comments;
use crate::error::ChatError;
use crate::models::comment::{Comment, CommentDraft, NewComment};

/// Hard ceiling on any history read, whatever the client asks for.
pub const MAX_RECENT_LIMIT: usize = 100;

/// Clamp a requested history size into `1..=MAX_RECENT_LIMIT`.
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_RECENT_LIMIT)
}

/// Outcome of a soft delete.
#[derive(Debug, Clone)]
pub struct Deletion {
    pub comment: Comment,
    /// `false` when the comment was already deleted (idempotent repeat).
    pub newly_deleted: bool,
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    /// Assign `id` and `created_at`, persist, and return the stored comment.
    async fn append(&self, draft: CommentDraft) -> Result<Comment, ChatError>;

    /// Up to `limit` most recent non-deleted comments, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<Comment>, ChatError>;

    /// Up to `limit` most recent non-deleted comments with `id > after_id`, oldest first.
    async fn after(&self, after_id: i64, limit: usize) -> Result<Vec<Comment>, ChatError>;

    /// Mark a comment deleted. Deleting twice succeeds both times.
    async fn soft_delete(&self, id: i64) -> Result<Deletion, ChatError>;

    async fn by_id(&self, id: i64) -> Result<Option<Comment>, ChatError>;

    /// Highest id assigned so far, deleted comments included. `0` when empty.
    async fn latest_id(&self) -> Result<i64, ChatError>;

    /// Remove comments created before `cutoff`. Returns the number removed.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, ChatError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

struct Log {
    next_id: i64,
    /// Ascending by id (and therefore by `created_at`).
    entries: VecDeque<Comment>,
}

pub struct MemoryCommentStore {
    log: Mutex<Log>,
    max_retained: usize,
}

impl MemoryCommentStore {
    pub fn new(max_retained: usize) -> Self {
        Self {
            log: Mutex::new(Log {
                next_id: 1,
                entries: VecDeque::new(),
            }),
            max_retained: max_retained.max(1),
        }
    }

    /// Number of comments currently retained, deleted ones included.
    pub fn len(&self) -> usize {
        self.log.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CommentStore for MemoryCommentStore {
    async fn append(&self, draft: CommentDraft) -> Result<Comment, ChatError> {
        let mut log = self.log.lock();

        // Keep created_at monotonic even if the wall clock steps back.
        let now = Utc::now();
        let created_at = match log.entries.back() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        };

        let id = log.next_id;
        log.next_id += 1;

        let comment = draft.into_comment(id, created_at);
        log.entries.push_back(comment.clone());
        while log.entries.len() > self.max_retained {
            log.entries.pop_front();
        }

        Ok(comment)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Comment>, ChatError> {
        let log = self.log.lock();
        let mut out: Vec<Comment> = log
            .entries
            .iter()
            .rev()
            .filter(|c| !c.deleted)
            .take(clamp_limit(limit))
            .cloned()
            .collect();
        out.reverse();
        Ok(out)
    }

    async fn after(&self, after_id: i64, limit: usize) -> Result<Vec<Comment>, ChatError> {
        let log = self.log.lock();
        let mut out: Vec<Comment> = log
            .entries
            .iter()
            .rev()
            .take_while(|c| c.id > after_id)
            .filter(|c| !c.deleted)
            .take(limit.max(1))
            .cloned()
            .collect();
        out.reverse();
        Ok(out)
    }

    async fn soft_delete(&self, id: i64) -> Result<Deletion, ChatError> {
        let mut log = self.log.lock();
        let idx = log
            .entries
            .binary_search_by_key(&id, |c| c.id)
            .map_err(|_| ChatError::NotFound)?;
        let entry = &mut log.entries[idx];
        let newly_deleted = !entry.deleted;
        entry.deleted = true;
        Ok(Deletion {
            comment: entry.clone(),
            newly_deleted,
        })
    }

    async fn by_id(&self, id: i64) -> Result<Option<Comment>, ChatError> {
        let log = self.log.lock();
        Ok(log
            .entries
            .binary_search_by_key(&id, |c| c.id)
            .ok()
            .map(|idx| log.entries[idx].clone()))
    }

    async fn latest_id(&self) -> Result<i64, ChatError> {
        Ok(self.log.lock().next_id - 1)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, ChatError> {
        let mut log = self.log.lock();
        let mut removed = 0;
        while log.entries.front().is_some_and(|c| c.created_at < cutoff) {
            log.entries.pop_front();
            removed += 1;
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL implementation
// ---------------------------------------------------------------------------

pub struct PgCommentStore {
    db: DbPool,
}

impl PgCommentStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CommentStore for PgCommentStore {
    async fn append(&self, draft: CommentDraft) -> Result<Comment, ChatError> {
        let mut conn = self.db.get().await?;

        let comment: Comment = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(comments::table)
                .values(NewComment::from_draft(&draft, Utc::now()))
                .returning(Comment::as_returning()),
            &mut conn,
        )
        .await?;

        Ok(comment)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Comment>, ChatError> {
        let mut conn = self.db.get().await?;

        let mut rows: Vec<Comment> = diesel_async::RunQueryDsl::load(
            comments::table
                .filter(comments::deleted.eq(false))
                .order(comments::id.desc())
                .limit(clamp_limit(limit) as i64)
                .select(Comment::as_select()),
            &mut conn,
        )
        .await?;

        rows.reverse();
        Ok(rows)
    }

    async fn after(&self, after_id: i64, limit: usize) -> Result<Vec<Comment>, ChatError> {
        let mut conn = self.db.get().await?;

        let mut rows: Vec<Comment> = diesel_async::RunQueryDsl::load(
            comments::table
                .filter(comments::id.gt(after_id))
                .filter(comments::deleted.eq(false))
                .order(comments::id.desc())
                .limit(limit.max(1) as i64)
                .select(Comment::as_select()),
            &mut conn,
        )
        .await?;

        rows.reverse();
        Ok(rows)
    }

    async fn soft_delete(&self, id: i64) -> Result<Deletion, ChatError> {
        let mut conn = self.db.get().await?;

        // Only a live row transitions; a concurrent or repeated delete falls through.
        let updated: Option<Comment> = diesel_async::RunQueryDsl::get_result(
            diesel::update(
                comments::table
                    .find(id)
                    .filter(comments::deleted.eq(false)),
            )
            .set(comments::deleted.eq(true))
            .returning(Comment::as_returning()),
            &mut conn,
        )
        .await
        .optional()?;

        if let Some(comment) = updated {
            return Ok(Deletion {
                comment,
                newly_deleted: true,
            });
        }

        let existing: Comment = diesel_async::RunQueryDsl::get_result(
            comments::table.find(id).select(Comment::as_select()),
            &mut conn,
        )
        .await
        .optional()?
        .ok_or(ChatError::NotFound)?;

        Ok(Deletion {
            comment: existing,
            newly_deleted: false,
        })
    }

    async fn by_id(&self, id: i64) -> Result<Option<Comment>, ChatError> {
        let mut conn = self.db.get().await?;

        let comment = diesel_async::RunQueryDsl::get_result(
            comments::table.find(id).select(Comment::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(comment)
    }

    async fn latest_id(&self) -> Result<i64, ChatError> {
        let mut conn = self.db.get().await?;

        let latest: Option<i64> = diesel_async::RunQueryDsl::get_result(
            comments::table.select(diesel::dsl::max(comments::id)),
            &mut conn,
        )
        .await?;

        Ok(latest.unwrap_or(0))
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, ChatError> {
        let mut conn = self.db.get().await?;

        let removed = diesel_async::RunQueryDsl::execute(
            diesel::delete(comments::table.filter(comments::created_at.lt(cutoff))),
            &mut conn,
        )
        .await?;

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    fn draft(name: &str, content: &str) -> CommentDraft {
        CommentDraft {
            display_name: name.to_string(),
            content: content.to_string(),
            parent_id: None,
            reply_to: None,
            ip_address: "10.0.0.1".to_string(),
            is_admin: false,
            admin_identity: None,
        }
    }

    #[tokio::test]
    async fn first_append_gets_id_one() {
        let store = MemoryCommentStore::new(100);
        let c = store.append(draft("An", "Hello")).await.unwrap();
        assert_eq!(c.id, 1);
        assert!(!c.deleted);
        assert_eq!(store.by_id(1).await.unwrap().unwrap(), c);
    }

    #[tokio::test]
    async fn concurrent_appends_get_unique_increasing_ids() {
        let store = Arc::new(MemoryCommentStore::new(10_000));
        let mut tasks = Vec::new();
        for i in 0..64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.append(draft(&format!("u{i}"), "hi")).await.unwrap().id
            }));
        }
        let mut ids = HashSet::new();
        for t in tasks {
            assert!(ids.insert(t.await.unwrap()));
        }
        assert_eq!(ids.len(), 64);

        // Persisted order is id order.
        let stored = store.recent(100).await.unwrap();
        assert!(stored.windows(2).all(|w| w[0].id < w[1].id));
        assert!(stored.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn recent_skips_deleted_and_returns_oldest_first() {
        let store = MemoryCommentStore::new(10_000);
        for i in 1..=150 {
            store.append(draft("v", &format!("c{i}"))).await.unwrap();
        }
        for id in [150, 149, 120, 60, 3] {
            store.soft_delete(id).await.unwrap();
        }

        let recent = store.recent(100).await.unwrap();
        assert_eq!(recent.len(), 100);
        assert!(recent.iter().all(|c| !c.deleted));
        assert!(recent.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(recent.last().unwrap().id, 148);
        // 47..=148 holds 102 ids, two of which (60, 120) are deleted.
        assert_eq!(recent.first().unwrap().id, 47);
    }

    #[tokio::test]
    async fn recent_limit_is_clamped() {
        let store = MemoryCommentStore::new(10_000);
        for _ in 0..120 {
            store.append(draft("v", "x")).await.unwrap();
        }
        assert_eq!(store.recent(5000).await.unwrap().len(), MAX_RECENT_LIMIT);
        assert_eq!(store.recent(0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn soft_delete_is_idempotent() {
        let store = MemoryCommentStore::new(100);
        let c = store.append(draft("An", "Hello")).await.unwrap();

        let first = store.soft_delete(c.id).await.unwrap();
        assert!(first.newly_deleted);
        let second = store.soft_delete(c.id).await.unwrap();
        assert!(!second.newly_deleted);
        assert!(second.comment.deleted);

        // Still resolvable for reply references.
        assert!(store.by_id(c.id).await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn latest_id_survives_deletes_and_pruning() {
        let store = MemoryCommentStore::new(100);
        assert_eq!(store.latest_id().await.unwrap(), 0);
        for _ in 0..3 {
            store.append(draft("v", "x")).await.unwrap();
        }
        store.soft_delete(3).await.unwrap();
        assert_eq!(store.latest_id().await.unwrap(), 3);

        store.prune_before(Utc::now() + chrono::Duration::hours(1)).await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.latest_id().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn soft_delete_unknown_is_not_found() {
        let store = MemoryCommentStore::new(100);
        assert!(matches!(store.soft_delete(42).await, Err(ChatError::NotFound)));
    }

    #[tokio::test]
    async fn after_returns_tail_bounded_by_limit() {
        let store = MemoryCommentStore::new(100);
        for i in 0..10 {
            store.append(draft("v", &format!("{i}"))).await.unwrap();
        }
        store.soft_delete(8).await.unwrap();

        let tail = store.after(6, 100).await.unwrap();
        let ids: Vec<i64> = tail.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![7, 9, 10]);

        let bounded = store.after(0, 3).await.unwrap();
        let ids: Vec<i64> = bounded.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![7, 9, 10]);

        assert!(store.after(10, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retention_cap_evicts_oldest_without_reusing_ids() {
        let store = MemoryCommentStore::new(3);
        for _ in 0..5 {
            store.append(draft("v", "x")).await.unwrap();
        }
        assert_eq!(store.len(), 3);
        assert!(store.by_id(2).await.unwrap().is_none());
        assert_eq!(store.append(draft("v", "x")).await.unwrap().id, 6);
    }

    #[tokio::test]
    async fn prune_before_drops_old_comments() {
        let store = MemoryCommentStore::new(100);
        store.append(draft("v", "old")).await.unwrap();
        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.prune_before(cutoff).await.unwrap(), 1);
        assert!(store.is_empty());
    }
}

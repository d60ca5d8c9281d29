//! History sent in READY: recent comments on a fresh connect, or the
//! comments missed since `after` when a client reconnects.

use serde_json::Value;

use crate::error::ChatError;
use crate::models::comment::{Comment, PublicComment};

use super::handler::CommentGateway;
use super::registry::Outbound;

#[derive(Debug, Default)]
pub struct History {
    pub comments: Vec<Comment>,
    /// `true` when this is a replay after a client-supplied comment id.
    pub resumed: bool,
    /// Highest comment id the client is known to have. Live COMMENT_CREATE
    /// frames at or below it are duplicates.
    pub high_water: i64,
}

impl History {
    /// Render for READY, with or without sender IPs.
    pub fn render(&self, admin: bool) -> Value {
        if admin {
            serde_json::json!(self.comments)
        } else {
            let public: Vec<PublicComment> = self.comments.iter().map(PublicComment::from).collect();
            serde_json::json!(public)
        }
    }

    /// Whether a live frame for `comment_id` was already covered.
    pub fn covers(&self, comment_id: i64) -> bool {
        comment_id <= self.high_water
    }

    /// A queued hub frame that repeats a comment already sent in READY.
    pub fn repeats(&self, frame: &Outbound) -> bool {
        frame.comment_id.is_some_and(|id| self.covers(id))
    }
}

impl CommentGateway {
    /// Build READY history. Replays are bounded by the replay window; a
    /// client further behind than that gets the newest window only. A resume
    /// point the store never issued (a client from before a restart of the
    /// in-memory store) is ignored and the connect treated as fresh.
    pub async fn history(&self, after: Option<i64>) -> Result<History, ChatError> {
        let latest = self.store.latest_id().await?;
        let resume_from = match after {
            Some(after_id) if after_id > latest => {
                tracing::debug!(after_id, latest, "resume point ahead of the log, sending fresh history");
                None
            }
            other => other,
        };

        let comments = match resume_from {
            Some(after_id) => {
                self.store
                    .after(after_id, self.settings.replay_window)
                    .await?
            }
            None => self.recent(None).await?,
        };

        let newest = comments.last().map(|c| c.id).unwrap_or(0);
        let high_water = resume_from.map_or(newest, |a| a.max(newest));

        Ok(History {
            comments,
            resumed: resume_from.is_some(),
            high_water,
        })
    }
}

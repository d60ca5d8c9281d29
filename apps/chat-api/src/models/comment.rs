use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::comments;

/// A stored comment, as seen by admins (includes the sender IP).
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, ToSchema)]
#[diesel(table_name = comments)]
pub struct Comment {
    pub id: i64,
    pub display_name: String,
    pub content: String,
    pub parent_id: Option<i64>,
    pub reply_to: Option<String>,
    pub ip_address: String,
    pub is_admin: bool,
    pub admin_identity: Option<String>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// The redacted view of a [`Comment`] sent to non-admin viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PublicComment {
    pub id: i64,
    pub display_name: String,
    pub content: String,
    pub parent_id: Option<i64>,
    pub reply_to: Option<String>,
    pub is_admin: bool,
    pub admin_identity: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Comment> for PublicComment {
    fn from(c: &Comment) -> Self {
        Self {
            id: c.id,
            display_name: c.display_name.clone(),
            content: c.content.clone(),
            parent_id: c.parent_id,
            reply_to: c.reply_to.clone(),
            is_admin: c.is_admin,
            admin_identity: c.admin_identity.clone(),
            created_at: c.created_at,
        }
    }
}

/// A validated comment waiting for the store to assign `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct CommentDraft {
    pub display_name: String,
    pub content: String,
    pub parent_id: Option<i64>,
    pub reply_to: Option<String>,
    pub ip_address: String,
    pub is_admin: bool,
    pub admin_identity: Option<String>,
}

impl CommentDraft {
    /// Materialize the draft with store-assigned fields.
    pub fn into_comment(self, id: i64, created_at: DateTime<Utc>) -> Comment {
        Comment {
            id,
            display_name: self.display_name,
            content: self.content,
            parent_id: self.parent_id,
            reply_to: self.reply_to,
            ip_address: self.ip_address,
            is_admin: self.is_admin,
            admin_identity: self.admin_identity,
            deleted: false,
            created_at,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment<'a> {
    pub display_name: &'a str,
    pub content: &'a str,
    pub parent_id: Option<i64>,
    pub reply_to: Option<&'a str>,
    pub ip_address: &'a str,
    pub is_admin: bool,
    pub admin_identity: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

impl<'a> NewComment<'a> {
    pub fn from_draft(draft: &'a CommentDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            display_name: &draft.display_name,
            content: &draft.content,
            parent_id: draft.parent_id,
            reply_to: draft.reply_to.as_deref(),
            ip_address: &draft.ip_address,
            is_admin: draft.is_admin,
            admin_identity: draft.admin_identity.as_deref(),
            created_at,
        }
    }
}

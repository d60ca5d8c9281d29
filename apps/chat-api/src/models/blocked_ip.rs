use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::blocked_ips;

/// An IP address barred from commenting and connecting.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, Serialize, ToSchema)]
#[diesel(table_name = blocked_ips)]
pub struct BlockedIp {
    pub ip_address: String,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
    /// Admin identity that issued the block.
    pub blocked_by: String,
}

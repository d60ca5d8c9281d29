use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The bout currently shown over the stream. Kept in the key-value store
/// with a TTL rather than in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MatchInfo {
    pub match_number: u32,
    /// Red corner weight in kilograms.
    pub red_weight: f64,
    /// Blue corner weight in kilograms.
    pub blue_weight: f64,
    pub updated_at: DateTime<Utc>,
    /// Admin identity that last set it.
    pub updated_by: String,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Vehicle currently parked in an area. At most one per (area, plate).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PresenceEntry {
    pub id: Uuid,
    pub area_id: Uuid,
    pub plate_number: String,
    pub country: String,
    pub image: String,
    pub entry_time: DateTime<Utc>,
}

impl PresenceEntry {
    /// Time spent in the area as of `now`
    pub fn parked_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.entry_time
    }
}

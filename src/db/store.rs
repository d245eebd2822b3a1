use crate::db::models::{Area, EventRecord, Notification, NotificationCategory, PresenceEntry};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Persistence seam used by the ingestion engine and the monitors.
///
/// Implemented over Postgres by [`crate::db::repositories::PgStore`] and in
/// memory by [`crate::db::memory::MemoryStore`].
#[async_trait]
pub trait ParkingStore: Send + Sync {
    /// Insert a new area (with its remote server, if any)
    async fn create_area(&self, area: &Area) -> Result<()>;

    /// Get area by ID
    async fn get_area(&self, id: &Uuid) -> Result<Option<Area>>;

    /// All areas flagged active
    async fn list_active_areas(&self) -> Result<Vec<Area>>;

    /// Store `watermark` only if it is later than the stored one.
    /// Returns whether the stored value changed.
    async fn advance_watermark(&self, area_id: &Uuid, watermark: DateTime<Utc>) -> Result<bool>;

    /// Add `delta` to the live occupancy counter (floored at zero) and return the new value
    async fn adjust_occupancy(&self, area_id: &Uuid, delta: i32) -> Result<i32>;

    /// Reset the live occupancy counter to the number of presence entries
    async fn recount_occupancy(&self, area_id: &Uuid) -> Result<i32>;

    /// Append to the event log
    async fn append_event(&self, event: &EventRecord) -> Result<()>;

    /// Events for an area ordered by timestamp
    async fn list_events(&self, area_id: &Uuid) -> Result<Vec<EventRecord>>;

    /// Delete any entry for (area, plate) and insert `entry`.
    /// Returns true when a stale entry was replaced.
    async fn replace_presence(&self, entry: &PresenceEntry) -> Result<bool>;

    /// Delete the entry for (area, plate). Returns true when a row was deleted.
    async fn remove_presence(&self, area_id: &Uuid, plate_number: &str) -> Result<bool>;

    /// Presence entries of one area
    async fn list_presence(&self, area_id: &Uuid) -> Result<Vec<PresenceEntry>>;

    /// Presence entries across all areas that entered strictly before `cutoff`
    async fn presence_entered_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PresenceEntry>>;

    async fn create_notification(&self, notification: &Notification) -> Result<()>;

    /// Most recent unread notification matching the filters
    async fn latest_unread_notification(
        &self,
        area_id: &Uuid,
        category: NotificationCategory,
        plate_number: Option<&str>,
        created_since: Option<DateTime<Utc>>,
    ) -> Result<Option<Notification>>;

    async fn list_notifications(&self, area_id: &Uuid) -> Result<Vec<Notification>>;
}

use crate::db::models::{Area, EventRecord, Notification, NotificationCategory, PresenceEntry};
use crate::db::store::ParkingStore;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

pub mod areas;
pub mod events;
pub mod notifications;
pub mod presence;

pub use areas::AreasRepository;
pub use events::EventsRepository;
pub use notifications::NotificationsRepository;
pub use presence::PresenceRepository;

/// Postgres-backed [`ParkingStore`] built from the table repositories
#[derive(Clone)]
pub struct PgStore {
    areas: AreasRepository,
    events: EventsRepository,
    presence: PresenceRepository,
    notifications: NotificationsRepository,
}

impl PgStore {
    /// Create a new store sharing one pool between the repositories
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            areas: AreasRepository::new(pool.clone()),
            events: EventsRepository::new(pool.clone()),
            presence: PresenceRepository::new(pool.clone()),
            notifications: NotificationsRepository::new(pool),
        }
    }
}

#[async_trait]
impl ParkingStore for PgStore {
    async fn create_area(&self, area: &Area) -> Result<()> {
        self.areas.create(area).await
    }

    async fn get_area(&self, id: &Uuid) -> Result<Option<Area>> {
        self.areas.get_by_id(id).await
    }

    async fn list_active_areas(&self) -> Result<Vec<Area>> {
        self.areas.get_active().await
    }

    async fn advance_watermark(&self, area_id: &Uuid, watermark: DateTime<Utc>) -> Result<bool> {
        self.areas.advance_watermark(area_id, watermark).await
    }

    async fn adjust_occupancy(&self, area_id: &Uuid, delta: i32) -> Result<i32> {
        self.areas.adjust_occupancy(area_id, delta).await
    }

    async fn recount_occupancy(&self, area_id: &Uuid) -> Result<i32> {
        self.areas.recount_occupancy(area_id).await
    }

    async fn append_event(&self, event: &EventRecord) -> Result<()> {
        self.events.create(event).await
    }

    async fn list_events(&self, area_id: &Uuid) -> Result<Vec<EventRecord>> {
        self.events.get_by_area(area_id).await
    }

    async fn replace_presence(&self, entry: &PresenceEntry) -> Result<bool> {
        self.presence.replace(entry).await
    }

    async fn remove_presence(&self, area_id: &Uuid, plate_number: &str) -> Result<bool> {
        self.presence.delete(area_id, plate_number).await
    }

    async fn list_presence(&self, area_id: &Uuid) -> Result<Vec<PresenceEntry>> {
        self.presence.get_by_area(area_id).await
    }

    async fn presence_entered_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PresenceEntry>> {
        self.presence.get_entered_before(cutoff).await
    }

    async fn create_notification(&self, notification: &Notification) -> Result<()> {
        self.notifications.create(notification).await
    }

    async fn latest_unread_notification(
        &self,
        area_id: &Uuid,
        category: NotificationCategory,
        plate_number: Option<&str>,
        created_since: Option<DateTime<Utc>>,
    ) -> Result<Option<Notification>> {
        self.notifications
            .get_latest_unread(area_id, category, plate_number, created_since)
            .await
    }

    async fn list_notifications(&self, area_id: &Uuid) -> Result<Vec<Notification>> {
        self.notifications.get_by_area(area_id).await
    }
}

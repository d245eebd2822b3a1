use crate::db::models::{
    Area, EventRecord, Notification, NotificationCategory, NotificationStatus, PresenceEntry,
};
use crate::db::store::ParkingStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    areas: HashMap<Uuid, Area>,
    events: Vec<EventRecord>,
    presence: HashMap<(Uuid, String), PresenceEntry>,
    notifications: Vec<Notification>,
}

/// In-memory store with the same semantics as the Postgres one.
/// Used for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every notification of an area as read
    pub async fn mark_all_read(&self, area_id: &Uuid) {
        let mut tables = self.tables.write().await;
        for n in tables.notifications.iter_mut().filter(|n| n.area_id == *area_id) {
            n.status = NotificationStatus::Read;
        }
    }
}

#[async_trait]
impl ParkingStore for MemoryStore {
    async fn create_area(&self, area: &Area) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.areas.contains_key(&area.id) {
            return Err(Error::Persistence(format!("Area {} already exists", area.id)));
        }
        tables.areas.insert(area.id, area.clone());
        Ok(())
    }

    async fn get_area(&self, id: &Uuid) -> Result<Option<Area>> {
        Ok(self.tables.read().await.areas.get(id).cloned())
    }

    async fn list_active_areas(&self) -> Result<Vec<Area>> {
        let tables = self.tables.read().await;
        let mut areas: Vec<Area> = tables.areas.values().filter(|a| a.active).cloned().collect();
        areas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(areas)
    }

    async fn advance_watermark(&self, area_id: &Uuid, watermark: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let area = tables
            .areas
            .get_mut(area_id)
            .ok_or_else(|| Error::NotFound(format!("Area {}", area_id)))?;

        match area.watermark {
            Some(current) if current >= watermark => Ok(false),
            _ => {
                area.watermark = Some(watermark);
                area.updated_at = Utc::now();
                Ok(true)
            }
        }
    }

    async fn adjust_occupancy(&self, area_id: &Uuid, delta: i32) -> Result<i32> {
        let mut tables = self.tables.write().await;
        let area = tables
            .areas
            .get_mut(area_id)
            .ok_or_else(|| Error::NotFound(format!("Area {}", area_id)))?;
        area.current_occupancy = (area.current_occupancy + delta).max(0);
        Ok(area.current_occupancy)
    }

    async fn recount_occupancy(&self, area_id: &Uuid) -> Result<i32> {
        let mut tables = self.tables.write().await;
        let count = tables.presence.keys().filter(|(a, _)| a == area_id).count() as i32;
        let area = tables
            .areas
            .get_mut(area_id)
            .ok_or_else(|| Error::NotFound(format!("Area {}", area_id)))?;
        area.current_occupancy = count;
        Ok(count)
    }

    async fn append_event(&self, event: &EventRecord) -> Result<()> {
        self.tables.write().await.events.push(event.clone());
        Ok(())
    }

    async fn list_events(&self, area_id: &Uuid) -> Result<Vec<EventRecord>> {
        let tables = self.tables.read().await;
        let mut events: Vec<EventRecord> = tables
            .events
            .iter()
            .filter(|e| e.area_id == *area_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn replace_presence(&self, entry: &PresenceEntry) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let previous = tables
            .presence
            .insert((entry.area_id, entry.plate_number.clone()), entry.clone());
        Ok(previous.is_some())
    }

    async fn remove_presence(&self, area_id: &Uuid, plate_number: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .presence
            .remove(&(*area_id, plate_number.to_string()))
            .is_some())
    }

    async fn list_presence(&self, area_id: &Uuid) -> Result<Vec<PresenceEntry>> {
        let tables = self.tables.read().await;
        let mut entries: Vec<PresenceEntry> = tables
            .presence
            .values()
            .filter(|p| p.area_id == *area_id)
            .cloned()
            .collect();
        entries.sort_by_key(|p| p.entry_time);
        Ok(entries)
    }

    async fn presence_entered_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PresenceEntry>> {
        let tables = self.tables.read().await;
        let mut entries: Vec<PresenceEntry> = tables
            .presence
            .values()
            .filter(|p| p.entry_time < cutoff)
            .cloned()
            .collect();
        entries.sort_by_key(|p| p.entry_time);
        Ok(entries)
    }

    async fn create_notification(&self, notification: &Notification) -> Result<()> {
        self.tables.write().await.notifications.push(notification.clone());
        Ok(())
    }

    async fn latest_unread_notification(
        &self,
        area_id: &Uuid,
        category: NotificationCategory,
        plate_number: Option<&str>,
        created_since: Option<DateTime<Utc>>,
    ) -> Result<Option<Notification>> {
        let tables = self.tables.read().await;
        Ok(tables
            .notifications
            .iter()
            .filter(|n| n.area_id == *area_id)
            .filter(|n| n.category == category && n.status == NotificationStatus::Unread)
            .filter(|n| plate_number.map_or(true, |p| n.plate_number.as_deref() == Some(p)))
            .filter(|n| created_since.map_or(true, |since| n.created_at >= since))
            .max_by_key(|n| n.created_at)
            .cloned())
    }

    async fn list_notifications(&self, area_id: &Uuid) -> Result<Vec<Notification>> {
        let tables = self.tables.read().await;
        let mut notifications: Vec<Notification> = tables
            .notifications
            .iter()
            .filter(|n| n.area_id == *area_id)
            .cloned()
            .collect();
        notifications.sort_by_key(|n| n.created_at);
        Ok(notifications)
    }
}

/// Store whose area listing and presence scan fail, as when the database is
/// unreachable. Everything else goes to the wrapped `MemoryStore`.
#[cfg(test)]
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
}

#[cfg(test)]
impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
#[async_trait]
impl ParkingStore for FailingStore {
    async fn create_area(&self, area: &Area) -> Result<()> {
        self.inner.create_area(area).await
    }

    async fn get_area(&self, id: &Uuid) -> Result<Option<Area>> {
        self.inner.get_area(id).await
    }

    async fn list_active_areas(&self) -> Result<Vec<Area>> {
        Err(Error::Persistence("db down".to_string()))
    }

    async fn advance_watermark(&self, area_id: &Uuid, watermark: DateTime<Utc>) -> Result<bool> {
        self.inner.advance_watermark(area_id, watermark).await
    }

    async fn adjust_occupancy(&self, area_id: &Uuid, delta: i32) -> Result<i32> {
        self.inner.adjust_occupancy(area_id, delta).await
    }

    async fn recount_occupancy(&self, area_id: &Uuid) -> Result<i32> {
        self.inner.recount_occupancy(area_id).await
    }

    async fn append_event(&self, event: &EventRecord) -> Result<()> {
        self.inner.append_event(event).await
    }

    async fn list_events(&self, area_id: &Uuid) -> Result<Vec<EventRecord>> {
        self.inner.list_events(area_id).await
    }

    async fn replace_presence(&self, entry: &PresenceEntry) -> Result<bool> {
        self.inner.replace_presence(entry).await
    }

    async fn remove_presence(&self, area_id: &Uuid, plate_number: &str) -> Result<bool> {
        self.inner.remove_presence(area_id, plate_number).await
    }

    async fn list_presence(&self, area_id: &Uuid) -> Result<Vec<PresenceEntry>> {
        self.inner.list_presence(area_id).await
    }

    async fn presence_entered_before(&self, _cutoff: DateTime<Utc>) -> Result<Vec<PresenceEntry>> {
        Err(Error::Persistence("db down".to_string()))
    }

    async fn create_notification(&self, notification: &Notification) -> Result<()> {
        self.inner.create_notification(notification).await
    }

    async fn latest_unread_notification(
        &self,
        area_id: &Uuid,
        category: NotificationCategory,
        plate_number: Option<&str>,
        created_since: Option<DateTime<Utc>>,
    ) -> Result<Option<Notification>> {
        self.inner
            .latest_unread_notification(area_id, category, plate_number, created_since)
            .await
    }

    async fn list_notifications(&self, area_id: &Uuid) -> Result<Vec<Notification>> {
        self.inner.list_notifications(area_id).await
    }
}

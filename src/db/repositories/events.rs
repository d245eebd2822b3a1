use crate::db::models::EventRecord;
use crate::error::{Error, Result};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Event log repository. Rows are only ever inserted.
#[derive(Clone)]
pub struct EventsRepository {
    pool: Arc<PgPool>,
}

impl EventsRepository {
    /// Create a new events repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Append an event
    pub async fn create(&self, event: &EventRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (
                id, area_id, timestamp, plate_number, country, confidence, angle, image, status, vehicle_class, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event.id)
        .bind(event.area_id)
        .bind(event.timestamp)
        .bind(&event.plate_number)
        .bind(&event.country)
        .bind(event.confidence)
        .bind(event.angle)
        .bind(&event.image)
        .bind(&event.status)
        .bind(&event.vehicle_class)
        .bind(event.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to create event: {}", e)))?;

        Ok(())
    }

    /// Get events for an area in timestamp order
    pub async fn get_by_area(&self, area_id: &Uuid) -> Result<Vec<EventRecord>> {
        let result = sqlx::query_as::<_, EventRecord>(
            r#"
            SELECT id, area_id, timestamp, plate_number, country, confidence, angle, image, status, vehicle_class, created_at
            FROM events
            WHERE area_id = $1
            ORDER BY timestamp ASC
            "#,
        )
        .bind(area_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to get events for area: {}", e)))?;

        Ok(result)
    }
}

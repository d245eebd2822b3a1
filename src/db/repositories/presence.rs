use crate::db::models::PresenceEntry;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Presence repository: one row per vehicle currently parked
#[derive(Clone)]
pub struct PresenceRepository {
    pool: Arc<PgPool>,
}

impl PresenceRepository {
    /// Create a new presence repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Replace any entry for (area, plate) with `entry` in one transaction
    pub async fn replace(&self, entry: &PresenceEntry) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Persistence(format!("Failed to begin transaction: {}", e)))?;

        let deleted = sqlx::query("DELETE FROM presence WHERE area_id = $1 AND plate_number = $2")
            .bind(entry.area_id)
            .bind(&entry.plate_number)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Persistence(format!("Failed to delete stale presence: {}", e)))?
            .rows_affected();

        sqlx::query(
            r#"
            INSERT INTO presence (id, area_id, plate_number, country, image, entry_time)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.area_id)
        .bind(&entry.plate_number)
        .bind(&entry.country)
        .bind(&entry.image)
        .bind(entry.entry_time)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to create presence: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| Error::Persistence(format!("Failed to commit presence: {}", e)))?;

        if deleted > 0 {
            debug!("Replaced stale presence for {} in area {}", entry.plate_number, entry.area_id);
        }

        Ok(deleted > 0)
    }

    /// Delete the entry for (area, plate)
    pub async fn delete(&self, area_id: &Uuid, plate_number: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM presence WHERE area_id = $1 AND plate_number = $2")
            .bind(area_id)
            .bind(plate_number)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Persistence(format!("Failed to delete presence: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Get presence entries for an area
    pub async fn get_by_area(&self, area_id: &Uuid) -> Result<Vec<PresenceEntry>> {
        let result = sqlx::query_as::<_, PresenceEntry>(
            r#"
            SELECT id, area_id, plate_number, country, image, entry_time
            FROM presence
            WHERE area_id = $1
            ORDER BY entry_time ASC
            "#,
        )
        .bind(area_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to get presence for area: {}", e)))?;

        Ok(result)
    }

    /// Get presence entries that entered before a cutoff
    pub async fn get_entered_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PresenceEntry>> {
        let result = sqlx::query_as::<_, PresenceEntry>(
            r#"
            SELECT id, area_id, plate_number, country, image, entry_time
            FROM presence
            WHERE entry_time < $1
            ORDER BY entry_time ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to get long-stay presence: {}", e)))?;

        Ok(result)
    }
}

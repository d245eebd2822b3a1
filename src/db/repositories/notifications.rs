use crate::db::models::{Notification, NotificationCategory};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Notifications repository
#[derive(Clone)]
pub struct NotificationsRepository {
    pool: Arc<PgPool>,
}

impl NotificationsRepository {
    /// Create a new notifications repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create a new notification
    pub async fn create(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, area_id, status, category, message, plate_number, current_occupancy, total_capacity, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(notification.id)
        .bind(notification.area_id)
        .bind(notification.status)
        .bind(notification.category)
        .bind(&notification.message)
        .bind(&notification.plate_number)
        .bind(notification.current_occupancy)
        .bind(notification.total_capacity)
        .bind(notification.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to create notification: {}", e)))?;

        Ok(())
    }

    /// Most recent unread notification of a category, optionally for one plate and window
    pub async fn get_latest_unread(
        &self,
        area_id: &Uuid,
        category: NotificationCategory,
        plate_number: Option<&str>,
        created_since: Option<DateTime<Utc>>,
    ) -> Result<Option<Notification>> {
        let result = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, area_id, status, category, message, plate_number, current_occupancy, total_capacity, created_at
            FROM notifications
            WHERE area_id = $1
              AND category = $2
              AND status = 'unread'
              AND ($3::TEXT IS NULL OR plate_number = $3)
              AND ($4::TIMESTAMPTZ IS NULL OR created_at >= $4)
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(area_id)
        .bind(category)
        .bind(plate_number)
        .bind(created_since)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to get latest notification: {}", e)))?;

        Ok(result)
    }

    /// Get notifications for an area
    pub async fn get_by_area(&self, area_id: &Uuid) -> Result<Vec<Notification>> {
        let result = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, area_id, status, category, message, plate_number, current_occupancy, total_capacity, created_at
            FROM notifications
            WHERE area_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(area_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to get notifications for area: {}", e)))?;

        Ok(result)
    }
}

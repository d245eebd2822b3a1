use crate::{
    db::models::{Area, AreaDb},
    error::{Error, Result},
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const AREA_SELECT: &str = r#"
    SELECT a.id, a.name, a.capacity, a.current_occupancy, a.active, a.watermark,
           a.created_at, a.updated_at,
           r.host AS remote_host, r.port AS remote_port, r.username AS remote_user,
           r.password AS remote_password, r.secure AS remote_secure,
           r.accept_invalid_certs AS remote_accept_invalid_certs, r.folder AS remote_folder
    FROM areas a
    LEFT JOIN remote_servers r ON r.id = a.remote_server_id
"#;

/// Areas repository: area configuration, watermark and live occupancy
#[derive(Clone)]
pub struct AreasRepository {
    pool: Arc<PgPool>,
}

impl AreasRepository {
    /// Create a new areas repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create a new area, inserting its remote server first
    pub async fn create(&self, area: &Area) -> Result<()> {
        info!("Creating new area: {}", area.name);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Persistence(format!("Failed to begin transaction: {}", e)))?;

        let remote_server_id = match &area.remote {
            Some(remote) => {
                let id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO remote_servers (id, host, port, username, password, secure, accept_invalid_certs, folder)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(id)
                .bind(&remote.host)
                .bind(remote.port as i32)
                .bind(&remote.user)
                .bind(&remote.password)
                .bind(remote.secure)
                .bind(remote.accept_invalid_certs)
                .bind(&remote.folder)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::Persistence(format!("Failed to create remote server: {}", e)))?;
                Some(id)
            }
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO areas (id, name, capacity, current_occupancy, active, remote_server_id, watermark, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(area.id)
        .bind(&area.name)
        .bind(area.capacity)
        .bind(area.current_occupancy)
        .bind(area.active)
        .bind(remote_server_id)
        .bind(area.watermark)
        .bind(area.created_at)
        .bind(area.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to create area: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| Error::Persistence(format!("Failed to commit area: {}", e)))?;

        Ok(())
    }

    /// Get area by ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Area>> {
        let sql = format!("{} WHERE a.id = $1", AREA_SELECT);
        let result = sqlx::query_as::<_, AreaDb>(&sql)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| Error::Persistence(format!("Failed to get area by ID: {}", e)))?;

        Ok(result.map(Area::from))
    }

    /// Get all active areas
    pub async fn get_active(&self) -> Result<Vec<Area>> {
        let sql = format!("{} WHERE a.active = TRUE ORDER BY a.name", AREA_SELECT);
        let result = sqlx::query_as::<_, AreaDb>(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| Error::Persistence(format!("Failed to get active areas: {}", e)))?;

        Ok(result.into_iter().map(Area::from).collect())
    }

    /// Move the watermark forward; a stale or equal value leaves the row untouched
    pub async fn advance_watermark(&self, id: &Uuid, watermark: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE areas
            SET watermark = $2, updated_at = NOW()
            WHERE id = $1 AND (watermark IS NULL OR watermark < $2)
            "#,
        )
        .bind(id)
        .bind(watermark)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to update watermark: {}", e)))?;

        if result.rows_affected() > 0 {
            info!("Area {} watermark advanced to {}", id, watermark.to_rfc3339());
        }

        Ok(result.rows_affected() > 0)
    }

    /// Add `delta` to the live occupancy counter
    pub async fn adjust_occupancy(&self, id: &Uuid, delta: i32) -> Result<i32> {
        let result: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE areas
            SET current_occupancy = GREATEST(current_occupancy + $2, 0), updated_at = NOW()
            WHERE id = $1
            RETURNING current_occupancy
            "#,
        )
        .bind(id)
        .bind(delta)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to update occupancy: {}", e)))?;

        result.ok_or_else(|| Error::NotFound(format!("Area {}", id)))
    }

    /// Reset the live counter from the presence table
    pub async fn recount_occupancy(&self, id: &Uuid) -> Result<i32> {
        let result: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE areas
            SET current_occupancy = (SELECT COUNT(*)::INT FROM presence WHERE area_id = $1),
                updated_at = NOW()
            WHERE id = $1
            RETURNING current_occupancy
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to recount occupancy: {}", e)))?;

        result.ok_or_else(|| Error::NotFound(format!("Area {}", id)))
    }
}

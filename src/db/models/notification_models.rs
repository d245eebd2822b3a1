use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Unread,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    LongStay,
    CapacityWarning,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Unread => "unread",
            NotificationStatus::Read => "read",
        }
    }
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCategory::LongStay => "long_stay",
            NotificationCategory::CapacityWarning => "capacity_warning",
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for NotificationStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("text")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for NotificationStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let text = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match text.as_str() {
            "read" => Ok(NotificationStatus::Read),
            "unread" => Ok(NotificationStatus::Unread),
            other => Err(format!("unknown notification status: {}", other).into()),
        }
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for NotificationStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl sqlx::Type<sqlx::Postgres> for NotificationCategory {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("text")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for NotificationCategory {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let text = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match text.as_str() {
            "long_stay" => Ok(NotificationCategory::LongStay),
            "capacity_warning" => Ok(NotificationCategory::CapacityWarning),
            other => Err(format!("unknown notification category: {}", other).into()),
        }
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for NotificationCategory {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Alert raised for an area. Delivery is handled outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub area_id: Uuid,
    pub status: NotificationStatus,
    pub category: NotificationCategory,
    pub message: String,
    pub plate_number: Option<String>,
    pub current_occupancy: Option<i32>,
    pub total_capacity: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn long_stay(area_id: Uuid, plate_number: &str, message: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            area_id,
            status: NotificationStatus::Unread,
            category: NotificationCategory::LongStay,
            message,
            plate_number: Some(plate_number.to_string()),
            current_occupancy: None,
            total_capacity: None,
            created_at: now,
        }
    }

    pub fn capacity_warning(
        area_id: Uuid,
        current_occupancy: i32,
        total_capacity: i32,
        message: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            area_id,
            status: NotificationStatus::Unread,
            category: NotificationCategory::CapacityWarning,
            message,
            plate_number: None,
            current_occupancy: Some(current_occupancy),
            total_capacity: Some(total_capacity),
            created_at: now,
        }
    }

    /// Occupancy percentage recorded at creation, for capacity warnings
    pub fn occupancy_percent(&self) -> Option<i32> {
        match (self.current_occupancy, self.total_capacity) {
            (Some(current), Some(total)) => Some(super::area_models::occupancy_percent(current, total)),
            _ => None,
        }
    }
}

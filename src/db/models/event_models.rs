use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Direction reported by the plate camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleStatus {
    Approaching,
    Leaving,
    Other(String),
}

impl VehicleStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "APPROACHING" => VehicleStatus::Approaching,
            "LEAVING" => VehicleStatus::Leaving,
            other => VehicleStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            VehicleStatus::Approaching => "APPROACHING",
            VehicleStatus::Leaving => "LEAVING",
            VehicleStatus::Other(s) => s,
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only event log entry, one per reconciled camera row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventRecord {
    pub id: Uuid,
    pub area_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub plate_number: String,
    pub country: String,
    pub confidence: f64,
    pub angle: f64,
    pub image: String,
    /// Raw status as sent by the camera
    pub status: String,
    pub vehicle_class: Option<String>,
    pub created_at: DateTime<Utc>,
}

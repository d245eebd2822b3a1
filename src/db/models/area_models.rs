use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Connection details for the file server an area's camera uploads to
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteDescriptor {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Upgrade the control channel to TLS (explicit FTPS)
    pub secure: bool,
    /// Trust policy for self-signed camera gateways
    pub accept_invalid_certs: bool,
    /// Directory holding the date-coded CSV files
    pub folder: String,
}

impl fmt::Debug for RemoteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("secure", &self.secure)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("folder", &self.folder)
            .finish()
    }
}

impl RemoteDescriptor {
    /// `host:port` form used to open the control connection
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Monitored parking area
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Area {
    pub id: Uuid,
    pub name: String,
    pub capacity: i32,
    pub current_occupancy: i32,
    pub active: bool,
    pub remote: Option<RemoteDescriptor>,
    /// Instant of the last reconciled camera row; never moves backwards
    pub watermark: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Area {
    pub fn new(name: &str, capacity: i32, remote: Option<RemoteDescriptor>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            capacity,
            current_occupancy: 0,
            active: true,
            remote,
            watermark: None,
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn occupancy_percent(current: i32, capacity: i32) -> i32 {
    if capacity <= 0 {
        return 0;
    }
    ((current as f64 / capacity as f64) * 100.0).round() as i32
}

/// Flat row of `areas LEFT JOIN remote_servers`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AreaDb {
    pub id: Uuid,
    pub name: String,
    pub capacity: i32,
    pub current_occupancy: i32,
    pub active: bool,
    pub watermark: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub remote_host: Option<String>,
    pub remote_port: Option<i32>,
    pub remote_user: Option<String>,
    pub remote_password: Option<String>,
    pub remote_secure: Option<bool>,
    pub remote_accept_invalid_certs: Option<bool>,
    pub remote_folder: Option<String>,
}

impl From<AreaDb> for Area {
    fn from(db: AreaDb) -> Self {
        let remote = db.remote_host.map(|host| RemoteDescriptor {
            host,
            port: db.remote_port.and_then(|p| u16::try_from(p).ok()).unwrap_or(21),
            user: db.remote_user.unwrap_or_default(),
            password: db.remote_password.unwrap_or_default(),
            secure: db.remote_secure.unwrap_or(true),
            accept_invalid_certs: db.remote_accept_invalid_certs.unwrap_or(false),
            folder: db.remote_folder.unwrap_or_default(),
        });

        Self {
            id: db.id,
            name: db.name,
            capacity: db.capacity,
            current_occupancy: db.current_occupancy,
            active: db.active,
            remote,
            watermark: db.watermark,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

pub mod area_models;
pub mod event_models;
pub mod notification_models;
pub mod presence_models;

pub use area_models::{occupancy_percent, Area, AreaDb, RemoteDescriptor};
pub use event_models::{EventRecord, VehicleStatus};
pub use notification_models::{Notification, NotificationCategory, NotificationStatus};
pub use presence_models::PresenceEntry;

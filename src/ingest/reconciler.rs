use super::parser::CameraRow;
use super::remote::RemoteSession;
use crate::assets::{asset_key, file_name_of, AssetStore};
use crate::db::models::{
    occupancy_percent, Area, EventRecord, Notification, NotificationCategory, PresenceEntry,
    VehicleStatus,
};
use crate::db::ParkingStore;
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use std::io::Read;
use std::sync::Arc;
use uuid::Uuid;

/// What reconciling one row did to the occupancy view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// New presence entry, occupancy incremented
    Entered,
    /// Stale presence entry replaced, occupancy unchanged
    ReEntered,
    /// Presence entry removed, occupancy decremented
    Left,
    /// LEAVING for a vehicle that was not present
    LeftUnknown,
    /// Status other than APPROACHING/LEAVING, event logged only
    Logged,
}

/// Applies reconciled camera rows to the event log and the presence table
pub struct Reconciler {
    store: Arc<dyn ParkingStore>,
    assets: Option<Arc<dyn AssetStore>>,
    capacity_warning_percent: u8,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ParkingStore>, capacity_warning_percent: u8) -> Self {
        Self {
            store,
            assets: None,
            capacity_warning_percent,
        }
    }

    /// Copy referenced images into `assets` while reconciling
    pub fn with_assets(mut self, assets: Arc<dyn AssetStore>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Reconcile one row already classified as new. `session` must be in
    /// `target_dir`, the absolute path of the area's target folder, and is
    /// left there. A session that cannot get back to it fails with
    /// `Error::Connection` before anything is written.
    pub async fn reconcile(
        &self,
        area: &Area,
        row: &CameraRow,
        timestamp: DateTime<Utc>,
        local_date: NaiveDate,
        session: &mut dyn RemoteSession,
        target_dir: &str,
    ) -> Result<RowOutcome> {
        let plate = row.plate_number.trim();
        if plate.is_empty() {
            return Err(Error::MalformedRow(format!("line {}: empty plate number", row.line)));
        }

        let image = match &self.assets {
            Some(assets) => {
                let fetch = ImageFetch {
                    area_id: &area.id,
                    reference: &row.image,
                    date: local_date,
                    target_dir,
                };
                resolve_image(assets.as_ref(), fetch, session).await?
            }
            None => row.image.clone(),
        };

        let event = EventRecord {
            id: Uuid::new_v4(),
            area_id: area.id,
            timestamp,
            plate_number: plate.to_string(),
            country: row.country.clone(),
            confidence: row.confidence,
            angle: row.angle,
            image: image.clone(),
            status: row.status.as_str().to_string(),
            vehicle_class: row.vehicle_class.clone(),
            created_at: Utc::now(),
        };
        self.store.append_event(&event).await?;

        match &row.status {
            VehicleStatus::Approaching => {
                let entry = PresenceEntry {
                    id: Uuid::new_v4(),
                    area_id: area.id,
                    plate_number: plate.to_string(),
                    country: row.country.clone(),
                    image,
                    entry_time: timestamp,
                };

                if self.store.replace_presence(&entry).await? {
                    debug!("Replaced stale presence of {} in area {}", plate, area.id);
                    return Ok(RowOutcome::ReEntered);
                }

                let current = self.store.adjust_occupancy(&area.id, 1).await?;
                self.check_capacity(area, current).await;
                Ok(RowOutcome::Entered)
            }
            VehicleStatus::Leaving => {
                if self.store.remove_presence(&area.id, plate).await? {
                    self.store.adjust_occupancy(&area.id, -1).await?;
                    Ok(RowOutcome::Left)
                } else {
                    debug!("{} left area {} without a presence entry", plate, area.id);
                    Ok(RowOutcome::LeftUnknown)
                }
            }
            VehicleStatus::Other(status) => {
                debug!("Logged {} with status {:?} in area {}", plate, status, area.id);
                Ok(RowOutcome::Logged)
            }
        }
    }

    /// Raise a capacity warning when the area crosses the threshold, unless an
    /// unread warning already reports the same or a higher level
    async fn check_capacity(&self, area: &Area, current: i32) {
        if let Err(e) = self.try_capacity_warning(area, current).await {
            warn!("Capacity check failed for area {}: {}", area.id, e);
        }
    }

    async fn try_capacity_warning(&self, area: &Area, current: i32) -> Result<()> {
        let percent = occupancy_percent(current, area.capacity);
        if percent < i32::from(self.capacity_warning_percent) {
            return Ok(());
        }

        let latest = self
            .store
            .latest_unread_notification(&area.id, NotificationCategory::CapacityWarning, None, None)
            .await?;
        if let Some(previous) = latest.and_then(|n| n.occupancy_percent()) {
            if previous >= percent {
                return Ok(());
            }
        }

        let message = format!(
            "Parking area {} has reached {}% capacity ({}/{} vehicles).",
            area.name, percent, current, area.capacity
        );
        let notification =
            Notification::capacity_warning(area.id, current, area.capacity, message, Utc::now());
        self.store.create_notification(&notification).await?;
        info!("{}", notification.message);
        Ok(())
    }
}

struct ImageFetch<'a> {
    area_id: &'a Uuid,
    reference: &'a str,
    date: NaiveDate,
    target_dir: &'a str,
}

/// Location of the row's image in the asset store, fetched from the remote
/// date folder when absent. Falls back to the raw reference when the image
/// cannot be had. Only losing the target folder is an error.
async fn resolve_image(
    assets: &dyn AssetStore,
    fetch: ImageFetch<'_>,
    session: &mut dyn RemoteSession,
) -> Result<String> {
    let file_name = file_name_of(fetch.reference);
    let key = asset_key(fetch.area_id, fetch.date, file_name);

    match assets.exists(&key).await {
        Ok(true) => return Ok(assets.locate(&key)),
        Ok(false) => {}
        Err(e) => {
            warn!("Keeping raw image reference {:?}: {}", fetch.reference, e);
            return Ok(fetch.reference.to_string());
        }
    }

    let folder = fetch.date.format("%Y-%m-%d").to_string();
    if let Err(e) = session.change_directory(&folder).await {
        warn!(
            "Keeping raw image reference {:?}: date folder {}: {}",
            fetch.reference, folder, e
        );
        return Ok(fetch.reference.to_string());
    }

    let downloaded = download(session, file_name).await;

    // Absolute path, so a server without ".." support still gets back
    session.change_directory(fetch.target_dir).await.map_err(|e| {
        Error::Connection(format!(
            "Lost target folder {} after fetching {}: {}",
            fetch.target_dir, file_name, e
        ))
    })?;

    let stored = match downloaded {
        Ok(bytes) => assets.store(&key, &bytes).await,
        Err(e) => Err(e),
    };
    match stored {
        Ok(location) => Ok(location),
        Err(e) => {
            warn!("Keeping raw image reference {:?}: {}", fetch.reference, e);
            Ok(fetch.reference.to_string())
        }
    }
}

async fn download(session: &mut dyn RemoteSession, file_name: &str) -> Result<Vec<u8>> {
    let mut stream = session
        .open_stream(file_name)
        .await
        .map_err(|e| Error::AssetResolution(format!("{}: {}", file_name, e)))?;
    let mut bytes = Vec::new();
    stream
        .read_to_end(&mut bytes)
        .map_err(|e| Error::AssetResolution(format!("{}: {}", file_name, e)))?;
    Ok(bytes)
}

use crate::config::MonitorConfig;
use crate::db::models::{Notification, NotificationCategory, PresenceEntry};
use crate::db::ParkingStore;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of one long-stay sweep
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepSummary {
    pub success: bool,
    pub error: Option<String>,
    /// Presence entries past the threshold
    pub overdue: usize,
    pub notified: usize,
    /// Overdue vehicles already alerted within the cool-down window
    pub suppressed: usize,
    pub failed: usize,
}

/// Reports vehicles that have occupied a slot longer than the threshold
pub struct LongStayMonitor {
    store: Arc<dyn ParkingStore>,
    threshold: Duration,
    cooldown: Duration,
}

impl LongStayMonitor {
    pub fn new(store: Arc<dyn ParkingStore>, threshold: Duration, cooldown: Duration) -> Self {
        Self {
            store,
            threshold,
            cooldown,
        }
    }

    pub fn from_config(store: Arc<dyn ParkingStore>, config: &MonitorConfig) -> Result<Self> {
        Ok(Self::new(
            store,
            hours("long_stay_hours", config.long_stay_hours)?,
            hours("cooldown_hours", config.cooldown_hours)?,
        ))
    }

    pub async fn sweep(&self) -> SweepSummary {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep as of `now`. The whole presence table is re-evaluated each run.
    /// Never fails; errors land in the summary.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepSummary {
        let mut summary = SweepSummary::default();
        match self.try_sweep(now, &mut summary).await {
            Ok(()) => summary.success = true,
            Err(e) => {
                error!("Long-stay sweep failed: {}", e);
                summary.error = Some(e.to_string());
            }
        }
        summary
    }

    async fn try_sweep(&self, now: DateTime<Utc>, summary: &mut SweepSummary) -> Result<()> {
        let cutoff = now
            .checked_sub_signed(self.threshold)
            .ok_or_else(|| Error::Config(format!("Long-stay cutoff before {} is out of range", now)))?;
        let overdue = self.store.presence_entered_before(cutoff).await?;
        summary.overdue = overdue.len();

        if overdue.is_empty() {
            debug!("No vehicles parked longer than {} hours", self.threshold.num_hours());
            return Ok(());
        }
        info!(
            "Found {} vehicles parked longer than {} hours",
            overdue.len(),
            self.threshold.num_hours()
        );

        let mut area_names: HashMap<Uuid, String> = HashMap::new();
        for entry in &overdue {
            match self.notify(entry, now, &mut area_names).await {
                Ok(true) => summary.notified += 1,
                Ok(false) => summary.suppressed += 1,
                Err(e) => {
                    warn!(
                        "Failed to create long-stay notification for {} in area {}: {}",
                        entry.plate_number, entry.area_id, e
                    );
                    summary.failed += 1;
                }
            }
        }

        Ok(())
    }

    /// Returns false when a recent unread alert for the vehicle already exists
    async fn notify(
        &self,
        entry: &PresenceEntry,
        now: DateTime<Utc>,
        area_names: &mut HashMap<Uuid, String>,
    ) -> Result<bool> {
        let since = now.checked_sub_signed(self.cooldown);
        let recent = self
            .store
            .latest_unread_notification(
                &entry.area_id,
                NotificationCategory::LongStay,
                Some(&entry.plate_number),
                since,
            )
            .await?;
        if recent.is_some() {
            return Ok(false);
        }

        if !area_names.contains_key(&entry.area_id) {
            let name = self
                .store
                .get_area(&entry.area_id)
                .await?
                .map(|a| a.name)
                .unwrap_or_else(|| entry.area_id.to_string());
            area_names.insert(entry.area_id, name);
        }
        let area_name = area_names
            .get(&entry.area_id)
            .map(String::as_str)
            .unwrap_or_default();

        let message = format!(
            "Vehicle {} has been parked in {} for {}.",
            entry.plate_number,
            area_name,
            format_duration(entry.parked_for(now))
        );
        let notification = Notification::long_stay(entry.area_id, &entry.plate_number, message, now);
        self.store.create_notification(&notification).await?;
        info!("{}", notification.message);

        Ok(true)
    }
}

fn hours(name: &str, value: i64) -> Result<Duration> {
    Duration::try_hours(value)
        .filter(|d| *d >= Duration::zero())
        .ok_or_else(|| Error::Config(format!("monitor.{} = {} is out of range", name, value)))
}

/// `"3 hours"`, `"1 day and 6 hours"`, `"2 days and 1 hour"`
pub fn format_duration(elapsed: Duration) -> String {
    let hours = elapsed.num_hours().max(0);
    let days = hours / 24;
    let remaining = hours % 24;

    if days > 0 {
        format!("{} and {}", plural(days, "day"), plural(remaining, "hour"))
    } else {
        plural(hours, "hour")
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{} {}", n, unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Area;
    use crate::db::{FailingStore, MemoryStore};

    fn presence(area_id: Uuid, plate: &str, entry_time: DateTime<Utc>) -> PresenceEntry {
        PresenceEntry {
            id: Uuid::new_v4(),
            area_id,
            plate_number: plate.to_string(),
            country: "AUS".to_string(),
            image: "image.jpg".to_string(),
            entry_time,
        }
    }

    async fn setup() -> anyhow::Result<(Arc<MemoryStore>, Area, LongStayMonitor)> {
        let store = Arc::new(MemoryStore::new());
        let area = Area::new("Level 2", 20, None);
        store.create_area(&area).await?;
        let monitor = LongStayMonitor::from_config(store.clone(), &MonitorConfig::default())?;
        Ok((store, area, monitor))
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::minutes(30)), "0 hours");
        assert_eq!(format_duration(Duration::hours(1)), "1 hour");
        assert_eq!(format_duration(Duration::hours(3)), "3 hours");
        assert_eq!(format_duration(Duration::hours(24)), "1 day and 0 hours");
        assert_eq!(format_duration(Duration::hours(30)), "1 day and 6 hours");
        assert_eq!(format_duration(Duration::hours(49) + Duration::minutes(59)), "2 days and 1 hour");
    }

    #[tokio::test]
    async fn test_overdue_vehicle_gets_one_notification() -> anyhow::Result<()> {
        let (store, area, monitor) = setup().await?;
        let now = Utc::now();
        store
            .replace_presence(&presence(area.id, "ABC123", now - Duration::hours(30)))
            .await?;

        let summary = monitor.sweep_at(now).await;
        assert!(summary.success);
        assert_eq!(summary.overdue, 1);
        assert_eq!(summary.notified, 1);

        let notifications = store.list_notifications(&area.id).await?;
        assert_eq!(notifications.len(), 1);
        assert_eq!(
            notifications[0].message,
            "Vehicle ABC123 has been parked in Level 2 for 1 day and 6 hours."
        );
        assert_eq!(notifications[0].plate_number.as_deref(), Some("ABC123"));
        Ok(())
    }

    #[tokio::test]
    async fn test_recent_vehicles_are_ignored() -> anyhow::Result<()> {
        let (store, area, monitor) = setup().await?;
        let now = Utc::now();
        store
            .replace_presence(&presence(area.id, "NEW1", now - Duration::hours(23)))
            .await?;

        let summary = monitor.sweep_at(now).await;
        assert_eq!(
            summary,
            SweepSummary {
                success: true,
                ..SweepSummary::default()
            }
        );
        assert!(store.list_notifications(&area.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_notifications_are_deduplicated_within_cooldown() -> anyhow::Result<()> {
        let (store, area, monitor) = setup().await?;
        let now = Utc::now();
        store
            .replace_presence(&presence(area.id, "ABC123", now - Duration::hours(30)))
            .await?;

        monitor.sweep_at(now).await;
        for minutes in [1, 60, 5 * 60 + 59] {
            let summary = monitor.sweep_at(now + Duration::minutes(minutes)).await;
            assert_eq!(summary.suppressed, 1, "after {} minutes", minutes);
        }
        assert_eq!(store.list_notifications(&area.id).await?.len(), 1);

        let summary = monitor.sweep_at(now + Duration::hours(6) + Duration::minutes(1)).await;
        assert_eq!(summary.notified, 1);
        assert_eq!(store.list_notifications(&area.id).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_read_notifications_do_not_suppress() -> anyhow::Result<()> {
        let (store, area, monitor) = setup().await?;
        let now = Utc::now();
        store
            .replace_presence(&presence(area.id, "ABC123", now - Duration::hours(30)))
            .await?;

        monitor.sweep_at(now).await;
        store.mark_all_read(&area.id).await;

        let summary = monitor.sweep_at(now + Duration::minutes(10)).await;
        assert_eq!(summary.notified, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_in_summary() -> anyhow::Result<()> {
        let store = Arc::new(FailingStore::new());
        let monitor = LongStayMonitor::from_config(store, &MonitorConfig::default())?;

        let summary = monitor.sweep_at(Utc::now()).await;
        assert!(!summary.success);
        assert!(summary.error.as_deref().is_some_and(|e| e.contains("db down")));
        assert_eq!(summary.overdue, 0);
        Ok(())
    }

    #[test]
    fn test_out_of_range_hours_are_config_errors() {
        let store = Arc::new(MemoryStore::new());
        for (long_stay_hours, cooldown_hours) in [(i64::MAX, 6), (24, i64::MIN), (-1, 6)] {
            let config = MonitorConfig {
                long_stay_hours,
                cooldown_hours,
                ..MonitorConfig::default()
            };
            assert!(matches!(
                LongStayMonitor::from_config(store.clone(), &config),
                Err(Error::Config(_))
            ));
        }
    }
}

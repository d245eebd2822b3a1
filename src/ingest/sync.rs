use super::datetime::DatetimeNormalizer;
use super::parser::RecordParser;
use super::reconciler::Reconciler;
use super::remote::{order_csv_files, RemoteConnector, RemoteSession};
use crate::db::models::{Area, RemoteDescriptor};
use crate::db::ParkingStore;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Outcome of one ingestion pass over one area
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PassSummary {
    pub area_id: Uuid,
    pub success: bool,
    pub error: Option<String>,
    pub files_seen: usize,
    pub rows_seen: usize,
    /// At or before the watermark, already processed by an earlier pass
    pub rows_skipped: usize,
    /// Malformed rows or timestamps
    pub rows_rejected: usize,
    pub rows_committed: usize,
    /// Reconciliation failed and was logged
    pub rows_failed: usize,
    pub previous_watermark: Option<DateTime<Utc>>,
    pub new_watermark: Option<DateTime<Utc>>,
}

impl PassSummary {
    fn new(area_id: Uuid) -> Self {
        Self {
            area_id,
            success: false,
            error: None,
            files_seen: 0,
            rows_seen: 0,
            rows_skipped: 0,
            rows_rejected: 0,
            rows_committed: 0,
            rows_failed: 0,
            previous_watermark: None,
            new_watermark: None,
        }
    }
}

/// Marks an area as in flight until dropped
struct AreaGuard<'a> {
    in_flight: &'a Mutex<HashSet<Uuid>>,
    area_id: Uuid,
}

impl<'a> AreaGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<Uuid>>, area_id: Uuid) -> Option<Self> {
        let mut set = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(area_id) {
            return None;
        }
        Some(Self { in_flight, area_id })
    }
}

impl Drop for AreaGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.area_id);
    }
}

/// Incremental ingestion of an area's remote CSV files, driven by the
/// per-area watermark
pub struct SyncEngine {
    store: Arc<dyn ParkingStore>,
    connector: Arc<dyn RemoteConnector>,
    parser: RecordParser,
    normalizer: DatetimeNormalizer,
    reconciler: Reconciler,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn ParkingStore>,
        connector: Arc<dyn RemoteConnector>,
        parser: RecordParser,
        normalizer: DatetimeNormalizer,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            store,
            connector,
            parser,
            normalizer,
            reconciler,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run one pass for `area_id`. Errors are reported in the summary.
    pub async fn run_pass(&self, area_id: Uuid) -> PassSummary {
        let mut summary = PassSummary::new(area_id);

        let Some(_guard) = AreaGuard::acquire(&self.in_flight, area_id) else {
            let e = Error::AlreadyRunning(format!("Ingestion pass for area {}", area_id));
            warn!("{}", e);
            summary.error = Some(e.to_string());
            return summary;
        };

        match self.sync_area(area_id, &mut summary).await {
            Ok(()) => {
                summary.success = true;
                info!(
                    "Area {}: {} files, {} rows seen, {} committed, {} skipped, {} rejected, {} failed",
                    area_id,
                    summary.files_seen,
                    summary.rows_seen,
                    summary.rows_committed,
                    summary.rows_skipped,
                    summary.rows_rejected,
                    summary.rows_failed
                );
            }
            Err(e) => {
                error!("Ingestion pass for area {} failed: {}", area_id, e);
                summary.error = Some(e.to_string());
            }
        }

        summary
    }

    async fn sync_area(&self, area_id: Uuid, summary: &mut PassSummary) -> Result<()> {
        let area = self
            .store
            .get_area(&area_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Area {} not found", area_id)))?;
        let remote = area
            .remote
            .clone()
            .ok_or_else(|| Error::Config(format!("Area {} has no remote server", area_id)))?;

        summary.previous_watermark = area.watermark;
        summary.new_watermark = area.watermark;

        let mut session = self.connector.connect(&remote).await?;
        let drained = self
            .drain(&area, &remote, session.as_mut(), summary)
            .await;
        session.close().await;

        let Some(latest_seen) = drained? else {
            return Ok(());
        };

        let advances = area.watermark.map_or(true, |w| latest_seen > w);
        if advances && self.store.advance_watermark(&area.id, latest_seen).await? {
            debug!("Area {} watermark advanced to {}", area.id, latest_seen);
            summary.new_watermark = Some(latest_seen);
        }

        Ok(())
    }

    /// Reconcile every new row of the target folder. Returns the latest
    /// instant among rows whose outcome was observed.
    async fn drain(
        &self,
        area: &Area,
        remote: &RemoteDescriptor,
        session: &mut dyn RemoteSession,
        summary: &mut PassSummary,
    ) -> Result<Option<DateTime<Utc>>> {
        session.change_directory(&remote.folder).await?;
        let target_dir = session.current_directory().await?;
        let files = order_csv_files(session.list().await?);
        summary.files_seen = files.len();

        let watermark = area.watermark;
        let mut latest_seen: Option<DateTime<Utc>> = None;

        for file in files {
            debug!("Area {}: reading {}", area.id, file.name);
            let stream = session.open_stream(&file.name).await?;

            for row in self.parser.parse(stream) {
                summary.rows_seen += 1;

                let row = match row {
                    Ok(row) => row,
                    Err(e) if e.is_row_level() => {
                        warn!("{}: {}", file.name, e);
                        summary.rows_rejected += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let timestamp = match self.normalizer.normalize(&row.date, &row.time) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("{} line {}: {}", file.name, row.line, e);
                        summary.rows_rejected += 1;
                        continue;
                    }
                };

                if watermark.is_some_and(|w| timestamp <= w) {
                    summary.rows_skipped += 1;
                    continue;
                }

                let local_date = self.normalizer.local_date(timestamp);
                match self
                    .reconciler
                    .reconcile(area, &row, timestamp, local_date, session, &target_dir)
                    .await
                {
                    Ok(outcome) => {
                        debug!("{} line {}: {:?}", file.name, row.line, outcome);
                        summary.rows_committed += 1;
                    }
                    Err(e @ Error::MalformedRow(_)) => {
                        warn!("{}: {}", file.name, e);
                        summary.rows_rejected += 1;
                        continue;
                    }
                    // The session is no longer where the listing was taken
                    Err(e @ Error::Connection(_)) => return Err(e),
                    Err(e) => {
                        error!("{} line {}: failed to reconcile {}: {}", file.name, row.line, row.plate_number, e);
                        summary.rows_failed += 1;
                    }
                }

                latest_seen = latest_seen.max(Some(timestamp));
            }
        }

        Ok(latest_seen)
    }
}

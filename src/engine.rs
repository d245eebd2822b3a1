use crate::assets::AssetStore;
use crate::config::Config;
use crate::db::ParkingStore;
use crate::error::Result;
use crate::ingest::{
    DatetimeNormalizer, PassSummary, Reconciler, RecordParser, RemoteConnector, SyncEngine,
};
use crate::monitor::{LongStayMonitor, SweepSummary};
use log::{error, info};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of ingesting a set of areas
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct IngestionSummary {
    /// Every listed area was reached and every pass succeeded
    pub success: bool,
    /// Why the area set could not be determined
    pub error: Option<String>,
    pub passes: Vec<PassSummary>,
}

impl IngestionSummary {
    pub fn successful_areas(&self) -> usize {
        self.passes.iter().filter(|s| s.success).count()
    }
}

/// Entry points of the ingestion and occupancy engine
pub struct ParkingEngine {
    store: Arc<dyn ParkingStore>,
    sync: SyncEngine,
    monitor: LongStayMonitor,
}

impl ParkingEngine {
    /// `assets` is only used when image resolution is enabled in `config`
    pub fn new(
        store: Arc<dyn ParkingStore>,
        connector: Arc<dyn RemoteConnector>,
        assets: Option<Arc<dyn AssetStore>>,
        config: &Config,
    ) -> Result<Self> {
        let parser = RecordParser::new(config.ingest.delimiter, config.ingest.row_defaults.clone())?;
        let normalizer = DatetimeNormalizer::new(config.ingest.utc_offset_minutes)?;

        let mut reconciler =
            Reconciler::new(store.clone(), config.monitor.capacity_warning_percent);
        if config.ingest.resolve_images {
            if let Some(assets) = assets {
                reconciler = reconciler.with_assets(assets);
            }
        }

        Ok(Self {
            sync: SyncEngine::new(store.clone(), connector, parser, normalizer, reconciler),
            monitor: LongStayMonitor::from_config(store.clone(), &config.monitor)?,
            store,
        })
    }

    pub fn store(&self) -> Arc<dyn ParkingStore> {
        self.store.clone()
    }

    /// One ingestion pass for one area. Never fails; errors land in the summary.
    pub async fn run_ingestion(&self, area_id: Uuid) -> PassSummary {
        self.sync.run_pass(area_id).await
    }

    /// Sequential passes over `area_ids`, or over every active area when empty.
    /// Never fails; a store that cannot list areas yields a failed summary.
    pub async fn run_ingestion_all(&self, area_ids: &[Uuid]) -> IngestionSummary {
        let area_ids: Vec<Uuid> = if area_ids.is_empty() {
            match self.store.list_active_areas().await {
                Ok(areas) => areas
                    .into_iter()
                    .filter(|a| a.remote.is_some())
                    .map(|a| a.id)
                    .collect(),
                Err(e) => {
                    error!("Failed to list active areas: {}", e);
                    return IngestionSummary {
                        success: false,
                        error: Some(e.to_string()),
                        passes: Vec::new(),
                    };
                }
            }
        } else {
            area_ids.to_vec()
        };

        if area_ids.is_empty() {
            info!("No areas to ingest");
            return IngestionSummary {
                success: true,
                ..IngestionSummary::default()
            };
        }

        info!("Starting ingestion for {} areas", area_ids.len());
        let mut passes = Vec::with_capacity(area_ids.len());
        for area_id in &area_ids {
            passes.push(self.run_ingestion(*area_id).await);
        }

        let summary = IngestionSummary {
            success: passes.iter().all(|s| s.success),
            error: None,
            passes,
        };
        let (successful, total) = (summary.successful_areas(), summary.passes.len());
        if summary.success {
            info!("Ingestion completed: {}/{} areas successful", successful, total);
        } else {
            error!("Ingestion completed: {}/{} areas successful", successful, total);
        }

        summary
    }

    /// Never fails; errors land in the summary.
    pub async fn run_long_stay_sweep(&self) -> SweepSummary {
        self.monitor.sweep().await
    }

    /// Reset an area's live counter to its presence count
    pub async fn recount_occupancy(&self, area_id: Uuid) -> Result<i32> {
        let count = self.store.recount_occupancy(&area_id).await?;
        info!("Area {} occupancy recounted to {}", area_id, count);
        Ok(count)
    }
}

//! One-shot ingestion pass. Area ids may be given as arguments; without
//! them the configured areas, or every active area, are processed.
//!
//! ```text
//! trigger_ingestion [AREA_ID...]
//! ```

use anyhow::{Context, Result};
use log::info;
use parkwatch::assets::{AssetStore, LocalAssetStore};
use parkwatch::config;
use parkwatch::db::DatabaseService;
use parkwatch::ingest::FtpConnector;
use parkwatch::ParkingEngine;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_from_env()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    let mut area_ids = std::env::args()
        .skip(1)
        .map(|arg| Uuid::parse_str(&arg).with_context(|| format!("Invalid area id: {}", arg)))
        .collect::<Result<Vec<Uuid>>>()?;
    if area_ids.is_empty() {
        area_ids = config.ingest.area_ids.clone();
    }

    let database = DatabaseService::new(&config.database).await?;
    let connector = FtpConnector::new(
        Duration::from_secs(config.ingest.connect_timeout_secs),
        Duration::from_secs(config.ingest.io_timeout_secs),
    );
    let assets: Option<Arc<dyn AssetStore>> = config
        .ingest
        .resolve_images
        .then(|| Arc::new(LocalAssetStore::new(config.assets.root.clone())) as Arc<dyn AssetStore>);
    let engine = ParkingEngine::new(Arc::new(database.store()), Arc::new(connector), assets, &config)?;

    info!("Manual ingestion triggered");
    let summary = engine.run_ingestion_all(&area_ids).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !summary.success {
        std::process::exit(2);
    }
    Ok(())
}

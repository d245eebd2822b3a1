use anyhow::{Context, Result};
use log::{error, info};
use parkwatch::assets::{AssetStore, LocalAssetStore};
use parkwatch::config;
use parkwatch::db::{DatabaseService, ParkingStore};
use parkwatch::ingest::{FtpConnector, RemoteConnector};
use parkwatch::{ParkingEngine, Scheduler};
use std::sync::Arc;
use std::time::Duration;

async fn run_app() -> Result<()> {
    let config = config::load_from_env()?;

    // RUST_LOG still wins over the configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();
    info!("Starting parkwatch ingestion service");
    info!("Configuration loaded");

    let database = DatabaseService::new(&config.database)
        .await
        .context("Failed to initialise database")?;
    let store: Arc<dyn ParkingStore> = Arc::new(database.store());

    let connector: Arc<dyn RemoteConnector> = Arc::new(FtpConnector::new(
        Duration::from_secs(config.ingest.connect_timeout_secs),
        Duration::from_secs(config.ingest.io_timeout_secs),
    ));

    let assets: Option<Arc<dyn AssetStore>> = if config.ingest.resolve_images {
        tokio::fs::create_dir_all(&config.assets.root)
            .await
            .with_context(|| format!("Failed to create {}", config.assets.root.display()))?;
        info!("Storing camera images under {}", config.assets.root.display());
        Some(Arc::new(LocalAssetStore::new(config.assets.root.clone())))
    } else {
        None
    };

    let engine = Arc::new(ParkingEngine::new(store, connector, assets, &config)?);
    let scheduler = Arc::new(Scheduler::new(engine, &config));

    scheduler.clone().start().await?;
    info!("Scheduler started");

    // Wait for termination signals
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    scheduler.stop().await;
    info!("Scheduler stopped");

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_app()) {
        error!("Application error: {:#}", e);
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}

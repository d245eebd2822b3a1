pub mod assets;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod monitor;
pub mod scheduler;

// Re-export main components for easier use
pub use engine::{IngestionSummary, ParkingEngine};
pub use error::{Error, Result};
pub use ingest::PassSummary;
pub use monitor::SweepSummary;
pub use scheduler::{Scheduler, SchedulerStatus};

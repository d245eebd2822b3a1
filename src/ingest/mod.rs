//! Incremental ingestion of camera CSV files into the event log and the
//! presence table.

pub mod datetime;
pub mod ftp;
pub mod parser;
pub mod reconciler;
pub mod remote;
pub mod sync;

#[cfg(test)]
mod tests;

pub use datetime::DatetimeNormalizer;
pub use ftp::FtpConnector;
pub use parser::{CameraRow, RecordParser};
pub use reconciler::{Reconciler, RowOutcome};
pub use remote::{MemoryRemote, RemoteConnector, RemoteFile, RemoteSession};
pub use sync::{PassSummary, SyncEngine};

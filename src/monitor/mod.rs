pub mod long_stay;

pub use long_stay::{format_duration, LongStayMonitor, SweepSummary};

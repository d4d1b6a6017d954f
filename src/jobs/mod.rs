//! Background jobs

pub mod discovery;

pub use discovery::{DiscoveryConfig, DiscoveryJob, ScanSummary};

pub mod blob_store;
pub mod database;
pub mod virustotal;
pub mod scan_orchestrator;

pub use blob_store::{BlobStore, FsBlobStore};
pub use database::{Database, SkillStore};
pub use virustotal::{ScanGateway, VirusTotalClient};
pub use scan_orchestrator::ScanOrchestrator;

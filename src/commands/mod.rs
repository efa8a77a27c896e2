pub mod scan;

use crate::config::ScanConfig;
use crate::services::{Database, FsBlobStore, ScanGateway, ScanOrchestrator, VirusTotalClient};
use anyhow::Result;
use std::sync::Arc;

pub use scan::{fetch_results, poll_pending_scans, scan_with_virustotal};

/// 应用状态
pub struct AppState {
    pub db: Arc<Database>,
    pub orchestrator: Arc<ScanOrchestrator>,
}

impl AppState {
    pub fn from_config(config: &ScanConfig) -> Result<Self> {
        let db = Arc::new(Database::new(config.database_path.clone())?);
        let blobs = Arc::new(FsBlobStore::new(&config.blob_dir)?);

        // 缺少凭据时流水线整体停用，但应用照常启动
        let gateway: Option<Arc<dyn ScanGateway>> = match VirusTotalClient::from_config(config) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn ScanGateway>),
            Err(e) => {
                log::warn!("{}, VirusTotal scans are disabled", e);
                None
            }
        };

        let orchestrator = ScanOrchestrator::new(db.clone(), blobs, gateway, config);

        Ok(Self {
            db,
            orchestrator: Arc::new(orchestrator),
        })
    }
}

use crate::commands::AppState;
use crate::models::{PollSummary, ScanReport, SubmissionOutcome};

/// 新版本发布后提交扫描
pub async fn scan_with_virustotal(
    state: &AppState,
    version_id: &str,
) -> Result<SubmissionOutcome, String> {
    state.orchestrator
        .scan_version(version_id)
        .await
        .map_err(|e| e.to_string())
}

/// 定时轮询待扫描版本
pub async fn poll_pending_scans(
    state: &AppState,
    batch_size: Option<usize>,
) -> Result<PollSummary, String> {
    state.orchestrator
        .poll_pending(batch_size)
        .await
        .map_err(|e| e.to_string())
}

/// 查询某个摘要的扫描结果，只读
pub async fn fetch_results(
    state: &AppState,
    sha256hash: Option<String>,
) -> Result<ScanReport, String> {
    Ok(state.orchestrator.fetch_results(sha256hash.as_deref()).await)
}

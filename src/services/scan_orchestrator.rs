use crate::config::ScanConfig;
use crate::error::{GatewayError, ScanError, ScanResult};
use crate::models::{
    PendingScan, PollSummary, ReportMetadata, ScanReport, SubmissionOutcome, Verdict, VerdictSource,
    SCANNER_VIRUSTOTAL,
};
use crate::security::{classify, AiVerdict, ContentHasher, QueueHealthMonitor};
use crate::services::{BlobStore, ScanGateway, SkillStore};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 单个待扫描项本轮的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    MissingDigest,
    NotFound,
    RescanRequested,
    RescanDeclined,
    Inconclusive,
    Updated(Verdict),
}

/// 扫描编排：决定提交、轮询、重新分析或定案
///
/// 每次调用都是独立的工作单元，持久状态全部在 [`SkillStore`] 中。
pub struct ScanOrchestrator {
    store: Arc<dyn SkillStore>,
    blobs: Arc<dyn BlobStore>,
    gateway: Option<Arc<dyn ScanGateway>>,
    health: QueueHealthMonitor,
    call_timeout: Duration,
    batch_size: usize,
    gui_base: String,
}

impl ScanOrchestrator {
    /// `gateway` 为 `None` 表示未配置凭据，所有入口直接返回
    pub fn new(
        store: Arc<dyn SkillStore>,
        blobs: Arc<dyn BlobStore>,
        gateway: Option<Arc<dyn ScanGateway>>,
        config: &ScanConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            gateway,
            health: QueueHealthMonitor::from_config(config),
            call_timeout: config.request_timeout(),
            batch_size: config.batch_size,
            gui_base: config.gui_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.gateway.is_some()
    }

    /// 对外部调用施加超时，超时视为临时错误
    async fn call<T, F>(&self, fut: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Transient(format!(
                "scan service call exceeded {:?}",
                self.call_timeout
            ))),
        }
    }

    fn finalize(&self, digest: &str, verdict: Verdict) -> ScanResult<usize> {
        let updated = self.store.apply_verdict(
            digest,
            SCANNER_VIRUSTOTAL,
            verdict,
            verdict.moderation(),
        )?;
        log::info!(
            "Applied verdict {} to {} version(s) with hash {}",
            verdict.as_str(),
            updated,
            digest
        );
        Ok(updated)
    }

    /// 新版本的首次提交
    pub async fn scan_version(&self, version_id: &str) -> ScanResult<SubmissionOutcome> {
        let gateway = match &self.gateway {
            Some(gateway) => Arc::clone(gateway),
            None => {
                log::info!("VT_API_KEY not configured, skipping scan of version {}", version_id);
                return Ok(SubmissionOutcome::Unconfigured);
            }
        };

        let version = self.store
            .get_version(version_id)?
            .ok_or_else(|| ScanError::VersionNotFound(version_id.to_string()))?;
        let skill = self.store
            .get_skill(&version.skill_id)?
            .ok_or_else(|| ScanError::SkillNotFound(version.skill_id.clone()))?;

        let content = ContentHasher::new(self.blobs.as_ref()).digest(
            &version.id,
            &version.files,
            &version.archive_metadata(&skill),
        )?;
        let digest = content.sha256.clone();

        if let Some(recorded) = version.sha256hash.as_deref() {
            if recorded != digest {
                return Err(ScanError::DigestConflict {
                    version_id: version.id.clone(),
                    recorded: recorded.to_string(),
                    computed: digest,
                });
            }
        }
        self.store.record_digest(&version.id, &digest)?;

        let existing = self.call(gateway.lookup(&digest)).await;
        match existing {
            Ok(Some(report)) if report.has_ai_analysis() => {
                let verdict = classify(&report.signal());
                log::info!(
                    "Version {} found in VT with AI analysis. Hash: {}. Verdict: {}",
                    version_id,
                    digest,
                    verdict.as_str()
                );
                if verdict == Verdict::Pending {
                    return Ok(SubmissionOutcome::Deferred {
                        digest,
                        reason: "unrecognized AI verdict".to_string(),
                    });
                }
                self.finalize(&digest, verdict)?;
                return Ok(SubmissionOutcome::Finalized { digest, verdict });
            }
            Ok(Some(_)) => {
                log::info!(
                    "Version {} found in VT without AI analysis. Hash: {}. Requesting rescan",
                    version_id,
                    digest
                );
                let rescan = self.call(gateway.request_rescan(&digest)).await;
                match rescan {
                    Ok(true) => return Ok(SubmissionOutcome::RescanRequested { digest }),
                    Ok(false) => {
                        log::info!("Rescan declined for {}, uploading archive instead", digest);
                    }
                    Err(e) if e.is_configuration() => {
                        log::error!("Scan of version {} aborted: {}", version_id, e);
                        return Ok(SubmissionOutcome::Unconfigured);
                    }
                    Err(e) => {
                        log::warn!("Rescan request for {} failed: {}. Uploading archive", digest, e);
                    }
                }
            }
            Ok(None) => {
                log::info!("Version {} not found in VT. Hash: {}. Uploading", version_id, digest);
            }
            Err(e) if e.is_configuration() => {
                log::error!("Scan of version {} aborted: {}", version_id, e);
                return Ok(SubmissionOutcome::Unconfigured);
            }
            Err(e) => {
                // 轮询不会上传，查询失败也要尝试上传，否则版本会一直挂起
                log::warn!("Error checking existing file {} in VT: {}. Uploading", digest, e);
            }
        }

        match self.call(gateway.submit(content.archive)).await {
            Ok(analysis_id) => {
                log::info!(
                    "Uploaded version {} to VT. Hash: {}. Analysis ID: {}",
                    version_id,
                    digest,
                    analysis_id
                );
                Ok(SubmissionOutcome::Submitted { digest, analysis_id })
            }
            Err(e) if e.is_configuration() => {
                log::error!("Upload of version {} aborted: {}", version_id, e);
                Ok(SubmissionOutcome::Unconfigured)
            }
            Err(e) => {
                log::error!("Failed to upload version {} to VT: {}", version_id, e);
                Ok(SubmissionOutcome::Deferred {
                    digest,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// 轮询一批待扫描版本
    pub async fn poll_pending(&self, batch_size: Option<usize>) -> ScanResult<PollSummary> {
        let gateway = match &self.gateway {
            Some(gateway) => Arc::clone(gateway),
            None => {
                log::info!("VT_API_KEY not configured, skipping poll");
                return Ok(PollSummary::unconfigured());
            }
        };

        let now = Utc::now();
        let stats = self.store.pending_stats(self.health.stale_cutoff(now))?;
        let health = self.health.evaluate(&stats, now);
        if !health.healthy {
            log::warn!(
                "Scan queue unhealthy: {} pending, {} stale, oldest {}m",
                health.queue_size,
                health.very_stale_count,
                health.oldest_age_minutes
            );
        }

        let mut summary = PollSummary {
            healthy: health.healthy,
            queue_size: health.queue_size,
            configured: true,
            ..PollSummary::default()
        };

        let pending = self.store.pending_queue(batch_size.unwrap_or(self.batch_size))?;
        if pending.is_empty() {
            return Ok(summary);
        }

        log::info!(
            "Checking {} pending versions (queue: {})",
            pending.len(),
            health.queue_size
        );

        for item in &pending {
            summary.processed += 1;

            match self.poll_item(gateway.as_ref(), item).await {
                Ok(PollOutcome::MissingDigest) => summary.missing_digest += 1,
                Ok(PollOutcome::NotFound) => summary.not_found += 1,
                Ok(PollOutcome::RescanRequested) => summary.rescans_requested += 1,
                Ok(PollOutcome::RescanDeclined) => summary.rescans_declined += 1,
                Ok(PollOutcome::Inconclusive) => summary.inconclusive += 1,
                Ok(PollOutcome::Updated(_)) => summary.updated += 1,
                Err(ScanError::Gateway(e)) if e.is_configuration() => {
                    log::error!("Stopping poll: {}", e);
                    summary.configured = false;
                    break;
                }
                Err(e) => {
                    summary.errors += 1;
                    log::error!(
                        "Error checking version {} ({:?}): {}",
                        item.version_id,
                        item.sha256hash,
                        e
                    );
                }
            }
        }

        log::info!(
            "Processed {}, updated {}, rescans {}, errors {}",
            summary.processed,
            summary.updated,
            summary.rescans_requested,
            summary.errors
        );
        Ok(summary)
    }

    async fn poll_item(&self, gateway: &dyn ScanGateway, item: &PendingScan) -> ScanResult<PollOutcome> {
        let Some(digest) = item.sha256hash.as_deref() else {
            log::warn!(
                "Skill {} version {} is pending without a hash, skipping",
                item.skill_id,
                item.version_id
            );
            return Ok(PollOutcome::MissingDigest);
        };

        let report = match self.call(gateway.lookup(digest)).await? {
            Some(report) => report,
            None => {
                log::debug!("Hash {} not found in VT yet", digest);
                return Ok(PollOutcome::NotFound);
            }
        };

        if !report.has_ai_analysis() {
            log::info!("Hash {} has no Code Insight, requesting rescan", digest);
            let accepted = self.call(gateway.request_rescan(digest)).await?;
            return Ok(if accepted {
                PollOutcome::RescanRequested
            } else {
                PollOutcome::RescanDeclined
            });
        }

        let verdict = classify(&report.signal());
        if verdict == Verdict::Pending {
            log::info!("Hash {} has an unrecognized AI verdict, leaving pending", digest);
            return Ok(PollOutcome::Inconclusive);
        }

        self.finalize(digest, verdict)?;
        Ok(PollOutcome::Updated(verdict))
    }

    /// 只读查询某个摘要的扫描结果
    pub async fn fetch_results(&self, digest: Option<&str>) -> ScanReport {
        let Some(digest) = digest.map(str::trim).filter(|d| !d.is_empty()) else {
            return ScanReport::not_found();
        };

        let Some(gateway) = &self.gateway else {
            return ScanReport::error(Some("VT_API_KEY not configured".to_string()));
        };

        let report = match self.call(gateway.lookup(digest)).await {
            Ok(Some(report)) => report,
            Ok(None) => return ScanReport::not_found(),
            Err(e) => {
                log::error!("Error fetching VT results for {}: {}", digest, e);
                return ScanReport::error(Some(e.to_string()));
            }
        };

        // 只要 Code Insight 给出了非空结论就以它为准，空白结论按未定处理
        let ai = report.code_insight();
        let raw_verdict = ai.map(|r| r.verdict.as_str()).filter(|v| !v.is_empty());
        let (verdict, source) = match raw_verdict {
            Some(raw) => (AiVerdict::parse(raw).verdict(), VerdictSource::CodeInsight),
            None => (classify(&report.signal()), VerdictSource::Engines),
        };

        ScanReport {
            status: verdict.into(),
            source: Some(source),
            url: Some(format!("{}/{}", self.gui_base, digest)),
            metadata: Some(ReportMetadata {
                ai_verdict: raw_verdict.map(str::to_string),
                ai_analysis: ai.and_then(|r| r.analysis.clone()),
                ai_source: ai.and_then(|r| r.source.clone()),
                stats: report.stats,
            }),
            message: None,
        }
    }
}

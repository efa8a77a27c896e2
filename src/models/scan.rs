use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// 扫描器标识，写入版本记录
pub const SCANNER_VIRUSTOTAL: &str = "vt";

/// AI 分析结果的类别（VirusTotal Code Insight）
pub const CODE_INSIGHT_CATEGORY: &str = "code_insight";

/// 版本的扫描状态
///
/// `Unscanned` 只会经由 [`ScanStatus::submitted`] 进入 `Pending`，
/// 终态只会经由 [`ScanStatus::apply`] 产生，任何路径都无法回到 `Pending`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Unscanned,
    Pending,
    Clean,
    Malicious,
    Suspicious,
}

impl ScanStatus {
    /// 首次提交扫描
    pub fn submitted(self) -> ScanStatus {
        match self {
            ScanStatus::Unscanned => ScanStatus::Pending,
            other => other,
        }
    }

    /// 应用一次分类结果；不确定的结论保持原状态
    pub fn apply(self, verdict: Verdict) -> ScanStatus {
        verdict.resolved().unwrap_or(self)
    }

    /// 数据库中的表示，未扫描为 NULL
    pub fn as_db_str(&self) -> Option<&'static str> {
        match self {
            ScanStatus::Unscanned => None,
            ScanStatus::Pending => Some("pending"),
            ScanStatus::Clean => Some("clean"),
            ScanStatus::Malicious => Some("malicious"),
            ScanStatus::Suspicious => Some("suspicious"),
        }
    }

    pub fn from_db_str(value: Option<&str>) -> ScanStatus {
        match value {
            None => ScanStatus::Unscanned,
            Some("clean") => ScanStatus::Clean,
            Some("malicious") => ScanStatus::Malicious,
            Some("suspicious") => ScanStatus::Suspicious,
            Some(_) => ScanStatus::Pending,
        }
    }
}

/// 分类器输出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Clean,
    Malicious,
    Suspicious,
    Pending,
}

impl Verdict {
    /// 对应的终态；`Pending` 表示尚无结论
    pub fn resolved(self) -> Option<ScanStatus> {
        match self {
            Verdict::Clean => Some(ScanStatus::Clean),
            Verdict::Malicious => Some(ScanStatus::Malicious),
            Verdict::Suspicious => Some(ScanStatus::Suspicious),
            Verdict::Pending => None,
        }
    }

    /// 市场可见性：干净则上架，恶意/可疑则隐藏
    pub fn moderation(self) -> Option<ModerationStatus> {
        match self {
            Verdict::Clean => Some(ModerationStatus::Active),
            Verdict::Malicious | Verdict::Suspicious => Some(ModerationStatus::Hidden),
            Verdict::Pending => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Clean => "clean",
            Verdict::Malicious => "malicious",
            Verdict::Suspicious => "suspicious",
            Verdict::Pending => "pending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    Active,
    Hidden,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Active => "active",
            ModerationStatus::Hidden => "hidden",
        }
    }

    pub fn parse(value: &str) -> Option<ModerationStatus> {
        match value {
            "active" => Some(ModerationStatus::Active),
            "hidden" => Some(ModerationStatus::Hidden),
            _ => None,
        }
    }
}

/// 引擎聚合计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStats {
    #[serde(default)]
    pub malicious: u32,
    #[serde(default)]
    pub suspicious: u32,
    #[serde(default)]
    pub undetected: u32,
    #[serde(default)]
    pub harmless: u32,
}

/// 众包 AI 分析结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiResult {
    pub category: String,
    #[serde(default)]
    pub verdict: String,
    pub analysis: Option<String>,
    pub source: Option<String>,
}

/// 扫描服务对某个摘要的记录
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileReport {
    pub sha256: String,
    pub ai_results: Vec<AiResult>,
    pub stats: Option<AnalysisStats>,
}

impl FileReport {
    pub fn code_insight(&self) -> Option<&AiResult> {
        self.ai_results
            .iter()
            .find(|r| r.category == CODE_INSIGHT_CATEGORY)
    }

    /// 非空的 AI 结论
    pub fn ai_verdict(&self) -> Option<&str> {
        self.code_insight()
            .map(|r| r.verdict.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    pub fn has_ai_analysis(&self) -> bool {
        self.ai_verdict().is_some()
    }

    pub fn signal(&self) -> VerdictSignal<'_> {
        VerdictSignal {
            ai_verdict: self.ai_verdict(),
            stats: self.stats,
        }
    }
}

/// 分类器输入
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerdictSignal<'a> {
    pub ai_verdict: Option<&'a str>,
    pub stats: Option<AnalysisStats>,
}

/// 待轮询的版本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingScan {
    pub skill_id: String,
    pub version_id: String,
    pub sha256hash: Option<String>,
}

/// 待扫描队列的原始统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingStats {
    pub queue_size: u64,
    pub very_stale_count: u64,
    pub oldest_created_at: Option<DateTime<Utc>>,
}

/// 队列健康快照，按需计算，不落库
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueHealth {
    pub queue_size: u64,
    pub very_stale_count: u64,
    pub oldest_age_minutes: i64,
    pub healthy: bool,
}

/// 首次提交的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// 未配置凭据，未发起任何调用
    Unconfigured,
    /// 服务已有 AI 结论，直接定案
    Finalized { digest: String, verdict: Verdict },
    /// 服务已有该内容但缺少 AI 分析，已请求重新分析
    RescanRequested { digest: String },
    /// 已上传归档
    Submitted { digest: String, analysis_id: String },
    /// 调用失败，版本保持 pending，等待轮询
    Deferred { digest: String, reason: String },
}

/// 一轮轮询的统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSummary {
    pub processed: usize,
    pub updated: usize,
    pub healthy: bool,
    pub queue_size: u64,
    pub configured: bool,
    pub not_found: usize,
    pub rescans_requested: usize,
    pub rescans_declined: usize,
    pub inconclusive: usize,
    pub missing_digest: usize,
    pub errors: usize,
}

impl PollSummary {
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    NotFound,
    Error,
    Pending,
    Clean,
    Malicious,
    Suspicious,
}

impl From<Verdict> for ReportStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Clean => ReportStatus::Clean,
            Verdict::Malicious => ReportStatus::Malicious,
            Verdict::Suspicious => ReportStatus::Suspicious,
            Verdict::Pending => ReportStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    CodeInsight,
    Engines,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub ai_verdict: Option<String>,
    pub ai_analysis: Option<String>,
    pub ai_source: Option<String>,
    pub stats: Option<AnalysisStats>,
}

/// 面向界面的只读查询结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub status: ReportStatus,
    pub source: Option<VerdictSource>,
    pub url: Option<String>,
    pub metadata: Option<ReportMetadata>,
    pub message: Option<String>,
}

impl ScanReport {
    pub fn not_found() -> Self {
        Self::bare(ReportStatus::NotFound, None)
    }

    pub fn error(message: Option<String>) -> Self {
        Self::bare(ReportStatus::Error, message)
    }

    fn bare(status: ReportStatus, message: Option<String>) -> Self {
        Self {
            status,
            source: None,
            url: None,
            metadata: None,
            message,
        }
    }
}

use thiserror::Error;

/// 扫描服务调用错误
#[derive(Debug, Error)]
pub enum GatewayError {
    /// 凭据缺失或被拒绝，整条流水线本轮不可用
    #[error("scan service is not configured: {0}")]
    Configuration(String),

    /// 网络错误、超时、5xx、限流，下一轮再试
    #[error("transient scan service failure: {0}")]
    Transient(String),

    /// 非 404 的非 2xx 响应或无法解析的响应体
    #[error("scan service returned {status}: {body}")]
    Protocol { status: u16, body: String },
}

impl GatewayError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, GatewayError::Configuration(_))
    }
}

/// 扫描流水线错误
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("version {0} not found")]
    VersionNotFound(String),

    #[error("skill {0} not found")]
    SkillNotFound(String),

    #[error("version {0} has no files to scan")]
    EmptyVersion(String),

    #[error("content unavailable for {path} ({storage_id})")]
    ContentUnavailable { path: String, storage_id: String },

    #[error("version {version_id} already has digest {recorded}, refusing to record {computed}")]
    DigestConflict {
        version_id: String,
        recorded: String,
        computed: String,
    },

    #[error("failed to build archive: {0}")]
    Archive(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;

use crate::config::ScanConfig;
use crate::error::GatewayError;
use crate::models::{AiResult, AnalysisStats, FileReport};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// 外部扫描服务
///
/// 只做一次调用，不在内部重试；跨时间的重试来自下一轮轮询。
#[async_trait]
pub trait ScanGateway: Send + Sync {
    /// 按摘要查询；服务尚未收录时返回 `Ok(None)`
    async fn lookup(&self, digest: &str) -> Result<Option<FileReport>, GatewayError>;

    /// 上传归档，返回分析 ID
    async fn submit(&self, archive: Vec<u8>) -> Result<String, GatewayError>;

    /// 请求重新分析；被拒绝时返回 `Ok(false)`，只有凭据问题才返回错误
    async fn request_rescan(&self, digest: &str) -> Result<bool, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct VtFileResponse {
    data: VtFileData,
}

#[derive(Debug, Deserialize)]
struct VtFileData {
    attributes: VtFileAttributes,
}

#[derive(Debug, Deserialize)]
struct VtFileAttributes {
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    crowdsourced_ai_results: Vec<AiResult>,
    last_analysis_stats: Option<AnalysisStats>,
}

#[derive(Debug, Deserialize)]
struct VtUploadResponse {
    data: VtUploadData,
}

#[derive(Debug, Deserialize)]
struct VtUploadData {
    id: String,
}

/// VirusTotal v3 API 客户端
pub struct VirusTotalClient {
    client: Client,
    api_base: String,
    api_key: String,
}

impl VirusTotalClient {
    pub fn new(api_key: String, api_base: String, timeout: Duration) -> Result<Self, GatewayError> {
        if api_key.trim().is_empty() {
            return Err(GatewayError::Configuration("VT_API_KEY not configured".to_string()));
        }

        let client = Client::builder()
            .user_agent("skill-scan-guard/0.1.0")
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
        })
    }

    pub fn from_config(config: &ScanConfig) -> Result<Self, GatewayError> {
        let api_key = config
            .credential()
            .ok_or_else(|| GatewayError::Configuration("VT_API_KEY not configured".to_string()))?;

        Self::new(api_key.to_string(), config.api_base.clone(), config.request_timeout())
    }
}

#[async_trait]
impl ScanGateway for VirusTotalClient {
    async fn lookup(&self, digest: &str) -> Result<Option<FileReport>, GatewayError> {
        let url = format!("{}/files/{}", self.api_base, digest);

        let response = self.client
            .get(&url)
            .header("x-apikey", &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(failure_from_status(status, body));
        }

        parse_file_report(digest, &body).map(Some)
    }

    async fn submit(&self, archive: Vec<u8>) -> Result<String, GatewayError> {
        let url = format!("{}/files", self.api_base);

        let part = Part::bytes(archive)
            .file_name("skill.zip")
            .mime_str("application/zip")
            .map_err(|e| GatewayError::Protocol { status: 0, body: e.to_string() })?;
        let form = Form::new().part("file", part);

        let response = self.client
            .post(&url)
            .header("x-apikey", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(failure_from_status(status, body));
        }

        let upload: VtUploadResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Protocol {
                status: status.as_u16(),
                body: format!("unexpected upload response: {}", e),
            })?;

        Ok(upload.data.id)
    }

    async fn request_rescan(&self, digest: &str) -> Result<bool, GatewayError> {
        let url = format!("{}/files/{}/analyse", self.api_base, digest);

        let response = match self.client
            .post(&url)
            .header("x-apikey", &self.api_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Rescan request for {} failed: {}", digest, e);
                return Ok(false);
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }

        let body = response.text().await.unwrap_or_default();
        match failure_from_status(status, body) {
            err @ GatewayError::Configuration(_) => Err(err),
            err => {
                log::warn!("Rescan request for {} declined: {}", digest, err);
                Ok(false)
            }
        }
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Transient(format!("request timed out: {}", e))
    } else {
        GatewayError::Transient(e.to_string())
    }
}

/// 非 2xx、非 404 响应的分类
fn failure_from_status(status: StatusCode, body: String) -> GatewayError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GatewayError::Configuration(format!("credential rejected ({})", status))
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            GatewayError::Transient(format!("{}: {}", status, body))
        }
        s if s.is_server_error() => GatewayError::Transient(format!("{}: {}", s, body)),
        s => GatewayError::Protocol {
            status: s.as_u16(),
            body,
        },
    }
}

fn parse_file_report(digest: &str, body: &str) -> Result<FileReport, GatewayError> {
    let response: VtFileResponse = serde_json::from_str(body)
        .map_err(|e| GatewayError::Protocol {
            status: 200,
            body: format!("unexpected file report: {}", e),
        })?;

    let attributes = response.data.attributes;
    Ok(FileReport {
        sha256: attributes.sha256.unwrap_or_else(|| digest.to_string()),
        ai_results: attributes.crowdsourced_ai_results,
        stats: attributes.last_analysis_stats,
    })
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://www.virustotal.com/api/v3";
pub const DEFAULT_GUI_BASE: &str = "https://www.virustotal.com/gui/file";

/// 扫描流水线配置
///
/// 先读取可选的 YAML 文件（`SCAN_CONFIG`），再用环境变量覆盖。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub gui_base: String,
    pub request_timeout_secs: u64,
    pub batch_size: usize,
    pub poll_interval_secs: u64,
    pub stale_after_hours: u64,
    pub max_queue_size: u64,
    pub max_very_stale: u64,
    pub database_path: PathBuf,
    pub blob_dir: PathBuf,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            gui_base: DEFAULT_GUI_BASE.to_string(),
            request_timeout_secs: 30,
            batch_size: 10,
            poll_interval_secs: 300,
            stale_after_hours: 24,
            max_queue_size: 100,
            max_very_stale: 10,
            database_path: data_dir.join("skill-scans.db"),
            blob_dir: data_dir.join("blobs"),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("skill-scan-guard")
}

impl ScanConfig {
    /// 从环境加载：`SCAN_CONFIG` 指向的 YAML 文件（如有）+ 环境变量覆盖
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("SCAN_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ScanConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("VT_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(base) = lookup("VT_API_BASE") {
            self.api_base = base;
        }
        if let Some(value) = lookup("SCAN_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = value
                .trim()
                .parse()
                .context("SCAN_REQUEST_TIMEOUT_SECS must be an integer")?;
        }
        if let Some(value) = lookup("SCAN_BATCH_SIZE") {
            self.batch_size = value
                .trim()
                .parse()
                .context("SCAN_BATCH_SIZE must be an integer")?;
        }
        if let Some(value) = lookup("SCAN_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = value
                .trim()
                .parse()
                .context("SCAN_POLL_INTERVAL_SECS must be an integer")?;
        }
        if let Some(path) = lookup("SCAN_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("SCAN_BLOB_DIR") {
            self.blob_dir = PathBuf::from(path);
        }
        Ok(())
    }

    /// 去除空白后的凭据，空值视为未配置
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.stale_after_hours, 24);
        assert!(config.credential().is_none());
    }

    #[test]
    fn test_yaml_fills_missing_fields_with_defaults() {
        let config = ScanConfig::from_yaml("batch_size: 25\nmax_queue_size: 500\n").unwrap();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.max_queue_size, 500);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("VT_API_KEY", "secret"),
            ("SCAN_BATCH_SIZE", " 42 "),
            ("SCAN_DATABASE_PATH", "/tmp/scans.db"),
        ]
        .into_iter()
        .collect();

        let mut config = ScanConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.credential(), Some("secret"));
        assert_eq!(config.batch_size, 42);
        assert_eq!(config.database_path, PathBuf::from("/tmp/scans.db"));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let mut config = ScanConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "SCAN_BATCH_SIZE").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_blank_credential_is_unconfigured() {
        let config = ScanConfig {
            api_key: Some("   ".to_string()),
            ..ScanConfig::default()
        };
        assert!(config.credential().is_none());
    }
}

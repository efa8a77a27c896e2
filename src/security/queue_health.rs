use crate::config::ScanConfig;
use crate::models::{PendingStats, QueueHealth};
use chrono::{DateTime, Duration, Utc};

/// 待扫描队列健康度评估，只用于日志告警，不阻塞处理
#[derive(Debug, Clone)]
pub struct QueueHealthMonitor {
    stale_after: Duration,
    max_queue_size: u64,
    max_very_stale: u64,
}

impl QueueHealthMonitor {
    pub fn new(stale_after: Duration, max_queue_size: u64, max_very_stale: u64) -> Self {
        Self {
            stale_after,
            max_queue_size,
            max_very_stale,
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(
            Duration::hours(config.stale_after_hours as i64),
            config.max_queue_size,
            config.max_very_stale,
        )
    }

    /// 早于该时间创建的待扫描项视为严重滞留
    pub fn stale_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.stale_after
    }

    pub fn evaluate(&self, stats: &PendingStats, now: DateTime<Utc>) -> QueueHealth {
        let oldest_age_minutes = stats
            .oldest_created_at
            .map(|created| (now - created).num_minutes().max(0))
            .unwrap_or(0);

        let healthy = stats.queue_size <= self.max_queue_size
            && stats.very_stale_count <= self.max_very_stale;

        QueueHealth {
            queue_size: stats.queue_size,
            very_stale_count: stats.very_stale_count,
            oldest_age_minutes,
            healthy,
        }
    }
}

impl Default for QueueHealthMonitor {
    fn default() -> Self {
        Self::from_config(&ScanConfig::default())
    }
}

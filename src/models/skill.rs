use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use super::scan::{ModerationStatus, ScanStatus};

/// Skill 信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub owner_id: String,
    pub slug: String,
    pub display_name: Option<String>,
    pub moderation_status: Option<ModerationStatus>,
    pub created_at: DateTime<Utc>,
}

impl Skill {
    pub fn new(id: String, owner_id: String, slug: String) -> Self {
        Self {
            id,
            owner_id,
            slug,
            display_name: None,
            moderation_status: None,
            created_at: Utc::now(),
        }
    }
}

/// 版本中的单个文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillFile {
    pub path: String,
    pub storage_id: String,
    pub size: u64,
    pub sha256: String,
}

/// Skill 的一个不可变版本快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillVersion {
    pub id: String,
    pub skill_id: String,
    pub version: String,
    pub files: Vec<SkillFile>,
    pub sha256hash: Option<String>,
    pub scan_status: ScanStatus,
    pub scanner: Option<String>,
    pub scanned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SkillVersion {
    pub fn new(id: String, skill_id: String, version: String, files: Vec<SkillFile>) -> Self {
        Self {
            id,
            skill_id,
            version,
            files,
            sha256hash: None,
            scan_status: ScanStatus::Unscanned,
            scanner: None,
            scanned_at: None,
            created_at: Utc::now(),
        }
    }

    /// 生成归档元数据（仅包含这四个字段，保证摘要可复现）
    pub fn archive_metadata(&self, skill: &Skill) -> ArchiveMetadata {
        ArchiveMetadata {
            owner_id: skill.owner_id.clone(),
            slug: skill.slug.clone(),
            version: self.version.clone(),
            published_at: self.created_at.timestamp_millis(),
        }
    }
}

/// 写入归档 `_meta.json` 的元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMetadata {
    pub owner_id: String,
    pub slug: String,
    pub version: String,
    pub published_at: i64,
}

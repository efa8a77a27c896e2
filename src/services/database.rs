use crate::models::{
    ModerationStatus, PendingScan, PendingStats, ScanStatus, Skill, SkillFile, SkillVersion, Verdict,
};
use anyhow::{Result, Context};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params, OptionalExtension};
use std::path::PathBuf;
use std::sync::Mutex;

/// 扫描流水线依赖的存储接口
pub trait SkillStore: Send + Sync {
    fn get_version(&self, version_id: &str) -> Result<Option<SkillVersion>>;

    fn get_skill(&self, skill_id: &str) -> Result<Option<Skill>>;

    /// 记录内容摘要并把未扫描的版本置为 pending；已有不同摘要时报错
    fn record_digest(&self, version_id: &str, sha256hash: &str) -> Result<()>;

    /// 将结论写入所有共享该摘要的版本，返回受影响的版本数
    fn apply_verdict(
        &self,
        sha256hash: &str,
        scanner: &str,
        verdict: Verdict,
        moderation: Option<ModerationStatus>,
    ) -> Result<usize>;

    /// 取出一批待轮询的版本，最久未轮询的优先
    fn pending_queue(&self, limit: usize) -> Result<Vec<PendingScan>>;

    fn pending_stats(&self, stale_before: DateTime<Utc>) -> Result<PendingStats>;
}

fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| s.parse().ok())
}

/// 创建时间参与摘要计算，无法解析时直接报错
fn created_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    raw.parse::<DateTime<Utc>>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// 创建或打开数据库
    pub fn new(db_path: PathBuf) -> Result<Self> {
        // 确保父目录存在
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .context("Failed to open database")?;

        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// 初始化数据库架构
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS skills (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                slug TEXT NOT NULL,
                display_name TEXT,
                moderation_status TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS skill_versions (
                id TEXT PRIMARY KEY,
                skill_id TEXT NOT NULL,
                version TEXT NOT NULL,
                files TEXT NOT NULL,
                sha256hash TEXT,
                scan_status TEXT,
                scanner TEXT,
                scanned_at TEXT,
                created_at TEXT NOT NULL,
                last_polled_at TEXT,
                FOREIGN KEY(skill_id) REFERENCES skills(id)
            );

            CREATE INDEX IF NOT EXISTS idx_skill_versions_hash ON skill_versions(sha256hash);
            CREATE INDEX IF NOT EXISTS idx_skill_versions_scan_status ON skill_versions(scan_status);
            "#,
        )
        .context("Failed to initialize schema")?;

        Ok(())
    }

    /// 保存 skill
    pub fn save_skill(&self, skill: &Skill) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO skills
            (id, owner_id, slug, display_name, moderation_status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                slug = excluded.slug,
                display_name = excluded.display_name,
                moderation_status = excluded.moderation_status,
                created_at = excluded.created_at",
            params![
                skill.id,
                skill.owner_id,
                skill.slug,
                skill.display_name,
                skill.moderation_status.map(|m| m.as_str()),
                fmt_ts(&skill.created_at),
            ],
        )?;

        Ok(())
    }

    /// 保存版本
    pub fn save_version(&self, version: &SkillVersion) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let files_json = serde_json::to_string(&version.files)
            .context("Failed to serialize version files")?;

        conn.execute(
            "INSERT INTO skill_versions
            (id, skill_id, version, files, sha256hash, scan_status, scanner, scanned_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                skill_id = excluded.skill_id,
                version = excluded.version,
                files = excluded.files,
                sha256hash = excluded.sha256hash,
                scan_status = excluded.scan_status,
                scanner = excluded.scanner,
                scanned_at = excluded.scanned_at,
                created_at = excluded.created_at",
            params![
                version.id,
                version.skill_id,
                version.version,
                files_json,
                version.sha256hash,
                version.scan_status.as_db_str(),
                version.scanner,
                version.scanned_at.as_ref().map(fmt_ts),
                fmt_ts(&version.created_at),
            ],
        )?;

        Ok(())
    }
}

impl SkillStore for Database {
    fn get_version(&self, version_id: &str) -> Result<Option<SkillVersion>> {
        let conn = self.conn.lock().unwrap();

        let row = conn
            .query_row(
                "SELECT id, skill_id, version, files, sha256hash, scan_status, scanner, scanned_at, created_at
                 FROM skill_versions
                 WHERE id = ?1",
                params![version_id],
                |row| {
                    let files: String = row.get(3)?;
                    let version = SkillVersion {
                        id: row.get(0)?,
                        skill_id: row.get(1)?,
                        version: row.get(2)?,
                        files: Vec::new(),
                        sha256hash: row.get(4)?,
                        scan_status: ScanStatus::from_db_str(
                            row.get::<_, Option<String>>(5)?.as_deref(),
                        ),
                        scanner: row.get(6)?,
                        scanned_at: parse_ts(row.get(7)?),
                        created_at: created_at(row, 8)?,
                    };
                    Ok((version, files))
                },
            )
            .optional()?;

        match row {
            Some((mut version, files)) => {
                let files: Vec<SkillFile> = serde_json::from_str(&files)
                    .with_context(|| format!("Corrupt file list for version {}", version_id))?;
                version.files = files;
                Ok(Some(version))
            }
            None => Ok(None),
        }
    }

    fn get_skill(&self, skill_id: &str) -> Result<Option<Skill>> {
        let conn = self.conn.lock().unwrap();

        let skill = conn
            .query_row(
                "SELECT id, owner_id, slug, display_name, moderation_status, created_at
                 FROM skills
                 WHERE id = ?1",
                params![skill_id],
                |row| {
                    Ok(Skill {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        slug: row.get(2)?,
                        display_name: row.get(3)?,
                        moderation_status: row
                            .get::<_, Option<String>>(4)?
                            .and_then(|s| ModerationStatus::parse(&s)),
                        created_at: created_at(row, 5)?,
                    })
                },
            )
            .optional()?;

        Ok(skill)
    }

    fn record_digest(&self, version_id: &str, sha256hash: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let current = tx
            .query_row(
                "SELECT sha256hash, scan_status FROM skill_versions WHERE id = ?1",
                params![version_id],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;

        let (recorded, status) = match current {
            Some(current) => current,
            None => anyhow::bail!("Version {} does not exist", version_id),
        };

        if let Some(recorded) = recorded {
            if recorded != sha256hash {
                anyhow::bail!(
                    "Version {} already has digest {}, refusing {}",
                    version_id,
                    recorded,
                    sha256hash
                );
            }
        }

        let next = ScanStatus::from_db_str(status.as_deref()).submitted();
        tx.execute(
            "UPDATE skill_versions SET sha256hash = ?1, scan_status = ?2 WHERE id = ?3",
            params![sha256hash, next.as_db_str(), version_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn apply_verdict(
        &self,
        sha256hash: &str,
        scanner: &str,
        verdict: Verdict,
        moderation: Option<ModerationStatus>,
    ) -> Result<usize> {
        if verdict.resolved().is_none() {
            return Ok(0);
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let versions = {
            let mut stmt = tx.prepare(
                "SELECT id, scan_status FROM skill_versions WHERE sha256hash = ?1",
            )?;
            let rows = stmt.query_map(params![sha256hash], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let scanned_at = fmt_ts(&Utc::now());
        for (id, status) in &versions {
            let next = ScanStatus::from_db_str(status.as_deref()).apply(verdict);
            tx.execute(
                "UPDATE skill_versions
                 SET scan_status = ?1, scanner = ?2, scanned_at = ?3
                 WHERE id = ?4",
                params![next.as_db_str(), scanner, scanned_at, id],
            )?;
        }
        let updated = versions.len();

        if let Some(moderation) = moderation {
            tx.execute(
                "UPDATE skills
                 SET moderation_status = ?1
                 WHERE id IN (SELECT skill_id FROM skill_versions WHERE sha256hash = ?2)",
                params![moderation.as_str(), sha256hash],
            )?;
        }

        tx.commit()?;
        Ok(updated)
    }

    fn pending_queue(&self, limit: usize) -> Result<Vec<PendingScan>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let pending = {
            let mut stmt = tx.prepare(
                "SELECT id, skill_id, sha256hash
                 FROM skill_versions
                 WHERE scan_status = 'pending'
                 ORDER BY last_polled_at IS NOT NULL, last_polled_at ASC, created_at ASC
                 LIMIT ?1",
            )?;

            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok(PendingScan {
                    version_id: row.get(0)?,
                    skill_id: row.get(1)?,
                    sha256hash: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        // 轮转：被取出的项排到队尾，避免个别长期无结论的项饿死其他项
        let now = fmt_ts(&Utc::now());
        for item in &pending {
            tx.execute(
                "UPDATE skill_versions SET last_polled_at = ?1 WHERE id = ?2",
                params![now, item.version_id],
            )?;
        }

        tx.commit()?;
        Ok(pending)
    }

    fn pending_stats(&self, stale_before: DateTime<Utc>) -> Result<PendingStats> {
        let conn = self.conn.lock().unwrap();

        let (queue_size, very_stale_count, oldest) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN created_at < ?1 THEN 1 ELSE 0 END), 0),
                    MIN(created_at)
             FROM skill_versions
             WHERE scan_status = 'pending'",
            params![fmt_ts(&stale_before)],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )?;

        Ok(PendingStats {
            queue_size: queue_size.max(0) as u64,
            very_stale_count: very_stale_count.max(0) as u64,
            oldest_created_at: parse_ts(oldest),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn seed(db: &Database, version_id: &str, hash: Option<&str>, status: ScanStatus) -> SkillVersion {
        let skill_id = format!("skill-{}", version_id);
        db.save_skill(&Skill::new(skill_id.clone(), "u1".into(), format!("slug-{}", version_id)))
            .unwrap();

        let mut version = SkillVersion::new(
            version_id.to_string(),
            skill_id,
            "1.0.0".to_string(),
            vec![SkillFile {
                path: "SKILL.md".into(),
                storage_id: "abc".into(),
                size: 3,
                sha256: "abc".into(),
            }],
        );
        version.sha256hash = hash.map(str::to_string);
        version.scan_status = status;
        db.save_version(&version).unwrap();
        version
    }

    #[test]
    fn test_version_round_trip_on_disk() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("nested").join("scans.db")).unwrap();
        let saved = seed(&db, "v1", None, ScanStatus::Unscanned);

        let loaded = db.get_version("v1").unwrap().unwrap();
        assert_eq!(loaded.files, saved.files);
        assert_eq!(loaded.scan_status, ScanStatus::Unscanned);
        assert_eq!(loaded.created_at.timestamp_millis(), saved.created_at.timestamp_millis());

        assert!(db.get_version("missing").unwrap().is_none());
        assert!(db.get_skill("skill-v1").unwrap().is_some());
    }

    #[test]
    fn test_record_digest_is_idempotent_and_immutable() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "v1", None, ScanStatus::Unscanned);

        db.record_digest("v1", "d1").unwrap();
        db.record_digest("v1", "d1").unwrap();
        assert!(db.record_digest("v1", "d2").is_err());
        assert!(db.record_digest("missing", "d1").is_err());

        let version = db.get_version("v1").unwrap().unwrap();
        assert_eq!(version.sha256hash.as_deref(), Some("d1"));
        assert_eq!(version.scan_status, ScanStatus::Pending);
    }

    #[test]
    fn test_apply_verdict_updates_every_version_sharing_digest() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "v1", Some("shared"), ScanStatus::Pending);
        seed(&db, "v2", Some("shared"), ScanStatus::Pending);
        seed(&db, "v3", Some("other"), ScanStatus::Pending);

        let updated = db
            .apply_verdict("shared", "vt", Verdict::Malicious, Some(ModerationStatus::Hidden))
            .unwrap();
        assert_eq!(updated, 2);

        for id in ["v1", "v2"] {
            let version = db.get_version(id).unwrap().unwrap();
            assert_eq!(version.scan_status, ScanStatus::Malicious);
            assert_eq!(version.scanner.as_deref(), Some("vt"));
            assert!(version.scanned_at.is_some());

            let skill = db.get_skill(&version.skill_id).unwrap().unwrap();
            assert_eq!(skill.moderation_status, Some(ModerationStatus::Hidden));
        }

        let untouched = db.get_version("v3").unwrap().unwrap();
        assert_eq!(untouched.scan_status, ScanStatus::Pending);
        assert_eq!(db.get_skill("skill-v3").unwrap().unwrap().moderation_status, None);
    }

    #[test]
    fn test_pending_verdict_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "v1", Some("d"), ScanStatus::Pending);

        assert_eq!(db.apply_verdict("d", "vt", Verdict::Pending, None).unwrap(), 0);
        assert_eq!(db.get_version("v1").unwrap().unwrap().scan_status, ScanStatus::Pending);
    }

    #[test]
    fn test_pending_queue_rotates() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "v1", Some("d1"), ScanStatus::Pending);
        seed(&db, "v2", Some("d2"), ScanStatus::Pending);
        seed(&db, "v3", Some("d3"), ScanStatus::Pending);
        seed(&db, "done", Some("d4"), ScanStatus::Clean);

        let first: Vec<String> = db.pending_queue(2).unwrap().into_iter().map(|p| p.version_id).collect();
        assert_eq!(first.len(), 2);

        let second: Vec<String> = db.pending_queue(2).unwrap().into_iter().map(|p| p.version_id).collect();
        assert!(second.iter().any(|id| !first.contains(id)), "unpolled item must come next");
        assert!(!second.contains(&"done".to_string()));
    }

    #[test]
    fn test_record_digest_keeps_final_status() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "v1", Some("d1"), ScanStatus::Clean);

        db.record_digest("v1", "d1").unwrap();
        assert_eq!(db.get_version("v1").unwrap().unwrap().scan_status, ScanStatus::Clean);
    }

    #[test]
    fn test_new_verdict_replaces_final_status() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "v1", Some("d1"), ScanStatus::Clean);
        seed(&db, "v2", Some("d1"), ScanStatus::Pending);

        let updated = db.apply_verdict("d1", "vt", Verdict::Suspicious, None).unwrap();
        assert_eq!(updated, 2);
        for id in ["v1", "v2"] {
            assert_eq!(db.get_version(id).unwrap().unwrap().scan_status, ScanStatus::Suspicious);
        }
    }

    #[test]
    fn test_corrupt_created_at_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "v1", None, ScanStatus::Unscanned);

        {
            let conn = db.conn.lock().unwrap();
            conn.execute("UPDATE skill_versions SET created_at = 'yesterday' WHERE id = 'v1'", [])
                .unwrap();
            conn.execute("UPDATE skills SET created_at = 'yesterday' WHERE id = 'skill-v1'", [])
                .unwrap();
        }

        assert!(db.get_version("v1").is_err());
        assert!(db.get_skill("skill-v1").is_err());
    }

    #[test]
    fn test_resaving_version_keeps_poll_position() {
        let db = Database::open_in_memory().unwrap();
        let first = seed(&db, "v1", Some("d1"), ScanStatus::Pending);
        let mut second = seed(&db, "v2", Some("d2"), ScanStatus::Pending);
        second.created_at = first.created_at + Duration::hours(1);
        db.save_version(&second).unwrap();

        let polled = db.pending_queue(1).unwrap();
        assert_eq!(polled[0].version_id, "v1");

        db.save_version(&first).unwrap();
        db.save_skill(&Skill::new("skill-v1".into(), "u1".into(), "renamed".into()))
            .unwrap();

        let next = db.pending_queue(1).unwrap();
        assert_eq!(next[0].version_id, "v2");
    }

    #[test]
    fn test_pending_stats() {
        let db = Database::open_in_memory().unwrap();
        let old = seed(&db, "old", Some("d1"), ScanStatus::Pending);
        seed(&db, "new", Some("d2"), ScanStatus::Pending);
        seed(&db, "clean", Some("d3"), ScanStatus::Clean);

        let mut aged = old.clone();
        aged.created_at = Utc::now() - Duration::hours(30);
        db.save_version(&aged).unwrap();

        let stats = db.pending_stats(Utc::now() - Duration::hours(24)).unwrap();
        assert_eq!(stats.queue_size, 2);
        assert_eq!(stats.very_stale_count, 1);
        assert_eq!(
            stats.oldest_created_at.map(|t| t.timestamp_millis()),
            Some(aged.created_at.timestamp_millis())
        );
    }
}

use crate::error::{ScanError, ScanResult};
use crate::models::{ArchiveMetadata, SkillFile};
use crate::services::BlobStore;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// 归档内保留的元数据文件名
pub const META_FILE_NAME: &str = "_meta.json";

/// 待打包的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// 内容摘要以及用于上传的归档字节
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    pub sha256: String,
    pub archive: Vec<u8>,
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644)
}

/// 构建确定性 ZIP
///
/// 条目按路径字典序写入，时间戳固定为 ZIP 纪元，权限固定为 0644，
/// 最后追加 `_meta.json`。同样的输入总是得到逐字节相同的输出。
pub fn build_archive(entries: &[ArchiveEntry], metadata: &ArchiveMetadata) -> ScanResult<Vec<u8>> {
    let mut sorted: Vec<&ArchiveEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut seen = HashSet::new();
    for entry in &sorted {
        if entry.path == META_FILE_NAME {
            return Err(ScanError::Archive(format!("{} is a reserved path", META_FILE_NAME)));
        }
        if !seen.insert(entry.path.as_str()) {
            return Err(ScanError::Archive(format!("duplicate path {}", entry.path)));
        }
    }

    let meta = serde_json::to_vec(metadata).map_err(|e| ScanError::Archive(e.to_string()))?;

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let items = sorted
        .iter()
        .map(|e| (e.path.as_str(), e.bytes.as_slice()))
        .chain(std::iter::once((META_FILE_NAME, meta.as_slice())));

    for (path, bytes) in items {
        writer
            .start_file(path, entry_options())
            .map_err(|e| ScanError::Archive(format!("{}: {}", path, e)))?;
        writer
            .write_all(bytes)
            .map_err(|e| ScanError::Archive(format!("{}: {}", path, e)))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| ScanError::Archive(e.to_string()))?;

    Ok(cursor.into_inner())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// 读取版本文件并计算内容摘要
pub struct ContentHasher<'a> {
    blobs: &'a dyn BlobStore,
}

impl<'a> ContentHasher<'a> {
    pub fn new(blobs: &'a dyn BlobStore) -> Self {
        Self { blobs }
    }

    /// 任意一个文件缺失都会中止，不会对残缺归档求摘要
    pub fn digest(
        &self,
        version_id: &str,
        files: &[SkillFile],
        metadata: &ArchiveMetadata,
    ) -> ScanResult<ContentDigest> {
        if files.is_empty() {
            return Err(ScanError::EmptyVersion(version_id.to_string()));
        }

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let bytes = self
                .blobs
                .get(&file.storage_id)?
                .ok_or_else(|| ScanError::ContentUnavailable {
                    path: file.path.clone(),
                    storage_id: file.storage_id.clone(),
                })?;

            entries.push(ArchiveEntry {
                path: file.path.clone(),
                bytes,
            });
        }

        let archive = build_archive(&entries, metadata)?;
        let sha256 = sha256_hex(&archive);
        log::debug!(
            "Built {} byte archive for version {} ({} files), sha256 {}",
            archive.len(),
            version_id,
            files.len(),
            sha256
        );

        Ok(ContentDigest { sha256, archive })
    }
}

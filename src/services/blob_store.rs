use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// 按内容引用读取文件字节
pub trait BlobStore: Send + Sync {
    /// 引用不存在时返回 `Ok(None)`
    fn get(&self, storage_id: &str) -> Result<Option<Vec<u8>>>;
}

/// 以 SHA-256 十六进制为文件名的本地目录存储
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create blob directory {}", root.display()))?;
        Ok(Self { root })
    }

    /// 写入内容并返回其引用
    pub fn put(&self, bytes: &[u8]) -> Result<String> {
        let storage_id = hex::encode(Sha256::digest(bytes));
        let path = self.root.join(&storage_id);
        if !path.exists() {
            std::fs::write(&path, bytes)
                .with_context(|| format!("Failed to write blob {}", storage_id))?;
        }
        Ok(storage_id)
    }

    fn blob_path(&self, storage_id: &str) -> Result<PathBuf> {
        let valid = !storage_id.is_empty()
            && storage_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            anyhow::bail!("Invalid storage reference: {:?}", storage_id);
        }
        Ok(self.root.join(storage_id))
    }
}

impl BlobStore for FsBlobStore {
    fn get(&self, storage_id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(storage_id)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read blob {}", storage_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_then_get() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        let id = store.put(b"hello skill").unwrap();
        assert_eq!(id.len(), 64);
        assert_eq!(store.get(&id).unwrap(), Some(b"hello skill".to_vec()));
        assert_eq!(store.put(b"hello skill").unwrap(), id);
    }

    #[test]
    fn test_missing_blob_is_none() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        assert_eq!(store.get("abc").unwrap(), None);
    }

    #[test]
    fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().join("blobs")).unwrap();

        assert!(store.get("../secret").is_err());
        assert!(store.get("a/b").is_err());
        assert!(store.get("").is_err());
    }
}

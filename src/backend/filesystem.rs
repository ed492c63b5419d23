//! Local filesystem [`Backend`] — the primary vehicle for tests and
//! local-only use, and the default for `"file-system"`/`"artifactory"`
//! repositories (the two layouts only differ in the paths an
//! [`super::Interface`] builds on top of it).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{Backend, BackendError};

pub struct FileSystemBackend {
    root: PathBuf,
}

impl FileSystemBackend {
    pub fn new(host: &str, repository_name: &str) -> Result<Self, BackendError> {
        let root = Path::new(host).join(repository_name);
        std::fs::create_dir_all(&root)?;
        Ok(FileSystemBackend { root })
    }

    fn storage_path(&self, path: &str, version: &str) -> PathBuf {
        let mut p = self.root.clone();
        for part in path.split('/') {
            p.push(part);
        }
        p.push(version);
        p
    }
}

#[async_trait]
impl Backend for FileSystemBackend {
    async fn exists(&self, path: &str, version: &str) -> Result<bool, BackendError> {
        Ok(self.storage_path(path, version).is_file())
    }

    async fn ls(&self, path: &str) -> Result<Vec<(String, String)>, BackendError> {
        let mut base = self.root.clone();
        for part in path.split('/').filter(|s| !s.is_empty()) {
            base.push(part);
        }
        if !base.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        walk(&base, &base, path, &mut results)?;
        Ok(results)
    }

    async fn versions(&self, path: &str) -> Result<Vec<String>, BackendError> {
        let mut dir = self.root.clone();
        for part in path.split('/').filter(|s| !s.is_empty()) {
            dir.push(part);
        }
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                versions.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        Ok(versions)
    }

    async fn get_file(&self, remote: &str, local: &Path, version: &str) -> Result<(), BackendError> {
        let src = self.storage_path(remote, version);
        if !src.is_file() {
            return Err(BackendError::NotFound(remote.to_string(), version.to_string()));
        }
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&src, local).await?;
        Ok(())
    }

    async fn put_file(&self, local: &Path, remote: &str, version: &str) -> Result<(), BackendError> {
        let dst = self.storage_path(remote, version);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(local, &dst).await?;
        Ok(())
    }

    async fn remove_file(&self, remote: &str, version: &str) -> Result<(), BackendError> {
        let dst = self.storage_path(remote, version);
        if dst.is_file() {
            fs::remove_file(&dst).await?;
        }
        Ok(())
    }
}

/// Recursively collect `(logical_path, version)` pairs under `dir`, where
/// every leaf file represents one version of the logical path formed by
/// the directories walked so far.
fn walk(
    root: &Path,
    dir: &Path,
    logical_prefix: &str,
    out: &mut Vec<(String, String)>,
) -> Result<(), BackendError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, logical_prefix, out)?;
        } else {
            let version = entry.file_name().to_string_lossy().to_string();
            let parent_rel = path
                .parent()
                .unwrap()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            let logical = if parent_rel.is_empty() {
                logical_prefix.to_string()
            } else if logical_prefix.is_empty() {
                parent_rel
            } else {
                format!("{logical_prefix}/{parent_rel}")
            };
            out.push((logical, version));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileSystemBackend::new(dir.path().to_str().unwrap(), "repo").unwrap();

        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("db.yaml");
        std::fs::write(&src, b"name: test").unwrap();

        backend.put_file(&src, "mydb/db.yaml", "1.0.0").await.unwrap();
        assert!(backend.exists("mydb/db.yaml", "1.0.0").await.unwrap());
        assert!(!backend.exists("mydb/db.yaml", "2.0.0").await.unwrap());

        let dst_dir = tempfile::tempdir().unwrap();
        let dst = dst_dir.path().join("out.yaml");
        backend.get_file("mydb/db.yaml", &dst, "1.0.0").await.unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"name: test");

        let versions = backend.versions("mydb/db.yaml").await.unwrap();
        assert_eq!(versions, vec!["1.0.0".to_string()]);
    }

    #[tokio::test]
    async fn remove_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileSystemBackend::new(dir.path().to_str().unwrap(), "repo").unwrap();
        backend.remove_file("missing", "1.0.0").await.unwrap();
    }
}

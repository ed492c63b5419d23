//! Backend interface & repository lookup (C5, §4.5/§6.1/§6.3).
//!
//! Two layers, the way the `audbackend` library named in
//! `original_source/` splits them: a raw [`Backend`] trait (exists / ls /
//! versions / get_file / put_file / remove_file — one object per byte or
//! listing), grounded in the teacher's mockable `CloudStorage` trait in
//! `cloud_storage.rs`, and an [`Interface`] on top that applies a remote
//! [`Layout`] (Maven-like or flat Versioned, §6.3) and performs archive
//! packing/unpacking.

mod archive;
mod filesystem;
mod s3;

pub use archive::ArchiveError;
pub use filesystem::FileSystemBackend;
pub use s3::S3Backend;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("path '{0}' at version '{1}' not found")]
    NotFound(String, String),
    #[error("unknown backend kind: {0}")]
    UnknownBackend(String),
    #[error("backend transport error: {0}")]
    Transport(String),
}

/// Raw, layout-agnostic operations a storage backend must provide.
///
/// `path` arguments are always POSIX-style logical paths; how a backend
/// maps them onto its underlying storage (directory tree, object keys,
/// ...) is its own business.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Whether `path` exists at `version`.
    async fn exists(&self, path: &str, version: &str) -> Result<bool, BackendError>;

    /// List `(path, version)` pairs found at or below `path`.
    async fn ls(&self, path: &str) -> Result<Vec<(String, String)>, BackendError>;

    /// All versions for which `path` exists, unsorted.
    async fn versions(&self, path: &str) -> Result<Vec<String>, BackendError>;

    /// Download a single file.
    async fn get_file(&self, remote: &str, local: &Path, version: &str) -> Result<(), BackendError>;

    /// Upload a single file.
    async fn put_file(&self, local: &Path, remote: &str, version: &str) -> Result<(), BackendError>;

    /// Remove a single file. Used only to roll back a header upload when a
    /// publish fails right after making a version visible.
    async fn remove_file(&self, remote: &str, version: &str) -> Result<(), BackendError>;
}

/// Remote layout convention (§6.3). The choice is a property of the
/// repository, opaque to the rest of the core once an [`Interface`] has
/// been built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `<name>/db/<version>/db-<version>.yaml`, `<name>/media/<archive>/<version>/...`
    Maven,
    /// `<name>/<version>/db.yaml`, `<name>/media/<archive>/<version>/...`
    Versioned,
}

/// Artifact kind used to build the remote path of a table/media/attachment
/// archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Media,
    Meta,
    Attachment,
}

impl ArtifactKind {
    pub fn segment(self) -> &'static str {
        match self {
            ArtifactKind::Media => "media",
            ArtifactKind::Meta => "meta",
            ArtifactKind::Attachment => "attachment",
        }
    }
}

/// A backend wrapped with its repository's remote layout.
pub struct Interface {
    backend: Box<dyn Backend>,
    layout: Layout,
}

impl Interface {
    pub fn new(backend: Box<dyn Backend>, layout: Layout) -> Self {
        Interface { backend, layout }
    }

    /// Join path segments the POSIX way, trimming stray slashes.
    pub fn join(segments: &[&str]) -> String {
        segments
            .iter()
            .map(|s| s.trim_matches('/'))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn header_path(&self, name: &str, version: &str) -> String {
        match self.layout {
            Layout::Maven => Self::join(&[name, "db", version, &format!("db-{version}.yaml")]),
            Layout::Versioned => Self::join(&[name, version, "db.yaml"]),
        }
    }

    pub fn dependencies_path(&self, name: &str, version: &str) -> String {
        match self.layout {
            Layout::Maven => Self::join(&[name, "db", version, &format!("db-{version}.bin")]),
            Layout::Versioned => Self::join(&[name, version, "db.bin"]),
        }
    }

    /// Root path under which versions of a single artifact are stored.
    /// Archives (table/media/attachment) share this shape across both
    /// layouts; only header and dependency file paths differ between them.
    pub fn artifact_path(&self, name: &str, kind: ArtifactKind, id: &str) -> String {
        Self::join(&[name, kind.segment(), id])
    }

    pub async fn exists(&self, path: &str, version: &str) -> Result<bool, BackendError> {
        self.backend.exists(path, version).await
    }

    pub async fn ls(&self, path: &str) -> Result<Vec<(String, String)>, BackendError> {
        self.backend.ls(path).await
    }

    pub async fn versions(&self, path: &str) -> Result<Vec<String>, BackendError> {
        self.backend.versions(path).await
    }

    pub async fn get_file(&self, remote: &str, local: &Path, version: &str) -> Result<(), BackendError> {
        self.backend.get_file(remote, local, version).await
    }

    pub async fn put_file(&self, local: &Path, remote: &str, version: &str) -> Result<(), BackendError> {
        self.backend.put_file(local, remote, version).await
    }

    pub async fn remove_file(&self, remote: &str, version: &str) -> Result<(), BackendError> {
        self.backend.remove_file(remote, version).await
    }

    /// Download and extract the archive at `remote`/`version` into
    /// `local_root`, returning the POSIX-relative paths of its members.
    pub async fn get_archive(
        &self,
        remote: &str,
        local_root: &Path,
        version: &str,
        tmp_root: Option<&Path>,
    ) -> Result<Vec<String>, BackendError> {
        let tmp_dir;
        let tmp_root = match tmp_root {
            Some(p) => p,
            None => {
                tmp_dir = tempfile::tempdir()?;
                tmp_dir.path()
            }
        };
        let zip_path = tmp_root.join(format!("{}.zip", sanitize(remote)));
        self.backend.get_file(&format!("{remote}.zip"), &zip_path, version).await?;
        let members = archive::unpack(&zip_path, local_root)?;
        Ok(members)
    }

    /// Pack `files` (relative to `local_root`) into a zip and upload it as
    /// `remote`/`version`.
    pub async fn put_archive(
        &self,
        local_root: &Path,
        remote: &str,
        version: &str,
        files: &[String],
    ) -> Result<(), BackendError> {
        let tmp_dir = tempfile::tempdir()?;
        let zip_path = tmp_dir.path().join(format!("{}.zip", sanitize(remote)));
        archive::pack(local_root, files, &zip_path)?;
        self.backend.put_file(&zip_path, &format!("{remote}.zip"), version).await?;
        Ok(())
    }
}

fn sanitize(remote: &str) -> String {
    remote.replace('/', "_")
}

pub(crate) fn local_path(root: &Path, posix_relative: &str) -> PathBuf {
    let mut p = root.to_path_buf();
    for part in posix_relative.split('/') {
        p.push(part);
    }
    p
}

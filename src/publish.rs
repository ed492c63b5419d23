//! Publish pipeline (C6, §4.6).
//!
//! Grounded in `original_source/audb/core/publish.py`'s `publish()`:
//! same preconditions (version not already published, previous-version
//! dependency hash match, portability, missing-file check capped at 20
//! paths, tables forced to the legacy CSV format before upload), same
//! diff-then-upload shape for tables/media, dependency table uploaded
//! before the header, header uploaded last so a version only becomes
//! visible once everything else has landed; rolled back with
//! `remove_file` if the header upload itself fails.

use std::collections::HashMap;
use std::path::Path;

use futures::stream::{self, StreamExt};
use thiserror::Error;

use crate::backend::{ArtifactKind, Interface};
use crate::define;
use crate::dependencies::Dependencies;
use crate::header::Header;
use crate::repository::Repository;
use crate::table::Table;
use crate::utils;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("a version '{0}' already exists for database '{1}'")]
    VersionExists(String, String),
    #[error(
        "you did not set a dependency to a previous version, but a '{0}' file is present in {1}"
    )]
    UnexpectedDependencies(String, String),
    #[error(
        "you want to depend on '{0}' of '{1}', but no '{2}' file is present in {3}"
    )]
    MissingDependencies(String, String, String, String),
    #[error(
        "you want to depend on '{0}' of '{1}', but the checksum of your dependency file does not match the published one"
    )]
    DependencyMismatch(String, String),
    #[error("database is not portable: files use absolute paths or '..'")]
    NotPortable,
    #[error("{0} files referenced in tables cannot be found: {1:?}")]
    MissingFiles(usize, Vec<String>),
    #[error("backend error: {0}")]
    Backend(#[from] crate::backend::BackendError),
    #[error("dependencies error: {0}")]
    Dependencies(#[from] crate::dependencies::DependenciesError),
    #[error("table error: {0}")]
    Table(#[from] crate::table::TableError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which previously published version (if any) this publish should
/// depend on.
#[derive(Debug, Clone, Default)]
pub enum PreviousVersion {
    #[default]
    Latest,
    None,
    Explicit(String),
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Explicit file -> archive name overrides, for bundling several
    /// files into one archive.
    pub archives: HashMap<String, String>,
    pub previous_version: PreviousVersion,
    pub num_workers: usize,
}

impl PublishOptions {
    pub fn new() -> Self {
        PublishOptions {
            archives: HashMap::new(),
            previous_version: PreviousVersion::Latest,
            num_workers: 1,
        }
    }
}

const MAX_REPORTED_MISSING_FILES: usize = 20;

/// Publish the database rooted at `db_root` as `version` to `repository`.
pub async fn publish(
    db_root: &Path,
    header: &Header,
    tables: &HashMap<String, Table>,
    version: &str,
    repository: &Repository,
    options: PublishOptions,
) -> Result<Dependencies, PublishError> {
    let interface = repository.create_interface()?;
    let name = &header.name;

    let remote_header = Interface::join(&[name, define::HEADER_FILE]);
    let published_versions = interface.versions(&remote_header).await?;
    if published_versions.iter().any(|v| v == version) {
        return Err(PublishError::VersionExists(version.to_string(), name.clone()));
    }

    let previous_version = resolve_previous_version(&options.previous_version, &published_versions);

    let deps_path = db_root.join(define::DEPENDENCIES_FILE);
    let mut deps = if deps_path.exists() {
        Dependencies::load(&deps_path)?
    } else {
        Dependencies::new()
    };

    validate_previous_version(&previous_version, &deps, &deps_path, name, &interface).await?;

    if !header.is_portable(tables) {
        return Err(PublishError::NotPortable);
    }

    let missing = missing_files(db_root, tables);
    if !missing.is_empty() {
        return Err(PublishError::MissingFiles(missing.len(), missing));
    }

    ensure_legacy_table_format(db_root, tables)?;

    let changed_tables = find_changed_tables(tables, &mut deps);
    put_tables(&interface, db_root, name, version, &changed_tables, options.num_workers).await?;
    for table_id in &changed_tables {
        let path = db_root.join(format!("db.{table_id}.csv"));
        let checksum = utils::checksum(&path)?;
        deps.add_meta(format!("db.{table_id}.csv"), table_id.clone(), checksum, version.to_string());
    }

    let media_files: std::collections::HashSet<String> =
        tables.values().flat_map(|t| t.file_paths()).collect();
    let changed_media = find_changed_media(db_root, &media_files, &mut deps, &options.archives)?;
    put_media(&interface, db_root, name, version, &changed_media, options.num_workers).await?;
    for entry in &changed_media {
        deps.add_media(
            entry.file.clone(),
            entry.archive.clone(),
            entry.bit_depth,
            entry.channels,
            entry.checksum.clone(),
            entry.duration,
            entry.format.clone(),
            entry.sampling_rate,
            version.to_string(),
        );
    }

    let changed_attachments = find_changed_attachments(db_root, header, &mut deps)?;
    put_attachments(&interface, db_root, name, version, &changed_attachments, options.num_workers).await?;
    for entry in &changed_attachments {
        deps.add_attachment(entry.id.clone(), entry.id.clone(), entry.checksum.clone(), version.to_string());
    }

    deps.save(&deps_path)?;
    let deps_archive = Interface::join(&[name, "db"]);
    interface
        .put_archive(db_root, &deps_archive, version, &[define::DEPENDENCIES_FILE.to_string()])
        .await?;

    let local_header = db_root.join(define::HEADER_FILE);
    if let Err(err) = interface.put_file(&local_header, &remote_header, version).await {
        if interface.exists(&remote_header, version).await.unwrap_or(false) {
            let _ = interface.remove_file(&remote_header, version).await;
        }
        return Err(PublishError::Backend(err));
    }

    Ok(deps)
}

fn resolve_previous_version(requested: &PreviousVersion, published: &[String]) -> Option<String> {
    match requested {
        PreviousVersion::Latest => crate::load::latest_of(published),
        PreviousVersion::None => None,
        PreviousVersion::Explicit(v) => Some(v.clone()),
    }
}

async fn validate_previous_version(
    previous_version: &Option<String>,
    deps: &Dependencies,
    deps_path: &Path,
    name: &str,
    interface: &Interface,
) -> Result<(), PublishError> {
    match previous_version {
        None => {
            if !deps.is_empty() {
                return Err(PublishError::UnexpectedDependencies(
                    define::DEPENDENCIES_FILE.to_string(),
                    deps_path.display().to_string(),
                ));
            }
        }
        Some(previous) => {
            if deps.is_empty() {
                return Err(PublishError::MissingDependencies(
                    previous.clone(),
                    name.to_string(),
                    define::DEPENDENCIES_FILE.to_string(),
                    deps_path.display().to_string(),
                ));
            }

            let tmp_dir = tempfile::tempdir()?;
            let previous_archive = Interface::join(&[name, "db"]);
            interface.get_archive(&previous_archive, tmp_dir.path(), previous, None).await?;
            let previous_deps_path = tmp_dir.path().join(define::DEPENDENCIES_FILE);

            let local_sum = utils::checksum(deps_path)?;
            let previous_sum = utils::checksum(&previous_deps_path)?;
            if local_sum != previous_sum {
                return Err(PublishError::DependencyMismatch(previous.clone(), name.to_string()));
            }
        }
    }
    Ok(())
}

fn missing_files(db_root: &Path, tables: &HashMap<String, Table>) -> Vec<String> {
    let mut missing: Vec<String> = tables
        .values()
        .flat_map(|t| t.file_paths())
        .filter(|f| !db_root.join(f).exists())
        .collect();
    missing.sort();
    missing.dedup();
    missing.truncate(MAX_REPORTED_MISSING_FILES);
    missing
}

fn ensure_legacy_table_format(db_root: &Path, tables: &HashMap<String, Table>) -> Result<(), PublishError> {
    for (table_id, table) in tables {
        let path = db_root.join(format!("db.{table_id}.csv"));
        if !path.exists() {
            table.save_csv(&path)?;
        }
    }
    Ok(())
}

fn find_changed_tables(tables: &HashMap<String, Table>, deps: &mut Dependencies) -> Vec<String> {
    let current: std::collections::HashSet<String> =
        tables.keys().map(|id| format!("db.{id}.csv")).collect();
    for file in deps.tables() {
        if !current.contains(&file) {
            deps.drop(&file);
        }
    }

    let mut ids: Vec<String> = tables
        .keys()
        .filter(|id| !deps.contains(&format!("db.{id}.csv")))
        .cloned()
        .collect();
    ids.sort();
    ids
}

struct MediaUpload {
    file: String,
    archive: String,
    bit_depth: u16,
    channels: u16,
    checksum: String,
    duration: f64,
    format: String,
    sampling_rate: u32,
}

fn find_changed_media(
    db_root: &Path,
    files: &std::collections::HashSet<String>,
    deps: &mut Dependencies,
    archives: &HashMap<String, String>,
) -> Result<Vec<MediaUpload>, PublishError> {
    // release dependencies to media no longer referenced by any table
    for file in deps.media() {
        if !files.contains(&file) {
            deps.drop(&file);
        }
    }

    let mut changed = Vec::new();
    for file in files {
        let path = db_root.join(file);
        let checksum = utils::checksum(&path)?;
        if deps.contains(file) && deps.checksum(file).map(|c| c == checksum).unwrap_or(false) {
            continue;
        }

        let info = crate::audio::probe(&path).unwrap_or(crate::audio::AudioInfo {
            bit_depth: 0,
            channels: 0,
            duration: 0.0,
            sampling_rate: 0,
        });
        let format = Path::new(file)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let archive = archives.get(file).cloned().unwrap_or_else(|| file.clone());

        changed.push(MediaUpload {
            file: file.clone(),
            archive,
            bit_depth: info.bit_depth,
            channels: info.channels,
            checksum,
            duration: info.duration,
            format,
            sampling_rate: info.sampling_rate,
        });
    }
    changed.sort_by(|a, b| a.file.cmp(&b.file));
    Ok(changed)
}

struct AttachmentUpload {
    id: String,
    files: Vec<String>,
    checksum: String,
}

/// List every file under `db_root.join(root)`, relative to `db_root`; `root`
/// may itself be a single file.
fn collect_attachment_files(db_root: &Path, root: &Path) -> std::io::Result<Vec<String>> {
    let abs_root = db_root.join(root);
    let mut files = Vec::new();
    if abs_root.is_file() {
        files.push(root.to_string_lossy().to_string());
    } else {
        let mut stack = vec![abs_root.clone()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let relative = path.strip_prefix(db_root).unwrap_or(&path);
                    files.push(relative.to_string_lossy().replace('\\', "/"));
                }
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Aggregate checksum over an attachment tree: MD5 of every member's own
/// checksum, in sorted-path order, so a changed file anywhere in the tree
/// changes the aggregate.
fn attachment_checksum(db_root: &Path, files: &[String]) -> Result<String, PublishError> {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    for file in files {
        hasher.update(file.as_bytes());
        hasher.update(utils::checksum(&db_root.join(file))?.as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Diff attachments present in `header.attachments` against `deps`,
/// dropping rows for attachments no longer present and returning the
/// changed/new ones to upload.
fn find_changed_attachments(
    db_root: &Path,
    header: &Header,
    deps: &mut Dependencies,
) -> Result<Vec<AttachmentUpload>, PublishError> {
    let current: std::collections::HashSet<String> = header.attachments.keys().cloned().collect();
    for id in deps.attachments() {
        if !current.contains(&id) {
            deps.drop(&id);
        }
    }

    let mut changed = Vec::new();
    for (id, root) in &header.attachments {
        let files = collect_attachment_files(db_root, root)?;
        let checksum = attachment_checksum(db_root, &files)?;
        if deps.contains(id) && deps.checksum(id).map(|c| c == checksum).unwrap_or(false) {
            continue;
        }
        changed.push(AttachmentUpload {
            id: id.clone(),
            files,
            checksum,
        });
    }
    changed.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(changed)
}

/// Upload every changed attachment tree as its own archive under
/// `<name>/attachment/<id>`, `num_workers` at a time.
async fn put_attachments(
    interface: &Interface,
    db_root: &Path,
    name: &str,
    version: &str,
    attachments: &[AttachmentUpload],
    num_workers: usize,
) -> Result<(), PublishError> {
    let results: Vec<Result<(), crate::backend::BackendError>> = stream::iter(attachments)
        .map(|entry| {
            let remote = Interface::join(&[name, ArtifactKind::Attachment.segment(), &entry.id]);
            async move { interface.put_archive(db_root, &remote, version, &entry.files).await }
        })
        .buffer_unordered(num_workers.max(1))
        .collect()
        .await;
    for result in results {
        result?;
    }
    Ok(())
}

/// Upload each changed table as its own single-file archive under
/// `<name>/meta/<table_id>`, `num_workers` at a time.
async fn put_tables(
    interface: &Interface,
    db_root: &Path,
    name: &str,
    version: &str,
    table_ids: &[String],
    num_workers: usize,
) -> Result<(), PublishError> {
    let results: Vec<Result<(), crate::backend::BackendError>> = stream::iter(table_ids)
        .map(|table_id| {
            let remote = Interface::join(&[name, ArtifactKind::Meta.segment(), table_id]);
            let file = format!("db.{table_id}.csv");
            async move { interface.put_archive(db_root, &remote, version, &[file]).await }
        })
        .buffer_unordered(num_workers.max(1))
        .collect()
        .await;
    for result in results {
        result?;
    }
    Ok(())
}

/// Upload every changed archive of media files, `num_workers` at a time.
/// Files sharing an archive name are bundled into one zip upload.
async fn put_media(
    interface: &Interface,
    db_root: &Path,
    name: &str,
    version: &str,
    media: &[MediaUpload],
    num_workers: usize,
) -> Result<(), PublishError> {
    let mut by_archive: HashMap<String, Vec<String>> = HashMap::new();
    for entry in media {
        by_archive.entry(entry.archive.clone()).or_default().push(entry.file.clone());
    }

    let archives: Vec<(String, Vec<String>)> = by_archive.into_iter().collect();
    let results: Vec<Result<(), crate::backend::BackendError>> = stream::iter(&archives)
        .map(|(archive, files)| {
            let remote = Interface::join(&[name, "media", archive]);
            async move { interface.put_archive(db_root, &remote, version, files).await }
        })
        .buffer_unordered(num_workers.max(1))
        .collect()
        .await;
    for result in results {
        result?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FileSystemBackend;
    use crate::define::DependType;
    use crate::header::TableKind;
    use crate::table::TableIndex;

    fn make_db_root(dir: &Path) {
        std::fs::write(dir.join("a.wav"), b"fake-audio").unwrap();
    }

    #[tokio::test]
    async fn publish_uploads_header_table_and_media_last() {
        let repo_dir = tempfile::tempdir().unwrap();
        let repository = Repository::new("repo", repo_dir.path().to_str().unwrap(), "file-system");

        let db_dir = tempfile::tempdir().unwrap();
        make_db_root(db_dir.path());

        let mut header = Header::new("mydb");
        header.tables.insert("emotion".to_string(), TableKind::Filewise);
        std::fs::write(db_dir.path().join("db.yaml"), serde_yaml::to_string(&header).unwrap()).unwrap();

        let mut tables = HashMap::new();
        tables.insert(
            "emotion".to_string(),
            Table::new(TableIndex::Filewise(vec!["a.wav".to_string()])),
        );

        let deps = publish(
            db_dir.path(),
            &header,
            &tables,
            "1.0.0",
            &repository,
            PublishOptions::new(),
        )
        .await
        .unwrap();

        assert!(deps.contains("a.wav"));
        assert_eq!(deps.type_of("a.wav").unwrap(), DependType::Media);
        assert!(deps.contains("db.emotion.csv"));

        let interface = repository.create_interface().unwrap();
        let remote_header = Interface::join(&["mydb", "db.yaml"]);
        assert!(interface.exists(&remote_header, "1.0.0").await.unwrap());

        let backend = FileSystemBackend::new(repo_dir.path().to_str().unwrap(), "repo").unwrap();
        drop(backend);
    }

    #[tokio::test]
    async fn publish_rejects_duplicate_version() {
        let repo_dir = tempfile::tempdir().unwrap();
        let repository = Repository::new("repo", repo_dir.path().to_str().unwrap(), "file-system");

        let db_dir = tempfile::tempdir().unwrap();
        make_db_root(db_dir.path());
        let mut header = Header::new("mydb");
        header.tables.insert("emotion".to_string(), TableKind::Filewise);
        std::fs::write(db_dir.path().join("db.yaml"), serde_yaml::to_string(&header).unwrap()).unwrap();
        let mut tables = HashMap::new();
        tables.insert(
            "emotion".to_string(),
            Table::new(TableIndex::Filewise(vec!["a.wav".to_string()])),
        );

        publish(db_dir.path(), &header, &tables, "1.0.0", &repository, PublishOptions::new())
            .await
            .unwrap();

        let err = publish(db_dir.path(), &header, &tables, "1.0.0", &repository, PublishOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::VersionExists(_, _)));
    }

    #[tokio::test]
    async fn publish_rejects_missing_files() {
        let repo_dir = tempfile::tempdir().unwrap();
        let repository = Repository::new("repo", repo_dir.path().to_str().unwrap(), "file-system");

        let db_dir = tempfile::tempdir().unwrap();
        let header = Header::new("mydb");
        let mut tables = HashMap::new();
        tables.insert(
            "emotion".to_string(),
            Table::new(TableIndex::Filewise(vec!["missing.wav".to_string()])),
        );

        let err = publish(db_dir.path(), &header, &tables, "1.0.0", &repository, PublishOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::MissingFiles(1, _)));
    }
}

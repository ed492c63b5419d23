//! Load pipeline (C7, §4.7).
//!
//! Grounded in `original_source/audb/core/load.py`: version resolution
//! (`latest_version`), dependency caching behind a [`crate::lock`]
//! (corrupt cache falls back to a fresh backend download, `_cached_*`
//! functions), the `complete` flag persisted in the header's `meta.audb`
//! map, peer-cache reuse across same-flavor versions (`_cached_versions`/
//! `_cached_files`), flavor application, and table/media/attachment
//! filtering by explicit list or regex (`filter_deps`).
//!
//! Version ordering resolves an Open Question the distilled spec leaves
//! ambiguous ("lexicographically greatest"): `original_source` actually
//! sorts with `audeer.sort_versions`, which is semver-aware, so
//! [`latest_of`] uses the `semver` crate instead of a literal string
//! comparison (documented in `DESIGN.md`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use semver::Version;
use thiserror::Error;
use tracing::warn;

use crate::backend::{ArtifactKind, Interface};
use crate::cache;
use crate::config::Config;
use crate::define;
use crate::dependencies::Dependencies;
use crate::flavor::Flavor;
use crate::header::{self, Header};
use crate::lock::FolderLock;
use crate::table::{Table, TableError};
use crate::utils;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("database '{0}' not found")]
    DatabaseNotFound(String),
    #[error("version '{0}' not found for database '{1}'")]
    VersionNotFound(String, String),
    #[error("table '{0}' not found")]
    TableNotFound(String),
    #[error("cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),
    #[error("lock error: {0}")]
    Lock(#[from] crate::lock::LockError),
    #[error("backend error: {0}")]
    Backend(#[from] crate::backend::BackendError),
    #[error("dependencies error: {0}")]
    Dependencies(#[from] crate::dependencies::DependenciesError),
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("header error: {0}")]
    Header(#[from] crate::header::HeaderError),
    #[error("flavor error: {0}")]
    Flavor(#[from] crate::flavor::FlavorError),
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(Box<crate::error::Error>),
}

impl From<crate::error::Error> for LoadError {
    fn from(err: crate::error::Error) -> Self {
        LoadError::Other(Box::new(err))
    }
}

/// Either an explicit list of ids/files, or a regular expression applied
/// to ids/files (§4.7.7).
#[derive(Debug, Clone)]
pub enum Filter {
    List(Vec<String>),
    Pattern(String),
}

impl Filter {
    fn apply(&self, candidates: &[String]) -> Result<Vec<String>, LoadError> {
        match self {
            Filter::List(list) => Ok(candidates.iter().filter(|c| list.contains(c)).cloned().collect()),
            Filter::Pattern(pattern) => {
                let re = regex::Regex::new(pattern)?;
                Ok(candidates.iter().filter(|c| re.is_match(c)).cloned().collect())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub only_metadata: bool,
    pub flavor: Option<Flavor>,
    pub tables: Option<Filter>,
    pub media: Option<Filter>,
    pub attachments: Option<Filter>,
    pub removed_media: bool,
    pub cache_root: Option<PathBuf>,
    pub num_workers: usize,
    /// Seconds to wait for the cache lock: negative blocks forever, zero
    /// fails fast, positive waits up to that many seconds.
    pub timeout: f64,
    /// Prepend the absolute cache root to every table index entry (§4.7.8).
    pub full_path: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            only_metadata: false,
            flavor: None,
            tables: None,
            media: None,
            attachments: None,
            removed_media: false,
            cache_root: None,
            num_workers: 1,
            timeout: -1.0,
            full_path: true,
        }
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A loaded database: header, tables, and the cache root they live under.
pub struct LoadedDatabase {
    pub header: Header,
    pub tables: HashMap<String, Table>,
    pub root: PathBuf,
    pub complete: bool,
}

/// Greatest of a set of version strings. Falls back to plain
/// lexicographic order for any that aren't valid semver (matching
/// `original_source`'s own `StrictVersion` being lenient about pre-1.0
/// tags) — but prefers genuine semantic order whenever every candidate
/// parses.
pub fn latest_of(versions: &[String]) -> Option<String> {
    if versions.is_empty() {
        return None;
    }
    let parsed: Option<Vec<(Version, &String)>> = versions
        .iter()
        .map(|v| Version::parse(v).ok().map(|parsed| (parsed, v)))
        .collect();

    match parsed {
        Some(mut pairs) => {
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            pairs.last().map(|(_, v)| (*v).clone())
        }
        None => versions.iter().max().cloned(),
    }
}

/// All versions of `name` across every configured repository.
pub async fn versions(config: &Config, name: &str) -> Result<Vec<String>, LoadError> {
    let header_path = Interface::join(&[name, define::HEADER_FILE]);
    let mut found = Vec::new();
    for repository in &config.repositories {
        let interface = repository.create_interface()?;
        found.extend(interface.versions(&header_path).await?);
    }
    if found.is_empty() {
        return Err(LoadError::DatabaseNotFound(name.to_string()));
    }
    found.sort();
    found.dedup();
    Ok(found)
}

pub async fn latest_version(config: &Config, name: &str) -> Result<String, LoadError> {
    let all = versions(config, name).await?;
    latest_of(&all).ok_or_else(|| LoadError::DatabaseNotFound(name.to_string()))
}

/// Load (downloading as needed) the dependency table for `name`/`version`
/// into its cache root, falling back to a fresh backend download if the
/// cached copy is missing or corrupt.
async fn cached_dependencies(
    config: &Config,
    name: &str,
    version: &str,
    cache_root: Option<&Path>,
) -> Result<(Dependencies, PathBuf), LoadError> {
    let db_root = cache::database_cache_root(config, name, version, cache_root, None)?;
    let deps_path = db_root.join(define::DEPENDENCIES_FILE);

    let deps = match Dependencies::load(&deps_path) {
        Ok(deps) => deps,
        Err(_) => {
            let (_, interface) = utils::lookup(config, name, version).await?;
            let archive = Interface::join(&[name, "db"]);
            let tmp_root = cache::database_tmp_root(&db_root)?;
            interface.get_archive(&archive, &tmp_root, version, None).await?;
            let deps = Dependencies::load(&tmp_root.join(define::DEPENDENCIES_FILE))?;
            deps.save(&deps_path)?;
            deps
        }
    };

    Ok((deps, db_root))
}

/// Load a header (always unflavored; header contents don't depend on a
/// flavor).
pub async fn load_header(config: &Config, name: &str, version: &str, cache_root: Option<&Path>) -> Result<Header, LoadError> {
    let db_root = cache::database_cache_root(config, name, version, cache_root, None)?;
    let header_path = db_root.join(define::HEADER_FILE);

    if !header_path.exists() {
        let (_, interface) = utils::lookup(config, name, version).await?;
        let remote = Interface::join(&[name, define::HEADER_FILE]);
        interface.get_file(&remote, &header_path, version).await?;
    }

    Ok(Header::load(&header_path)?)
}

/// Load a single table's content, downloading it to the cache first if
/// necessary.
pub async fn load_table(
    config: &Config,
    name: &str,
    table_id: &str,
    version: &str,
    cache_root: Option<&Path>,
) -> Result<Table, LoadError> {
    let db_root = cache::database_cache_root(config, name, version, cache_root, None)?;
    let meta_file = format!("db.{table_id}.csv");
    let csv_path = db_root.join(&meta_file);

    if !csv_path.exists() {
        // The table's archive may have been uploaded under an earlier
        // version (it is only re-uploaded when its rows change); fetch it
        // under the version it actually lives at.
        let (deps, _) = cached_dependencies(config, name, version, cache_root).await?;
        let archive_version = deps.version(&meta_file).map(|v| v.to_string()).unwrap_or_else(|_| version.to_string());
        let (_, interface) = utils::lookup(config, name, version).await?;
        let remote = Interface::join(&[name, ArtifactKind::Meta.segment(), table_id]);
        interface.get_archive(&remote, &db_root, &archive_version, None).await?;
    }

    if !csv_path.exists() {
        return Err(LoadError::TableNotFound(table_id.to_string()));
    }

    load_table_csv(&csv_path)
}

fn load_table_csv(path: &Path) -> Result<Table, LoadError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
    let mut files = Vec::new();
    let mut columns: std::collections::BTreeMap<String, Vec<String>> = headers
        .iter()
        .skip(1)
        .map(|h| (h.clone(), Vec::new()))
        .collect();

    for result in reader.records() {
        let record = result?;
        files.push(record.get(0).unwrap_or_default().to_string());
        for (i, header) in headers.iter().enumerate().skip(1) {
            columns.get_mut(header).unwrap().push(record.get(i).unwrap_or_default().to_string());
        }
    }

    let mut table = Table::new(crate::table::TableIndex::Filewise(files));
    table.columns = columns;
    Ok(table)
}

/// Other already-cached versions of `name`, in the same flavor partition
/// as `flavor`, sorted newest-first, excluding `current_version`. Existing
/// cache roots only; never creates directories (§4.7.4).
fn peer_versions(config: &Config, name: &str, current_version: &str, cache_root: Option<&Path>) -> Vec<String> {
    let roots: Vec<PathBuf> = match cache_root {
        Some(r) => vec![r.to_path_buf()],
        None => vec![
            cache::default_cache_root(config, true),
            cache::default_cache_root(config, false),
        ],
    };

    let mut found = std::collections::HashSet::new();
    for root in &roots {
        let db_dir = root.join(name);
        let Ok(entries) = std::fs::read_dir(&db_dir) else { continue };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let version = entry.file_name().to_string_lossy().to_string();
            if version.ends_with('~') || version == current_version {
                continue;
            }
            found.insert(version);
        }
    }

    let mut versions: Vec<String> = found.into_iter().collect();
    versions.sort_by(|a, b| match (Version::parse(a), Version::parse(b)) {
        (Ok(va), Ok(vb)) => vb.cmp(&va),
        _ => b.cmp(a),
    });
    versions
}

/// Look for `file` (with the given `checksum`) already materialized,
/// flavor-converted, in the cache of another version of `name` (§4.7.4).
/// Each candidate peer folder is locked only long enough to check and copy;
/// a lock timeout (or no peer holding the file) silently falls through to a
/// backend download rather than erroring.
fn peer_cache_source(
    config: &Config,
    name: &str,
    version: &str,
    file: &str,
    checksum: &str,
    flavor: Option<&Flavor>,
    cache_root: Option<&Path>,
) -> Option<PathBuf> {
    let dest_file = flavor.map(|f| f.destination(file)).unwrap_or_else(|| file.to_string());

    for peer_version in peer_versions(config, name, version, cache_root) {
        let peer_root = cache::database_cache_root(config, name, &peer_version, cache_root, flavor).ok()?;
        let _lock = match FolderLock::acquire(&peer_root, define::CACHED_VERSIONS_TIMEOUT) {
            Ok(lock) => lock,
            Err(_) => continue,
        };

        let peer_deps_root = cache::database_cache_root(config, name, &peer_version, cache_root, None).ok()?;
        let peer_deps = match Dependencies::load(&peer_deps_root.join(define::DEPENDENCIES_FILE)) {
            Ok(deps) => deps,
            Err(_) => continue,
        };
        if peer_deps.checksum(file).map(|c| c == checksum).unwrap_or(false) {
            let candidate = peer_root.join(&dest_file);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Copy `src` to `dst` via a tmp sibling and atomic rename, matching the
/// cache's atomic-install convention (§3.4).
fn install_atomically(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = dst.as_os_str().to_owned();
    tmp.push("~");
    let tmp = PathBuf::from(tmp);
    std::fs::copy(src, &tmp)?;
    std::fs::rename(&tmp, dst)?;
    Ok(())
}

/// Load a single media file into the cache, applying `flavor` if given,
/// and return its cached path.
pub async fn load_media(
    config: &Config,
    name: &str,
    file: &str,
    version: &str,
    flavor: Option<&Flavor>,
    cache_root: Option<&Path>,
) -> Result<PathBuf, LoadError> {
    let db_root = cache::database_cache_root(config, name, version, cache_root, flavor)?;
    let dest_file = flavor.map(|f| f.destination(file)).unwrap_or_else(|| file.to_string());
    let dest_path = db_root.join(&dest_file);

    if dest_path.exists() {
        return Ok(dest_path);
    }

    let (deps, deps_root) = cached_dependencies(config, name, version, cache_root).await?;
    let checksum = deps.checksum(file)?.to_string();

    if let Some(peer_path) = peer_cache_source(config, name, version, file, &checksum, flavor, cache_root) {
        install_atomically(&peer_path, &dest_path)?;
        return Ok(dest_path);
    }

    let archive = deps.archive(file)?;
    // The archive holding `file` may have been uploaded under an earlier
    // version (it is only re-uploaded when its bytes change, §4.6); fetch
    // it under the version it actually lives at, not the version being
    // loaded (scenario: `deps(v2).version("b.wav") == "1.0.0"`).
    let archive_version = deps.version(file)?.to_string();
    let (_, interface) = utils::lookup(config, name, version).await?;
    let remote = Interface::join(&[name, "media", archive]);

    let raw_root = if flavor.is_some() {
        cache::database_cache_root(config, name, version, cache_root, None)?
    } else {
        deps_root.clone()
    };
    let raw_path = raw_root.join(file);
    if !raw_path.exists() {
        interface.get_archive(&remote, &raw_root, &archive_version, None).await?;
    }

    match flavor {
        Some(flavor) if !flavor.is_trivial() => {
            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            flavor.apply(&raw_path, &dest_path)?;
        }
        _ => {
            if raw_path != dest_path {
                install_atomically(&raw_path, &dest_path)?;
            }
        }
    }

    Ok(dest_path)
}

/// Load an attachment tree into the cache and return its root.
pub async fn load_attachment(
    config: &Config,
    name: &str,
    attachment_id: &str,
    version: &str,
    cache_root: Option<&Path>,
) -> Result<PathBuf, LoadError> {
    let db_root = cache::database_cache_root(config, name, version, cache_root, None)?;
    let header = load_header(config, name, version, cache_root).await?;
    let root = header
        .attachments
        .get(attachment_id)
        .cloned()
        .unwrap_or_else(|| PathBuf::from(attachment_id));
    let local_root = db_root.join(&root);

    if !local_root.exists() {
        let (deps, _) = cached_dependencies(config, name, version, cache_root).await?;
        let archive = deps.archive(attachment_id).map(|a| a.to_string()).unwrap_or_else(|_| attachment_id.to_string());
        let archive_version = deps.version(attachment_id).map(|v| v.to_string()).unwrap_or_else(|_| version.to_string());
        let (_, interface) = utils::lookup(config, name, version).await?;
        let remote = Interface::join(&[name, ArtifactKind::Attachment.segment(), &archive]);
        interface.get_archive(&remote, &db_root, &archive_version, None).await?;
    }

    Ok(local_root)
}

/// Remove `file` from every published version (§4.7.10): download that
/// version's dependency, fetch the containing archive, drop the file,
/// re-upload the archive, tombstone the entry, re-upload the dependency.
/// Atomicity is per-archive; a partial result can be observed between
/// versions if interrupted.
pub async fn remove_media(config: &Config, name: &str, file: &str) -> Result<(), LoadError> {
    for version in versions(config, name).await? {
        let (mut deps, db_root) = cached_dependencies(config, name, &version, None).await?;
        if !deps.contains(file) || deps.is_removed(file).unwrap_or(false) {
            continue;
        }

        let archive = deps.archive(file)?.to_string();
        let archive_version = deps.version(file)?.to_string();
        let (_, interface) = utils::lookup(config, name, &version).await?;
        let remote = Interface::join(&[name, ArtifactKind::Media.segment(), &archive]);

        let tmp_root = cache::database_tmp_root(&db_root)?;
        let members = interface.get_archive(&remote, &tmp_root, &archive_version, None).await?;
        let remaining: Vec<String> = members.into_iter().filter(|m| m != file).collect();
        interface.put_archive(&tmp_root, &remote, &archive_version, &remaining).await?;
        let _ = std::fs::remove_dir_all(&tmp_root);

        deps.remove(file)?;
        let deps_path = db_root.join(define::DEPENDENCIES_FILE);
        deps.save(&deps_path)?;
        let dep_remote = interface.dependencies_path(name, &version);
        interface.put_file(&deps_path, &dep_remote, &version).await?;
    }
    Ok(())
}

/// Mirror `name`/`version`'s original, unflavored bytes into a
/// user-chosen folder (§4.7.9): the starting point for a new publish.
/// Existing files are checksummed and only re-downloaded if they
/// differ; the dependency table is written into `root` on completion.
pub async fn load_to(config: &Config, root: &Path, name: &str, version: &str) -> Result<(), LoadError> {
    std::fs::create_dir_all(root)?;
    let (deps, _) = cached_dependencies(config, name, version, None).await?;
    let (_, interface) = utils::lookup(config, name, version).await?;

    for file in deps.media() {
        if deps.is_removed(&file).unwrap_or(false) {
            continue;
        }
        let dest = root.join(&file);
        let checksum = deps.checksum(&file)?.to_string();
        if dest.exists() && utils::checksum(&dest).map(|c| c == checksum).unwrap_or(false) {
            continue;
        }
        let archive = deps.archive(&file)?.to_string();
        let archive_version = deps.version(&file)?.to_string();
        let remote = Interface::join(&[name, ArtifactKind::Media.segment(), &archive]);
        interface.get_archive(&remote, root, &archive_version, None).await?;
    }

    deps.save(&root.join(define::DEPENDENCIES_FILE))?;
    Ok(())
}

/// Load a full database: header, tables, and media, applying filters and
/// an optional flavor. Returns `Ok(None)` (with a warning) if the cache
/// lock could not be acquired within `options.timeout`, matching
/// `original_source`'s own lock-timeout-to-`None` contract.
pub async fn load(
    config: &Config,
    name: &str,
    version: Option<&str>,
    options: LoadOptions,
) -> Result<Option<LoadedDatabase>, LoadError> {
    let version = match version {
        Some(v) => v.to_string(),
        None => latest_version(config, name).await?,
    };

    let db_root = cache::database_cache_root(config, name, &version, options.cache_root.as_deref(), options.flavor.as_ref())?;

    let _lock = match FolderLock::acquire(&db_root, options.timeout) {
        Ok(lock) => lock,
        Err(crate::lock::LockError::Timeout) => {
            warn!(database = name, version = %version, "timed out waiting for cache lock");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };

    let (deps, _) = cached_dependencies(config, name, &version, options.cache_root.as_deref()).await?;
    let mut header = load_header(config, name, &version, options.cache_root.as_deref()).await?;

    let mut table_ids: Vec<String> = deps.table_ids();
    if let Some(filter) = &options.tables {
        table_ids = filter.apply(&table_ids)?;
    }

    let mut tables = HashMap::new();
    for table_id in &table_ids {
        let table = load_table(config, name, table_id, &version, options.cache_root.as_deref()).await?;
        tables.insert(table_id.clone(), table);
    }

    let mut media_files: Vec<String> = deps.media();
    if !options.removed_media {
        media_files.retain(|f| !deps.is_removed(f).unwrap_or(false));
    }
    if let Some(filter) = &options.media {
        media_files = filter.apply(&media_files)?;
        let keep: std::collections::HashSet<String> = media_files.iter().cloned().collect();
        crate::header::pick_files(&mut tables, &media_files);
        let _ = keep;
    }

    if !options.only_metadata {
        for file in &media_files {
            load_media(
                config,
                name,
                file,
                &version,
                options.flavor.as_ref(),
                options.cache_root.as_deref(),
            )
            .await?;
        }
    }

    if let Some(filter) = &options.attachments {
        let ids: Vec<String> = header.attachments.keys().cloned().collect();
        let keep = filter.apply(&ids)?;
        header.attachments.retain(|id, _| keep.contains(id));
    }
    for attachment_id in header.attachments.keys().cloned().collect::<Vec<_>>() {
        load_attachment(config, name, &attachment_id, &version, options.cache_root.as_deref()).await?;
    }

    let complete = is_complete(&header, &media_files, &table_ids, &db_root, options.flavor.as_ref());

    if let Some(flavor) = &options.flavor {
        if let Some(format) = &flavor.format {
            header::replace_file_extension(&mut tables, format);
        }
    }
    if options.full_path {
        header::expand_file_path(&mut tables, &db_root);
    }

    header
        .meta
        .entry("audb".to_string())
        .or_insert_with(|| serde_json::json!({}));
    header.meta["audb"]["complete"] = serde_json::json!(complete);
    header.save(&db_root.join(define::HEADER_FILE))?;

    Ok(Some(LoadedDatabase {
        header,
        tables,
        root: db_root,
        complete,
    }))
}

/// Literal completeness check (§4.7.3): every attachment path from the
/// header, every requested table file, and every requested non-tombstoned
/// media file (at its flavor destination) must actually exist under
/// `db_root`.
fn is_complete(header: &Header, media_files: &[String], table_ids: &[String], db_root: &Path, flavor: Option<&Flavor>) -> bool {
    for root in header.attachments.values() {
        if !db_root.join(root).exists() {
            return false;
        }
    }
    for table_id in table_ids {
        if !db_root.join(format!("db.{table_id}.csv")).exists() {
            return false;
        }
    }
    for file in media_files {
        let dest_file = flavor.map(|f| f.destination(file)).unwrap_or_else(|| file.clone());
        if !db_root.join(dest_file).exists() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_of_prefers_semantic_order_over_lexicographic() {
        let versions = vec!["1.9.0".to_string(), "1.10.0".to_string(), "1.2.0".to_string()];
        assert_eq!(latest_of(&versions), Some("1.10.0".to_string()));
    }

    #[test]
    fn latest_of_falls_back_to_lexicographic_for_non_semver() {
        let versions = vec!["a".to_string(), "b".to_string()];
        assert_eq!(latest_of(&versions), Some("b".to_string()));
    }

    #[test]
    fn filter_list_keeps_only_named_entries() {
        let filter = Filter::List(vec!["emotion".to_string()]);
        let result = filter.apply(&["emotion".to_string(), "speaker".to_string()]).unwrap();
        assert_eq!(result, vec!["emotion".to_string()]);
    }

    #[test]
    fn filter_pattern_matches_by_regex() {
        let filter = Filter::Pattern("^em.*".to_string());
        let result = filter.apply(&["emotion".to_string(), "speaker".to_string()]).unwrap();
        assert_eq!(result, vec!["emotion".to_string()]);
    }
}

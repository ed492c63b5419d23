//! Public library facade (§6.5): the surface a caller is expected to use
//! instead of reaching into `publish`/`load`/`stream`/`cache` directly.
//! Grounded in `original_source/audb/core/api.py`'s module-level
//! functions of the same names.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::backend::Interface;
use crate::cache;
use crate::config::Config;
use crate::define;
use crate::dependencies::Dependencies;
use crate::error::Result;
use crate::flavor::Flavor;
use crate::header::Header;
use crate::load::{self, LoadOptions, LoadedDatabase};
use crate::publish::{self, PublishOptions};
use crate::repository::Repository;
use crate::stream::TableStream;
use crate::table::Table;

/// One entry of [`available`]: a published database version and the
/// repository it was found in.
#[derive(Debug, Clone)]
pub struct AvailableEntry {
    pub name: String,
    pub backend: String,
    pub host: String,
    pub repository: String,
    pub version: String,
}

/// List every database version visible across the configured
/// repositories.
pub async fn available(config: &Config, only_latest: bool) -> Result<Vec<AvailableEntry>> {
    let mut entries = Vec::new();
    for repository in &config.repositories {
        let interface = match repository.create_interface() {
            Ok(i) => i,
            Err(_) => continue,
        };
        let Ok(listing) = interface.ls("").await else { continue };
        for (path, version) in listing {
            if let Some(name) = path.strip_suffix(&format!("/{}", define::HEADER_FILE)) {
                entries.push(AvailableEntry {
                    name: name.to_string(),
                    backend: repository.backend.clone(),
                    host: repository.host.clone(),
                    repository: repository.name.clone(),
                    version,
                });
            }
        }
    }

    if only_latest {
        let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
        for entry in &entries {
            by_name.entry(entry.name.clone()).or_default().push(entry.version.clone());
        }
        let latest: HashMap<String, String> = by_name
            .into_iter()
            .filter_map(|(name, versions)| load::latest_of(&versions).map(|v| (name, v)))
            .collect();
        entries.retain(|e| latest.get(&e.name) == Some(&e.version));
    }

    entries.sort_by_key(|e| (e.name.clone(), e.version.clone()));
    Ok(entries)
}

/// One entry of [`cached`]: a flavor of a database already present in a
/// local cache.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub path: PathBuf,
    pub name: String,
    pub flavor_id: String,
    pub version: String,
    pub complete: bool,
}

/// List databases/flavors already materialized in `cache_root` (or the
/// default cache roots if `None`), optionally restricted to `name`.
pub fn cached(cache_root: Option<&Path>, name: Option<&str>, shared: bool, config: &Config) -> Vec<CachedEntry> {
    let root = match cache_root {
        Some(r) => r.to_path_buf(),
        None => cache::default_cache_root(config, shared),
    };
    let mut results = Vec::new();
    let Ok(db_dirs) = std::fs::read_dir(&root) else { return results };

    for db_dir in db_dirs.flatten() {
        let db_name = db_dir.file_name().to_string_lossy().to_string();
        if let Some(want) = name {
            if db_name != want {
                continue;
            }
        }
        let Ok(version_dirs) = std::fs::read_dir(db_dir.path()) else { continue };
        for version_dir in version_dirs.flatten() {
            let version = version_dir.file_name().to_string_lossy().to_string();
            if version.ends_with('~') {
                continue;
            }
            let Ok(flavor_dirs) = std::fs::read_dir(version_dir.path()) else { continue };
            for flavor_dir in flavor_dirs.flatten() {
                let header_path = flavor_dir.path().join(define::HEADER_FILE);
                if !header_path.exists() {
                    continue;
                }
                let complete = Header::load(&header_path)
                    .map(|h| crate::info::is_complete(&h))
                    .unwrap_or(false);
                results.push(CachedEntry {
                    path: flavor_dir.path(),
                    name: db_name.clone(),
                    flavor_id: flavor_dir.file_name().to_string_lossy().to_string(),
                    version: version.clone(),
                    complete,
                });
            }
        }
    }
    results
}

/// The dependency table of `name`/`version` (latest if `version` is
/// `None`), cached locally.
pub async fn dependencies(config: &Config, name: &str, version: Option<&str>) -> Result<Dependencies> {
    let version = resolve_version(config, name, version).await?;
    let db_root = cache::database_cache_root(config, name, &version, None, None)?;
    let deps_path = db_root.join(define::DEPENDENCIES_FILE);

    if let Ok(deps) = Dependencies::load(&deps_path) {
        return Ok(deps);
    }

    let (_, interface) = crate::utils::lookup(config, name, &version).await?;
    let archive = Interface::join(&[name, "db"]);
    interface.get_archive(&archive, &db_root, &version, None).await?;
    let deps = Dependencies::load(&db_root.join(define::DEPENDENCIES_FILE))?;
    deps.save(&deps_path)?;
    Ok(deps)
}

/// Whether a particular flavor of `name`/`version` already exists in the
/// local cache.
pub fn exists(config: &Config, name: &str, version: &str, flavor: Option<&Flavor>, cache_root: Option<&Path>) -> bool {
    let rel = cache::relative_path(name, version, flavor);
    let roots: Vec<PathBuf> = match cache_root {
        Some(r) => vec![r.to_path_buf()],
        None => vec![
            cache::default_cache_root(config, true),
            cache::default_cache_root(config, false),
        ],
    };
    roots.iter().any(|root| root.join(&rel).exists())
}

/// Relative cache path a flavor of `name`/`version` would be stored
/// under.
pub fn flavor_path(flavor: &Flavor, name: &str, version: &str) -> String {
    flavor.path(name, version)
}

pub async fn latest_version(config: &Config, name: &str) -> Result<String> {
    Ok(load::latest_version(config, name).await?)
}

pub async fn versions(config: &Config, name: &str) -> Result<Vec<String>> {
    Ok(load::versions(config, name).await?)
}

/// The repository storing `name`/`version`.
pub async fn repository(config: &Config, name: &str, version: &str) -> Result<Repository> {
    crate::utils::repository(config, name, version).await
}

/// Tombstone `file` across every published version of `name`.
pub async fn remove_media(config: &Config, name: &str, file: &str) -> Result<()> {
    Ok(load::remove_media(config, name, file).await?)
}

pub async fn load(config: &Config, name: &str, version: Option<&str>, options: LoadOptions) -> Result<Option<LoadedDatabase>> {
    Ok(load::load(config, name, version, options).await?)
}

/// Mirror `name`/`version`'s unflavored bytes into `root`, the starting
/// point for a new publish.
pub async fn load_to(config: &Config, root: &Path, name: &str, version: &str) -> Result<()> {
    Ok(load::load_to(config, root, name, version).await?)
}

pub async fn load_table(config: &Config, name: &str, table_id: &str, version: &str) -> Result<Table> {
    Ok(load::load_table(config, name, table_id, version, None).await?)
}

pub async fn load_media(config: &Config, name: &str, file: &str, version: &str, flavor: Option<&Flavor>) -> Result<PathBuf> {
    Ok(load::load_media(config, name, file, version, flavor, None).await?)
}

pub async fn load_attachment(config: &Config, name: &str, attachment_id: &str, version: &str) -> Result<PathBuf> {
    Ok(load::load_attachment(config, name, attachment_id, version, None).await?)
}

pub async fn publish(
    db_root: &Path,
    header: &Header,
    tables: &HashMap<String, Table>,
    version: &str,
    repository: &Repository,
    options: PublishOptions,
) -> Result<Dependencies> {
    Ok(publish::publish(db_root, header, tables, version, repository, options).await?)
}

/// Build a row-batch stream over `table_id` of `name`/`version`.
pub async fn stream<'a>(
    config: &'a Config,
    name: &str,
    table_id: &str,
    version: Option<&str>,
    batch_size: usize,
    shuffle: bool,
    buffer_size: usize,
) -> Result<TableStream<'a>> {
    let version = resolve_version(config, name, version).await?;
    let table = load::load_table(config, name, table_id, &version, None).await?;
    Ok(TableStream::new(config, name, version, table, batch_size, shuffle, buffer_size, false, None, None))
}

async fn resolve_version(config: &Config, name: &str, version: Option<&str>) -> Result<String> {
    match version {
        Some(v) => Ok(v.to_string()),
        None => latest_version(config, name).await,
    }
}

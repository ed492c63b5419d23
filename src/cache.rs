//! Cache layout (C2): per-database, per-version, per-flavor cache paths.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::Config;
use crate::flavor::Flavor;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default (unshared or shared) cache root.
///
/// Looks up `AUDB_CACHE_ROOT` / `AUDB_SHARED_CACHE_ROOT` first, falling
/// back to the configured constant.
pub fn default_cache_root(config: &Config, shared: bool) -> PathBuf {
    if shared {
        std::env::var("AUDB_SHARED_CACHE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config.shared_cache_root.clone())
    } else {
        std::env::var("AUDB_CACHE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config.cache_root.clone())
    }
}

/// Relative path segment for a flavor, or plain `<name>/<version>` for raw
/// (unflavored) loads.
pub fn relative_path(name: &str, version: &str, flavor: Option<&Flavor>) -> PathBuf {
    match flavor {
        Some(f) => PathBuf::from(f.path(name, version)),
        None => PathBuf::from(name).join(version),
    }
}

/// Compute and create the per-database cache folder.
///
/// The shared cache root is checked first: if it already contains the
/// target folder, that one is used; otherwise the user cache root is
/// created and returned.
pub fn database_cache_root(
    config: &Config,
    name: &str,
    version: &str,
    cache_root: Option<&Path>,
    flavor: Option<&Flavor>,
) -> Result<PathBuf, CacheError> {
    let rel = relative_path(name, version, flavor);

    let candidates: Vec<PathBuf> = match cache_root {
        Some(root) => vec![root.to_path_buf()],
        None => vec![
            default_cache_root(config, true),
            default_cache_root(config, false),
        ],
    };

    // Defaults to the last candidate (the user root) unless an earlier one
    // (the shared root, checked first) already contains the target.
    let mut chosen = candidates[candidates.len() - 1].join(&rel);
    for root in &candidates {
        let candidate = root.join(&rel);
        if candidate.exists() {
            chosen = candidate;
            break;
        }
    }

    std::fs::create_dir_all(&chosen)?;
    Ok(chosen)
}

/// Temporary sibling folder used for atomic installs: `<db_root>~`.
pub fn database_tmp_root(db_root: &Path) -> Result<PathBuf, CacheError> {
    let mut tmp = db_root.as_os_str().to_owned();
    tmp.push("~");
    let tmp = PathBuf::from(tmp);
    std::fs::create_dir_all(&tmp)?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repository;

    fn test_config(cache_root: &Path, shared_root: &Path) -> Config {
        Config {
            cache_root: cache_root.to_path_buf(),
            shared_cache_root: shared_root.to_path_buf(),
            repositories: vec![Repository::new("test", "test-host", "file-system")],
        }
    }

    #[test]
    fn creates_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let cache_root = dir.path().join("cache");
        let shared_root = dir.path().join("shared");
        let config = test_config(&cache_root, &shared_root);

        let root = database_cache_root(&config, "mydb", "1.0.0", None, None).unwrap();
        assert!(root.exists());
        assert_eq!(root, cache_root.join("mydb").join("1.0.0"));
    }

    #[test]
    fn tmp_root_is_sibling_with_tilde() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mydb").join("1.0.0");
        std::fs::create_dir_all(&root).unwrap();
        let tmp = database_tmp_root(&root).unwrap();
        assert_eq!(tmp.file_name().unwrap(), "1.0.0~");
    }
}

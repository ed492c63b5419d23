//! Process-wide configuration (§6.4): cache roots and the ordered
//! repository list, seeded from environment variables and a user config
//! file, mirroring the teacher's `Config::load()` / `Config::from_env()`
//! split between dev and production sources.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::repository::Repository;

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_root: PathBuf,
    pub shared_cache_root: PathBuf,
    pub repositories: Vec<Repository>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    name: Option<String>,
    host: Option<String>,
    backend: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfigFile {
    cache_root: Option<String>,
    shared_cache_root: Option<String>,
    repositories: Option<Vec<RawRepository>>,
}

impl Config {
    /// Default cache roots (`~/audb`, `~/audb-shared`) and an empty
    /// repository list: used when no config file is present.
    pub fn defaults() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Config {
            cache_root: home.join("audb"),
            shared_cache_root: home.join("audb-shared"),
            repositories: Vec::new(),
        }
    }

    /// Load configuration from the user config file, with legacy fallback
    /// path, the way `Config::load()` tries `.env` before falling back to
    /// `config.yaml` in the teacher crate.
    ///
    /// Returns a [`crate::error::Error::Config`] if a `repositories:`
    /// section is present but empty, or a repository entry is missing
    /// `name`, `host`, or `backend`.
    pub fn load() -> Result<Self, crate::error::Error> {
        let primary = user_config_path();
        let legacy = legacy_user_config_path();

        let path = if primary.exists() {
            Some(primary)
        } else if legacy.exists() {
            Some(legacy)
        } else {
            None
        };

        match path {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::defaults()),
        }
    }

    fn load_from_file(path: &Path) -> Result<Self, crate::error::Error> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| crate::error::Error::Config(format!("{}: {e}", path.display())))?;
        let raw: RawConfigFile = serde_yaml::from_str(&text)
            .map_err(|e| crate::error::Error::Config(format!("{}: {e}", path.display())))?;

        let mut config = Self::defaults();

        if let Some(cache_root) = raw.cache_root {
            config.cache_root = PathBuf::from(cache_root);
        }
        if let Some(shared_cache_root) = raw.shared_cache_root {
            config.shared_cache_root = PathBuf::from(shared_cache_root);
        }

        if let Some(repositories) = raw.repositories {
            if repositories.is_empty() {
                return Err(crate::error::Error::Config(format!(
                    "you cannot specify an empty 'repositories:' section in the configuration file '{}'",
                    path.display()
                )));
            }
            let mut parsed = Vec::with_capacity(repositories.len());
            for repo in repositories {
                let name = repo.name.ok_or_else(|| {
                    crate::error::Error::Config("repository is missing a 'name' entry".into())
                })?;
                let host = repo.host.ok_or_else(|| {
                    crate::error::Error::Config("repository is missing a 'host' entry".into())
                })?;
                let backend = repo.backend.ok_or_else(|| {
                    crate::error::Error::Config("repository is missing a 'backend' entry".into())
                })?;
                parsed.push(Repository::new(name, host, backend));
            }
            config.repositories = parsed;
        }

        Ok(config)
    }
}

fn user_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("audb.yaml")
}

fn legacy_user_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".audb.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_repositories_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audb.yaml");
        std::fs::write(&path, "repositories: []\n").unwrap();
        let err = Config::load_from_file(&path).unwrap_err();
        assert!(matches!(err, crate::error::Error::Config(_)));
    }

    #[test]
    fn rejects_repository_missing_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audb.yaml");
        std::fs::write(&path, "repositories:\n  - name: data\n    backend: file-system\n").unwrap();
        let err = Config::load_from_file(&path).unwrap_err();
        assert!(matches!(err, crate::error::Error::Config(_)));
    }

    #[test]
    fn parses_full_repository_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audb.yaml");
        std::fs::write(
            &path,
            "cache_root: /tmp/audb\nrepositories:\n  - name: data\n    host: /srv\n    backend: file-system\n",
        )
        .unwrap();
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.cache_root, PathBuf::from("/tmp/audb"));
        assert_eq!(config.repositories.len(), 1);
        assert_eq!(config.repositories[0].backend, "file-system");
    }
}

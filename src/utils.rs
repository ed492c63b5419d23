//! Small helpers shared by the publish/load pipelines: repository lookup
//! across the configured list and file checksumming.
//!
//! Grounded in `original_source/audb/core/utils.py`'s `_lookup`/
//! `repository` functions.

use std::path::Path;

use md5::{Digest, Md5};

use crate::backend::Interface;
use crate::config::Config;
use crate::define::HEADER_FILE;
use crate::error::{Error, Result};
use crate::repository::Repository;

/// Find the first repository (in configured order) that already holds
/// `name`/`version`, returning it together with the `Interface` built
/// from it.
pub async fn lookup(config: &Config, name: &str, version: &str) -> Result<(Repository, Interface)> {
    for repository in &config.repositories {
        let interface = repository.create_interface()?;
        let header_path = Interface::join(&[name, HEADER_FILE]);
        if interface.exists(&header_path, version).await? {
            return Ok((repository.clone(), interface));
        }
    }
    Err(Error::VersionNotFound(version.to_string(), name.to_string()))
}

/// Find the repository storing `name`/`version`.
pub async fn repository(config: &Config, name: &str, version: &str) -> Result<Repository> {
    Ok(lookup(config, name, version).await?.0)
}

/// MD5 checksum of a file's contents, hex-encoded (§4.4's `checksum`
/// field).
pub fn checksum(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"hello").unwrap();
        let a = checksum(&path).unwrap();
        let b = checksum(&path).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}

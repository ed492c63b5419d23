//! Repository config (§3.5): `(name, host, backend_kind)` plus the choice
//! of remote layout (Maven-like vs. flat versioned, §6.3) that goes with a
//! given backend kind.

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, FileSystemBackend, Interface, Layout};

/// A repository a database may be published to or loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub host: String,
    pub backend: String,
}

impl Repository {
    pub fn new(name: impl Into<String>, host: impl Into<String>, backend: impl Into<String>) -> Self {
        Repository {
            name: name.into(),
            host: host.into(),
            backend: backend.into(),
        }
    }

    /// Build the interface (backend + layout) used to talk to this
    /// repository. `"artifactory"` gets the Maven-like layout (legacy
    /// hosts); every other backend kind gets the flat Versioned layout.
    pub fn create_interface(&self) -> Result<Interface, crate::backend::BackendError> {
        let layout = if self.backend == "artifactory" {
            Layout::Maven
        } else {
            Layout::Versioned
        };
        let backend = create_backend(&self.backend, &self.host, &self.name)?;
        Ok(Interface::new(backend, layout))
    }
}

impl std::fmt::Display for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Repository('{}', '{}', '{}')", self.name, self.host, self.backend)
    }
}

/// Backend registry: maps a backend kind name to a concrete [`Backend`].
///
/// `"file-system"` and `"artifactory"` both resolve to the local
/// filesystem driver (file-system backed storage rooted at `host`); they
/// differ only in the remote layout chosen by [`Repository::create_interface`].
/// `"s3"` resolves to the S3 driver.
fn create_backend(
    backend_kind: &str,
    host: &str,
    repository_name: &str,
) -> Result<Box<dyn Backend>, crate::backend::BackendError> {
    match backend_kind {
        "file-system" | "artifactory" => {
            Ok(Box::new(FileSystemBackend::new(host, repository_name)?))
        }
        "s3" => Ok(Box::new(crate::backend::S3Backend::new_lazy(
            host.to_string(),
            repository_name.to_string(),
        ))),
        other => Err(crate::backend::BackendError::UnknownBackend(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_python_repr_style() {
        let repo = Repository::new("data-public", "/srv/data", "file-system");
        assert_eq!(
            format!("{repo}"),
            "Repository('data-public', '/srv/data', 'file-system')"
        );
    }
}

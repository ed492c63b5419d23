use thiserror::Error;

use crate::backend::BackendError;
use crate::cache::CacheError;
use crate::dependencies::DependenciesError;
use crate::flavor::FlavorError;
use crate::header::HeaderError;
use crate::load::LoadError;
use crate::lock::LockError;
use crate::publish::PublishError;
use crate::table::TableError;

/// Top-level error returned by the public API in [`crate::api`].
///
/// Mirrors the teacher's `CheckoutError`, which aggregates the errors of
/// every collaborator it calls through `#[from]` conversions.
#[derive(Error, Debug)]
pub enum Error {
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("flavor error: {0}")]
    Flavor(#[from] FlavorError),
    #[error(transparent)]
    Dependencies(#[from] DependenciesError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("database '{0}' not found")]
    DatabaseNotFound(String),
    #[error("version '{0}' not found for database '{1}'")]
    VersionNotFound(String, String),
    #[error("table '{0}' not found")]
    TableNotFound(String),
    #[error("attachment '{0}' not found")]
    AttachmentNotFound(String),
    #[error("version '{0}' already exists for database '{1}'")]
    VersionExists(String, String),
    #[error("dependency mismatch with previous version '{0}': {1}")]
    DependencyConflict(String, String),
    #[error("database is not portable: {0}")]
    NotPortable(String),
    #[error("{0} files referenced in tables cannot be found: {1:?}")]
    MissingFiles(usize, Vec<String>),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Minimal database header/table object model (§6.1 Supplemented).
//!
//! `original_source/audb/core/*.py` drives everything through
//! `audformat.Database`, an external annotation framework with no Rust
//! equivalent anywhere in the pack. This module supplies just enough of
//! it to drive publish/load: a `Header` carrying table/scheme/split/
//! rater/attachment metadata plus a free-form `meta` map, and table path
//! operations (`is_portable`, `pick_tables`, `pick_files`, `drop_files`,
//! `map_file_path`, `replace_file_extension`, `expand_file_path`,
//! `filewise_index`, `segmented_index`) used by the publish and load
//! pipelines.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::table::Table;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("table '{0}' not found")]
    TableNotFound(String),
}

/// Whether a table is indexed by file, by file+segment, or carries no
/// media index at all (pure metadata, e.g. speaker info).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    Filewise,
    Segmented,
    Misc,
}

/// A labelling scheme; `uses_misc_table` marks schemes whose values are
/// drawn from a misc table rather than a fixed label set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scheme {
    pub uses_misc_table: bool,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub tables: HashMap<String, TableKind>,
    pub schemes: HashMap<String, Scheme>,
    pub splits: Vec<String>,
    pub raters: Vec<String>,
    pub attachments: HashMap<String, PathBuf>,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl Header {
    pub fn new(name: impl Into<String>) -> Self {
        Header {
            name: name.into(),
            tables: HashMap::new(),
            schemes: HashMap::new(),
            splits: Vec::new(),
            raters: Vec::new(),
            attachments: HashMap::new(),
            meta: serde_json::Map::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, HeaderError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), HeaderError> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// A database is portable if none of its table indices reference an
    /// absolute path or a path that escapes the database root via `..`.
    pub fn is_portable(&self, tables: &HashMap<String, Table>) -> bool {
        tables
            .values()
            .flat_map(|t| t.file_paths())
            .all(|f| {
                let p = Path::new(&f);
                !p.is_absolute() && !p.components().any(|c| c == std::path::Component::ParentDir)
            })
    }

    /// Restrict the header (and the given table map in place) to the
    /// named tables only.
    pub fn pick_tables(&mut self, tables: &mut HashMap<String, Table>, ids: &[String]) {
        self.tables.retain(|id, _| ids.contains(id));
        tables.retain(|id, _| ids.contains(id));
    }
}

/// Restrict every table's index to rows whose file is in `files`.
pub fn pick_files(tables: &mut HashMap<String, Table>, files: &[String]) {
    for table in tables.values_mut() {
        table.retain(|f| files.contains(&f.to_string()));
    }
}

/// Drop rows whose file is in `files` from every table's index.
pub fn drop_files(tables: &mut HashMap<String, Table>, files: &[String]) {
    for table in tables.values_mut() {
        table.retain(|f| !files.contains(&f.to_string()));
    }
}

/// Apply `f` to every file path in every table's index.
pub fn map_file_path(tables: &mut HashMap<String, Table>, f: impl Fn(&str) -> String) {
    for table in tables.values_mut() {
        table.map_paths(&f);
    }
}

/// Replace the extension of every file path in every table's index.
pub fn replace_file_extension(tables: &mut HashMap<String, Table>, ext: &str) {
    map_file_path(tables, |path| {
        match path.rsplit_once('.') {
            Some((stem, _)) => format!("{stem}.{ext}"),
            None => format!("{path}.{ext}"),
        }
    });
}

/// Prepend `root` to every (relative) file path in every table's index.
pub fn expand_file_path(tables: &mut HashMap<String, Table>, root: &Path) {
    let root = root.to_string_lossy().to_string();
    map_file_path(tables, |path| {
        if Path::new(path).is_absolute() {
            path.to_string()
        } else {
            format!("{}/{}", root.trim_end_matches('/'), path)
        }
    });
}

/// Table ids with a filewise index.
pub fn filewise_index(header: &Header) -> Vec<String> {
    header
        .tables
        .iter()
        .filter(|(_, kind)| **kind == TableKind::Filewise)
        .map(|(id, _)| id.clone())
        .collect()
}

/// Table ids with a segmented (file + start/end) index.
pub fn segmented_index(header: &Header) -> Vec<String> {
    header
        .tables
        .iter()
        .filter(|(_, kind)| **kind == TableKind::Segmented)
        .map(|(id, _)| id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableIndex;

    fn sample_tables() -> HashMap<String, Table> {
        let mut tables = HashMap::new();
        tables.insert(
            "emotion".to_string(),
            Table::new(TableIndex::Filewise(vec!["a.wav".to_string(), "b.wav".to_string()])),
        );
        tables
    }

    #[test]
    fn is_portable_rejects_absolute_paths() {
        let header = Header::new("db");
        let mut tables = sample_tables();
        assert!(header.is_portable(&tables));

        tables.insert(
            "abs".to_string(),
            Table::new(TableIndex::Filewise(vec!["/etc/passwd".to_string()])),
        );
        assert!(!header.is_portable(&tables));
    }

    #[test]
    fn pick_tables_restricts_header_and_map() {
        let mut header = Header::new("db");
        header.tables.insert("emotion".to_string(), TableKind::Filewise);
        header.tables.insert("speaker".to_string(), TableKind::Misc);
        let mut tables = sample_tables();
        tables.insert("speaker".to_string(), Table::new(TableIndex::Filewise(vec![])));

        header.pick_tables(&mut tables, &["emotion".to_string()]);
        assert_eq!(header.tables.len(), 1);
        assert_eq!(tables.len(), 1);
        assert!(tables.contains_key("emotion"));
    }

    #[test]
    fn pick_and_drop_files_filter_index() {
        let mut tables = sample_tables();
        pick_files(&mut tables, &["a.wav".to_string()]);
        assert_eq!(tables["emotion"].file_paths(), vec!["a.wav".to_string()]);

        let mut tables = sample_tables();
        drop_files(&mut tables, &["a.wav".to_string()]);
        assert_eq!(tables["emotion"].file_paths(), vec!["b.wav".to_string()]);
    }

    #[test]
    fn replace_file_extension_swaps_suffix() {
        let mut tables = sample_tables();
        replace_file_extension(&mut tables, "flac");
        assert_eq!(
            tables["emotion"].file_paths(),
            vec!["a.flac".to_string(), "b.flac".to_string()]
        );
    }

    #[test]
    fn expand_file_path_prepends_root() {
        let mut tables = sample_tables();
        expand_file_path(&mut tables, Path::new("/data/db"));
        assert_eq!(
            tables["emotion"].file_paths(),
            vec!["/data/db/a.wav".to_string(), "/data/db/b.wav".to_string()]
        );
    }

    #[test]
    fn filewise_and_segmented_index_partition_by_kind() {
        let mut header = Header::new("db");
        header.tables.insert("emotion".to_string(), TableKind::Filewise);
        header.tables.insert("events".to_string(), TableKind::Segmented);
        assert_eq!(filewise_index(&header), vec!["emotion".to_string()]);
        assert_eq!(segmented_index(&header), vec!["events".to_string()]);
    }
}

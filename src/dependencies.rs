//! Dependency table (C4, §4.4): the fixed-schema manifest mapping a
//! logical file path to the archive/version/checksum/media-metadata row
//! describing it.
//!
//! Grounded in `original_source/audb/core/dependencies.py`'s
//! `Dependencies` class — same field set, same O(1) single-key access
//! via `__getitem__`/`__contains__`, same accessor names — persisted via
//! `bincode` (canonical, rows sorted by file path for deterministic
//! bytes) with legacy `csv` reads for the text format `define.py` also
//! supports.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::define::DependType;

#[derive(Error, Debug)]
pub enum DependenciesError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("file '{0}' not found in dependency table")]
    FileNotFound(String),
    #[error("invalid depend type value: {0}")]
    InvalidDependType(i32),
}

/// One row of the dependency table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependRow {
    pub archive: String,
    pub bit_depth: u16,
    pub channels: u16,
    pub checksum: String,
    pub duration: f64,
    pub format: String,
    pub removed: bool,
    pub sampling_rate: u32,
    #[serde(rename = "type")]
    pub type_: DependType,
    pub version: String,
}

impl DependRow {
    fn meta(archive: &str, checksum: &str, version: &str, type_: DependType) -> Self {
        DependRow {
            archive: archive.to_string(),
            bit_depth: 0,
            channels: 0,
            checksum: checksum.to_string(),
            duration: 0.0,
            format: String::new(),
            removed: false,
            sampling_rate: 0,
            type_,
            version: version.to_string(),
        }
    }
}

/// On-disk row shape, kept separate from [`DependRow`] so bincode's
/// serialization of `DependType` (an enum) doesn't leak into the legacy
/// CSV's plain integer column.
#[derive(Debug, Serialize, Deserialize)]
struct SerializedEntry {
    file: String,
    row: DependRow,
}

#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    data: HashMap<String, DependRow>,
}

impl Dependencies {
    pub fn new() -> Self {
        Dependencies { data: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, file: &str) -> bool {
        self.data.contains_key(file)
    }

    pub fn get(&self, file: &str) -> Result<&DependRow, DependenciesError> {
        self.data
            .get(file)
            .ok_or_else(|| DependenciesError::FileNotFound(file.to_string()))
    }

    pub fn files(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    pub fn archives(&self) -> Vec<String> {
        let mut archives: Vec<String> = self
            .data
            .values()
            .map(|row| row.archive.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        archives.sort();
        archives
    }

    pub fn media(&self) -> Vec<String> {
        self.filter_type(DependType::Media, false)
    }

    pub fn removed_media(&self) -> Vec<String> {
        self.data
            .iter()
            .filter(|(_, row)| row.type_ == DependType::Media && row.removed)
            .map(|(file, _)| file.clone())
            .collect()
    }

    pub fn tables(&self) -> Vec<String> {
        self.filter_type(DependType::Meta, false)
    }

    pub fn attachments(&self) -> Vec<String> {
        self.filter_type(DependType::Attachment, false)
    }

    /// File stems of every `db.<table-id>.*` meta entry, i.e. the table
    /// ids present in this dependency table.
    pub fn table_ids(&self) -> Vec<String> {
        self.tables()
            .into_iter()
            .filter_map(|f| {
                f.strip_prefix("db.")
                    .and_then(|rest| rest.split('.').next())
                    .map(|id| id.to_string())
            })
            .collect()
    }

    fn filter_type(&self, type_: DependType, removed: bool) -> Vec<String> {
        self.data
            .iter()
            .filter(|(_, row)| row.type_ == type_ && row.removed == removed)
            .map(|(file, _)| file.clone())
            .collect()
    }

    pub fn archive(&self, file: &str) -> Result<&str, DependenciesError> {
        Ok(&self.get(file)?.archive)
    }

    pub fn bit_depth(&self, file: &str) -> Result<u16, DependenciesError> {
        Ok(self.get(file)?.bit_depth)
    }

    pub fn channels(&self, file: &str) -> Result<u16, DependenciesError> {
        Ok(self.get(file)?.channels)
    }

    pub fn checksum(&self, file: &str) -> Result<&str, DependenciesError> {
        Ok(&self.get(file)?.checksum)
    }

    pub fn duration(&self, file: &str) -> Result<f64, DependenciesError> {
        Ok(self.get(file)?.duration)
    }

    pub fn format(&self, file: &str) -> Result<&str, DependenciesError> {
        Ok(&self.get(file)?.format)
    }

    pub fn is_removed(&self, file: &str) -> Result<bool, DependenciesError> {
        Ok(self.get(file)?.removed)
    }

    pub fn sampling_rate(&self, file: &str) -> Result<u32, DependenciesError> {
        Ok(self.get(file)?.sampling_rate)
    }

    pub fn type_of(&self, file: &str) -> Result<DependType, DependenciesError> {
        Ok(self.get(file)?.type_)
    }

    pub fn version(&self, file: &str) -> Result<&str, DependenciesError> {
        Ok(&self.get(file)?.version)
    }

    pub fn add_media(
        &mut self,
        file: impl Into<String>,
        archive: impl Into<String>,
        bit_depth: u16,
        channels: u16,
        checksum: impl Into<String>,
        duration: f64,
        format: impl Into<String>,
        sampling_rate: u32,
        version: impl Into<String>,
    ) {
        self.data.insert(
            file.into(),
            DependRow {
                archive: archive.into(),
                bit_depth,
                channels,
                checksum: checksum.into(),
                duration,
                format: format.into(),
                removed: false,
                sampling_rate,
                type_: DependType::Media,
                version: version.into(),
            },
        );
    }

    pub fn add_meta(
        &mut self,
        file: impl Into<String>,
        archive: impl Into<String>,
        checksum: impl Into<String>,
        version: impl Into<String>,
    ) {
        self.data.insert(
            file.into(),
            DependRow::meta(&archive.into(), &checksum.into(), &version.into(), DependType::Meta),
        );
    }

    pub fn add_attachment(
        &mut self,
        file: impl Into<String>,
        archive: impl Into<String>,
        checksum: impl Into<String>,
        version: impl Into<String>,
    ) {
        self.data.insert(
            file.into(),
            DependRow::meta(&archive.into(), &checksum.into(), &version.into(), DependType::Attachment),
        );
    }

    /// Update an existing media row's checksum/duration without touching
    /// its archive or version (content changed but the archive didn't).
    pub fn update_media(&mut self, file: &str, checksum: impl Into<String>, duration: f64) -> Result<(), DependenciesError> {
        let row = self.data.get_mut(file).ok_or_else(|| DependenciesError::FileNotFound(file.to_string()))?;
        row.checksum = checksum.into();
        row.duration = duration;
        Ok(())
    }

    pub fn update_media_version(&mut self, file: &str, version: impl Into<String>) -> Result<(), DependenciesError> {
        let row = self.data.get_mut(file).ok_or_else(|| DependenciesError::FileNotFound(file.to_string()))?;
        row.version = version.into();
        Ok(())
    }

    /// Mark a file as removed (tombstone), keeping its last-known row.
    pub fn remove(&mut self, file: &str) -> Result<(), DependenciesError> {
        let row = self.data.get_mut(file).ok_or_else(|| DependenciesError::FileNotFound(file.to_string()))?;
        row.removed = true;
        Ok(())
    }

    /// Drop a row outright (used when a file is superseded within the
    /// same publish and never needs a tombstone).
    pub fn drop(&mut self, file: &str) {
        self.data.remove(file);
    }

    /// Save in the canonical columnar form: rows sorted by file path so
    /// the output is byte-identical regardless of insertion order.
    pub fn save(&self, path: &Path) -> Result<(), DependenciesError> {
        let mut entries: Vec<SerializedEntry> = self
            .data
            .iter()
            .map(|(file, row)| SerializedEntry {
                file: file.clone(),
                row: row.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.file.cmp(&b.file));
        let bytes = bincode::serialize(&entries)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, DependenciesError> {
        let bytes = std::fs::read(path)?;
        let entries: Vec<SerializedEntry> = bincode::deserialize(&bytes)?;
        let data = entries.into_iter().map(|e| (e.file, e.row)).collect();
        Ok(Dependencies { data })
    }

    /// Read the legacy row-oriented CSV format still accepted for
    /// backward compatibility (§6.2).
    pub fn load_legacy_csv(path: &Path) -> Result<Self, DependenciesError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut data = HashMap::new();
        for result in reader.records() {
            let record = result?;
            let file = record.get(0).unwrap_or_default().to_string();
            let archive = record.get(1).unwrap_or_default().to_string();
            let bit_depth = record.get(2).unwrap_or("0").parse().unwrap_or(0);
            let channels = record.get(3).unwrap_or("0").parse().unwrap_or(0);
            let checksum = record.get(4).unwrap_or_default().to_string();
            let duration = record.get(5).unwrap_or("0").parse().unwrap_or(0.0);
            let format = record.get(6).unwrap_or_default().to_string();
            let removed = record.get(7).unwrap_or("0") == "1";
            let sampling_rate = record.get(8).unwrap_or("0").parse().unwrap_or(0);
            let type_value: i32 = record.get(9).unwrap_or("0").parse().unwrap_or(0);
            let type_ = DependType::from_i32(type_value)
                .ok_or(DependenciesError::InvalidDependType(type_value))?;
            let version = record.get(10).unwrap_or_default().to_string();

            data.insert(
                file,
                DependRow {
                    archive,
                    bit_depth,
                    channels,
                    checksum,
                    duration,
                    format,
                    removed,
                    sampling_rate,
                    type_,
                    version,
                },
            );
        }
        Ok(Dependencies { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dependencies {
        let mut deps = Dependencies::new();
        deps.add_media("a.wav", "archive1", 16, 1, "abc123", 1.5, "wav", 16000, "1.0.0");
        deps.add_meta("db.emotion.csv", "archive2", "def456", "1.0.0");
        deps
    }

    #[test]
    fn getitem_and_contains() {
        let deps = sample();
        assert!(deps.contains("a.wav"));
        assert!(!deps.contains("missing.wav"));
        assert_eq!(deps.bit_depth("a.wav").unwrap(), 16);
        assert_eq!(deps.type_of("db.emotion.csv").unwrap(), DependType::Meta);
    }

    #[test]
    fn media_and_tables_partition_by_type() {
        let deps = sample();
        assert_eq!(deps.media(), vec!["a.wav".to_string()]);
        assert_eq!(deps.tables(), vec!["db.emotion.csv".to_string()]);
        assert_eq!(deps.table_ids(), vec!["emotion".to_string()]);
    }

    #[test]
    fn remove_tombstones_without_dropping() {
        let mut deps = sample();
        deps.remove("a.wav").unwrap();
        assert!(deps.contains("a.wav"));
        assert!(deps.is_removed("a.wav").unwrap());
        assert_eq!(deps.removed_media(), vec!["a.wav".to_string()]);
    }

    #[test]
    fn save_is_deterministic_regardless_of_insertion_order() {
        let dir = tempfile::tempdir().unwrap();

        let mut a = Dependencies::new();
        a.add_media("a.wav", "arc", 16, 1, "x", 1.0, "wav", 16000, "1.0.0");
        a.add_media("b.wav", "arc", 16, 1, "y", 1.0, "wav", 16000, "1.0.0");

        let mut b = Dependencies::new();
        b.add_media("b.wav", "arc", 16, 1, "y", 1.0, "wav", 16000, "1.0.0");
        b.add_media("a.wav", "arc", 16, 1, "x", 1.0, "wav", 16000, "1.0.0");

        let path_a = dir.path().join("a.bin");
        let path_b = dir.path().join("b.bin");
        a.save(&path_a).unwrap();
        b.save(&path_b).unwrap();

        assert_eq!(std::fs::read(&path_a).unwrap(), std::fs::read(&path_b).unwrap());
    }

    #[test]
    fn bin_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let deps = sample();
        let path = dir.path().join("db.bin");
        deps.save(&path).unwrap();
        let loaded = Dependencies::load(&path).unwrap();
        assert_eq!(loaded.files().len(), deps.files().len());
        assert_eq!(loaded.archive("a.wav").unwrap(), "archive1");
    }

    #[test]
    fn legacy_csv_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.csv");
        std::fs::write(
            &path,
            "file,archive,bit_depth,channels,checksum,duration,format,removed,sampling_rate,type,version\n\
             a.wav,arc,16,1,abc,1.5,wav,0,16000,1,1.0.0\n",
        )
        .unwrap();
        let deps = Dependencies::load_legacy_csv(&path).unwrap();
        assert_eq!(deps.archive("a.wav").unwrap(), "arc");
        assert_eq!(deps.type_of("a.wav").unwrap(), DependType::Media);
    }
}

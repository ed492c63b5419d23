//! Table object (§6.1 Supplemented): a filewise or segmented index plus
//! opaque string-keyed columns, persisted either as legacy CSV
//! (`db.<table_id>.csv`) or the columnar form (`db.<table_id>.bin`, via
//! `bincode`, the same determinism-by-sorting approach as
//! [`crate::dependencies`]).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

/// A row reference: either one file per row, or a file plus a segment
/// (start, end) in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableIndex {
    Filewise(Vec<String>),
    Segmented(Vec<(String, f64, f64)>),
}

impl TableIndex {
    fn len(&self) -> usize {
        match self {
            TableIndex::Filewise(v) => v.len(),
            TableIndex::Segmented(v) => v.len(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    pub index: Option<TableIndex>,
    /// Column name -> one opaque string value per row.
    pub columns: BTreeMap<String, Vec<String>>,
}

impl Table {
    pub fn new(index: TableIndex) -> Self {
        Table {
            index: Some(index),
            columns: BTreeMap::new(),
        }
    }

    pub fn misc() -> Self {
        Table {
            index: None,
            columns: BTreeMap::new(),
        }
    }

    pub fn file_paths(&self) -> Vec<String> {
        match &self.index {
            Some(TableIndex::Filewise(files)) => files.clone(),
            Some(TableIndex::Segmented(segments)) => {
                segments.iter().map(|(f, _, _)| f.clone()).collect()
            }
            None => Vec::new(),
        }
    }

    /// Keep only rows (and their column values) for which `keep` returns
    /// true on the row's file path.
    pub fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        let mask: Vec<bool> = match &self.index {
            Some(TableIndex::Filewise(files)) => files.iter().map(|f| keep(f)).collect(),
            Some(TableIndex::Segmented(segments)) => {
                segments.iter().map(|(f, _, _)| keep(f)).collect()
            }
            None => return,
        };

        match &mut self.index {
            Some(TableIndex::Filewise(files)) => {
                *files = files
                    .iter()
                    .zip(&mask)
                    .filter(|(_, keep)| **keep)
                    .map(|(f, _)| f.clone())
                    .collect();
            }
            Some(TableIndex::Segmented(segments)) => {
                *segments = segments
                    .iter()
                    .zip(&mask)
                    .filter(|(_, keep)| **keep)
                    .map(|(s, _)| s.clone())
                    .collect();
            }
            None => {}
        }

        for values in self.columns.values_mut() {
            *values = values
                .iter()
                .zip(&mask)
                .filter(|(_, keep)| **keep)
                .map(|(v, _)| v.clone())
                .collect();
        }
    }

    /// Apply `f` to every file path in this table's index, in place.
    pub fn map_paths(&mut self, f: impl Fn(&str) -> String) {
        match &mut self.index {
            Some(TableIndex::Filewise(files)) => {
                for file in files.iter_mut() {
                    *file = f(file);
                }
            }
            Some(TableIndex::Segmented(segments)) => {
                for (file, _, _) in segments.iter_mut() {
                    *file = f(file);
                }
            }
            None => {}
        }
    }

    pub fn num_rows(&self) -> usize {
        self.index.as_ref().map(TableIndex::len).unwrap_or(0)
    }

    pub fn save_csv(&self, path: &Path) -> Result<(), TableError> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["file".to_string()];
        if matches!(self.index, Some(TableIndex::Segmented(_))) {
            header.push("start".to_string());
            header.push("end".to_string());
        }
        header.extend(self.columns.keys().cloned());
        writer.write_record(&header)?;

        for row in 0..self.num_rows() {
            let mut record = Vec::new();
            match &self.index {
                Some(TableIndex::Filewise(files)) => record.push(files[row].clone()),
                Some(TableIndex::Segmented(segments)) => {
                    record.push(segments[row].0.clone());
                    record.push(segments[row].1.to_string());
                    record.push(segments[row].2.to_string());
                }
                None => {}
            }
            for values in self.columns.values() {
                record.push(values[row].clone());
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save_bin(&self, path: &Path) -> Result<(), TableError> {
        let bytes = bincode::serialize(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load_bin(path: &Path) -> Result<Self, TableError> {
        let bytes = std::fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retain_filters_index_and_columns_together() {
        let mut table = Table::new(TableIndex::Filewise(vec!["a.wav".into(), "b.wav".into()]));
        table
            .columns
            .insert("emotion".to_string(), vec!["happy".into(), "sad".into()]);

        table.retain(|f| f == "a.wav");
        assert_eq!(table.file_paths(), vec!["a.wav".to_string()]);
        assert_eq!(table.columns["emotion"], vec!["happy".to_string()]);
    }

    #[test]
    fn csv_and_bin_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = Table::new(TableIndex::Segmented(vec![
            ("a.wav".into(), 0.0, 1.5),
            ("b.wav".into(), 0.5, 2.0),
        ]));
        table.columns.insert("label".to_string(), vec!["x".into(), "y".into()]);

        let bin_path = dir.path().join("db.events.bin");
        table.save_bin(&bin_path).unwrap();
        let loaded = Table::load_bin(&bin_path).unwrap();
        assert_eq!(loaded.file_paths(), table.file_paths());
        assert_eq!(loaded.columns, table.columns);

        let csv_path = dir.path().join("db.events.csv");
        table.save_csv(&csv_path).unwrap();
        let content = std::fs::read_to_string(&csv_path).unwrap();
        assert!(content.starts_with("file,start,end,label"));
    }
}

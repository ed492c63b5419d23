//! Read-only projections over a loaded [`Header`] (§6.5's `info::*`
//! surface): the parts of `original_source/audb/core/define.py`'s
//! `audb.info` namespace that only need the header, not the tables.

use crate::header::{Header, TableKind};

pub fn tables(header: &Header) -> Vec<String> {
    let mut ids: Vec<String> = header.tables.keys().cloned().collect();
    ids.sort();
    ids
}

pub fn table_kind(header: &Header, table_id: &str) -> Option<TableKind> {
    header.tables.get(table_id).copied()
}

pub fn schemes(header: &Header) -> Vec<String> {
    let mut ids: Vec<String> = header.schemes.keys().cloned().collect();
    ids.sort();
    ids
}

pub fn splits(header: &Header) -> &[String] {
    &header.splits
}

pub fn raters(header: &Header) -> &[String] {
    &header.raters
}

pub fn attachments(header: &Header) -> Vec<String> {
    let mut ids: Vec<String> = header.attachments.keys().cloned().collect();
    ids.sort();
    ids
}

pub fn is_complete(header: &Header) -> bool {
    header
        .meta
        .get("audb")
        .and_then(|v| v.get("complete"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_and_schemes_are_sorted() {
        let mut header = Header::new("db");
        header.tables.insert("speaker".to_string(), TableKind::Misc);
        header.tables.insert("emotion".to_string(), TableKind::Filewise);
        assert_eq!(tables(&header), vec!["emotion".to_string(), "speaker".to_string()]);
    }

    #[test]
    fn is_complete_reads_meta_audb_flag() {
        let mut header = Header::new("db");
        assert!(!is_complete(&header));
        header.meta.insert("audb".to_string(), serde_json::json!({"complete": true}));
        assert!(is_complete(&header));
    }
}

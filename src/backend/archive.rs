//! Zip-based archive packing/unpacking shared by every [`super::Backend`]
//! (§6.2: media/table/attachment archives).

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use thiserror::Error;
use zip::write::SimpleFileOptions;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Pack `files` (POSIX-relative to `local_root`) into `dst`, storing their
/// relative paths as zip entry names.
pub fn pack(local_root: &Path, files: &[String], dst: &Path) -> Result<(), ArchiveError> {
    let file = File::create(dst)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for rel in files {
        let src = super::local_path(local_root, rel);
        if src.is_dir() {
            pack_dir(&mut writer, &src, rel, options)?;
        } else {
            writer.start_file(rel.as_str(), options)?;
            let mut buf = Vec::new();
            File::open(&src)?.read_to_end(&mut buf)?;
            writer.write_all(&buf)?;
        }
    }

    writer.finish()?;
    Ok(())
}

fn pack_dir(
    writer: &mut zip::ZipWriter<File>,
    dir: &Path,
    rel_prefix: &str,
    options: SimpleFileOptions,
) -> Result<(), ArchiveError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let rel = format!("{rel_prefix}/{name}");
        if path.is_dir() {
            pack_dir(writer, &path, &rel, options)?;
        } else {
            writer.start_file(rel.as_str(), options)?;
            let mut buf = Vec::new();
            File::open(&path)?.read_to_end(&mut buf)?;
            writer.write_all(&buf)?;
        }
    }
    Ok(())
}

/// Extract every member of the zip at `src` into `dst_root`, returning
/// their POSIX-relative member paths.
pub fn unpack(src: &Path, dst_root: &Path) -> Result<Vec<String>, ArchiveError> {
    std::fs::create_dir_all(dst_root)?;
    let file = File::open(src)?;
    let mut zip = zip::ZipArchive::new(file)?;

    let mut members = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let name = entry.name().replace('\\', "/");
        let out_path = super::local_path(dst_root, &name);
        if name.ends_with('/') {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;
        members.push(name);
    }

    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_flat_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"world").unwrap();

        let zip_path = dir.path().join("out.zip");
        pack(
            dir.path(),
            &["a.txt".to_string(), "b.txt".to_string()],
            &zip_path,
        )
        .unwrap();

        let extract_dir = tempfile::tempdir().unwrap();
        let mut members = unpack(&zip_path, extract_dir.path()).unwrap();
        members.sort();
        assert_eq!(members, vec!["a.txt".to_string(), "b.txt".to_string()]);
        assert_eq!(
            std::fs::read(extract_dir.path().join("a.txt")).unwrap(),
            b"hello"
        );
    }
}

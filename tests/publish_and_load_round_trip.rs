//! End-to-end coverage of the publish/load/peer-cache scenarios
//! described for the dependency model: a database built from scratch,
//! published across two versions, and loaded back through the public
//! API surface.

use std::collections::HashMap;
use std::path::Path;

use audbase::config::Config;
use audbase::header::{Header, TableKind};
use audbase::load::LoadOptions;
use audbase::publish::{PreviousVersion, PublishOptions};
use audbase::repository::Repository;
use audbase::table::{Table, TableIndex};

fn config_with(repo: &Repository, cache_root: &Path, shared_root: &Path) -> Config {
    Config {
        cache_root: cache_root.to_path_buf(),
        shared_cache_root: shared_root.to_path_buf(),
        repositories: vec![repo.clone()],
    }
}

fn write_header(db_dir: &Path) -> Header {
    let mut header = Header::new("mydb");
    header.tables.insert("files".to_string(), TableKind::Filewise);
    std::fs::write(db_dir.join("db.yaml"), serde_yaml::to_string(&header).unwrap()).unwrap();
    header
}

fn files_table() -> HashMap<String, Table> {
    let mut tables = HashMap::new();
    tables.insert(
        "files".to_string(),
        Table::new(TableIndex::Filewise(vec!["a.wav".to_string(), "b.wav".to_string()])),
    );
    tables
}

#[tokio::test]
async fn publish_and_load_round_trip_tracks_per_file_versions() {
    let repo_dir = tempfile::tempdir().unwrap();
    let repository = Repository::new("repo", repo_dir.path().to_str().unwrap(), "file-system");

    let db_dir = tempfile::tempdir().unwrap();
    std::fs::write(db_dir.path().join("a.wav"), b"audio-a-v1").unwrap();
    std::fs::write(db_dir.path().join("b.wav"), b"audio-b-v1").unwrap();
    let header = write_header(db_dir.path());
    let tables = files_table();

    let deps_v1 = audbase::publish::publish(
        db_dir.path(),
        &header,
        &tables,
        "1.0.0",
        &repository,
        PublishOptions::new(),
    )
    .await
    .unwrap();

    let mut media = deps_v1.media();
    media.sort();
    assert_eq!(media, vec!["a.wav".to_string(), "b.wav".to_string()]);

    let cache_dir = tempfile::tempdir().unwrap();
    let shared_dir = tempfile::tempdir().unwrap();
    let config = config_with(&repository, cache_dir.path(), shared_dir.path());

    let loaded_v1 = audbase::load::load(&config, "mydb", Some("1.0.0"), LoadOptions::new())
        .await
        .unwrap()
        .unwrap();
    let mut files: Vec<String> = loaded_v1.tables["files"]
        .file_paths()
        .into_iter()
        .collect();
    files.sort();
    let root = loaded_v1.root.to_string_lossy().to_string();
    assert_eq!(files, vec![format!("{root}/a.wav"), format!("{root}/b.wav")]);
    assert!(loaded_v1.root.join("a.wav").exists());
    assert!(loaded_v1.root.join("b.wav").exists());
    assert_eq!(std::fs::read(loaded_v1.root.join("a.wav")).unwrap(), b"audio-a-v1");

    // Change only a.wav in place, publish v2.0.0 depending on v1.0.0.
    std::fs::write(db_dir.path().join("a.wav"), b"audio-a-v2-changed").unwrap();
    let mut options = PublishOptions::new();
    options.previous_version = PreviousVersion::Latest;
    let deps_v2 = audbase::publish::publish(
        db_dir.path(),
        &header,
        &tables,
        "2.0.0",
        &repository,
        options,
    )
    .await
    .unwrap();

    assert_eq!(deps_v2.version("a.wav").unwrap(), "2.0.0");
    assert_eq!(deps_v2.version("b.wav").unwrap(), "1.0.0");
    assert_eq!(deps_v2.archive("a.wav").unwrap(), deps_v1.archive("a.wav").unwrap());

    // Load v2.0.0 on a fresh cache root: b.wav's archive lives only under
    // 1.0.0 in the backend, so this exercises the per-file archive
    // version lookup rather than the peer-cache fast path.
    let fresh_cache = tempfile::tempdir().unwrap();
    let fresh_shared = tempfile::tempdir().unwrap();
    let fresh_config = config_with(&repository, fresh_cache.path(), fresh_shared.path());

    let loaded_v2 = audbase::load::load(&fresh_config, "mydb", Some("2.0.0"), LoadOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        std::fs::read(loaded_v2.root.join("a.wav")).unwrap(),
        b"audio-a-v2-changed"
    );
    assert_eq!(std::fs::read(loaded_v2.root.join("b.wav")).unwrap(), b"audio-b-v1");
}

#[tokio::test]
async fn peer_cache_is_reused_across_versions_for_unchanged_media() {
    let repo_dir = tempfile::tempdir().unwrap();
    let repository = Repository::new("repo", repo_dir.path().to_str().unwrap(), "file-system");

    let db_dir = tempfile::tempdir().unwrap();
    std::fs::write(db_dir.path().join("a.wav"), b"audio-a-v1").unwrap();
    std::fs::write(db_dir.path().join("b.wav"), b"audio-b-v1").unwrap();
    let header = write_header(db_dir.path());
    let tables = files_table();

    audbase::publish::publish(
        db_dir.path(),
        &header,
        &tables,
        "1.0.0",
        &repository,
        PublishOptions::new(),
    )
    .await
    .unwrap();

    std::fs::write(db_dir.path().join("a.wav"), b"audio-a-v2-changed").unwrap();
    let mut options = PublishOptions::new();
    options.previous_version = PreviousVersion::Latest;
    audbase::publish::publish(db_dir.path(), &header, &tables, "2.0.0", &repository, options)
        .await
        .unwrap();

    let cache_dir = tempfile::tempdir().unwrap();
    let shared_dir = tempfile::tempdir().unwrap();
    let config = config_with(&repository, cache_dir.path(), shared_dir.path());

    // Populate the v1.0.0 peer cache first.
    audbase::load::load(&config, "mydb", Some("1.0.0"), LoadOptions::new())
        .await
        .unwrap()
        .unwrap();

    // Remove b.wav's archive from the backend entirely: if v2.0.0's load
    // reaches for the backend instead of the v1.0.0 peer cache, it fails.
    let media_archive_dir = repo_dir
        .path()
        .join("repo")
        .join("mydb")
        .join("media")
        .join("b.wav.zip");
    std::fs::remove_dir_all(&media_archive_dir).unwrap();

    let loaded_v2 = audbase::load::load(&config, "mydb", Some("2.0.0"), LoadOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        std::fs::read(loaded_v2.root.join("a.wav")).unwrap(),
        b"audio-a-v2-changed"
    );
    assert_eq!(std::fs::read(loaded_v2.root.join("b.wav")).unwrap(), b"audio-b-v1");
}

#[tokio::test]
async fn remove_media_tombstones_and_is_filtered_on_reload() {
    let repo_dir = tempfile::tempdir().unwrap();
    let repository = Repository::new("repo", repo_dir.path().to_str().unwrap(), "file-system");

    let db_dir = tempfile::tempdir().unwrap();
    std::fs::write(db_dir.path().join("a.wav"), b"audio-a").unwrap();
    std::fs::write(db_dir.path().join("b.wav"), b"audio-b").unwrap();
    let header = write_header(db_dir.path());
    let tables = files_table();

    audbase::publish::publish(
        db_dir.path(),
        &header,
        &tables,
        "1.0.0",
        &repository,
        PublishOptions::new(),
    )
    .await
    .unwrap();

    let cache_dir = tempfile::tempdir().unwrap();
    let shared_dir = tempfile::tempdir().unwrap();
    let config = config_with(&repository, cache_dir.path(), shared_dir.path());

    audbase::load::remove_media(&config, "mydb", "a.wav").await.unwrap();

    let mut without_removed = LoadOptions::new();
    without_removed.removed_media = false;
    let loaded = audbase::load::load(&config, "mydb", Some("1.0.0"), without_removed)
        .await
        .unwrap()
        .unwrap();
    assert!(!loaded.root.join("a.wav").exists());
    assert!(loaded.root.join("b.wav").exists());

    let deps = audbase::api::dependencies(&config, "mydb", Some("1.0.0")).await.unwrap();
    assert_eq!(deps.removed_media(), vec!["a.wav".to_string()]);
}

#[tokio::test]
async fn load_to_mirrors_unflavored_bytes_into_user_folder() {
    let repo_dir = tempfile::tempdir().unwrap();
    let repository = Repository::new("repo", repo_dir.path().to_str().unwrap(), "file-system");

    let db_dir = tempfile::tempdir().unwrap();
    std::fs::write(db_dir.path().join("a.wav"), b"audio-a").unwrap();
    std::fs::write(db_dir.path().join("b.wav"), b"audio-b").unwrap();
    let header = write_header(db_dir.path());
    let tables = files_table();

    audbase::publish::publish(
        db_dir.path(),
        &header,
        &tables,
        "1.0.0",
        &repository,
        PublishOptions::new(),
    )
    .await
    .unwrap();

    let cache_dir = tempfile::tempdir().unwrap();
    let shared_dir = tempfile::tempdir().unwrap();
    let config = config_with(&repository, cache_dir.path(), shared_dir.path());

    let target = tempfile::tempdir().unwrap();
    audbase::load::load_to(&config, target.path(), "mydb", "1.0.0").await.unwrap();

    assert_eq!(std::fs::read(target.path().join("a.wav")).unwrap(), b"audio-a");
    assert_eq!(std::fs::read(target.path().join("b.wav")).unwrap(), b"audio-b");
    assert!(target.path().join("db.bin").exists());
}

#[tokio::test]
async fn attachments_are_published_and_loaded() {
    let repo_dir = tempfile::tempdir().unwrap();
    let repository = Repository::new("repo", repo_dir.path().to_str().unwrap(), "file-system");

    let db_dir = tempfile::tempdir().unwrap();
    std::fs::write(db_dir.path().join("a.wav"), b"audio-a").unwrap();
    std::fs::write(db_dir.path().join("notes.txt"), b"v1 notes").unwrap();
    let mut header = write_header(db_dir.path());
    header.attachments.insert("notes".to_string(), std::path::PathBuf::from("notes.txt"));
    std::fs::write(db_dir.path().join("db.yaml"), serde_yaml::to_string(&header).unwrap()).unwrap();
    let mut tables = files_table();
    tables.insert("files".to_string(), Table::new(TableIndex::Filewise(vec!["a.wav".to_string()])));

    let deps_v1 = audbase::publish::publish(
        db_dir.path(),
        &header,
        &tables,
        "1.0.0",
        &repository,
        PublishOptions::new(),
    )
    .await
    .unwrap();
    assert!(deps_v1.attachments().contains(&"notes".to_string()));

    let cache_dir = tempfile::tempdir().unwrap();
    let shared_dir = tempfile::tempdir().unwrap();
    let config = config_with(&repository, cache_dir.path(), shared_dir.path());

    let loaded = audbase::load::load(&config, "mydb", Some("1.0.0"), LoadOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        std::fs::read(loaded.root.join("notes.txt")).unwrap(),
        b"v1 notes"
    );
    assert!(loaded.complete);

    // v2.0.0: drop the attachment entirely.
    let loaded_to = tempfile::tempdir().unwrap();
    audbase::load::load_to(&config, loaded_to.path(), "mydb", "1.0.0").await.unwrap();
    std::fs::copy(db_dir.path().join("a.wav"), loaded_to.path().join("a.wav")).unwrap();
    let mut header_v2 = header.clone();
    header_v2.attachments.clear();
    std::fs::write(
        loaded_to.path().join("db.yaml"),
        serde_yaml::to_string(&header_v2).unwrap(),
    )
    .unwrap();

    let mut options = PublishOptions::new();
    options.previous_version = PreviousVersion::Latest;
    let deps_v2 = audbase::publish::publish(
        loaded_to.path(),
        &header_v2,
        &tables,
        "2.0.0",
        &repository,
        options,
    )
    .await
    .unwrap();
    assert!(!deps_v2.attachments().contains(&"notes".to_string()));
}

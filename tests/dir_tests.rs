//! Directory synthesis, rename and symlink tests.

mod common;

use common::{mount, mount_with, seed_small_file};

use blobmount_rs::attr::DIR_SIZE;
use blobmount_rs::{FsConnection, ObjectClient, StorageConfig, StorageError};

#[tokio::test]
async fn directory_marker_round_trip() {
    let m = mount();
    m.engine.create_directory("docs").await.unwrap();

    let attr = m.engine.get_attr("docs").await.unwrap();
    assert!(attr.is_dir());
    assert_eq!(attr.size, DIR_SIZE);

    let (entries, _) = m.engine.list("", None, 0).await.unwrap();
    let entry = entries.iter().find(|a| a.path == "docs").unwrap();
    assert!(entry.is_dir());
}

#[tokio::test]
async fn markerless_directory_appears_via_common_prefix() {
    let m = mount();
    m.engine.create_file("dir/file", 0o644).await.unwrap();

    // Listing the root reports `dir` as a directory even though no marker
    // blob exists for it.
    let (entries, _) = m.engine.list("", None, 0).await.unwrap();
    let entry = entries.iter().find(|a| a.path == "dir").unwrap();
    assert!(entry.is_dir());
    assert_eq!(entry.size, DIR_SIZE);

    // Without virtual-directory mode a direct lookup cannot see it.
    let err = m.engine.get_attr("dir").await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));

    // With virtual-directory mode the lookup goes through a listing.
    let vm = mount_with(StorageConfig {
        virtual_directory: true,
        ..StorageConfig::default()
    });
    vm.engine.create_file("dir/file", 0o644).await.unwrap();
    let attr = vm.engine.get_attr("dir").await.unwrap();
    assert!(attr.is_dir());
}

#[tokio::test]
async fn marker_directory_is_not_reported_twice() {
    let m = mount();
    m.engine.create_directory("d").await.unwrap();
    m.engine.create_file("d/child", 0o644).await.unwrap();

    let (entries, _) = m.engine.list("", None, 0).await.unwrap();
    let dirs: Vec<_> = entries.iter().filter(|a| a.path == "d").collect();
    assert_eq!(dirs.len(), 1);
}

#[tokio::test]
async fn list_projects_file_attributes() {
    let m = mount();
    seed_small_file(&m.client, "report.txt", b"0123456789").await;

    let (entries, marker) = m.engine.list("", None, 0).await.unwrap();
    assert!(marker.is_none());
    let entry = entries.iter().find(|a| a.path == "report.txt").unwrap();
    assert_eq!(entry.size, 10);
    assert_eq!(entry.name, "report.txt");
    assert!(!entry.is_dir());
    assert!(entry.flags.metadata_retrieved);
    assert!(entry.flags.mode_default);
}

#[tokio::test]
async fn delete_directory_sweeps_children_and_marker() {
    let m = mount();
    m.engine.create_directory("proj").await.unwrap();
    for name in ["proj/a", "proj/b", "proj/sub/c"] {
        m.engine.create_file(name, 0o644).await.unwrap();
    }

    m.engine.delete_directory("proj").await.unwrap();

    for name in ["proj", "proj/a", "proj/b", "proj/sub/c"] {
        let err = m.engine.get_attr(name).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound), "{name} survived");
    }
}

#[tokio::test]
async fn rename_file_moves_content_and_metadata() {
    let m = mount();
    seed_small_file(&m.client, "old.txt", b"payload").await;

    m.engine.rename_file("old.txt", "new.txt").await.unwrap();

    assert!(matches!(
        m.engine.get_attr("old.txt").await.unwrap_err(),
        StorageError::NotFound
    ));
    let data = m.engine.read_buffer("new.txt", 0, 0).await.unwrap();
    assert_eq!(&data, b"payload");
}

#[tokio::test]
async fn rename_missing_file_is_not_found() {
    let m = mount();
    let err = m.engine.rename_file("nope", "other").await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}

#[tokio::test]
async fn rename_directory_moves_children() {
    let m = mount();
    m.engine.create_directory("src").await.unwrap();
    seed_small_file(&m.client, "src/a", b"one").await;
    seed_small_file(&m.client, "src/deep/b", b"two").await;

    m.engine.rename_directory("src", "dst").await.unwrap();

    assert_eq!(
        m.engine.read_buffer("dst/a", 0, 0).await.unwrap(),
        b"one".to_vec()
    );
    assert_eq!(
        m.engine.read_buffer("dst/deep/b", 0, 0).await.unwrap(),
        b"two".to_vec()
    );
    let attr = m.engine.get_attr("dst").await.unwrap();
    assert!(attr.is_dir());
    for name in ["src", "src/a", "src/deep/b"] {
        assert!(m.engine.get_attr(name).await.is_err(), "{name} survived");
    }
}

#[tokio::test]
async fn symlink_round_trip_survives_rename() {
    let m = mount();
    m.engine
        .create_link("link", "target/path.txt")
        .await
        .unwrap();

    let attr = m.engine.get_attr("link").await.unwrap();
    assert!(attr.is_symlink());
    assert_eq!(
        m.engine.read_link("link").await.unwrap(),
        "target/path.txt"
    );

    m.engine.rename_file("link", "moved").await.unwrap();
    let attr = m.engine.get_attr("moved").await.unwrap();
    assert!(attr.is_symlink());
    assert_eq!(
        m.engine.read_link("moved").await.unwrap(),
        "target/path.txt"
    );
}

#[tokio::test]
async fn change_mode_honors_ignore_access_modifiers() {
    let strict = mount();
    seed_small_file(&strict.client, "f", b"x").await;
    assert!(matches!(
        strict.engine.change_mode("f", 0o600).await.unwrap_err(),
        StorageError::Unsupported
    ));
    assert!(matches!(
        strict.engine.change_owner("f", 0, 0).await.unwrap_err(),
        StorageError::Unsupported
    ));

    let lenient = mount_with(StorageConfig {
        ignore_access_modifiers: true,
        ..StorageConfig::default()
    });
    seed_small_file(&lenient.client, "f", b"x").await;
    lenient.engine.change_mode("f", 0o600).await.unwrap();
    lenient.engine.change_owner("f", 0, 0).await.unwrap();
}

#[tokio::test]
async fn listing_pages_with_marker() {
    let m = mount();
    for i in 0..10 {
        m.engine
            .create_file(&format!("file{i:02}"), 0o644)
            .await
            .unwrap();
    }

    let (page1, marker) = m.engine.list("", None, 4).await.unwrap();
    assert_eq!(page1.len(), 4);
    let marker = marker.expect("more pages expected");

    let (page2, _) = m.engine.list("", Some(&marker), 0).await.unwrap();
    assert_eq!(page2.len(), 6);
    assert!(page2.iter().all(|a| a.path.as_str() > page1.last().unwrap().path.as_str()));
}

#[tokio::test]
async fn prefixed_mount_scopes_names() {
    let m = mount_with(StorageConfig {
        prefix_path: "mnt".to_string(),
        ..StorageConfig::default()
    });
    m.engine.create_file("a.txt", 0o644).await.unwrap();

    // The object landed under the prefix on the store.
    assert!(m.client.get_properties("mnt/a.txt").await.is_ok());
    // And the engine's own view strips it back off.
    let (entries, _) = m.engine.list("", None, 0).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, "a.txt");
}

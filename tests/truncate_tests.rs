//! Truncate-path tests: shrink, grow, and the small-file/block-file
//! conversions in between.

mod common;

use common::{mount, mount_with, seed_block_file, seed_small_file, small_block_config};

use blobmount_rs::{FsConnection, StorageError};

#[tokio::test]
async fn shrink_mid_block_clips_the_straddling_block() {
    let m = mount_with(small_block_config());
    seed_block_file(&m.client, "e", &[&[b'A'; 16], &[b'B'; 16], &[b'C'; 16]]).await;

    m.engine.truncate("e", 20).await.unwrap();

    assert_eq!(m.client.committed_block_count("e"), 2);
    let map = m.engine.get_file_block_offsets("e").await.unwrap();
    assert_eq!(map.blocks.len(), 2);
    assert_eq!(map.blocks[1].end_index, 20);
    assert_eq!(m.engine.get_attr("e").await.unwrap().size, 20);

    // The clipped block keeps its surviving bytes.
    let data = m.engine.read_buffer("e", 0, 20).await.unwrap();
    assert_eq!(&data[..16], &[b'A'; 16]);
    assert_eq!(&data[16..], &[b'B'; 4]);

    // Reading at the new end of file is out of range.
    let err = m.engine.read_buffer("e", 20, 4).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidRange));
}

#[tokio::test]
async fn shrink_on_block_boundary_drops_trailing_blocks() {
    let m = mount_with(small_block_config());
    seed_block_file(&m.client, "b", &[&[b'A'; 16], &[b'B'; 16]]).await;

    m.engine.truncate("b", 16).await.unwrap();

    assert_eq!(m.client.committed_block_count("b"), 1);
    let data = m.engine.read_buffer("b", 0, 0).await.unwrap();
    assert_eq!(&data, &[b'A'; 16]);
}

#[tokio::test]
async fn truncate_to_zero_is_a_whole_blob_put() {
    let m = mount_with(small_block_config());
    seed_block_file(&m.client, "z", &[&[b'A'; 16], &[b'B'; 16]]).await;

    m.engine.truncate("z", 0).await.unwrap();

    let attr = m.engine.get_attr("z").await.unwrap();
    assert_eq!(attr.size, 0);
    // No block list and no leftover staged blocks: this went through the
    // put path, not stage/commit.
    assert_eq!(m.client.committed_block_count("z"), 0);
    assert_eq!(m.client.staged_block_count("z"), 0);
}

#[tokio::test]
async fn grow_block_file_appends_zero_blocks() {
    let m = mount_with(small_block_config());
    seed_block_file(&m.client, "g", &[&[b'A'; 16], &[b'B'; 16]]).await;

    m.engine.truncate("g", 48).await.unwrap();

    assert_eq!(m.engine.get_attr("g").await.unwrap().size, 48);
    assert_eq!(m.client.committed_block_count("g"), 3);
    let data = m.engine.read_buffer("g", 0, 48).await.unwrap();
    assert_eq!(&data[..16], &[b'A'; 16]);
    assert_eq!(&data[16..32], &[b'B'; 16]);
    assert!(data[32..].iter().all(|&b| b == 0));
}

#[tokio::test]
async fn grow_small_file_converts_to_blocks() {
    let m = mount_with(small_block_config());
    seed_small_file(&m.client, "s", b"hello").await;

    m.engine.truncate("s", 40).await.unwrap();

    let attr = m.engine.get_attr("s").await.unwrap();
    assert_eq!(attr.size, 40);
    // First block holds the old bytes, the rest is zero fill.
    let map = m.engine.get_file_block_offsets("s").await.unwrap();
    assert!(!map.small_file());
    assert_eq!(map.blocks[0].len(), 5);
    let data = m.engine.read_buffer("s", 0, 0).await.unwrap();
    assert_eq!(&data[..5], b"hello");
    assert!(data[5..].iter().all(|&b| b == 0));
}

#[tokio::test]
async fn shrink_small_file_stays_whole_blob() {
    let m = mount();
    seed_small_file(&m.client, "w", b"HelloWorld").await;

    m.engine.truncate("w", 5).await.unwrap();

    let data = m.engine.read_buffer("w", 0, 0).await.unwrap();
    assert_eq!(&data, b"Hello");
    assert_eq!(m.client.committed_block_count("w"), 0);
}

#[tokio::test]
async fn truncate_missing_file_is_not_found() {
    let m = mount();
    let err = m.engine.truncate("ghost", 10).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}

#[tokio::test]
async fn truncate_then_write_then_read_round_trip() {
    let m = mount_with(small_block_config());
    seed_small_file(&m.client, "t", b"0123456789").await;

    m.engine.truncate("t", 34).await.unwrap();
    m.engine
        .write("t", 30, b"tail", &Default::default())
        .await
        .unwrap();

    let data = m.engine.read_buffer("t", 0, 0).await.unwrap();
    assert_eq!(data.len(), 34);
    assert_eq!(&data[..10], b"0123456789");
    assert!(data[10..30].iter().all(|&b| b == 0));
    assert_eq!(&data[30..], b"tail");
}

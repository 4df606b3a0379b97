//! Common test utilities.

use bytes::Bytes;
use std::sync::Arc;

use blobmount_rs::block::mint_block_id;
use blobmount_rs::{BlockEngine, MemoryClient, ObjectClient, StorageConfig};

/// Engine wired to an in-memory object service.
pub struct TestMount {
    pub engine: BlockEngine,
    pub client: Arc<MemoryClient>,
}

pub fn mount() -> TestMount {
    mount_with(StorageConfig::default())
}

pub fn mount_with(config: StorageConfig) -> TestMount {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let client = Arc::new(MemoryClient::new());
    let engine = BlockEngine::new(config, client.clone());
    TestMount { engine, client }
}

/// Configuration with tiny blocks so block-file paths are cheap to exercise.
pub fn small_block_config() -> StorageConfig {
    StorageConfig {
        block_size: 16,
        ..StorageConfig::default()
    }
}

/// Seeds a committed block file from literal block contents and returns the
/// committed ids in order.
pub async fn seed_block_file(client: &MemoryClient, name: &str, blocks: &[&[u8]]) -> Vec<String> {
    let ids: Vec<String> = blocks.iter().map(|_| mint_block_id(16)).collect();
    for (id, data) in ids.iter().zip(blocks) {
        client
            .stage_block(name, id, Bytes::copy_from_slice(data))
            .await
            .unwrap();
    }
    client
        .commit_block_list(name, &ids, "application/octet-stream", None, None)
        .await
        .unwrap();
    ids
}

/// Whole-blob object seeded directly on the service.
pub async fn seed_small_file(client: &MemoryClient, name: &str, data: &[u8]) {
    client
        .put_whole(
            name,
            &Default::default(),
            Bytes::copy_from_slice(data),
            "application/octet-stream",
            None,
        )
        .await
        .unwrap();
}

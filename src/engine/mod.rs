//! The block storage engine: POSIX-like operations over a flat object store.

mod dir;
mod file;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::attr::ObjAttr;
use crate::block::BlockList;
use crate::client::{Metadata, ObjectClient, RestClient};
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::lock::KeyedMutex;

/// Page size used when the caller does not bound a listing.
pub const MAX_LIST_COUNT: u32 = 5000;

/// Consecutive listing failures tolerated while resolving attributes
/// through the list path.
const MAX_GETATTR_FAILURES: u32 = 20;

/// Operations the kernel bridge invokes against the store.
///
/// Paths are mount-relative; the engine maps them onto on-store names. All
/// operations are safe to call concurrently: operations on one path
/// serialize on its keyed mutex where they must, everything else runs in
/// parallel. Cancellation is cooperative: dropping a returned future
/// aborts its in-flight remote calls and releases the path lock on unwind.
#[async_trait]
pub trait FsConnection: Send + Sync {
    async fn create_file(&self, path: &str, mode: u32) -> StorageResult<()>;
    async fn create_directory(&self, path: &str) -> StorageResult<()>;
    async fn create_link(&self, path: &str, target: &str) -> StorageResult<()>;
    async fn read_link(&self, path: &str) -> StorageResult<String>;
    async fn delete_file(&self, path: &str) -> StorageResult<()>;
    async fn delete_directory(&self, path: &str) -> StorageResult<()>;
    async fn rename_file(&self, source: &str, target: &str) -> StorageResult<()>;
    async fn rename_directory(&self, source: &str, target: &str) -> StorageResult<()>;
    async fn get_attr(&self, path: &str) -> StorageResult<ObjAttr>;

    /// One page of entries under `prefix` plus the continuation marker.
    async fn list(
        &self,
        prefix: &str,
        marker: Option<&str>,
        count: u32,
    ) -> StorageResult<(Vec<ObjAttr>, Option<String>)>;

    async fn read_to_file(
        &self,
        path: &str,
        offset: u64,
        count: u64,
        file: &mut tokio::fs::File,
    ) -> StorageResult<()>;
    async fn read_buffer(&self, path: &str, offset: u64, length: u64) -> StorageResult<Vec<u8>>;
    async fn read_in_buffer(
        &self,
        path: &str,
        offset: u64,
        buffer: &mut [u8],
    ) -> StorageResult<()>;

    async fn write(
        &self,
        path: &str,
        offset: u64,
        data: &[u8],
        metadata: &Metadata,
    ) -> StorageResult<()>;
    async fn write_from_file(
        &self,
        path: &str,
        metadata: &Metadata,
        file: &mut tokio::fs::File,
    ) -> StorageResult<()>;
    async fn truncate(&self, path: &str, size: u64) -> StorageResult<()>;

    /// Block map of the committed object, for callers that stage writes
    /// themselves.
    async fn get_file_block_offsets(&self, path: &str) -> StorageResult<BlockList>;
    async fn stage_and_commit(&self, path: &str, block_map: &mut BlockList) -> StorageResult<()>;

    async fn change_mode(&self, path: &str, mode: u32) -> StorageResult<()>;
    async fn change_owner(&self, path: &str, uid: u32, gid: u32) -> StorageResult<()>;
}

/// Block-oriented storage engine over an [`ObjectClient`].
pub struct BlockEngine {
    client: Arc<dyn ObjectClient>,
    config: StorageConfig,
    block_locks: KeyedMutex,
}

impl BlockEngine {
    pub fn new(config: StorageConfig, client: Arc<dyn ObjectClient>) -> Self {
        Self {
            client,
            config,
            block_locks: KeyedMutex::new(),
        }
    }

    /// Engine over the REST client described by the configuration.
    pub fn connect(config: StorageConfig) -> StorageResult<Self> {
        let client = Arc::new(RestClient::new(&config)?);
        Ok(Self::new(config, client))
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub(crate) fn lock_for(&self, path: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.block_locks.get_lock(path)
    }

    /// On-store name for a mount-relative path.
    pub(crate) fn name(&self, path: &str) -> String {
        self.config.object_name(path)
    }

    /// Probes the account with a tiny listing; a mount should fail fast on
    /// bad credentials rather than on the first file operation.
    pub async fn validate(&self) -> StorageResult<()> {
        if self.config.mount_all_containers {
            return Ok(());
        }
        self.client
            .list(&self.config.prefix_path, Some("/"), None, 2)
            .await?;
        Ok(())
    }

    /// Containers of the account, for mounts scoped to all of them.
    pub async fn list_containers(&self) -> StorageResult<Vec<String>> {
        self.client.list_containers().await
    }

    /// Attribute lookup honoring the `virtual_directory` mode.
    pub(crate) async fn attr_of(&self, path: &str) -> StorageResult<ObjAttr> {
        if self.config.virtual_directory {
            self.get_attr_using_list(path).await
        } else {
            self.get_attr_using_rest(path).await
        }
    }

    async fn get_attr_using_rest(&self, path: &str) -> StorageResult<ObjAttr> {
        let props = self.client.get_properties(&self.name(path)).await?;
        let mut attr = ObjAttr::file(path, props.size, props.last_modified, props.created_on);
        attr.md5 = props.content_md5;
        attr.apply_metadata(&props.metadata);
        Ok(attr)
    }

    /// Resolves attributes through listings. A markerless virtual directory
    /// never answers a direct properties call but does appear as a common
    /// prefix, so this path must be used when `virtual_directory` is set.
    async fn get_attr_using_list(&self, path: &str) -> StorageResult<ObjAttr> {
        let mut fail_count = 0u32;
        let mut marker: Option<String> = None;

        while fail_count < MAX_GETATTR_FAILURES {
            let (attrs, next_marker) =
                match self.list_attrs(path, marker.as_deref(), MAX_LIST_COUNT).await {
                    Ok(page) => page,
                    Err(StorageError::NotFound) => return Err(StorageError::NotFound),
                    Err(StorageError::PermissionDenied) => {
                        return Err(StorageError::PermissionDenied)
                    }
                    Err(err) => {
                        warn!(path, error = %err, "listing failed while resolving attributes");
                        fail_count += 1;
                        continue;
                    }
                };
            fail_count = 0;

            if let Some(attr) = attrs.into_iter().find(|attr| attr.path == path) {
                return Ok(attr);
            }

            match next_marker {
                Some(next) if !next.is_empty() => marker = Some(next),
                _ => break,
            }
        }

        Err(StorageError::NotFound)
    }

    /// Lists one page under `prefix` and projects entries into attributes.
    ///
    /// Blob items carrying the folder marker become directories and are
    /// remembered, so that the common prefixes the service reports for them
    /// are not emitted twice; prefixes without a marker blob are synthesized
    /// as virtual directories.
    pub(crate) async fn list_attrs(
        &self,
        prefix: &str,
        marker: Option<&str>,
        count: u32,
    ) -> StorageResult<(Vec<ObjAttr>, Option<String>)> {
        let count = if count == 0 { MAX_LIST_COUNT } else { count };

        let mut list_path = self.name(prefix);
        if (!prefix.is_empty() && prefix.ends_with('/'))
            || (prefix.is_empty() && !self.config.prefix_path.is_empty())
        {
            list_path.push('/');
        }

        let segment = self
            .client
            .list(&list_path, Some("/"), marker, count)
            .await?;

        let mut attrs = Vec::with_capacity(segment.items.len() + segment.prefixes.len());
        let mut seen_dirs = HashSet::new();

        for item in &segment.items {
            let path = self.config.relative_path(&item.name).to_string();
            let mut attr = ObjAttr::file(&path, item.size, item.last_modified, item.created_on);
            attr.md5 = item.content_md5.clone();
            attr.apply_metadata(&item.metadata);
            if attr.is_dir() {
                seen_dirs.insert(format!("{}/", item.name));
            }
            attrs.push(attr);
        }

        for dir_prefix in &segment.prefixes {
            if seen_dirs.contains(dir_prefix) {
                continue;
            }
            let name = dir_prefix.trim_end_matches('/');
            attrs.push(ObjAttr::virtual_dir(self.config.relative_path(name)));
        }

        Ok((attrs, segment.next_marker))
    }
}

#[async_trait]
impl FsConnection for BlockEngine {
    async fn create_file(&self, path: &str, _mode: u32) -> StorageResult<()> {
        debug!(path, "create file");
        self.write_buffer(path, &Metadata::new(), &[]).await
    }

    async fn create_directory(&self, path: &str) -> StorageResult<()> {
        self.create_directory_impl(path).await
    }

    async fn create_link(&self, path: &str, target: &str) -> StorageResult<()> {
        self.create_link_impl(path, target).await
    }

    async fn read_link(&self, path: &str) -> StorageResult<String> {
        self.read_link_impl(path).await
    }

    async fn delete_file(&self, path: &str) -> StorageResult<()> {
        self.delete_file_impl(path).await
    }

    async fn delete_directory(&self, path: &str) -> StorageResult<()> {
        self.delete_directory_impl(path).await
    }

    async fn rename_file(&self, source: &str, target: &str) -> StorageResult<()> {
        self.rename_file_impl(source, target).await
    }

    async fn rename_directory(&self, source: &str, target: &str) -> StorageResult<()> {
        self.rename_directory_impl(source, target).await
    }

    async fn get_attr(&self, path: &str) -> StorageResult<ObjAttr> {
        self.attr_of(path).await
    }

    async fn list(
        &self,
        prefix: &str,
        marker: Option<&str>,
        count: u32,
    ) -> StorageResult<(Vec<ObjAttr>, Option<String>)> {
        self.list_attrs(prefix, marker, count).await
    }

    async fn read_to_file(
        &self,
        path: &str,
        offset: u64,
        count: u64,
        file: &mut tokio::fs::File,
    ) -> StorageResult<()> {
        self.read_to_file_impl(path, offset, count, file).await
    }

    async fn read_buffer(&self, path: &str, offset: u64, length: u64) -> StorageResult<Vec<u8>> {
        self.read_buffer_impl(path, offset, length).await
    }

    async fn read_in_buffer(
        &self,
        path: &str,
        offset: u64,
        buffer: &mut [u8],
    ) -> StorageResult<()> {
        self.download_into(&self.name(path), offset, buffer).await
    }

    async fn write(
        &self,
        path: &str,
        offset: u64,
        data: &[u8],
        metadata: &Metadata,
    ) -> StorageResult<()> {
        self.write_impl(path, offset, data, metadata).await
    }

    async fn write_from_file(
        &self,
        path: &str,
        metadata: &Metadata,
        file: &mut tokio::fs::File,
    ) -> StorageResult<()> {
        self.write_from_file_impl(path, metadata, file).await
    }

    async fn truncate(&self, path: &str, size: u64) -> StorageResult<()> {
        self.truncate_impl(path, size).await
    }

    async fn get_file_block_offsets(&self, path: &str) -> StorageResult<BlockList> {
        self.load_block_map(&self.name(path)).await
    }

    async fn stage_and_commit(&self, path: &str, block_map: &mut BlockList) -> StorageResult<()> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;
        self.stage_and_commit_locked(&self.name(path), block_map)
            .await
    }

    async fn change_mode(&self, path: &str, _mode: u32) -> StorageResult<()> {
        // Flat stores persist no mode bits. Tools like git abort when chmod
        // fails, so the configuration can choose silent success.
        if self.config.ignore_access_modifiers {
            return Ok(());
        }
        debug!(path, "mode change rejected on flat store");
        Err(StorageError::Unsupported)
    }

    async fn change_owner(&self, path: &str, _uid: u32, _gid: u32) -> StorageResult<()> {
        if self.config.ignore_access_modifiers {
            return Ok(());
        }
        debug!(path, "owner change rejected on flat store");
        Err(StorageError::Unsupported)
    }
}

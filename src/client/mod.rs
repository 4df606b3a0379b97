//! Remote object-service client.

mod auth;
mod memory;
mod rest;
mod retry;
mod xml;

pub use memory::MemoryClient;
pub use rest::RestClient;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::AccessTier;
use crate::error::StorageResult;

/// User-defined metadata attached to an object.
pub type Metadata = HashMap<String, String>;

/// Status of a server-side copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    Pending,
    Success,
    Aborted,
    Failed,
}

/// Properties of one object as reported by the service.
#[derive(Debug, Clone)]
pub struct BlobProps {
    pub size: u64,
    pub content_type: Option<String>,
    pub content_md5: Option<Vec<u8>>,
    pub last_modified: DateTime<Utc>,
    pub created_on: DateTime<Utc>,
    pub metadata: Metadata,
    pub copy_status: Option<CopyState>,
}

/// One entry of a listing segment.
#[derive(Debug, Clone)]
pub struct BlobItem {
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub created_on: DateTime<Utc>,
    pub content_md5: Option<Vec<u8>>,
    pub metadata: Metadata,
}

/// One page of a listing: blob items, common prefixes, continuation marker.
#[derive(Debug, Clone, Default)]
pub struct ListSegment {
    pub items: Vec<BlobItem>,
    pub prefixes: Vec<String>,
    pub next_marker: Option<String>,
}

/// Typed operations against the object service.
///
/// Every call is complete-or-error: retries, credential injection and error
/// mapping happen inside the implementation, so callers only ever see the
/// [`crate::error::StorageError`] taxonomy.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Reads `length` bytes at `offset`; `length == 0` reads to the end.
    async fn get_range(&self, name: &str, offset: u64, length: u64) -> StorageResult<Bytes>;

    /// Uploads a whole object, replacing any previous content. Oversized
    /// payloads are transparently split into staged blocks and committed.
    async fn put_whole(
        &self,
        name: &str,
        metadata: &Metadata,
        data: Bytes,
        content_type: &str,
        content_md5: Option<Vec<u8>>,
    ) -> StorageResult<()>;

    /// Uploads one block; it stays uncommitted until a block list names it.
    async fn stage_block(&self, name: &str, block_id: &str, data: Bytes) -> StorageResult<()>;

    /// Atomically replaces the object's content with the listed blocks.
    async fn commit_block_list(
        &self,
        name: &str,
        block_ids: &[String],
        content_type: &str,
        content_md5: Option<Vec<u8>>,
        tier: Option<AccessTier>,
    ) -> StorageResult<()>;

    /// Committed `(id, size)` pairs in blob order; empty for whole-blob objects.
    async fn get_committed_block_list(&self, name: &str) -> StorageResult<Vec<(String, u64)>>;

    async fn get_properties(&self, name: &str) -> StorageResult<BlobProps>;

    async fn set_metadata(&self, name: &str, metadata: &Metadata) -> StorageResult<()>;

    /// Starts a server-side copy of `source` onto `target`; returns the copy id.
    async fn start_copy(
        &self,
        target: &str,
        source: &str,
        metadata: &Metadata,
    ) -> StorageResult<String>;

    /// Current status of the copy targeting `name`.
    async fn poll_copy(&self, name: &str) -> StorageResult<CopyState>;

    async fn delete(&self, name: &str, include_snapshots: bool) -> StorageResult<()>;

    /// Lists objects under `prefix`. With a delimiter the service folds
    /// deeper names into common prefixes (hierarchical listing).
    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        marker: Option<&str>,
        max_results: u32,
    ) -> StorageResult<ListSegment>;

    /// Names of every container in the account.
    async fn list_containers(&self) -> StorageResult<Vec<String>>;
}

/// Content type derived from a name's extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "txt" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for("notes.txt"), "text/plain");
        assert_eq!(content_type_for("a/b/photo.JPG"), "image/jpeg");
        assert_eq!(content_type_for("archive.tar.gz"), "application/gzip");
        assert_eq!(content_type_for("no_extension"), "application/octet-stream");
    }
}

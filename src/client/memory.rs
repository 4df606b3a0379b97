//! In-memory object service.
//!
//! A faithful miniature of the block-object service behind [`ObjectClient`]:
//! whole blobs, staged blocks, atomic block-list commits and hierarchical
//! listings, all in process. Backs the integration tests and any embedded
//! use that wants the engine without a network.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use md5::{Digest, Md5};
use uuid::Uuid;

use crate::block::{calculate_block_size, mint_block_id, MAX_SINGLE_PUT_BYTES};
use crate::client::{BlobItem, BlobProps, CopyState, ListSegment, Metadata, ObjectClient};
use crate::config::AccessTier;
use crate::error::{StorageError, StorageResult};

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    metadata: Metadata,
    content_type: String,
    content_md5: Option<Vec<u8>>,
    /// Committed blocks in blob order; empty for whole-blob uploads.
    committed: Vec<(String, Bytes)>,
    created_on: DateTime<Utc>,
    last_modified: DateTime<Utc>,
    #[allow(dead_code)]
    tier: Option<AccessTier>,
    copy_status: Option<CopyState>,
}

/// In-memory implementation of the object client.
pub struct MemoryClient {
    objects: DashMap<String, StoredObject>,
    /// Staged blocks keyed by `(object, block id)`, uncommitted until a
    /// block list names them.
    staged: DashMap<(String, String), Bytes>,
    containers: Vec<String>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            staged: DashMap::new(),
            containers: vec!["data".to_string()],
        }
    }

    pub fn with_containers(containers: Vec<String>) -> Self {
        Self {
            containers,
            ..Self::new()
        }
    }

    /// Number of committed blocks behind `name`; test observability.
    pub fn committed_block_count(&self, name: &str) -> usize {
        self.objects
            .get(name)
            .map(|o| o.committed.len())
            .unwrap_or(0)
    }

    /// Count of staged-but-uncommitted blocks for `name`.
    pub fn staged_block_count(&self, name: &str) -> usize {
        self.staged
            .iter()
            .filter(|entry| entry.key().0 == name)
            .count()
    }

    fn object(&self, name: &str) -> StorageResult<StoredObject> {
        self.objects
            .get(name)
            .map(|o| o.clone())
            .ok_or(StorageError::NotFound)
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_block_id(block_id: &str) -> StorageResult<Vec<u8>> {
    let decoded = BASE64
        .decode(block_id)
        .map_err(|_| StorageError::io("block id must be base64 encoded"))?;
    if decoded.len() > 64 {
        return Err(StorageError::io("block id must decode to at most 64 bytes"));
    }
    Ok(decoded)
}

#[async_trait]
impl ObjectClient for MemoryClient {
    async fn get_range(&self, name: &str, offset: u64, length: u64) -> StorageResult<Bytes> {
        let object = self.object(name)?;
        let len = object.data.len() as u64;
        if offset == 0 && len == 0 {
            return Ok(Bytes::new());
        }
        if offset >= len {
            return Err(StorageError::InvalidRange);
        }
        let end = if length == 0 {
            len
        } else {
            (offset + length).min(len)
        };
        Ok(object.data.slice(offset as usize..end as usize))
    }

    async fn put_whole(
        &self,
        name: &str,
        metadata: &Metadata,
        data: Bytes,
        content_type: &str,
        content_md5: Option<Vec<u8>>,
    ) -> StorageResult<()> {
        // Oversized puts become blocks, as the real client pipeline would
        // make them; a later block-list fetch must see them.
        let committed = if data.len() as u64 > MAX_SINGLE_PUT_BYTES {
            let block_size = calculate_block_size(data.len() as u64)? as usize;
            let mut blocks = Vec::new();
            let mut offset = 0usize;
            while offset < data.len() {
                let end = (offset + block_size).min(data.len());
                blocks.push((mint_block_id(16), data.slice(offset..end)));
                offset = end;
            }
            blocks
        } else {
            Vec::new()
        };

        // Single-shot uploads get their MD5 populated by the service.
        let content_md5 = content_md5.or_else(|| {
            committed
                .is_empty()
                .then(|| Md5::digest(&data).to_vec())
        });

        let now = Utc::now();
        let created_on = self
            .objects
            .get(name)
            .map(|o| o.created_on)
            .unwrap_or(now);
        self.objects.insert(
            name.to_string(),
            StoredObject {
                data,
                metadata: metadata.clone(),
                content_type: content_type.to_string(),
                content_md5,
                committed,
                created_on,
                last_modified: now,
                tier: None,
                copy_status: None,
            },
        );

        // A whole-blob put invalidates any staged blocks.
        let stale: Vec<_> = self
            .staged
            .iter()
            .filter(|e| e.key().0 == name)
            .map(|e| e.key().clone())
            .collect();
        for key in stale {
            self.staged.remove(&key);
        }
        Ok(())
    }

    async fn stage_block(&self, name: &str, block_id: &str, data: Bytes) -> StorageResult<()> {
        validate_block_id(block_id)?;
        self.staged
            .insert((name.to_string(), block_id.to_string()), data);
        Ok(())
    }

    async fn commit_block_list(
        &self,
        name: &str,
        block_ids: &[String],
        content_type: &str,
        content_md5: Option<Vec<u8>>,
        tier: Option<AccessTier>,
    ) -> StorageResult<()> {
        let existing = self.objects.get(name).map(|o| o.clone());

        // Every id must decode to the same length or the service rejects
        // the whole list.
        let mut id_length = None;
        for id in block_ids {
            let decoded = validate_block_id(id)?;
            match id_length {
                None => id_length = Some(decoded.len()),
                Some(len) if len != decoded.len() => {
                    return Err(StorageError::io("block ids must share one length"))
                }
                _ => {}
            }
        }

        let mut committed = Vec::with_capacity(block_ids.len());
        for id in block_ids {
            let key = (name.to_string(), id.clone());
            if let Some(staged) = self.staged.get(&key) {
                committed.push((id.clone(), staged.clone()));
            } else if let Some(block) = existing
                .as_ref()
                .and_then(|o| o.committed.iter().find(|(cid, _)| cid == id))
            {
                committed.push(block.clone());
            } else {
                return Err(StorageError::io(format!("block {id} not found")));
            }
        }

        let total: usize = committed.iter().map(|(_, b)| b.len()).sum();
        let mut data = Vec::with_capacity(total);
        for (_, block) in &committed {
            data.extend_from_slice(block);
        }

        let now = Utc::now();
        let created_on = existing.as_ref().map(|o| o.created_on).unwrap_or(now);
        let metadata = existing.map(|o| o.metadata).unwrap_or_default();
        self.objects.insert(
            name.to_string(),
            StoredObject {
                data: Bytes::from(data),
                metadata,
                content_type: content_type.to_string(),
                content_md5,
                committed,
                created_on,
                last_modified: now,
                tier,
                copy_status: None,
            },
        );

        let stale: Vec<_> = self
            .staged
            .iter()
            .filter(|e| e.key().0 == name)
            .map(|e| e.key().clone())
            .collect();
        for key in stale {
            self.staged.remove(&key);
        }
        Ok(())
    }

    async fn get_committed_block_list(&self, name: &str) -> StorageResult<Vec<(String, u64)>> {
        let object = self.object(name)?;
        Ok(object
            .committed
            .iter()
            .map(|(id, block)| (id.clone(), block.len() as u64))
            .collect())
    }

    async fn get_properties(&self, name: &str) -> StorageResult<BlobProps> {
        let object = self.object(name)?;
        Ok(BlobProps {
            size: object.data.len() as u64,
            content_type: Some(object.content_type.clone()),
            content_md5: object.content_md5.clone(),
            last_modified: object.last_modified,
            created_on: object.created_on,
            metadata: object.metadata.clone(),
            copy_status: object.copy_status,
        })
    }

    async fn set_metadata(&self, name: &str, metadata: &Metadata) -> StorageResult<()> {
        let mut object = self.objects.get_mut(name).ok_or(StorageError::NotFound)?;
        object.metadata = metadata.clone();
        object.last_modified = Utc::now();
        Ok(())
    }

    async fn start_copy(
        &self,
        target: &str,
        source: &str,
        metadata: &Metadata,
    ) -> StorageResult<String> {
        let mut object = self.object(source)?;
        if !metadata.is_empty() {
            object.metadata = metadata.clone();
        }
        object.copy_status = Some(CopyState::Success);
        object.last_modified = Utc::now();
        self.objects.insert(target.to_string(), object);
        Ok(Uuid::new_v4().to_string())
    }

    async fn poll_copy(&self, name: &str) -> StorageResult<CopyState> {
        let object = self.object(name)?;
        Ok(object.copy_status.unwrap_or(CopyState::Success))
    }

    async fn delete(&self, name: &str, _include_snapshots: bool) -> StorageResult<()> {
        self.objects
            .remove(name)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        marker: Option<&str>,
        max_results: u32,
    ) -> StorageResult<ListSegment> {
        let max_results = max_results.max(1) as usize;

        let mut names: Vec<String> = self
            .objects
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| name.starts_with(prefix))
            .filter(|name| marker.map(|m| name.as_str() > m).unwrap_or(true))
            .collect();
        names.sort();

        let mut segment = ListSegment::default();
        let mut seen_prefixes = std::collections::HashSet::new();

        for name in names {
            if let Some(delim) = delimiter {
                let rest = &name[prefix.len()..];
                if let Some(idx) = rest.find(delim) {
                    let virtual_prefix = format!("{}{}{}", prefix, &rest[..idx], delim);
                    if seen_prefixes.insert(virtual_prefix.clone()) {
                        segment.prefixes.push(virtual_prefix);
                    }
                    continue;
                }
            }
            if segment.items.len() == max_results {
                segment.next_marker = segment.items.last().map(|i| i.name.clone());
                break;
            }
            let object = match self.objects.get(&name) {
                Some(o) => o,
                None => continue,
            };
            segment.items.push(BlobItem {
                name: name.clone(),
                size: object.data.len() as u64,
                last_modified: object.last_modified,
                created_on: object.created_on,
                content_md5: object.content_md5.clone(),
                metadata: object.metadata.clone(),
            });
        }

        Ok(segment)
    }

    async fn list_containers(&self) -> StorageResult<Vec<String>> {
        Ok(self.containers.clone())
    }
}

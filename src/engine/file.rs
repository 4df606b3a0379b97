//! File data paths: reads, writes, truncate, staging and commit.

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use md5::{Digest, Md5};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::block::{
    self, calculate_block_size, mint_block_id, Block, BlockList, DEFAULT_BLOCK_SIZE,
    MAX_SINGLE_PUT_BYTES,
};
use crate::client::{content_type_for, Metadata, ObjectClient};
use crate::engine::BlockEngine;
use crate::error::{StorageError, StorageResult};

/// Transfer progress events fire at every full interval and on completion.
const PROGRESS_INTERVAL: u64 = 100 * 1024 * 1024;

struct Progress<'a> {
    event: &'static str,
    name: &'a str,
    total: u64,
    transferred: u64,
    next_mark: u64,
}

impl<'a> Progress<'a> {
    fn new(event: &'static str, name: &'a str, total: u64) -> Self {
        Self {
            event,
            name,
            total,
            transferred: 0,
            next_mark: PROGRESS_INTERVAL,
        }
    }

    fn add(&mut self, bytes: u64) {
        self.transferred += bytes;
        if self.transferred >= self.next_mark || self.transferred == self.total {
            debug!(
                event = self.event,
                name = self.name,
                transferred = self.transferred,
                total = self.total,
            );
            self.next_mark += PROGRESS_INTERVAL;
        }
    }
}

impl BlockEngine {
    fn transfer_block_size(&self) -> u64 {
        if self.config.block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            self.config.block_size
        }
    }

    /// Builds the block map from the committed block list.
    pub(crate) async fn load_block_map(&self, name: &str) -> StorageResult<BlockList> {
        let committed = self.client.get_committed_block_list(name).await?;
        Ok(BlockList::from_committed(&committed))
    }

    /// Fills `buffer` from the object, fanning the range out into
    /// `max_concurrency` chunk downloads of the configured block size.
    pub(crate) async fn download_into(
        &self,
        name: &str,
        offset: u64,
        buffer: &mut [u8],
    ) -> StorageResult<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let total = buffer.len() as u64;
        let chunk_size = self.transfer_block_size();
        let mut progress = Progress::new("download_progress", name, total);

        if total <= chunk_size || self.config.max_concurrency <= 1 {
            let bytes = self.client.get_range(name, offset, total).await?;
            if bytes.len() as u64 != total {
                return Err(StorageError::io("short read from object service"));
            }
            buffer.copy_from_slice(&bytes);
            progress.add(total);
            return Ok(());
        }

        // Carve the buffer into disjoint chunk views so the downloads can
        // land concurrently without copying through an intermediate.
        let mut slots: Vec<(u64, &mut [u8])> = Vec::new();
        let mut rest = buffer;
        let mut at = offset;
        while !rest.is_empty() {
            let n = rest.len().min(chunk_size as usize);
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(n);
            slots.push((at, head));
            at += n as u64;
            rest = tail;
        }

        let client = &self.client;
        let mut tasks = FuturesUnordered::new();
        let mut pending = slots.into_iter();
        loop {
            while tasks.len() < self.config.max_concurrency {
                match pending.next() {
                    Some((chunk_offset, slot)) => tasks.push(async move {
                        let bytes = client
                            .get_range(name, chunk_offset, slot.len() as u64)
                            .await?;
                        if bytes.len() != slot.len() {
                            return Err(StorageError::io("short read from object service"));
                        }
                        slot.copy_from_slice(&bytes);
                        Ok::<u64, StorageError>(bytes.len() as u64)
                    }),
                    None => break,
                }
            }
            match tasks.next().await {
                Some(result) => progress.add(result?),
                None => break,
            }
        }
        Ok(())
    }

    pub(crate) async fn read_buffer_impl(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> StorageResult<Vec<u8>> {
        let length = if length == 0 {
            let attr = self.attr_of(path).await?;
            attr.size.saturating_sub(offset)
        } else {
            length
        };
        let mut buffer = vec![0u8; length as usize];
        self.download_into(&self.name(path), offset, &mut buffer)
            .await?;
        Ok(buffer)
    }

    pub(crate) async fn read_to_file_impl(
        &self,
        path: &str,
        offset: u64,
        count: u64,
        file: &mut tokio::fs::File,
    ) -> StorageResult<()> {
        let name = self.name(path);
        let attr = self.attr_of(path).await?;
        let count = if count == 0 {
            attr.size.saturating_sub(offset)
        } else {
            count.min(attr.size.saturating_sub(offset))
        };

        let chunk_size = self.transfer_block_size();
        let mut progress = Progress::new("download_progress", &name, count);
        let mut hasher = self.config.validate_md5.then(Md5::new);

        file.seek(SeekFrom::Start(0)).await?;
        let mut at = offset;
        let end = offset + count;
        while at < end {
            let want = chunk_size.min(end - at);
            let bytes = self.client.get_range(&name, at, want).await?;
            if bytes.is_empty() {
                return Err(StorageError::io("empty range response"));
            }
            file.write_all(&bytes).await?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&bytes);
            }
            progress.add(bytes.len() as u64);
            at += bytes.len() as u64;
        }
        file.flush().await?;

        if let Some(hasher) = hasher {
            // Only a full download can be checked against the blob's MD5.
            if offset == 0 && count == attr.size {
                let digest = hasher.finalize();
                match &attr.md5 {
                    Some(expected) if expected.as_slice() != digest.as_slice() => {
                        return Err(StorageError::Md5Mismatch);
                    }
                    Some(_) => {}
                    None => warn!(name = %name, "object carries no md5 to validate against"),
                }
            }
        }
        Ok(())
    }

    /// Whole-object upload from a byte buffer.
    pub(crate) async fn write_buffer(
        &self,
        path: &str,
        metadata: &Metadata,
        data: &[u8],
    ) -> StorageResult<()> {
        let name = self.name(path);
        self.client
            .put_whole(
                &name,
                metadata,
                Bytes::copy_from_slice(data),
                content_type_for(&name),
                None,
            )
            .await
    }

    /// Uploads a local file: single-shot when it fits, staged blocks above
    /// the limit. MD5 is computed and attached only for the block path when
    /// `update_md5` is set; single-shot uploads get theirs from the service.
    pub(crate) async fn write_from_file_impl(
        &self,
        path: &str,
        metadata: &Metadata,
        file: &mut tokio::fs::File,
    ) -> StorageResult<()> {
        let name = self.name(path);
        let size = file.metadata().await?.len();
        let mut block_size = self.config.block_size;
        if block_size == 0 {
            block_size = calculate_block_size(size)?;
        }

        file.seek(SeekFrom::Start(0)).await?;
        if size <= MAX_SINGLE_PUT_BYTES {
            let mut data = Vec::with_capacity(size as usize);
            file.read_to_end(&mut data).await?;
            return self
                .client
                .put_whole(
                    &name,
                    metadata,
                    Bytes::from(data),
                    content_type_for(&name),
                    None,
                )
                .await;
        }

        let mut progress = Progress::new("upload_progress", &name, size);
        let mut hasher = self.config.update_md5.then(Md5::new);
        let mut block_ids = Vec::new();
        let mut uploaded = 0u64;
        while uploaded < size {
            let want = block_size.min(size - uploaded) as usize;
            let mut chunk = vec![0u8; want];
            file.read_exact(&mut chunk).await?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&chunk);
            }
            let block_id = mint_block_id(16);
            self.client
                .stage_block(&name, &block_id, Bytes::from(chunk))
                .await?;
            block_ids.push(block_id);
            uploaded += want as u64;
            progress.add(want as u64);
        }

        let content_md5 = hasher.map(|hasher| hasher.finalize().to_vec());
        self.client
            .commit_block_list(
                &name,
                &block_ids,
                content_type_for(&name),
                content_md5,
                self.config.default_tier,
            )
            .await?;
        if !metadata.is_empty() {
            self.client.set_metadata(&name, metadata).await?;
        }
        Ok(())
    }

    /// Write at an arbitrary offset.
    ///
    /// Small files are spliced and re-uploaded whole; block files go
    /// through the range planner, a read-modify-write of the touched
    /// blocks, and one stage-and-commit. The entire sequence holds the
    /// path's mutex.
    pub(crate) async fn write_impl(
        &self,
        path: &str,
        offset: u64,
        data: &[u8],
        metadata: &Metadata,
    ) -> StorageResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let name = self.name(path);
        let length = data.len() as u64;

        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        let mut map = self.load_block_map(&name).await?;

        if map.small_file() {
            // An empty or missing body reads as no old data.
            let old = self.client.get_range(&name, 0, 0).await.unwrap_or_default();
            let buffer = if old.len() as u64 >= offset + length {
                let mut buffer = old.to_vec();
                buffer[offset as usize..offset as usize + data.len()].copy_from_slice(data);
                buffer
            } else {
                let mut buffer = vec![0u8; (offset + length) as usize];
                if offset != 0 {
                    buffer[..old.len()].copy_from_slice(&old);
                }
                buffer[offset as usize..].copy_from_slice(data);
                buffer
            };
            // The client splits the body into blocks once it outgrows the
            // single-shot limit; the next write sees a block list.
            return self
                .client
                .put_whole(
                    &name,
                    metadata,
                    Bytes::from(buffer),
                    content_type_for(&name),
                    None,
                )
                .await;
        }

        let (index, old_data_size, exceeds, append_only) =
            map.find_blocks_to_modify(offset, length);
        let mut appended = 0u64;
        if exceeds {
            appended = map.create_new_blocks(offset, length, self.config.block_size);
        }

        let mut buffer = vec![0u8; (old_data_size + appended) as usize];
        if !append_only {
            // Pre-existing bytes of the touched blocks, for read-modify-write.
            let start = map.blocks[index].start_index;
            self.download_into(&name, start, &mut buffer[..old_data_size as usize])
                .await?;
        }

        let base = map.blocks[index].start_index;
        let splice_at = (offset - base) as usize;
        buffer[splice_at..splice_at + data.len()].copy_from_slice(data);

        self.stage_and_commit_modified_locked(&name, Bytes::from(buffer), &mut map)
            .await
    }

    /// Resize to `size` bytes.
    pub(crate) async fn truncate_impl(&self, path: &str, size: u64) -> StorageResult<()> {
        let name = self.name(path);
        let attr = self.attr_of(path).await?;

        if size == 0 || attr.size == 0 {
            return self
                .client
                .put_whole(
                    &name,
                    &Metadata::new(),
                    Bytes::from(vec![0u8; size as usize]),
                    content_type_for(&name),
                    None,
                )
                .await;
        }

        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        let mut map = self.load_block_map(&name).await?;
        if !map.small_file() {
            if size > attr.size {
                map.create_new_blocks(map.size(), size - map.size(), self.config.block_size);
            } else if size < attr.size {
                if let Some(index) = map.shrink_to(size) {
                    // The clipped block keeps its leading bytes.
                    let start = map.blocks[index].start_index;
                    let mut data = std::mem::take(&mut map.blocks[index].data);
                    self.download_into(&name, start, &mut data).await?;
                    map.blocks[index].data = data;
                }
            }
            return self.stage_and_commit_locked(&name, &mut map).await;
        }

        let data = self.client.get_range(&name, 0, 0).await?;
        if size > attr.size {
            // Growing converts the object to blocks: the current bytes
            // become the first block, zeros extend to the new size.
            let first = Block::with_data(mint_block_id(16), 0, data.to_vec());
            map.block_id_length = block::block_id_length(&first.id);
            map.clear_small_file();
            map.blocks.push(first);
            map.create_new_blocks(map.size(), size - attr.size, self.config.block_size);
            self.stage_and_commit_locked(&name, &mut map).await
        } else {
            let data = data.slice(0..size as usize);
            self.client
                .put_whole(
                    &name,
                    &Metadata::new(),
                    data,
                    content_type_for(&name),
                    None,
                )
                .await
        }
    }

    /// Stages every dirty block and commits the full id list. Truncated
    /// blocks upload zeros; nothing commits unless something staged.
    pub(crate) async fn stage_and_commit_locked(
        &self,
        name: &str,
        map: &mut BlockList,
    ) -> StorageResult<()> {
        let mut block_ids = Vec::with_capacity(map.blocks.len());
        let mut staged = false;
        for blk in &mut map.blocks {
            block_ids.push(blk.id.clone());
            if !blk.dirty() {
                continue;
            }
            let data = if blk.truncated() {
                blk.clear_truncated();
                Bytes::from(vec![0u8; blk.len() as usize])
            } else {
                Bytes::from(std::mem::take(&mut blk.data))
            };
            self.client.stage_block(name, &blk.id, data).await?;
            blk.clear_dirty();
            staged = true;
        }

        if staged {
            self.client
                .commit_block_list(
                    name,
                    &block_ids,
                    content_type_for(name),
                    None,
                    self.config.default_tier,
                )
                .await?;
        }
        Ok(())
    }

    /// Stage-and-commit for the write path, where the dirty blocks' bytes
    /// live in one contiguous buffer starting at the first touched block.
    async fn stage_and_commit_modified_locked(
        &self,
        name: &str,
        buffer: Bytes,
        map: &mut BlockList,
    ) -> StorageResult<()> {
        let mut block_ids = Vec::with_capacity(map.blocks.len());
        let mut block_offset = 0usize;
        let mut staged = false;
        for blk in &mut map.blocks {
            block_ids.push(blk.id.clone());
            if !blk.dirty() {
                continue;
            }
            let span = blk.len() as usize;
            let chunk = buffer.slice(block_offset..block_offset + span);
            self.client.stage_block(name, &blk.id, chunk).await?;
            block_offset += span;
            blk.clear_dirty();
            blk.clear_truncated();
            staged = true;
        }

        if staged {
            self.client
                .commit_block_list(
                    name,
                    &block_ids,
                    content_type_for(name),
                    None,
                    self.config.default_tier,
                )
                .await?;
        }
        Ok(())
    }
}

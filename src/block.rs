//! Per-file block maps and the range planner.
//!
//! A [`BlockList`] mirrors the committed block list of one blob: ordered,
//! contiguous byte ranges each identified by an opaque base64 id. The
//! planner methods decide which blocks a write or truncate touches and
//! extend or clip the map accordingly; staging and commit are driven by the
//! engine on top of the flags set here.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

use crate::error::{StorageError, StorageResult};

/// Maximum number of blocks per blob.
pub const MAX_BLOCKS: u64 = 50_000;
/// Maximum bytes per staged block.
pub const MAX_STAGE_BLOCK_BYTES: u64 = 4_000 * 1024 * 1024;
/// Largest blob accepted as a single whole-blob upload.
pub const MAX_SINGLE_PUT_BYTES: u64 = 256 * 1024 * 1024;
/// Block size used when the configuration leaves it unset.
pub const DEFAULT_BLOCK_SIZE: u64 = 16 * 1024 * 1024;
/// Largest blob representable at all.
pub const MAX_BLOB_BYTES: u64 = MAX_STAGE_BLOCK_BYTES * MAX_BLOCKS;

/// Decoded id length adopted when a file has no blocks to inherit from.
const FRESH_ID_LENGTH: usize = 16;

/// One committed or planned block of a blob.
#[derive(Debug, Clone)]
pub struct Block {
    /// Base64 of a random byte string; all ids of a file share one decoded length.
    pub id: String,
    /// Inclusive byte offset in the logical file.
    pub start_index: u64,
    /// Exclusive byte offset in the logical file.
    pub end_index: u64,
    /// Pending bytes for dirty blocks; empty otherwise.
    pub data: Vec<u8>,
    dirty: bool,
    truncated: bool,
}

impl Block {
    /// A dirty block carrying its bytes, ready for staging.
    pub fn with_data(id: String, start_index: u64, data: Vec<u8>) -> Self {
        Self {
            id,
            start_index,
            end_index: start_index + data.len() as u64,
            data,
            dirty: true,
            truncated: false,
        }
    }

    pub fn len(&self) -> u64 {
        self.end_index - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.start_index == self.end_index
    }

    /// Needs staging before the next commit.
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Content is implicitly zeros; no buffer is held until staging.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn clear_truncated(&mut self) {
        self.truncated = false;
    }
}

/// Mints a block id: `length` random bytes, base64-encoded.
pub fn mint_block_id(length: usize) -> String {
    let mut raw = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut raw);
    BASE64.encode(raw)
}

/// Decoded byte length of an existing block id.
pub fn block_id_length(id: &str) -> usize {
    BASE64
        .decode(id)
        .map(|raw| raw.len())
        .unwrap_or(FRESH_ID_LENGTH)
}

/// Ordered block map of one file.
#[derive(Debug, Clone, Default)]
pub struct BlockList {
    pub blocks: Vec<Block>,
    /// Decoded byte length every id of this file must use. The commit call
    /// rejects mixed lengths, so this is fixed once any block exists.
    pub block_id_length: usize,
    small_file: bool,
}

impl BlockList {
    /// Builds the map from a committed block list as returned by the service:
    /// `(id, size)` pairs in blob order. An empty list means the blob was a
    /// whole-blob upload with no block list behind it.
    pub fn from_committed(committed: &[(String, u64)]) -> Self {
        if committed.is_empty() {
            return Self {
                small_file: true,
                ..Self::default()
            };
        }

        let mut blocks = Vec::with_capacity(committed.len());
        let mut offset = 0u64;
        for (id, size) in committed {
            blocks.push(Block {
                id: id.clone(),
                start_index: offset,
                end_index: offset + size,
                data: Vec::new(),
                dirty: false,
                truncated: false,
            });
            offset += size;
        }

        Self {
            block_id_length: block_id_length(&committed[0].0),
            blocks,
            small_file: false,
        }
    }

    /// The whole object is a single blob with no committed block list.
    pub fn small_file(&self) -> bool {
        self.small_file
    }

    pub fn clear_small_file(&mut self) {
        self.small_file = false;
    }

    /// Logical file size covered by the map.
    pub fn size(&self) -> u64 {
        self.blocks.last().map(|b| b.end_index).unwrap_or(0)
    }

    /// Ordered id list for a commit: every block, re-staged or not.
    pub fn ordered_ids(&self) -> Vec<String> {
        self.blocks.iter().map(|b| b.id.clone()).collect()
    }

    fn id_length(&mut self) -> usize {
        if self.block_id_length == 0 {
            self.block_id_length = FRESH_ID_LENGTH;
        }
        self.block_id_length
    }

    /// Plans a write of `length` bytes at `offset`.
    ///
    /// Returns `(index, old_data_size, exceeds, append_only)`:
    /// - `index`: first block intersecting the write (or the insertion point
    ///   for a pure append),
    /// - `old_data_size`: byte span of the touched committed blocks that has
    ///   to be fetched for read-modify-write,
    /// - `exceeds`: the write runs past the current end of file,
    /// - `append_only`: the write starts at or past the end of file, so no
    ///   pre-existing bytes are needed at all.
    ///
    /// Touched committed blocks are marked dirty; they will be re-staged from
    /// the spliced buffer.
    pub fn find_blocks_to_modify(&mut self, offset: u64, length: u64) -> (usize, u64, bool, bool) {
        let size = self.size();
        if offset >= size {
            return (self.blocks.len(), 0, true, true);
        }
        let exceeds = offset + length > size;

        let index = self.blocks.partition_point(|b| b.end_index <= offset);
        let write_end = (offset + length).min(size);
        let mut last = index;
        while last < self.blocks.len() && self.blocks[last].start_index < write_end {
            self.blocks[last].mark_dirty();
            last += 1;
        }
        if last == index {
            // Zero-length write on a block boundary still anchors at the
            // block containing the offset.
            self.blocks[index].mark_dirty();
            last = index + 1;
        }
        let old_data_size = self.blocks[last - 1].end_index - self.blocks[index].start_index;

        (index, old_data_size, exceeds, false)
    }

    /// Extends the map from the current end of file up to `offset + length`
    /// with dirty truncated blocks of at most `block_size` bytes (the
    /// default when 0). Returns the number of bytes appended.
    pub fn create_new_blocks(&mut self, offset: u64, length: u64, block_size: u64) -> u64 {
        let block_size = if block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            block_size
        };
        let id_length = self.id_length();

        let target = offset + length;
        let mut appended = 0u64;
        let mut next = self.size();
        while next < target {
            let len = block_size.min(target - next);
            self.blocks.push(Block {
                id: mint_block_id(id_length),
                start_index: next,
                end_index: next + len,
                data: Vec::new(),
                dirty: true,
                truncated: true,
            });
            appended += len;
            next += len;
        }
        appended
    }

    /// Shrinks the map to `size` bytes. Blocks past the cut are dropped; a
    /// block straddling it is clipped, marked dirty, and its index returned
    /// so the caller can pre-read the surviving bytes into its buffer.
    pub fn shrink_to(&mut self, size: u64) -> Option<usize> {
        let index = self.blocks.partition_point(|b| b.end_index <= size);
        if index < self.blocks.len() && self.blocks[index].start_index < size {
            let block = &mut self.blocks[index];
            block.end_index = size;
            block.data = vec![0u8; (size - block.start_index) as usize];
            block.mark_dirty();
            self.blocks.truncate(index + 1);
            Some(index)
        } else {
            self.blocks.truncate(index);
            None
        }
    }
}

/// Picks the block size for a whole-file upload of `file_size` bytes.
///
/// Files within the single-shot limit upload in one request; anything larger
/// spreads over the full block budget, rounded up to a multiple of 8 and
/// clamped to the service limits.
pub fn calculate_block_size(file_size: u64) -> StorageResult<u64> {
    if file_size > MAX_BLOB_BYTES {
        return Err(StorageError::TooLarge);
    }

    if file_size <= MAX_SINGLE_PUT_BYTES {
        return Ok(MAX_SINGLE_PUT_BYTES);
    }

    let mut block_size = file_size.div_ceil(MAX_BLOCKS);
    if block_size < DEFAULT_BLOCK_SIZE {
        block_size = DEFAULT_BLOCK_SIZE;
    } else {
        block_size = (block_size + 7) & !7;
        if block_size > MAX_STAGE_BLOCK_BYTES {
            return Err(StorageError::TooLarge);
        }
    }
    Ok(block_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed(sizes: &[u64]) -> Vec<(String, u64)> {
        sizes
            .iter()
            .map(|&s| (mint_block_id(FRESH_ID_LENGTH), s))
            .collect()
    }

    fn assert_contiguous(map: &BlockList) {
        let mut expected = 0u64;
        for block in &map.blocks {
            assert_eq!(block.start_index, expected);
            assert!(block.end_index > block.start_index);
            expected = block.end_index;
        }
    }

    #[test]
    fn empty_committed_list_is_small_file() {
        let map = BlockList::from_committed(&[]);
        assert!(map.small_file());
        assert!(map.blocks.is_empty());
        assert_eq!(map.size(), 0);
    }

    #[test]
    fn committed_list_materializes_in_order() {
        let map = BlockList::from_committed(&committed(&[10, 20, 5]));
        assert!(!map.small_file());
        assert_eq!(map.size(), 35);
        assert_eq!(map.block_id_length, FRESH_ID_LENGTH);
        assert_contiguous(&map);
    }

    #[test]
    fn modify_single_interior_block() {
        let mut map = BlockList::from_committed(&committed(&[16, 16, 16]));
        let (index, old, exceeds, append_only) = map.find_blocks_to_modify(20, 8);
        assert_eq!(index, 1);
        assert_eq!(old, 16);
        assert!(!exceeds);
        assert!(!append_only);
        assert!(map.blocks[1].dirty());
        assert!(!map.blocks[0].dirty());
        assert!(!map.blocks[2].dirty());
    }

    #[test]
    fn modify_spanning_two_blocks() {
        let mut map = BlockList::from_committed(&committed(&[16, 16, 16]));
        let (index, old, _, _) = map.find_blocks_to_modify(10, 10);
        assert_eq!(index, 0);
        assert_eq!(old, 32);
        assert!(map.blocks[0].dirty() && map.blocks[1].dirty());
        assert!(!map.blocks[2].dirty());
    }

    #[test]
    fn write_past_end_exceeds() {
        let mut map = BlockList::from_committed(&committed(&[16, 16]));
        let (index, old, exceeds, append_only) = map.find_blocks_to_modify(24, 16);
        assert_eq!(index, 1);
        assert_eq!(old, 16);
        assert!(exceeds);
        assert!(!append_only);
    }

    #[test]
    fn append_at_end_of_file_fetches_nothing() {
        let mut map = BlockList::from_committed(&committed(&[16, 16]));
        let (index, old, exceeds, append_only) = map.find_blocks_to_modify(32, 4);
        assert_eq!(index, 2);
        assert_eq!(old, 0);
        assert!(exceeds);
        assert!(append_only);
    }

    #[test]
    fn create_new_blocks_partitions_by_block_size() {
        let mut map = BlockList::from_committed(&committed(&[16]));
        let appended = map.create_new_blocks(16, 40, 16);
        assert_eq!(appended, 40);
        assert_eq!(map.blocks.len(), 4);
        assert_eq!(map.size(), 56);
        assert_contiguous(&map);
        for block in &map.blocks[1..] {
            assert!(block.dirty() && block.truncated());
            assert_eq!(block.id.len(), map.blocks[0].id.len());
        }
        assert_eq!(map.blocks.last().unwrap().len(), 8);
    }

    #[test]
    fn shrink_mid_block_clips_and_requests_preread() {
        let mut map = BlockList::from_committed(&committed(&[16, 16, 16]));
        let preread = map.shrink_to(20);
        assert_eq!(preread, Some(1));
        assert_eq!(map.blocks.len(), 2);
        assert_eq!(map.size(), 20);
        assert_eq!(map.blocks[1].data.len(), 4);
        assert!(map.blocks[1].dirty());
    }

    #[test]
    fn shrink_on_block_boundary_drops_whole_blocks() {
        let mut map = BlockList::from_committed(&committed(&[16, 16, 16]));
        let preread = map.shrink_to(16);
        assert_eq!(preread, None);
        assert_eq!(map.blocks.len(), 1);
        assert_eq!(map.size(), 16);
        assert!(!map.blocks[0].dirty());
    }

    #[test]
    fn block_size_single_shot_limit() {
        assert_eq!(
            calculate_block_size(MAX_SINGLE_PUT_BYTES).unwrap(),
            MAX_SINGLE_PUT_BYTES
        );
        // One byte past the limit switches to blocks at the default size.
        assert_eq!(
            calculate_block_size(MAX_SINGLE_PUT_BYTES + 1).unwrap(),
            DEFAULT_BLOCK_SIZE
        );
    }

    #[test]
    fn block_size_rounds_to_multiple_of_eight() {
        let file_size = MAX_BLOCKS * DEFAULT_BLOCK_SIZE + 12_345;
        let block_size = calculate_block_size(file_size).unwrap();
        assert_eq!(block_size % 8, 0);
        assert!(block_size * MAX_BLOCKS >= file_size);
    }

    #[test]
    fn block_size_rejects_oversized_blob() {
        assert!(matches!(
            calculate_block_size(MAX_BLOB_BYTES + 1),
            Err(StorageError::TooLarge)
        ));
    }

    #[test]
    fn minted_ids_share_the_decoded_length() {
        let id = mint_block_id(FRESH_ID_LENGTH);
        assert_eq!(block_id_length(&id), FRESH_ID_LENGTH);
        let other = mint_block_id(FRESH_ID_LENGTH);
        assert_eq!(id.len(), other.len());
        assert_ne!(id, other);
    }
}

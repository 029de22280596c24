//! Cache reader interface and block-aligned chunk planning.
//!
//! A logical read `(offset, nr_bytes)` is decomposed into block-aligned
//! sub-requests, each of which consults the block cache independently and in
//! parallel. The decomposition is identical for every reader; what differs
//! is where a block is looked up and published.
//!
//! ## Chunk classes
//!
//! ```text
//!      requested window:        [====================]
//!      blocks:        |  first  |  middle |   last   |
//!                     ^ delta ^
//! ```
//!
//! - *Sole* chunk (window within one block): staged, copy `nr_bytes`.
//! - *First* of many: staged, copy from `delta` to block end.
//! - *Middle*: copies a whole block; on a cache hit the bytes can land
//!   directly in the caller's buffer without staging.
//! - *Last* of many: staged, copy the remainder.
//!
//! Staging is required whenever the requested window does not cover the
//! whole block, because the cache must hold complete blocks.

use anyhow::Result;

use crate::cache_entry_info::DataCacheEntryInfo;
use crate::cache_filesystem::CacheFileSystemHandle;

/// Name every sub-request worker thread carries, for observability.
pub const READ_WORKER_THREAD_NAME: &str = "blk-read";

/// A cache reader services block-aligned reads against one cache flavor.
///
/// Readers are process-global and stateless with respect to any particular
/// facade: everything request-specific (inner filesystem, profile collector)
/// is re-resolved through the handle on each call.
pub trait CacheReader: Send + Sync {
    /// Short reader name, reported through the profile collector.
    fn name(&self) -> &'static str;

    /// Read `requested_bytes_to_read` bytes at `requested_start_offset` into
    /// `buffer`, consulting and populating the block cache. `buffer` is
    /// exactly `requested_bytes_to_read` long and the request is already
    /// bounded by `file_size`.
    fn read_and_cache(
        &self,
        handle: &CacheFileSystemHandle,
        buffer: &mut [u8],
        requested_start_offset: u64,
        requested_bytes_to_read: u64,
        file_size: u64,
    ) -> Result<()>;

    /// Snapshot of the blocks currently cached, in no particular order.
    fn cache_entries_info(&self) -> Result<Vec<DataCacheEntryInfo>>;

    /// Drop every cached block.
    fn clear_cache(&self) -> Result<()>;

    /// Drop every cached block belonging to `remote_file`.
    fn clear_cache_for_file(&self, remote_file: &str) -> Result<()>;
}

/// One block-aligned sub-request plus its slice of the caller's buffer.
pub(crate) struct CacheReadChunk<'a> {
    /// The caller-visible window this chunk fills; its length is the number
    /// of bytes to copy out of the block.
    pub dest: &'a mut [u8],
    pub aligned_start_offset: u64,
    /// Bytes of the block to fetch; `block_size` except for a file's last
    /// block.
    pub chunk_size: u64,
    /// Offset of the caller window inside the block; non-zero only for the
    /// first (or sole) chunk.
    pub block_delta: u64,
    /// Whether an intermediate full-block buffer is mandatory even on a
    /// cache hit.
    pub needs_staging: bool,
}

impl CacheReadChunk<'_> {
    /// Copy this chunk's window out of a complete block buffer.
    pub fn copy_to_dest(&mut self, block: &[u8]) {
        let begin = self.block_delta as usize;
        self.dest.copy_from_slice(&block[begin..begin + self.dest.len()]);
    }
}

/// Split a bounded read into block-aligned chunks. `buffer.len()` must equal
/// `requested_bytes_to_read` and the request must not cross `file_size`;
/// the facade guarantees both.
pub(crate) fn plan_read_chunks<'a>(
    buffer: &'a mut [u8],
    requested_start_offset: u64,
    requested_bytes_to_read: u64,
    file_size: u64,
    block_size: u64,
) -> Vec<CacheReadChunk<'a>> {
    debug_assert_eq!(buffer.len() as u64, requested_bytes_to_read);
    debug_assert!(requested_start_offset + requested_bytes_to_read <= file_size);

    let aligned_start_offset = requested_start_offset / block_size * block_size;
    let aligned_last_offset =
        (requested_start_offset + requested_bytes_to_read) / block_size * block_size;

    let mut chunks = Vec::new();
    let mut rest = buffer;
    let mut already_read_bytes = 0u64;

    let mut io_start_offset = aligned_start_offset;
    while io_start_offset <= aligned_last_offset {
        let is_first = io_start_offset == aligned_start_offset;
        let is_last = io_start_offset == aligned_last_offset;

        let (chunk_size, bytes_to_copy, block_delta, needs_staging) = if is_first && is_last {
            // Sole chunk: the whole window lives in one block.
            let delta = requested_start_offset - aligned_start_offset;
            (
                block_size.min(file_size - io_start_offset),
                requested_bytes_to_read,
                delta,
                true,
            )
        } else if is_first {
            let delta = requested_start_offset - aligned_start_offset;
            (block_size, block_size - delta, delta, true)
        } else if is_last {
            (
                block_size.min(file_size - io_start_offset),
                requested_bytes_to_read - already_read_bytes,
                0,
                true,
            )
        } else {
            (block_size, block_size, 0, false)
        };

        already_read_bytes += bytes_to_copy;
        let current = rest;
        let (dest, remaining) = current.split_at_mut(bytes_to_copy as usize);
        rest = remaining;

        // A request ending exactly at a block boundary at EOF plans a
        // zero-byte trailing chunk; nothing to fetch.
        if chunk_size > 0 {
            chunks.push(CacheReadChunk {
                dest,
                aligned_start_offset: io_start_offset,
                chunk_size,
                block_delta,
                needs_staging,
            });
        }
        io_start_offset += block_size;
    }

    debug_assert_eq!(already_read_bytes, requested_bytes_to_read);
    chunks
}

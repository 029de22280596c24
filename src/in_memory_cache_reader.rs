//! In-memory block cache reader.
//!
//! Blocks live in a shared-value LRU keyed by `(path, offset, size)`; a hit
//! hands out a reference-counted immutable buffer, so concurrent readers of
//! one block share bytes without copying or tearing. Block production goes
//! through `get_or_create`: when many sub-requests miss on the same block at
//! once, exactly one performs the inner read and the rest wait on the
//! creation token.

use anyhow::{ensure, Result};
use std::sync::{Arc, OnceLock};

use crate::cache_entry_info::DataCacheEntryInfo;
use crate::cache_filesystem::CacheFileSystemHandle;
use crate::cache_reader::{plan_read_chunks, CacheReader, READ_WORKER_THREAD_NAME};
use crate::config;
use crate::fs_interface::FileHandle;
use crate::profile_collector::{CacheAccess, CacheEntity, IoOperation};
use crate::shared_lru_cache::ThreadSafeSharedLruCache;
use crate::thread_pool::{run_io_batch, IoJob};

/// Block cache key; two blocks with the same triple are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InMemCacheBlock {
    pub fname: String,
    pub start_off: u64,
    pub blk_size: u64,
}

type InMemCache = ThreadSafeSharedLruCache<InMemCacheBlock, Vec<u8>>;

pub struct InMemoryCacheReader {
    /// Created on first read so capacity and TTL reflect the configuration
    /// in effect at that point.
    cache: OnceLock<InMemCache>,
}

impl InMemoryCacheReader {
    pub fn new() -> Self {
        InMemoryCacheReader {
            cache: OnceLock::new(),
        }
    }

    fn block_cache(&self) -> &InMemCache {
        self.cache.get_or_init(|| {
            let current = config::current_config();
            ThreadSafeSharedLruCache::new(
                current.max_in_mem_cache_block_count,
                current.in_mem_cache_block_timeout_millisec,
            )
        })
    }
}

impl Default for InMemoryCacheReader {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheReader for InMemoryCacheReader {
    fn name(&self) -> &'static str {
        "in_mem"
    }

    fn read_and_cache(
        &self,
        handle: &CacheFileSystemHandle,
        buffer: &mut [u8],
        requested_start_offset: u64,
        requested_bytes_to_read: u64,
        file_size: u64,
    ) -> Result<()> {
        let block_size = config::current_config().cache_block_size;
        let cache = self.block_cache();

        let chunks = plan_read_chunks(
            buffer,
            requested_start_offset,
            requested_bytes_to_read,
            file_size,
            block_size,
        );
        let thread_count = config::thread_count_for_subrequests(chunks.len());

        let jobs: Vec<IoJob> = chunks
            .into_iter()
            .map(|mut chunk| {
                Box::new(move || {
                    let collector = handle.profile_collector();
                    let block_key = InMemCacheBlock {
                        fname: handle.path().to_string(),
                        start_off: chunk.aligned_start_offset,
                        blk_size: chunk.chunk_size,
                    };

                    let mut produced = false;
                    let block = cache.get_or_create(block_key, |key| {
                        produced = true;
                        let mut content = vec![0u8; key.blk_size as usize];

                        let oper_id = collector.generate_oper_id();
                        collector.record_operation_start(IoOperation::Read, &oper_id);
                        let nr_read =
                            handle.inner_handle().read_at(&mut content, key.start_off)?;
                        collector.record_operation_end(IoOperation::Read, &oper_id);
                        ensure!(
                            nr_read as u64 == key.blk_size,
                            "Short read from {}: got {} bytes instead of {} at offset {}",
                            key.fname,
                            nr_read,
                            key.blk_size,
                            key.start_off
                        );
                        // Published buffers are immutable from here on.
                        Ok(Arc::new(content))
                    })?;

                    let access = if produced {
                        CacheAccess::Miss
                    } else {
                        CacheAccess::Hit
                    };
                    collector.record_cache_access(CacheEntity::Data, access);

                    chunk.copy_to_dest(&block);
                    Ok(())
                }) as IoJob
            })
            .collect();

        run_io_batch(jobs, thread_count, READ_WORKER_THREAD_NAME)
    }

    fn cache_entries_info(&self) -> Result<Vec<DataCacheEntryInfo>> {
        let Some(cache) = self.cache.get() else {
            return Ok(Vec::new());
        };
        Ok(cache
            .keys()
            .into_iter()
            .map(|key| DataCacheEntryInfo {
                cache_filepath: "(no disk cache)".to_string(),
                remote_filename: key.fname,
                start_offset: key.start_off,
                end_offset: key.start_off + key.blk_size,
                cache_type: "in-mem".to_string(),
            })
            .collect())
    }

    fn clear_cache(&self) -> Result<()> {
        if let Some(cache) = self.cache.get() {
            cache.clear();
        }
        Ok(())
    }

    fn clear_cache_for_file(&self, remote_file: &str) -> Result<()> {
        if let Some(cache) = self.cache.get() {
            cache.clear_with_filter(|block| block.fname == remote_file);
        }
        Ok(())
    }
}

//! Pass-through reader: no block cache, one delegated read per request.
//!
//! Useful as a baseline and for hosts that want the facade's handle and
//! metadata caching without block caching.

use anyhow::{ensure, Result};

use crate::cache_entry_info::DataCacheEntryInfo;
use crate::cache_filesystem::CacheFileSystemHandle;
use crate::cache_reader::CacheReader;
use crate::fs_interface::FileHandle;
use crate::profile_collector::IoOperation;

pub struct NoopCacheReader;

impl NoopCacheReader {
    pub fn new() -> Self {
        NoopCacheReader
    }
}

impl Default for NoopCacheReader {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheReader for NoopCacheReader {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn read_and_cache(
        &self,
        handle: &CacheFileSystemHandle,
        buffer: &mut [u8],
        requested_start_offset: u64,
        requested_bytes_to_read: u64,
        _file_size: u64,
    ) -> Result<()> {
        let collector = handle.profile_collector();
        let oper_id = collector.generate_oper_id();
        collector.record_operation_start(IoOperation::Read, &oper_id);
        let nr_read = handle
            .inner_handle()
            .read_at(buffer, requested_start_offset)?;
        collector.record_operation_end(IoOperation::Read, &oper_id);
        ensure!(
            nr_read as u64 == requested_bytes_to_read,
            "Short read from {}: got {} bytes instead of {} at offset {}",
            handle.path(),
            nr_read,
            requested_bytes_to_read,
            requested_start_offset
        );
        Ok(())
    }

    fn cache_entries_info(&self) -> Result<Vec<DataCacheEntryInfo>> {
        Ok(Vec::new())
    }

    fn clear_cache(&self) -> Result<()> {
        Ok(())
    }

    fn clear_cache_for_file(&self, _remote_file: &str) -> Result<()> {
        Ok(())
    }
}

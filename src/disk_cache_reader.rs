//! On-disk block cache reader.
//!
//! Blocks are memoized as files named after their key (see
//! `filesystem_utils`), so existence of the canonical name is the cache
//! lookup. Publication is temp-file-plus-rename: the canonical name never
//! appears until the bytes are durable, which keeps invariant "a visible
//! cache file holds complete, correct content" through crashes and races.
//! Concurrent producers of one block race on the rename; whoever loses
//! overwrote identical bytes, so the race is harmless.

use anyhow::{ensure, Context, Result};
use uuid::Uuid;

use crate::cache_entry_info::DataCacheEntryInfo;
use crate::cache_filesystem::CacheFileSystemHandle;
use crate::cache_reader::{plan_read_chunks, CacheReader, READ_WORKER_THREAD_NAME};
use crate::config::{self, TEMP_CACHE_FILE_SUFFIX};
use crate::filesystem_utils::{
    can_cache_on_disk, evict_stale_cache_files, local_cache_file, local_cache_file_prefix,
    parse_cache_file_name, touch_file,
};
use crate::fs_interface::{FileHandle, FileSystem, OpenFlags};
use crate::local_filesystem::LocalFileSystem;
use crate::path_utils;
use crate::profile_collector::{CacheAccess, CacheEntity, IoOperation};

pub struct DiskCacheReader {
    local_filesystem: LocalFileSystem,
}

impl DiskCacheReader {
    pub fn new() -> Self {
        DiskCacheReader {
            local_filesystem: LocalFileSystem::new(),
        }
    }

    /// Best-effort publication of a freshly fetched block. Failure leaves
    /// the block uncached; the next miss retries.
    fn cache_local(&self, content: &[u8], remote_path: &str, cache_directory: &str, cache_file: &str) {
        if !can_cache_on_disk(cache_directory) {
            // Deleted files are only reclaimed once their last reference
            // drops, so eviction cannot be followed by an immediate write.
            if let Err(err) = evict_stale_cache_files(&self.local_filesystem, cache_directory) {
                log::warn!(
                    "Stale cache file eviction under {} failed: {}",
                    cache_directory,
                    err
                );
            }
            return;
        }

        let temp_name = format!(
            "{}.{}.{}",
            path_utils::file_name(remote_path),
            Uuid::new_v4(),
            TEMP_CACHE_FILE_SUFFIX
        );
        let temp_file = path_utils::join_path(cache_directory, &temp_name);

        let publish = || -> Result<()> {
            let handle = self.local_filesystem.open(
                &temp_file,
                OpenFlags::WRITE | OpenFlags::CREATE_NEW,
                None,
            )?;
            handle.write_at(content, 0)?;
            handle.sync()?;
            handle.close()?;
            // Atomic commit point.
            self.local_filesystem.move_file(&temp_file, cache_file)
        };
        if let Err(err) = publish() {
            log::warn!("Failed to publish cache file {}: {}", cache_file, err);
            let _ = self.local_filesystem.remove_file(&temp_file);
        }
    }
}

impl Default for DiskCacheReader {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheReader for DiskCacheReader {
    fn name(&self) -> &'static str {
        "on_disk"
    }

    fn read_and_cache(
        &self,
        handle: &CacheFileSystemHandle,
        buffer: &mut [u8],
        requested_start_offset: u64,
        requested_bytes_to_read: u64,
        file_size: u64,
    ) -> Result<()> {
        let current = config::current_config();
        let block_size = current.cache_block_size;
        let cache_directory = current.on_disk_cache_directory.clone();

        let chunks = plan_read_chunks(
            buffer,
            requested_start_offset,
            requested_bytes_to_read,
            file_size,
            block_size,
        );
        let thread_count = config::thread_count_for_subrequests(chunks.len());

        let cache_directory = &cache_directory;
        let jobs: Vec<crate::thread_pool::IoJob> = chunks
            .into_iter()
            .map(|mut chunk| {
                Box::new(move || {
                    let collector = handle.profile_collector();
                    let cache_file = local_cache_file(
                        cache_directory,
                        handle.path(),
                        chunk.aligned_start_offset,
                        chunk.chunk_size,
                    );

                    if self.local_filesystem.file_exists(&cache_file) {
                        collector.record_cache_access(CacheEntity::Data, CacheAccess::Hit);
                        let cache_handle =
                            self.local_filesystem.open(&cache_file, OpenFlags::READ, None)?;
                        if chunk.needs_staging {
                            let mut staging = vec![0u8; chunk.chunk_size as usize];
                            let nr_read = cache_handle.read_at(&mut staging, 0)?;
                            ensure!(
                                nr_read as u64 == chunk.chunk_size,
                                "Cache file {} is truncated: {} bytes instead of {}",
                                cache_file,
                                nr_read,
                                chunk.chunk_size
                            );
                            chunk.copy_to_dest(&staging);
                        } else {
                            // Middle chunk: the block lands straight in the
                            // caller's buffer.
                            let nr_read = cache_handle.read_at(chunk.dest, 0)?;
                            ensure!(
                                nr_read == chunk.dest.len(),
                                "Cache file {} is truncated: {} bytes instead of {}",
                                cache_file,
                                nr_read,
                                chunk.dest.len()
                            );
                        }

                        // Refresh mtime so mtime-ordered eviction spares the
                        // file; a failed touch is a real local-disk fault.
                        touch_file(&cache_file)?;
                        return Ok(());
                    }

                    collector.record_cache_access(CacheEntity::Data, CacheAccess::Miss);
                    let mut content = vec![0u8; chunk.chunk_size as usize];

                    let oper_id = collector.generate_oper_id();
                    collector.record_operation_start(IoOperation::Read, &oper_id);
                    let nr_read = handle
                        .inner_handle()
                        .read_at(&mut content, chunk.aligned_start_offset)?;
                    collector.record_operation_end(IoOperation::Read, &oper_id);
                    ensure!(
                        nr_read as u64 == chunk.chunk_size,
                        "Short read from {}: got {} bytes instead of {} at offset {}",
                        handle.path(),
                        nr_read,
                        chunk.chunk_size,
                        chunk.aligned_start_offset
                    );

                    chunk.copy_to_dest(&content);
                    self.cache_local(&content, handle.path(), cache_directory, &cache_file);
                    Ok(())
                }) as crate::thread_pool::IoJob
            })
            .collect();

        crate::thread_pool::run_io_batch(jobs, thread_count, READ_WORKER_THREAD_NAME)
    }

    fn cache_entries_info(&self) -> Result<Vec<DataCacheEntryInfo>> {
        let cache_directory = config::current_config().on_disk_cache_directory.clone();
        if !self.local_filesystem.directory_exists(&cache_directory) {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        self.local_filesystem
            .list_files(&cache_directory, &mut |name, is_dir| {
                if is_dir {
                    return;
                }
                // Temp files and strangers fail to parse and are skipped.
                if let Some((remote_filename, start_offset, end_offset)) =
                    parse_cache_file_name(name)
                {
                    entries.push(DataCacheEntryInfo {
                        cache_filepath: path_utils::join_path(&cache_directory, name),
                        remote_filename,
                        start_offset,
                        end_offset,
                        cache_type: "on-disk".to_string(),
                    });
                }
            })?;
        Ok(entries)
    }

    fn clear_cache(&self) -> Result<()> {
        let cache_directory = config::current_config().on_disk_cache_directory.clone();
        self.local_filesystem.remove_directory(&cache_directory)?;
        // Recreate so later reads do not trip on a missing directory.
        self.local_filesystem
            .create_directory(&cache_directory)
            .with_context(|| format!("Failed to recreate cache directory {}", cache_directory))
    }

    fn clear_cache_for_file(&self, remote_file: &str) -> Result<()> {
        let cache_directory = config::current_config().on_disk_cache_directory.clone();
        if !self.local_filesystem.directory_exists(&cache_directory) {
            return Ok(());
        }
        let prefix = local_cache_file_prefix(remote_file);
        let mut doomed = Vec::new();
        self.local_filesystem
            .list_files(&cache_directory, &mut |name, is_dir| {
                if !is_dir && name.starts_with(&prefix) {
                    doomed.push(path_utils::join_path(&cache_directory, name));
                }
            })?;
        for path in doomed {
            self.local_filesystem.remove_file(&path)?;
        }
        Ok(())
    }
}

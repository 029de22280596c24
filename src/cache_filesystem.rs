//! Caching filesystem facade.
//!
//! Wraps an inner transport and intercepts open, read, size and glob; every
//! other operation is delegated verbatim. First use (and every later open)
//! runs lazy initialization under one mutex: reload configuration from the
//! opener, pick the profile collector, select the process-global cache
//! reader, and build whichever sub-caches are enabled.
//!
//! ## Handle recycling
//!
//! Read handles are expensive to open on remote transports (an HTTP open is
//! a HEAD request), so the facade keeps released inner handles in an
//! exclusive multi-value LRU keyed by `(path, flags)`:
//!
//! - on a read open, a cached inner handle is checked out when present;
//!   stale handles evicted on the way are closed outside the cache lock;
//! - on facade-handle drop, the inner handle is rewound to offset zero and
//!   offered back; a handle evicted by the insert is closed here, again
//!   outside the lock;
//! - `close` on a read handle is a no-op (the inner handle lives on for
//!   reuse); write handles close for real.
//!
//! Exclusivity is the safety argument: a cached inner handle belongs to
//! nobody, a checked-out one to exactly one facade handle.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::cache_entry_info::CacheAccessInfo;
use crate::cache_reader_manager::CacheReaderManager;
use crate::config::{self, CacheType, FileOpener, ProfileType};
use crate::exclusive_multi_lru_cache::ThreadSafeExclusiveMultiLruCache;
use crate::fs_interface::{FileHandle, FileSystem, OpenFlags};
use crate::local_filesystem::{LocalFileSystem, LOCAL_FILESYSTEM_NAME};
use crate::path_utils;
use crate::profile_collector::{
    CacheAccess, CacheEntity, IoOperation, NoopProfileCollector, ProfileCollector,
};
use crate::registry;
use crate::shared_lru_cache::ThreadSafeSharedLruCache;
use crate::temp_profile_collector::TempProfileCollector;

pub(crate) struct FileMetadata {
    pub file_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FileHandleCacheKey {
    path: String,
    flag_bits: u32,
}

type MetadataCache = ThreadSafeSharedLruCache<String, FileMetadata>;
type GlobCache = ThreadSafeSharedLruCache<String, Vec<String>>;
type FileHandleCache = ThreadSafeExclusiveMultiLruCache<FileHandleCacheKey, Box<dyn FileHandle>>;

struct SubCaches {
    profile_collector: Arc<dyn ProfileCollector>,
    metadata_cache: Option<Arc<MetadataCache>>,
    file_handle_cache: Option<Arc<FileHandleCache>>,
    glob_cache: Option<Arc<GlobCache>>,
}

/// Shared state between the facade and its handles. Handles keep it alive,
/// so a facade can be dropped while reads are outstanding.
pub(crate) struct CacheFsState {
    internal_filesystem: Box<dyn FileSystem>,
    /// Serializes lazy setup at open; later opens take it briefly and find
    /// everything initialized.
    init_mutex: Mutex<()>,
    caches: Mutex<SubCaches>,
}

impl CacheFsState {
    pub(crate) fn profile_collector(&self) -> Arc<dyn ProfileCollector> {
        self.caches.lock().unwrap().profile_collector.clone()
    }

    fn metadata_cache(&self) -> Option<Arc<MetadataCache>> {
        self.caches.lock().unwrap().metadata_cache.clone()
    }

    fn glob_cache(&self) -> Option<Arc<GlobCache>> {
        self.caches.lock().unwrap().glob_cache.clone()
    }

    fn file_handle_cache(&self) -> Option<Arc<FileHandleCache>> {
        self.caches.lock().unwrap().file_handle_cache.clone()
    }

    /// Invalidate the metadata, glob and file-handle caches. Persisted data
    /// blocks are untouched. Returned file handles are closed here, outside
    /// every cache lock.
    pub(crate) fn clear_cache(&self) {
        let (metadata, glob, file_handles) = {
            let caches = self.caches.lock().unwrap();
            (
                caches.metadata_cache.clone(),
                caches.glob_cache.clone(),
                caches.file_handle_cache.clone(),
            )
        };
        if let Some(cache) = metadata {
            cache.clear();
        }
        if let Some(cache) = glob {
            cache.clear();
        }
        if let Some(cache) = file_handles {
            close_handles(cache.clear_and_take_values());
        }
    }

    /// Targeted invalidation for one remote object. The glob cache is
    /// dropped wholesale since patterns cannot be mapped back to the paths
    /// they matched.
    pub(crate) fn clear_cache_for_file(&self, path: &str) {
        let (metadata, glob, file_handles) = {
            let caches = self.caches.lock().unwrap();
            (
                caches.metadata_cache.clone(),
                caches.glob_cache.clone(),
                caches.file_handle_cache.clone(),
            )
        };
        if let Some(cache) = metadata {
            cache.delete(&path.to_string());
        }
        if let Some(cache) = glob {
            cache.clear();
        }
        if let Some(cache) = file_handles {
            close_handles(cache.take_with_filter(|key| key.path == path));
        }
    }
}

fn close_handles(handles: Vec<Box<dyn FileHandle>>) {
    for handle in handles {
        if let Err(err) = handle.close() {
            log::warn!("Failed to close evicted file handle for {}: {}", handle.path(), err);
        }
    }
}

pub struct CacheFileSystem {
    state: Arc<CacheFsState>,
    display_name: String,
}

impl CacheFileSystem {
    pub fn new(internal_filesystem: Box<dyn FileSystem>) -> Self {
        let display_name = format!("cachefs over {}", internal_filesystem.name());
        let state = Arc::new(CacheFsState {
            internal_filesystem,
            init_mutex: Mutex::new(()),
            caches: Mutex::new(SubCaches {
                profile_collector: Arc::new(NoopProfileCollector::new()),
                metadata_cache: None,
                file_handle_cache: None,
                glob_cache: None,
            }),
        });
        registry::register(&state);
        CacheFileSystem {
            state,
            display_name,
        }
    }

    /// Run lazy setup under the init mutex: config reload, profile
    /// collector, reader selection, sub-cache construction.
    fn initialize(&self, opener: Option<&dyn FileOpener>) -> Result<()> {
        let _guard = self.state.init_mutex.lock().unwrap();
        let current = config::update_global_config(opener);

        if current.cache_type == CacheType::OnDisk {
            LocalFileSystem::new().create_directory(&current.on_disk_cache_directory)?;
        }

        let mut stale_handles = Vec::new();
        {
            let mut caches = self.state.caches.lock().unwrap();

            if caches.profile_collector.profiler_type() != current.profile_type {
                caches.profile_collector = match current.profile_type {
                    ProfileType::Noop => Arc::new(NoopProfileCollector::new()),
                    ProfileType::Temp | ProfileType::Persistent => {
                        Arc::new(TempProfileCollector::new(current.profile_type))
                    }
                };
            }

            match (current.enable_metadata_cache, caches.metadata_cache.is_some()) {
                (true, false) => {
                    caches.metadata_cache = Some(Arc::new(MetadataCache::new(
                        current.max_metadata_cache_entry,
                        current.metadata_cache_entry_timeout_millisec,
                    )))
                }
                (false, true) => caches.metadata_cache = None,
                _ => {}
            }

            match (current.enable_glob_cache, caches.glob_cache.is_some()) {
                (true, false) => {
                    caches.glob_cache = Some(Arc::new(GlobCache::new(
                        current.max_glob_cache_entry,
                        current.glob_cache_entry_timeout_millisec,
                    )))
                }
                (false, true) => caches.glob_cache = None,
                _ => {}
            }

            match (
                current.enable_file_handle_cache,
                caches.file_handle_cache.is_some(),
            ) {
                (true, false) => {
                    caches.file_handle_cache = Some(Arc::new(FileHandleCache::new(
                        current.max_file_handle_cache_entry,
                        current.file_handle_cache_entry_timeout_millisec,
                    )))
                }
                (false, true) => {
                    if let Some(cache) = caches.file_handle_cache.take() {
                        stale_handles = cache.clear_and_take_values();
                    }
                }
                _ => {}
            }
        }
        close_handles(stale_handles);

        let reader = CacheReaderManager::get().set_cache_reader(current.cache_type);
        self.state
            .profile_collector()
            .set_cache_reader_type(reader.name());
        Ok(())
    }

    fn get_or_create_handle_for_read(
        &self,
        path: &str,
        flags: OpenFlags,
        opener: Option<&dyn FileOpener>,
    ) -> Result<Box<dyn FileHandle>> {
        let collector = self.state.profile_collector();
        if let Some(file_handle_cache) = self.state.file_handle_cache() {
            // The cache is exclusive, so no extra locking guards reuse.
            let key = FileHandleCacheKey {
                path: path.to_string(),
                flag_bits: (flags | OpenFlags::PARALLEL_ACCESS).bits(),
            };
            let checkout = file_handle_cache.get_and_pop(&key);
            close_handles(checkout.evicted_values);
            if let Some(inner_handle) = checkout.target_value {
                collector.record_cache_access(CacheEntity::FileHandle, CacheAccess::Hit);
                return Ok(Box::new(CacheFileSystemHandle::new(
                    self.state.clone(),
                    inner_handle,
                    flags,
                )));
            }
            collector.record_cache_access(CacheEntity::FileHandle, CacheAccess::Miss);
        }

        let oper_id = collector.generate_oper_id();
        collector.record_operation_start(IoOperation::Open, &oper_id);
        let inner_handle = self.state.internal_filesystem.open(
            path,
            flags | OpenFlags::PARALLEL_ACCESS,
            opener,
        )?;
        collector.record_operation_end(IoOperation::Open, &oper_id);
        Ok(Box::new(CacheFileSystemHandle::new(
            self.state.clone(),
            inner_handle,
            flags,
        )))
    }

    fn glob_inner_profiled(
        &self,
        pattern: &str,
        opener: Option<&dyn FileOpener>,
    ) -> Result<Vec<String>> {
        let collector = self.state.profile_collector();
        let oper_id = collector.generate_oper_id();
        collector.record_operation_start(IoOperation::Glob, &oper_id);
        let paths = self.state.internal_filesystem.glob(pattern, opener)?;
        collector.record_operation_end(IoOperation::Glob, &oper_id);
        Ok(paths)
    }

    /// Invalidate this facade's metadata, glob and file-handle caches; data
    /// block caches (in memory or on disk) stay.
    pub fn clear_cache(&self) {
        self.state.clear_cache();
    }

    /// Targeted version of [`CacheFileSystem::clear_cache`].
    pub fn clear_cache_for_file(&self, path: &str) {
        self.state.clear_cache_for_file(path);
    }

    /// Per-entity hit/miss counters from this facade's collector.
    pub fn cache_access_info(&self) -> Vec<CacheAccessInfo> {
        self.state.profile_collector().cache_access_info()
    }

    /// Human-readable profile stats plus latest-completion timestamp.
    pub fn profile_stats(&self) -> (String, u64) {
        self.state.profile_collector().human_readable_stats()
    }

    /// Reset profiling counters.
    pub fn reset_profile_stats(&self) {
        self.state.profile_collector().reset()
    }
}

impl Drop for CacheFileSystem {
    fn drop(&mut self) {
        // Outstanding handles keep the state alive; closing cached inner
        // handles here is still correct because none of them is checked out.
        self.state.clear_cache();
    }
}

impl FileSystem for CacheFileSystem {
    fn name(&self) -> &str {
        &self.display_name
    }

    fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        opener: Option<&dyn FileOpener>,
    ) -> Result<Box<dyn FileHandle>> {
        self.initialize(opener)?;
        if flags.open_for_reading() {
            return self.get_or_create_handle_for_read(path, flags, opener);
        }
        // Non-read handles bypass the file-handle cache and profiling.
        let inner_handle = self.state.internal_filesystem.open(path, flags, opener)?;
        Ok(Box::new(CacheFileSystemHandle::new(
            self.state.clone(),
            inner_handle,
            flags,
        )))
    }

    fn glob(&self, pattern: &str, opener: Option<&dyn FileOpener>) -> Result<Vec<String>> {
        self.initialize(opener)?;
        let Some(glob_cache) = self.state.glob_cache() else {
            return self.glob_inner_profiled(pattern, opener);
        };

        // Point lookups are served directly: caching literal paths would
        // flood the glob cache without ever being re-used as patterns.
        if !path_utils::has_glob_metachars(pattern) {
            return self.state.internal_filesystem.glob(pattern, opener);
        }

        let mut hit = true;
        let paths = glob_cache.get_or_create(pattern.to_string(), |_| {
            hit = false;
            Ok(Arc::new(self.glob_inner_profiled(pattern, opener)?))
        })?;
        let access = if hit { CacheAccess::Hit } else { CacheAccess::Miss };
        self.state
            .profile_collector()
            .record_cache_access(CacheEntity::Glob, access);
        Ok((*paths).clone())
    }

    fn list_files(&self, dir: &str, callback: &mut dyn FnMut(&str, bool)) -> Result<()> {
        self.state.internal_filesystem.list_files(dir, callback)
    }

    fn file_exists(&self, path: &str) -> bool {
        self.state.internal_filesystem.file_exists(path)
    }

    fn directory_exists(&self, path: &str) -> bool {
        self.state.internal_filesystem.directory_exists(path)
    }

    fn create_directory(&self, path: &str) -> Result<()> {
        self.state.internal_filesystem.create_directory(path)
    }

    fn remove_directory(&self, path: &str) -> Result<()> {
        self.state.internal_filesystem.remove_directory(path)
    }

    fn remove_file(&self, path: &str) -> Result<()> {
        self.state.internal_filesystem.remove_file(path)
    }

    fn move_file(&self, source: &str, target: &str) -> Result<()> {
        self.state.internal_filesystem.move_file(source, target)
    }

    fn get_available_disk_space(&self, path: &str) -> Option<u64> {
        self.state.internal_filesystem.get_available_disk_space(path)
    }

    fn can_handle_file(&self, path: &str) -> bool {
        if self.state.internal_filesystem.can_handle_file(path) {
            return true;
        }
        // The local filesystem is the host dispatcher's fallback for every
        // path; claiming everything here routes those paths through the
        // cache. A path the local filesystem truly cannot serve errors out
        // at open time regardless.
        self.state.internal_filesystem.name() == LOCAL_FILESYSTEM_NAME
    }

    fn is_manually_set(&self) -> bool {
        // With a local inner filesystem, yield priority so more specific
        // transports can win the path.
        self.state.internal_filesystem.name() != LOCAL_FILESYSTEM_NAME
    }
}

/// Facade-produced file handle; the cached read path lives here.
pub struct CacheFileSystemHandle {
    state: Arc<CacheFsState>,
    /// Present from construction until drop.
    inner: Option<Box<dyn FileHandle>>,
    path: String,
    flags: OpenFlags,
    position: AtomicU64,
}

impl CacheFileSystemHandle {
    fn new(state: Arc<CacheFsState>, inner: Box<dyn FileHandle>, flags: OpenFlags) -> Self {
        let path = inner.path().to_string();
        CacheFileSystemHandle {
            state,
            inner: Some(inner),
            path,
            flags,
            position: AtomicU64::new(0),
        }
    }

    /// The transport handle underneath; cache readers issue their aligned
    /// reads against it.
    pub(crate) fn inner_handle(&self) -> &dyn FileHandle {
        self.inner
            .as_deref()
            .expect("inner file handle is present until drop")
    }

    pub(crate) fn profile_collector(&self) -> Arc<dyn ProfileCollector> {
        self.state.profile_collector()
    }
}

impl FileHandle for CacheFileSystemHandle {
    fn path(&self) -> &str {
        &self.path
    }

    fn flags(&self) -> OpenFlags {
        self.flags
    }

    fn read_at(&self, buffer: &mut [u8], location: u64) -> Result<usize> {
        let file_size = self.file_size()?;
        if location >= file_size {
            return Ok(0);
        }
        let bytes_to_read = (buffer.len() as u64).min(file_size - location);
        if bytes_to_read == 0 {
            return Ok(0);
        }

        let reader = CacheReaderManager::get()
            .current_reader()
            .context("Cache reader is not initialized; open the file through the facade first")?;
        reader.read_and_cache(
            self,
            &mut buffer[..bytes_to_read as usize],
            location,
            bytes_to_read,
            file_size,
        )?;
        Ok(bytes_to_read as usize)
    }

    fn write_at(&self, buffer: &[u8], location: u64) -> Result<usize> {
        self.inner_handle().write_at(buffer, location)
    }

    fn file_size(&self) -> Result<u64> {
        let Some(metadata_cache) = self.state.metadata_cache() else {
            return self.inner_handle().file_size();
        };

        let mut hit = true;
        let metadata = metadata_cache.get_or_create(self.path.clone(), |_| {
            hit = false;
            let file_size = self.inner_handle().file_size()?;
            Ok(Arc::new(FileMetadata { file_size }))
        })?;
        let access = if hit { CacheAccess::Hit } else { CacheAccess::Miss };
        self.state
            .profile_collector()
            .record_cache_access(CacheEntity::Metadata, access);
        Ok(metadata.file_size)
    }

    fn last_modified(&self) -> Result<SystemTime> {
        self.inner_handle().last_modified()
    }

    fn sync(&self) -> Result<()> {
        self.inner_handle().sync()
    }

    fn seek(&self, location: u64) -> Result<()> {
        self.position.store(location, Ordering::Release);
        Ok(())
    }

    fn seek_position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    fn can_seek(&self) -> bool {
        self.inner_handle().can_seek()
    }

    fn close(&self) -> Result<()> {
        // Read handles stay open for recycling; their resources are
        // released when evicted from the file-handle cache.
        if !self.flags.open_for_reading() {
            return self.inner_handle().close();
        }
        Ok(())
    }
}

impl Drop for CacheFileSystemHandle {
    fn drop(&mut self) {
        if !self.flags.open_for_reading() {
            return;
        }
        let Some(inner_handle) = self.inner.take() else {
            return;
        };
        let Some(file_handle_cache) = self.state.file_handle_cache() else {
            let _ = inner_handle.close();
            return;
        };
        // Handles that cannot rewind must not be recycled.
        if !inner_handle.can_seek() {
            let _ = inner_handle.close();
            return;
        }
        if let Err(err) = inner_handle.reset() {
            log::warn!(
                "Failed to rewind {} before recycling, closing instead: {}",
                self.path,
                err
            );
            let _ = inner_handle.close();
            return;
        }

        let key = FileHandleCacheKey {
            path: self.path.clone(),
            flag_bits: (self.flags | OpenFlags::PARALLEL_ACCESS).bits(),
        };
        if let Some(evicted) = file_handle_cache.put(key, inner_handle) {
            close_handles(vec![evicted]);
        }
    }
}

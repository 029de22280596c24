//! Host-facing maintenance and status surface.
//!
//! Thin functions the embedding engine can expose as SQL functions or CLI
//! commands: cache clearing, on-disk usage, profile text, and cache-entry
//! enumeration across every reader and facade in the process.

use anyhow::Result;

use crate::cache_entry_info::{CacheAccessInfo, DataCacheEntryInfo};
use crate::cache_reader_manager::CacheReaderManager;
use crate::config;
use crate::fs_interface::FileSystem;
use crate::local_filesystem::LocalFileSystem;
use crate::path_utils;
use crate::profile_collector::CACHE_ENTITY_COUNT;
use crate::registry;

/// Drop every cached data block (all readers) and invalidate every facade's
/// metadata, glob and file-handle caches.
pub fn clear_all_caches() -> Result<()> {
    CacheReaderManager::get().clear_cache()?;
    for facade in registry::all_cache_filesystems() {
        facade.clear_cache();
    }
    Ok(())
}

/// Targeted version of [`clear_all_caches`] for one remote object.
pub fn clear_cache_for_file(remote_file: &str) -> Result<()> {
    CacheReaderManager::get().clear_cache_for_file(remote_file)?;
    for facade in registry::all_cache_filesystems() {
        facade.clear_cache_for_file(remote_file);
    }
    Ok(())
}

/// Total bytes currently persisted in the on-disk cache directory.
pub fn get_on_disk_cache_size() -> Result<u64> {
    let cache_directory = config::current_config().on_disk_cache_directory.clone();
    let local_filesystem = LocalFileSystem::new();
    if !local_filesystem.directory_exists(&cache_directory) {
        return Ok(0);
    }

    let mut names = Vec::new();
    local_filesystem.list_files(&cache_directory, &mut |name, is_dir| {
        if !is_dir {
            names.push(name.to_string());
        }
    })?;

    let mut total = 0u64;
    for name in names {
        let path = path_utils::join_path(&cache_directory, &name);
        // Tolerate files evicted while we walk.
        if let Ok(metadata) = std::fs::metadata(&path) {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Every cached data block across all initialized readers, sorted for
/// stable host output. The on-disk reader is constructed on demand so
/// persisted files from previous runs show up too.
pub fn get_cache_entries_info() -> Result<Vec<DataCacheEntryInfo>> {
    let manager = CacheReaderManager::get();
    manager.initialize_disk_cache_reader();

    let mut entries = Vec::new();
    for reader in manager.cache_readers() {
        entries.extend(reader.cache_entries_info()?);
    }
    entries.sort();
    Ok(entries)
}

/// Hit/miss counters summed over every live facade, in cache-entity order.
pub fn get_cache_access_info() -> Vec<CacheAccessInfo> {
    let mut aggregated: Vec<CacheAccessInfo> = Vec::new();
    for facade in registry::all_cache_filesystems() {
        let info = facade.profile_collector().cache_access_info();
        if aggregated.is_empty() {
            aggregated = info;
            continue;
        }
        debug_assert_eq!(info.len(), CACHE_ENTITY_COUNT);
        for (total, part) in aggregated.iter_mut().zip(info) {
            total.cache_hit_count += part.cache_hit_count;
            total.cache_miss_count += part.cache_miss_count;
        }
    }
    aggregated
}

/// Concatenated human-readable profile stats from every live facade.
pub fn get_profile_stats() -> String {
    let mut sections = Vec::new();
    for facade in registry::all_cache_filesystems() {
        let (stats, _latest) = facade.profile_collector().human_readable_stats();
        sections.push(stats);
    }
    if sections.is_empty() {
        return "(no cache filesystem alive)".to_string();
    }
    sections.join("\n---\n")
}

/// Zero out profiling counters on every live facade.
pub fn reset_profile_stats() {
    for facade in registry::all_cache_filesystems() {
        facade.profile_collector().reset();
    }
}

/// Tear down process-global cache state: forget readers, drop facade
/// registrations and restore default configuration. Meant for host unload
/// and test isolation; persisted cache files stay on disk.
pub fn reset_process_state() {
    CacheReaderManager::get().reset();
    registry::reset();
    config::reset_global_config();
}

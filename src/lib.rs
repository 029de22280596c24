//! Read-through block caching layered over slow byte-addressable
//! filesystems.
//!
//! The facade ([`CacheFileSystem`]) wraps any transport implementing the
//! [`FileSystem`] trait and turns small arbitrary-offset reads into
//! block-aligned parallel fetches, memoized on local disk or in process
//! memory. Metadata, glob results and file handles are cached alongside the
//! data blocks, each with its own capacity and TTL bounds.

pub mod cache_entry_info;
pub mod cache_filesystem;
pub mod cache_reader;
pub mod cache_reader_manager;
pub mod cache_status;
pub mod config;
pub mod copiable_lru_cache;
pub mod disk_cache_reader;
pub mod exclusive_lru_cache;
pub mod exclusive_multi_lru_cache;
pub mod filesystem_utils;
pub mod fs_interface;
pub mod histogram;
pub mod in_memory_cache_reader;
pub mod local_filesystem;
pub mod mock_filesystem;
pub mod noop_cache_reader;
pub mod path_utils;
pub mod profile_collector;
mod registry;
pub mod shared_lru_cache;
pub mod temp_profile_collector;
pub mod thread_pool;
pub mod time_utils;

pub use cache_entry_info::{CacheAccessInfo, DataCacheEntryInfo};
pub use cache_filesystem::{CacheFileSystem, CacheFileSystemHandle};
pub use cache_reader::CacheReader;
pub use config::{CacheConfig, CacheType, FileOpener, ProfileType, StaticFileOpener};
pub use fs_interface::{FileHandle, FileSystem, OpenFlags};
pub use local_filesystem::LocalFileSystem;

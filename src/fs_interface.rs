//! Pluggable Filesystem Interface
//!
//! This module defines the capability traits that decouple the caching layer
//! from the transports underneath it (HTTP, S3, or the local filesystem used
//! as a stand-in for a remote source).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Query engine / caller                 │
//! ├─────────────────────────────────────────┤
//! │   CacheFileSystem (facade)              │
//! ├─────────────────────────────────────────┤
//! │   FileSystem + FileHandle traits        │  ← This module
//! ├─────────────────────────────────────────┤
//! │   Transport (local, HTTP, S3, ...)      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//!
//! 1. **Delegation over inheritance**: the caching facade wraps an inner
//!    `FileSystem` and forwards everything it doesn't intercept.
//! 2. **Positional reads**: `FileHandle::read_at` never moves the seek
//!    position, so parallel sub-requests can share one handle.
//! 3. **Thread safety**: implementations must be `Send + Sync`; a single
//!    handle is read from many worker threads at once.
//! 4. **Atomic rename**: `move_file` must be atomic on the local transport,
//!    which is what makes on-disk cache publication crash-safe.

use anyhow::Result;
use std::ops::BitOr;
use std::time::SystemTime;

use crate::config::FileOpener;

/// Open-mode flags, a small bitset mirroring what the transports support.
///
/// `PARALLEL_ACCESS` marks handles that may serve overlapping positional
/// reads from multiple threads; the file-handle cache always sets it so a
/// recycled handle is safe to share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ: OpenFlags = OpenFlags(1);
    pub const WRITE: OpenFlags = OpenFlags(1 << 1);
    pub const CREATE: OpenFlags = OpenFlags(1 << 2);
    pub const CREATE_NEW: OpenFlags = OpenFlags(1 << 3);
    pub const TRUNCATE: OpenFlags = OpenFlags(1 << 4);
    pub const PARALLEL_ACCESS: OpenFlags = OpenFlags(1 << 5);

    /// Raw bit representation, used for hashing file-handle cache keys.
    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn open_for_reading(self) -> bool {
        self.contains(OpenFlags::READ)
    }

    pub fn open_for_writing(self) -> bool {
        self.contains(OpenFlags::WRITE)
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// An open file on some transport.
///
/// Handles are shared across sub-request worker threads, so every method
/// takes `&self`; implementations keep their seek position in an atomic.
pub trait FileHandle: Send + Sync {
    /// Path this handle was opened with.
    fn path(&self) -> &str;

    /// Flags this handle was opened with.
    fn flags(&self) -> OpenFlags;

    /// Positional read into `buffer` starting at `location`. Does not move
    /// the seek position. Returns the number of bytes read, which is only
    /// less than `buffer.len()` at end of file.
    fn read_at(&self, buffer: &mut [u8], location: u64) -> Result<usize>;

    /// Positional write. Writes bypass the cache entirely.
    fn write_at(&self, buffer: &[u8], location: u64) -> Result<usize>;

    /// Total object size in bytes.
    fn file_size(&self) -> Result<u64>;

    /// Last modification time, used for stale cache file eviction.
    fn last_modified(&self) -> Result<SystemTime>;

    /// Flush written data to durable storage.
    fn sync(&self) -> Result<()>;

    /// Move the streaming seek position.
    fn seek(&self, location: u64) -> Result<()>;

    /// Current streaming seek position.
    fn seek_position(&self) -> u64;

    /// Rewind to offset zero, called before a handle is recycled.
    fn reset(&self) -> Result<()> {
        self.seek(0)
    }

    /// Whether the handle supports repositioning. Non-seekable handles are
    /// never recycled through the file-handle cache.
    fn can_seek(&self) -> bool {
        true
    }

    /// Release underlying resources. Dropping a handle must also release
    /// them; `close` exists so callers can surface errors.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Streaming read at the current seek position; advances it by the
    /// number of bytes read.
    fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        let location = self.seek_position();
        let nr_read = self.read_at(buffer, location)?;
        self.seek(location + nr_read as u64)?;
        Ok(nr_read)
    }
}

/// A byte-addressable storage transport.
///
/// Implementations must be thread-safe; one filesystem instance serves all
/// concurrent opens and reads.
pub trait FileSystem: Send + Sync {
    /// Short transport name, e.g. `"local"`.
    fn name(&self) -> &str;

    /// Open `path` with `flags`. The opener, when present, carries host
    /// configuration the transport may consult.
    fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        opener: Option<&dyn FileOpener>,
    ) -> Result<Box<dyn FileHandle>>;

    /// Expand a glob pattern into the matching paths, in transport order.
    fn glob(&self, pattern: &str, opener: Option<&dyn FileOpener>) -> Result<Vec<String>>;

    /// Invoke `callback(name, is_directory)` for each direct child of `dir`.
    fn list_files(&self, dir: &str, callback: &mut dyn FnMut(&str, bool)) -> Result<()>;

    fn file_exists(&self, path: &str) -> bool;

    fn directory_exists(&self, path: &str) -> bool;

    fn create_directory(&self, path: &str) -> Result<()>;

    fn remove_directory(&self, path: &str) -> Result<()>;

    fn remove_file(&self, path: &str) -> Result<()>;

    /// Atomic rename; the commit point of cache-file publication.
    fn move_file(&self, source: &str, target: &str) -> Result<()>;

    /// Available bytes on the filesystem hosting `path`, when knowable.
    fn get_available_disk_space(&self, path: &str) -> Option<u64>;

    /// Whether this transport claims `path`.
    fn can_handle_file(&self, _path: &str) -> bool {
        true
    }

    /// Whether this filesystem was explicitly installed and should win over
    /// transports that merely claim the path.
    fn is_manually_set(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags_combination() {
        let flags = OpenFlags::READ | OpenFlags::PARALLEL_ACCESS;
        assert!(flags.contains(OpenFlags::READ));
        assert!(flags.contains(OpenFlags::PARALLEL_ACCESS));
        assert!(!flags.contains(OpenFlags::WRITE));
        assert!(flags.open_for_reading());
        assert!(!flags.open_for_writing());
    }

    #[test]
    fn test_open_flags_bits_stable() {
        let read_parallel = OpenFlags::READ | OpenFlags::PARALLEL_ACCESS;
        assert_eq!(read_parallel.bits(), (OpenFlags::READ | OpenFlags::PARALLEL_ACCESS).bits());
        assert_ne!(read_parallel.bits(), OpenFlags::READ.bits());
    }
}

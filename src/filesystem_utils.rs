//! Disk-space probing, stale cache file eviction and cache-file naming.
//!
//! Cache files all live flat in one directory and their names fully encode
//! the block key:
//!
//! ```text
//! <cache_dir>/<sha256-hex-of-remote-path>-<basename>-<start_offset>-<chunk_size>
//! ```
//!
//! so the on-disk cache can be enumerated (and debugged) with a plain `ls`.
//! Temporary files carry a UUID plus the `.httpfs_local_cache` suffix until
//! the atomic rename publishes them.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::time::SystemTime;

use crate::config::{self, CACHE_FILE_STALENESS_SECONDS, DEFAULT_MIN_DISK_SPACE_PERCENT};
use crate::fs_interface::FileSystem;
use crate::path_utils;

/// Lowercase hex SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Canonical cache-file path for one block of `remote_file`.
pub fn local_cache_file(
    cache_directory: &str,
    remote_file: &str,
    start_offset: u64,
    chunk_size: u64,
) -> String {
    let name = format!(
        "{}-{}-{}-{}",
        sha256_hex(remote_file),
        path_utils::file_name(remote_file),
        start_offset,
        chunk_size
    );
    path_utils::join_path(cache_directory, &name)
}

/// Filename prefix shared by every cache file of `remote_file`, used when
/// clearing the cache for one remote object.
pub fn local_cache_file_prefix(remote_file: &str) -> String {
    format!(
        "{}-{}",
        sha256_hex(remote_file),
        path_utils::file_name(remote_file)
    )
}

/// Decode a cache filename back into `(remote basename, start, end)`.
///
/// The full remote path is only present as a digest, so the basename is all
/// that can be recovered. Returns `None` for names not produced by
/// [`local_cache_file`], e.g. leftover temp files.
pub fn parse_cache_file_name(fname: &str) -> Option<(String, u64, u64)> {
    // <64 hex chars>-<basename>-<start>-<size>
    if fname.len() < 65 || !fname.as_bytes()[..64].iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    if fname.as_bytes()[64] != b'-' {
        return None;
    }
    let rest = &fname[65..];
    let mut pieces = rest.rsplitn(3, '-');
    let chunk_size: u64 = pieces.next()?.parse().ok()?;
    let start_offset: u64 = pieces.next()?.parse().ok()?;
    let basename = pieces.next()?;
    if basename.is_empty() {
        return None;
    }
    Some((basename.to_string(), start_offset, start_offset + chunk_size))
}

/// Available bytes on the filesystem hosting `path`, when the OS can tell.
#[cfg(unix)]
pub fn available_disk_space(path: &str) -> Option<u64> {
    let stats = statvfs(path)?;
    Some(stats.f_bavail as u64 * stats.f_frsize as u64)
}

/// Total capacity of the filesystem hosting `path`.
#[cfg(unix)]
pub fn total_disk_space(path: &str) -> Option<u64> {
    let stats = statvfs(path)?;
    Some(stats.f_blocks as u64 * stats.f_frsize as u64)
}

#[cfg(unix)]
fn statvfs(path: &str) -> Option<libc::statvfs> {
    let c_path = std::ffi::CString::new(path).ok()?;
    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) };
    if ret != 0 {
        return None;
    }
    Some(stats)
}

/// Whether writing one more cache block to `cache_directory` is acceptable.
///
/// Not a strict reservation: a concurrent check-then-write can overshoot by
/// a block, which is tolerable because the reservation threshold is orders
/// of magnitude larger than one block.
pub fn can_cache_on_disk(cache_directory: &str) -> bool {
    if config::test_insufficient_disk_space() {
        return false;
    }
    let Some(available) = available_disk_space(cache_directory) else {
        return false;
    };
    let current = config::current_config();
    if available <= current.cache_block_size {
        return false;
    }
    if current.min_disk_bytes_for_cache > 0 {
        return available >= current.min_disk_bytes_for_cache;
    }
    let Some(total) = total_disk_space(cache_directory) else {
        return false;
    };
    available >= total / 100 * DEFAULT_MIN_DISK_SPACE_PERCENT
}

/// Touch `path`'s access and modification times so LRU-by-mtime keeps it.
#[cfg(unix)]
pub fn touch_file(path: &str) -> Result<()> {
    let c_path = std::ffi::CString::new(path)
        .with_context(|| format!("Cache file path {} contains a NUL byte", path))?;
    let ret = unsafe { libc::utime(c_path.as_ptr(), std::ptr::null()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("Failed to update access and modification time of {}", path));
    }
    Ok(())
}

/// Delete every file under `cache_directory` whose mtime is older than the
/// staleness threshold. Runs when disk space is tight; tolerates files
/// deleted concurrently by other evictors.
pub fn evict_stale_cache_files(
    local_filesystem: &dyn FileSystem,
    cache_directory: &str,
) -> Result<()> {
    let mut names = Vec::new();
    local_filesystem.list_files(cache_directory, &mut |name, is_dir| {
        if !is_dir {
            names.push(name.to_string());
        }
    })?;

    let now = SystemTime::now();
    for name in names {
        let full_path = path_utils::join_path(cache_directory, &name);
        let Ok(metadata) = std::fs::metadata(&full_path) else {
            continue; // Deleted by a concurrent evictor.
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let age_secs = now
            .duration_since(modified)
            .map(|age| age.as_secs())
            .unwrap_or(0);
        if age_secs >= CACHE_FILE_STALENESS_SECONDS {
            log::debug!("Evicting stale cache file {}", full_path);
            local_filesystem.remove_file(&full_path)?;
        }
    }
    Ok(())
}

/// Number of regular files directly under `folder`.
pub fn get_file_count_under(local_filesystem: &dyn FileSystem, folder: &str) -> Result<usize> {
    let mut count = 0;
    local_filesystem.list_files(folder, &mut |_name, is_dir| {
        if !is_dir {
            count += 1;
        }
    })?;
    Ok(count)
}

/// Sorted filenames directly under `folder`.
pub fn get_sorted_files_under(
    local_filesystem: &dyn FileSystem,
    folder: &str,
) -> Result<Vec<String>> {
    let mut names = Vec::new();
    local_filesystem.list_files(folder, &mut |name, is_dir| {
        if !is_dir {
            names.push(name.to_string());
        }
    })?;
    names.sort();
    Ok(names)
}

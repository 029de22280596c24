//! End-to-end tests for the facade backed by the on-disk cache reader.

mod common;

use tempfile::TempDir;

use cachefs::cache_status;
use cachefs::config::{self, CacheType};
use cachefs::fs_interface::{FileSystem, OpenFlags};
use cachefs::local_filesystem::LocalFileSystem;
use cachefs::mock_filesystem::MockFileSystem;
use cachefs::CacheFileSystem;

use common::{age_file, configure, lock_and_reset, sorted_files_under, write_alphabet_file, ALPHABET};

struct DiskCacheFixture {
    _data_dir: TempDir,
    _cache_dir: TempDir,
    cache_dir_path: String,
    file_path: String,
    facade: CacheFileSystem,
    stats: std::sync::Arc<cachefs::mock_filesystem::MockFileSystemStats>,
}

fn setup_disk_cache(block_size: u64) -> DiskCacheFixture {
    let data_dir = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let cache_dir_path = cache_dir.path().to_string_lossy().to_string();
    let file_path = write_alphabet_file(&data_dir);

    let dir_for_config = cache_dir_path.clone();
    configure(move |cache_config| {
        cache_config.cache_type = CacheType::OnDisk;
        cache_config.cache_block_size = block_size;
        cache_config.on_disk_cache_directory = dir_for_config;
    });

    let mock = MockFileSystem::new(Box::new(LocalFileSystem::new()), "mock");
    let stats = mock.stats();
    let facade = CacheFileSystem::new(Box::new(mock));
    DiskCacheFixture {
        _data_dir: data_dir,
        _cache_dir: cache_dir,
        cache_dir_path,
        file_path,
        facade,
        stats,
    }
}

#[test]
fn test_unaligned_read_spanning_blocks_and_cached_rerun() {
    let _guard = lock_and_reset();
    let fixture = setup_disk_cache(5);

    let handle = fixture
        .facade
        .open(&fixture.file_path, OpenFlags::READ, None)
        .unwrap();

    // Cold read (loc=2, n=11): three aligned inner fetches.
    let mut buffer = vec![0u8; 11];
    let nr_read = handle.read_at(&mut buffer, 2).unwrap();
    assert_eq!(nr_read, 11);
    assert_eq!(&buffer, b"cdefghijklm");

    let mut requests = fixture.stats.read_requests();
    requests.sort();
    assert_eq!(requests, vec![(0, 5), (5, 5), (10, 5)]);

    // Warm read: identical result, zero extra inner reads.
    let mut buffer = vec![0u8; 11];
    let nr_read = handle.read_at(&mut buffer, 2).unwrap();
    assert_eq!(nr_read, 11);
    assert_eq!(&buffer, b"cdefghijklm");
    assert_eq!(fixture.stats.reads(), 3);
}

#[test]
fn test_tail_read_truncates_and_caches_partial_block() {
    let _guard = lock_and_reset();
    let fixture = setup_disk_cache(5);

    let handle = fixture
        .facade
        .open(&fixture.file_path, OpenFlags::READ, None)
        .unwrap();

    // Request crosses EOF: truncated to 3 bytes.
    let mut buffer = vec![0u8; 10];
    let nr_read = handle.read_at(&mut buffer, 23).unwrap();
    assert_eq!(nr_read, 3);
    assert_eq!(&buffer[..3], b"xyz");

    // Blocks at 20 (full) and 25 (one byte).
    let listing = sorted_files_under(&fixture.cache_dir_path);
    assert_eq!(listing.len(), 2);
    assert!(listing.iter().any(|name| name.ends_with("-20-5")));
    assert!(listing.iter().any(|name| name.ends_with("-25-1")));

    // A follow-up read overlapping the cached tail adds only block 15.
    let mut buffer = vec![0u8; 15];
    let nr_read = handle.read_at(&mut buffer, 15).unwrap();
    assert_eq!(nr_read, 11);
    assert_eq!(&buffer[..11], b"pqrstuvwxyz");
    assert_eq!(sorted_files_under(&fixture.cache_dir_path).len(), 3);
}

#[test]
fn test_warm_rerun_adds_no_cache_files() {
    let _guard = lock_and_reset();
    let fixture = setup_disk_cache(5);

    let handle = fixture
        .facade
        .open(&fixture.file_path, OpenFlags::READ, None)
        .unwrap();

    let mut buffer = vec![0u8; 26];
    assert_eq!(handle.read_at(&mut buffer, 0).unwrap(), 26);
    assert_eq!(&buffer, ALPHABET);
    let first_listing = sorted_files_under(&fixture.cache_dir_path);
    assert_eq!(first_listing.len(), 6);

    let mut buffer = vec![0u8; 10];
    assert_eq!(handle.read_at(&mut buffer, 3).unwrap(), 10);
    assert_eq!(&buffer, b"defghijklm");
    let second_listing = sorted_files_under(&fixture.cache_dir_path);
    assert_eq!(second_listing, first_listing);
}

#[test]
fn test_disk_pressure_skips_publication_and_evicts_stale_files() {
    let _guard = lock_and_reset();
    let fixture = setup_disk_cache(5);

    // A cache file past the staleness threshold sits in the directory.
    let stale_path = format!("{}/stale-cache-file", fixture.cache_dir_path);
    std::fs::write(&stale_path, b"old block").unwrap();
    age_file(&stale_path, 25 * 3600);

    config::set_test_insufficient_disk_space(true);
    let handle = fixture
        .facade
        .open(&fixture.file_path, OpenFlags::READ, None)
        .unwrap();
    let mut buffer = vec![0u8; 2];
    assert_eq!(handle.read_at(&mut buffer, 2).unwrap(), 2);
    assert_eq!(&buffer, b"cd");

    // The read succeeded, nothing got published, the stale file is gone.
    assert!(sorted_files_under(&fixture.cache_dir_path).is_empty());

    // With space back, the same read publishes exactly one block.
    config::set_test_insufficient_disk_space(false);
    let mut buffer = vec![0u8; 2];
    assert_eq!(handle.read_at(&mut buffer, 2).unwrap(), 2);
    assert_eq!(&buffer, b"cd");
    let listing = sorted_files_under(&fixture.cache_dir_path);
    assert_eq!(listing.len(), 1);
    assert!(listing[0].ends_with("-0-5"));
}

#[test]
fn test_no_leftover_temp_files_after_reads() {
    let _guard = lock_and_reset();
    let fixture = setup_disk_cache(5);

    let handle = fixture
        .facade
        .open(&fixture.file_path, OpenFlags::READ, None)
        .unwrap();
    let mut buffer = vec![0u8; 26];
    assert_eq!(handle.read_at(&mut buffer, 0).unwrap(), 26);

    for name in sorted_files_under(&fixture.cache_dir_path) {
        assert!(
            !name.ends_with(".httpfs_local_cache"),
            "temp file {} survived publication",
            name
        );
    }
}

#[test]
fn test_concurrent_same_block_reads_publish_one_canonical_file() {
    let _guard = lock_and_reset();
    let fixture = setup_disk_cache(5);

    let handle = fixture
        .facade
        .open(&fixture.file_path, OpenFlags::READ, None)
        .unwrap();
    std::thread::scope(|scope| {
        for _ in 0..16 {
            scope.spawn(|| {
                let mut buffer = vec![0u8; 3];
                assert_eq!(handle.read_at(&mut buffer, 6).unwrap(), 3);
                assert_eq!(&buffer, b"ghi");
            });
        }
    });

    let listing = sorted_files_under(&fixture.cache_dir_path);
    assert_eq!(listing.len(), 1, "racing producers left {:?}", listing);
    assert!(listing[0].ends_with("-5-5"));
}

#[test]
fn test_out_of_range_reads() {
    let _guard = lock_and_reset();
    let fixture = setup_disk_cache(5);

    let handle = fixture
        .facade
        .open(&fixture.file_path, OpenFlags::READ, None)
        .unwrap();

    let mut buffer = vec![0u8; 4];
    // At EOF and beyond: zero bytes, no error.
    assert_eq!(handle.read_at(&mut buffer, 26).unwrap(), 0);
    assert_eq!(handle.read_at(&mut buffer, 100).unwrap(), 0);
}

#[test]
fn test_remote_read_failure_propagates_and_nothing_is_cached() {
    let _guard = lock_and_reset();
    let fixture = setup_disk_cache(5);

    fixture.stats.set_fail_reads(true);
    let handle = fixture
        .facade
        .open(&fixture.file_path, OpenFlags::READ, None)
        .unwrap();
    let mut buffer = vec![0u8; 11];
    let err = handle.read_at(&mut buffer, 2).unwrap_err();
    assert!(err.to_string().contains("Injected read failure"));
    assert!(sorted_files_under(&fixture.cache_dir_path).is_empty());

    // The failure is transient: the next attempt reads and caches.
    fixture.stats.set_fail_reads(false);
    let mut buffer = vec![0u8; 11];
    assert_eq!(handle.read_at(&mut buffer, 2).unwrap(), 11);
    assert_eq!(&buffer, b"cdefghijklm");
    assert_eq!(sorted_files_under(&fixture.cache_dir_path).len(), 3);
}

#[test]
fn test_cache_entry_enumeration_and_size() {
    let _guard = lock_and_reset();
    let fixture = setup_disk_cache(5);

    let handle = fixture
        .facade
        .open(&fixture.file_path, OpenFlags::READ, None)
        .unwrap();
    let mut buffer = vec![0u8; 26];
    assert_eq!(handle.read_at(&mut buffer, 0).unwrap(), 26);

    let entries = cache_status::get_cache_entries_info().unwrap();
    assert_eq!(entries.len(), 6);
    assert!(entries.iter().all(|entry| entry.cache_type == "on-disk"));
    assert!(entries
        .iter()
        .all(|entry| entry.remote_filename == "alphabet.bin"));
    let mut ranges: Vec<(u64, u64)> = entries
        .iter()
        .map(|entry| (entry.start_offset, entry.end_offset))
        .collect();
    ranges.sort();
    assert_eq!(
        ranges,
        vec![(0, 5), (5, 10), (10, 15), (15, 20), (20, 25), (25, 26)]
    );

    // 26 payload bytes across the cache files.
    assert_eq!(cache_status::get_on_disk_cache_size().unwrap(), 26);
}

#[test]
fn test_clear_cache_by_path_and_all() {
    let _guard = lock_and_reset();
    let fixture = setup_disk_cache(5);

    // Cache a second file alongside the alphabet.
    let other_path = fixture._data_dir.path().join("other.bin");
    std::fs::write(&other_path, b"0123456789").unwrap();
    let other_path = other_path.to_string_lossy().to_string();

    let handle = fixture
        .facade
        .open(&fixture.file_path, OpenFlags::READ, None)
        .unwrap();
    let mut buffer = vec![0u8; 26];
    handle.read_at(&mut buffer, 0).unwrap();

    let other_handle = fixture.facade.open(&other_path, OpenFlags::READ, None).unwrap();
    let mut buffer = vec![0u8; 10];
    other_handle.read_at(&mut buffer, 0).unwrap();
    assert_eq!(&buffer, b"0123456789");

    assert_eq!(sorted_files_under(&fixture.cache_dir_path).len(), 8);

    // Targeted clear drops only the alphabet's blocks.
    cache_status::clear_cache_for_file(&fixture.file_path).unwrap();
    let listing = sorted_files_under(&fixture.cache_dir_path);
    assert_eq!(listing.len(), 2);
    assert!(listing.iter().all(|name| name.contains("other.bin")));

    cache_status::clear_all_caches().unwrap();
    assert!(sorted_files_under(&fixture.cache_dir_path).is_empty());
    assert_eq!(cache_status::get_on_disk_cache_size().unwrap(), 0);
}

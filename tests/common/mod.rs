//! Shared helpers for the end-to-end cache filesystem tests.
//!
//! The caching layer keeps process-global state (configuration, reader
//! manager, facade registry), so tests inside one binary serialize through
//! [`lock_and_reset`] and rebuild the configuration they need from scratch.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard};

use cachefs::cache_status;
use cachefs::config::{self, CacheConfig};

static TEST_LOCK: Mutex<()> = Mutex::new(());

/// The 26-byte test payload used across scenarios.
pub const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Serialize the calling test against every other test in this binary and
/// reset process-global cache state.
pub fn lock_and_reset() -> MutexGuard<'static, ()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let guard = TEST_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    cache_status::reset_process_state();
    guard
}

/// Install a configuration derived from defaults.
pub fn configure(mutate: impl FnOnce(&mut CacheConfig)) {
    let mut cache_config = CacheConfig::default();
    mutate(&mut cache_config);
    config::set_global_config(cache_config);
}

/// Write the alphabet payload into `dir` and return its path.
pub fn write_alphabet_file(dir: &tempfile::TempDir) -> String {
    let path = dir.path().join("alphabet.bin").to_string_lossy().to_string();
    std::fs::write(&path, ALPHABET).unwrap();
    path
}

/// Sorted filenames directly under `dir`.
pub fn sorted_files_under(dir: &str) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

/// Age a file's access and modification times to `age_secs` seconds ago.
#[cfg(unix)]
pub fn age_file(path: &str, age_secs: u64) {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as libc::time_t;
    let aged = now - age_secs as libc::time_t;
    let times = libc::utimbuf {
        actime: aged,
        modtime: aged,
    };
    let c_path = std::ffi::CString::new(path).unwrap();
    let ret = unsafe { libc::utime(c_path.as_ptr(), &times) };
    assert_eq!(ret, 0, "failed to age {}", path);
}

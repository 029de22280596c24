//! Operation-counting wrapper filesystem for tests.
//!
//! Wraps any transport (usually the local one) and records how often and
//! with which arguments the caching layer reaches through, so tests can
//! assert on alignment, deduplication and cache bypass. Reads can be forced
//! to fail to exercise error propagation.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::config::FileOpener;
use crate::fs_interface::{FileHandle, FileSystem, OpenFlags};

/// Counters shared between the mock and the test body.
#[derive(Default)]
pub struct MockFileSystemStats {
    pub open_count: AtomicU64,
    pub glob_count: AtomicU64,
    pub read_count: AtomicU64,
    /// Every observed positional read as `(location, nr_bytes)`.
    pub read_requests: Mutex<Vec<(u64, u64)>>,
    pub fail_reads: AtomicBool,
}

impl MockFileSystemStats {
    pub fn reads(&self) -> u64 {
        self.read_count.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> u64 {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn globs(&self) -> u64 {
        self.glob_count.load(Ordering::SeqCst)
    }

    pub fn read_requests(&self) -> Vec<(u64, u64)> {
        self.read_requests.lock().unwrap().clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.open_count.store(0, Ordering::SeqCst);
        self.glob_count.store(0, Ordering::SeqCst);
        self.read_count.store(0, Ordering::SeqCst);
        self.read_requests.lock().unwrap().clear();
    }
}

pub struct MockFileSystem {
    inner: Box<dyn FileSystem>,
    /// Reported transport name; tests that rely on local-fallback routing
    /// pass `"local"`.
    name: String,
    stats: Arc<MockFileSystemStats>,
}

impl MockFileSystem {
    pub fn new(inner: Box<dyn FileSystem>, name: &str) -> Self {
        MockFileSystem {
            inner,
            name: name.to_string(),
            stats: Arc::new(MockFileSystemStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<MockFileSystemStats> {
        self.stats.clone()
    }
}

struct MockFileHandle {
    inner: Box<dyn FileHandle>,
    stats: Arc<MockFileSystemStats>,
}

impl FileHandle for MockFileHandle {
    fn path(&self) -> &str {
        self.inner.path()
    }

    fn flags(&self) -> OpenFlags {
        self.inner.flags()
    }

    fn read_at(&self, buffer: &mut [u8], location: u64) -> Result<usize> {
        if self.stats.fail_reads.load(Ordering::SeqCst) {
            bail!("Injected read failure for {}", self.inner.path());
        }
        self.stats.read_count.fetch_add(1, Ordering::SeqCst);
        self.stats
            .read_requests
            .lock()
            .unwrap()
            .push((location, buffer.len() as u64));
        self.inner.read_at(buffer, location)
    }

    fn write_at(&self, buffer: &[u8], location: u64) -> Result<usize> {
        self.inner.write_at(buffer, location)
    }

    fn file_size(&self) -> Result<u64> {
        self.inner.file_size()
    }

    fn last_modified(&self) -> Result<SystemTime> {
        self.inner.last_modified()
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }

    fn seek(&self, location: u64) -> Result<()> {
        self.inner.seek(location)
    }

    fn seek_position(&self) -> u64 {
        self.inner.seek_position()
    }

    fn can_seek(&self) -> bool {
        self.inner.can_seek()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

impl FileSystem for MockFileSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        opener: Option<&dyn FileOpener>,
    ) -> Result<Box<dyn FileHandle>> {
        self.stats.open_count.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.open(path, flags, opener)?;
        Ok(Box::new(MockFileHandle {
            inner,
            stats: self.stats.clone(),
        }))
    }

    fn glob(&self, pattern: &str, opener: Option<&dyn FileOpener>) -> Result<Vec<String>> {
        self.stats.glob_count.fetch_add(1, Ordering::SeqCst);
        self.inner.glob(pattern, opener)
    }

    fn list_files(&self, dir: &str, callback: &mut dyn FnMut(&str, bool)) -> Result<()> {
        self.inner.list_files(dir, callback)
    }

    fn file_exists(&self, path: &str) -> bool {
        self.inner.file_exists(path)
    }

    fn directory_exists(&self, path: &str) -> bool {
        self.inner.directory_exists(path)
    }

    fn create_directory(&self, path: &str) -> Result<()> {
        self.inner.create_directory(path)
    }

    fn remove_directory(&self, path: &str) -> Result<()> {
        self.inner.remove_directory(path)
    }

    fn remove_file(&self, path: &str) -> Result<()> {
        self.inner.remove_file(path)
    }

    fn move_file(&self, source: &str, target: &str) -> Result<()> {
        self.inner.move_file(source, target)
    }

    fn get_available_disk_space(&self, path: &str) -> Option<u64> {
        self.inner.get_available_disk_space(path)
    }
}

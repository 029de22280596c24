//! Local-disk implementation of the filesystem interface.
//!
//! Serves two roles: the backend that cache files are written to, and a
//! stand-in "remote" transport so the whole caching stack can run against
//! plain directories in tests and benchmarks.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

#[cfg(unix)]
use std::os::unix::fs::FileExt;

use crate::config::FileOpener;
use crate::fs_interface::{FileHandle, FileSystem, OpenFlags};
use crate::path_utils;

/// Name the facade checks to recognize the local fallback transport.
pub const LOCAL_FILESYSTEM_NAME: &str = "local";

#[derive(Debug, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        LocalFileSystem
    }
}

pub struct LocalFileHandle {
    path: String,
    flags: OpenFlags,
    file: File,
    position: AtomicU64,
}

impl FileHandle for LocalFileHandle {
    fn path(&self) -> &str {
        &self.path
    }

    fn flags(&self) -> OpenFlags {
        self.flags
    }

    fn read_at(&self, buffer: &mut [u8], location: u64) -> Result<usize> {
        let mut total_read = 0;
        while total_read < buffer.len() {
            let nr_read = self
                .file
                .read_at(&mut buffer[total_read..], location + total_read as u64)
                .with_context(|| format!("Failed to read {} at offset {}", self.path, location))?;
            if nr_read == 0 {
                break; // EOF
            }
            total_read += nr_read;
        }
        Ok(total_read)
    }

    fn write_at(&self, buffer: &[u8], location: u64) -> Result<usize> {
        self.file
            .write_all_at(buffer, location)
            .with_context(|| format!("Failed to write {} at offset {}", self.path, location))?;
        Ok(buffer.len())
    }

    fn file_size(&self) -> Result<u64> {
        let metadata = self
            .file
            .metadata()
            .with_context(|| format!("Failed to stat {}", self.path))?;
        Ok(metadata.len())
    }

    fn last_modified(&self) -> Result<SystemTime> {
        let metadata = self
            .file
            .metadata()
            .with_context(|| format!("Failed to stat {}", self.path))?;
        metadata
            .modified()
            .with_context(|| format!("Failed to get mtime of {}", self.path))
    }

    fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .with_context(|| format!("Failed to sync {}", self.path))
    }

    fn seek(&self, location: u64) -> Result<()> {
        self.position.store(location, Ordering::Release);
        Ok(())
    }

    fn seek_position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }
}

impl FileSystem for LocalFileSystem {
    fn name(&self) -> &str {
        LOCAL_FILESYSTEM_NAME
    }

    fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        _opener: Option<&dyn FileOpener>,
    ) -> Result<Box<dyn FileHandle>> {
        let mut options = OpenOptions::new();
        options
            .read(flags.contains(OpenFlags::READ))
            .write(flags.contains(OpenFlags::WRITE))
            .truncate(flags.contains(OpenFlags::TRUNCATE));
        if flags.contains(OpenFlags::CREATE_NEW) {
            options.write(true).create_new(true);
        } else if flags.contains(OpenFlags::CREATE) {
            options.write(true).create(true);
        }

        let file = options
            .open(path)
            .with_context(|| format!("Failed to open {}", path))?;
        Ok(Box::new(LocalFileHandle {
            path: path.to_string(),
            flags,
            file,
            position: AtomicU64::new(0),
        }))
    }

    fn glob(&self, pattern: &str, _opener: Option<&dyn FileOpener>) -> Result<Vec<String>> {
        // A literal path globs to itself when it exists.
        if !path_utils::has_glob_metachars(pattern) {
            if self.file_exists(pattern) {
                return Ok(vec![pattern.to_string()]);
            }
            return Ok(Vec::new());
        }

        // Metacharacters are only supported in the final path component.
        let (dir, leaf) = match pattern.rfind('/') {
            Some(idx) => (&pattern[..idx], &pattern[idx + 1..]),
            None => (".", pattern),
        };

        let mut matches = Vec::new();
        self.list_files(dir, &mut |name, _is_dir| {
            if path_utils::glob_match(leaf, name) {
                matches.push(path_utils::join_path(dir, name));
            }
        })?;
        matches.sort();
        Ok(matches)
    }

    fn list_files(&self, dir: &str, callback: &mut dyn FnMut(&str, bool)) -> Result<()> {
        let entries =
            std::fs::read_dir(dir).with_context(|| format!("Failed to list directory {}", dir))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to list directory {}", dir))?;
            let is_dir = entry.file_type().map(|ty| ty.is_dir()).unwrap_or(false);
            callback(&entry.file_name().to_string_lossy(), is_dir);
        }
        Ok(())
    }

    fn file_exists(&self, path: &str) -> bool {
        std::fs::metadata(path)
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    fn directory_exists(&self, path: &str) -> bool {
        std::fs::metadata(path)
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    fn create_directory(&self, path: &str) -> Result<()> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {}", path))
    }

    fn remove_directory(&self, path: &str) -> Result<()> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Failed to remove directory {}", path)),
        }
    }

    fn remove_file(&self, path: &str) -> Result<()> {
        // Concurrent evictions race on the same files; a file already gone
        // counts as removed.
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Failed to remove file {}", path)),
        }
    }

    fn move_file(&self, source: &str, target: &str) -> Result<()> {
        std::fs::rename(source, target)
            .with_context(|| format!("Failed to move {} to {}", source, target))
    }

    fn get_available_disk_space(&self, path: &str) -> Option<u64> {
        crate::filesystem_utils::available_disk_space(path)
    }

    fn can_handle_file(&self, _path: &str) -> bool {
        // The local filesystem is the dispatcher's fallback; it never claims
        // a path outright.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> String {
        let path = dir.path().join(name).to_string_lossy().to_string();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_positional_read_does_not_move_offset() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "data.bin", b"abcdefghij");

        let fs = LocalFileSystem::new();
        let handle = fs.open(&path, OpenFlags::READ, None).unwrap();

        let mut buffer = [0u8; 4];
        assert_eq!(handle.read_at(&mut buffer, 3).unwrap(), 4);
        assert_eq!(&buffer, b"defg");
        assert_eq!(handle.seek_position(), 0);
    }

    #[test]
    fn test_streaming_read_advances_offset() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "data.bin", b"abcdefghij");

        let fs = LocalFileSystem::new();
        let handle = fs.open(&path, OpenFlags::READ, None).unwrap();

        let mut buffer = [0u8; 4];
        assert_eq!(handle.read(&mut buffer).unwrap(), 4);
        assert_eq!(&buffer, b"abcd");
        assert_eq!(handle.read(&mut buffer).unwrap(), 4);
        assert_eq!(&buffer, b"efgh");
        assert_eq!(handle.seek_position(), 8);
    }

    #[test]
    fn test_read_past_eof_truncates() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "data.bin", b"abc");

        let fs = LocalFileSystem::new();
        let handle = fs.open(&path, OpenFlags::READ, None).unwrap();

        let mut buffer = [0u8; 8];
        assert_eq!(handle.read_at(&mut buffer, 1).unwrap(), 2);
        assert_eq!(&buffer[..2], b"bc");
    }

    #[test]
    fn test_glob_literal_and_wildcard() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a.csv", b"1");
        let b = write_file(&dir, "b.csv", b"2");
        write_file(&dir, "c.parquet", b"3");

        let fs = LocalFileSystem::new();

        let literal = fs.glob(&a, None).unwrap();
        assert_eq!(literal, vec![a.clone()]);

        let missing = fs
            .glob(&dir.path().join("nope.csv").to_string_lossy(), None)
            .unwrap();
        assert!(missing.is_empty());

        let pattern = format!("{}/*.csv", dir.path().to_string_lossy());
        let matched = fs.glob(&pattern, None).unwrap();
        assert_eq!(matched, vec![a, b]);
    }

    #[test]
    fn test_move_file_is_visible_under_target(){
        let dir = TempDir::new().unwrap();
        let source = write_file(&dir, "src.bin", b"payload");
        let target = dir.path().join("dst.bin").to_string_lossy().to_string();

        let fs = LocalFileSystem::new();
        fs.move_file(&source, &target).unwrap();
        assert!(!fs.file_exists(&source));
        assert!(fs.file_exists(&target));
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
    }

    #[test]
    fn test_remove_missing_file_is_ok() {
        let fs = LocalFileSystem::new();
        fs.remove_file("/tmp/cachefs-definitely-missing-file").unwrap();
    }
}

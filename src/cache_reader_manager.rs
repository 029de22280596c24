//! Process-global set of cache readers.
//!
//! Readers are shared by every facade in the process so that, say, two
//! facades over different transports still populate one block cache. The
//! manager lazily constructs the reader each cache type first needs and
//! remembers which one is current.

use std::sync::{Arc, LazyLock, Mutex};

use anyhow::Result;

use crate::cache_reader::CacheReader;
use crate::config::CacheType;
use crate::disk_cache_reader::DiskCacheReader;
use crate::in_memory_cache_reader::InMemoryCacheReader;
use crate::noop_cache_reader::NoopCacheReader;

#[derive(Default)]
struct ManagerState {
    noop_cache_reader: Option<Arc<NoopCacheReader>>,
    in_mem_cache_reader: Option<Arc<InMemoryCacheReader>>,
    on_disk_cache_reader: Option<Arc<DiskCacheReader>>,
    current: Option<Arc<dyn CacheReader>>,
}

pub struct CacheReaderManager {
    state: Mutex<ManagerState>,
}

static MANAGER: LazyLock<CacheReaderManager> = LazyLock::new(|| CacheReaderManager {
    state: Mutex::new(ManagerState::default()),
});

impl CacheReaderManager {
    pub fn get() -> &'static CacheReaderManager {
        &MANAGER
    }

    /// Make the reader for `cache_type` current, constructing it on first
    /// use, and return it.
    pub fn set_cache_reader(&self, cache_type: CacheType) -> Arc<dyn CacheReader> {
        let mut state = self.state.lock().unwrap();
        let reader: Arc<dyn CacheReader> = match cache_type {
            CacheType::Noop => state
                .noop_cache_reader
                .get_or_insert_with(|| Arc::new(NoopCacheReader::new()))
                .clone(),
            CacheType::InMem => state
                .in_mem_cache_reader
                .get_or_insert_with(|| Arc::new(InMemoryCacheReader::new()))
                .clone(),
            CacheType::OnDisk => state
                .on_disk_cache_reader
                .get_or_insert_with(|| Arc::new(DiskCacheReader::new()))
                .clone(),
        };
        state.current = Some(reader.clone());
        reader
    }

    /// The reader selected by the latest initialization, if any.
    pub fn current_reader(&self) -> Option<Arc<dyn CacheReader>> {
        self.state.lock().unwrap().current.clone()
    }

    /// Construct the on-disk reader if it does not exist yet. Status
    /// queries use this to enumerate persisted cache files even when no
    /// read has happened in this process.
    pub fn initialize_disk_cache_reader(&self) {
        let mut state = self.state.lock().unwrap();
        state
            .on_disk_cache_reader
            .get_or_insert_with(|| Arc::new(DiskCacheReader::new()));
    }

    /// Every reader constructed so far.
    pub fn cache_readers(&self) -> Vec<Arc<dyn CacheReader>> {
        let state = self.state.lock().unwrap();
        let mut readers: Vec<Arc<dyn CacheReader>> = Vec::new();
        if let Some(reader) = &state.noop_cache_reader {
            readers.push(reader.clone());
        }
        if let Some(reader) = &state.in_mem_cache_reader {
            readers.push(reader.clone());
        }
        if let Some(reader) = &state.on_disk_cache_reader {
            readers.push(reader.clone());
        }
        readers
    }

    /// Drop every cached data block in every initialized reader.
    pub fn clear_cache(&self) -> Result<()> {
        for reader in self.cache_readers() {
            reader.clear_cache()?;
        }
        Ok(())
    }

    /// Drop cached data blocks of `remote_file` in every initialized reader.
    pub fn clear_cache_for_file(&self, remote_file: &str) -> Result<()> {
        for reader in self.cache_readers() {
            reader.clear_cache_for_file(remote_file)?;
        }
        Ok(())
    }

    /// Forget all readers; the next open rebuilds them from scratch.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        *state = ManagerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_selection_and_reuse() {
        let manager = CacheReaderManager::get();
        manager.reset();

        let noop = manager.set_cache_reader(CacheType::Noop);
        assert_eq!(noop.name(), "noop");
        assert_eq!(manager.current_reader().unwrap().name(), "noop");

        let in_mem = manager.set_cache_reader(CacheType::InMem);
        assert_eq!(in_mem.name(), "in_mem");

        // Switching back reuses the existing instance.
        let noop_again = manager.set_cache_reader(CacheType::Noop);
        assert!(Arc::ptr_eq(&noop, &noop_again));
        assert_eq!(manager.cache_readers().len(), 2);

        manager.reset();
        assert!(manager.current_reader().is_none());
        assert!(manager.cache_readers().is_empty());
    }
}

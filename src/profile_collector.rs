//! Profiling interface for cache operations.
//!
//! Collectors record two kinds of facts: latency of IO operations against
//! the inner filesystem (open / read / glob, bracketed by start/end calls
//! carrying an operation id) and hit/miss counts per cache entity. The noop
//! collector lives here; the recording one is in `temp_profile_collector`.

use std::sync::Mutex;

use crate::cache_entry_info::CacheAccessInfo;
use crate::config::ProfileType;

/// Which cache a hit/miss is accounted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEntity {
    Metadata = 0,
    Data = 1,
    FileHandle = 2,
    Glob = 3,
}

pub const CACHE_ENTITY_COUNT: usize = 4;

pub const CACHE_ENTITY_NAMES: [&str; CACHE_ENTITY_COUNT] =
    ["metadata", "data", "file handle", "glob"];

pub const ALL_CACHE_ENTITIES: [CacheEntity; CACHE_ENTITY_COUNT] = [
    CacheEntity::Metadata,
    CacheEntity::Data,
    CacheEntity::FileHandle,
    CacheEntity::Glob,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAccess {
    Hit = 0,
    Miss = 1,
}

/// IO operations timed against the inner filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOperation {
    Open = 0,
    Read = 1,
    Glob = 2,
}

pub const IO_OPERATION_COUNT: usize = 3;

pub const IO_OPERATION_NAMES: [&str; IO_OPERATION_COUNT] = ["open", "read", "glob"];

/// Collector contract. Implementations are shared across sub-request worker
/// threads, so every method takes `&self`.
pub trait ProfileCollector: Send + Sync {
    /// An id that uniquely identifies one timed operation.
    fn generate_oper_id(&self) -> String;

    fn record_operation_start(&self, oper: IoOperation, oper_id: &str);

    fn record_operation_end(&self, oper: IoOperation, oper_id: &str);

    fn record_cache_access(&self, entity: CacheEntity, access: CacheAccess);

    fn profiler_type(&self) -> ProfileType;

    /// Per-entity access counts, always in `ALL_CACHE_ENTITIES` order.
    fn cache_access_info(&self) -> Vec<CacheAccessInfo>;

    /// Name of the cache reader this collector profiles, for reporting.
    fn set_cache_reader_type(&self, reader_type: &str);

    fn reset(&self);

    /// Aggregated human-readable stats plus the unix-millis timestamp of the
    /// latest completed operation (zero when nothing completed yet).
    fn human_readable_stats(&self) -> (String, u64);
}

/// Collector that throws everything away.
pub struct NoopProfileCollector {
    reader_type: Mutex<String>,
}

impl NoopProfileCollector {
    pub fn new() -> Self {
        NoopProfileCollector {
            reader_type: Mutex::new(String::new()),
        }
    }
}

impl Default for NoopProfileCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileCollector for NoopProfileCollector {
    fn generate_oper_id(&self) -> String {
        String::new()
    }

    fn record_operation_start(&self, _oper: IoOperation, _oper_id: &str) {}

    fn record_operation_end(&self, _oper: IoOperation, _oper_id: &str) {}

    fn record_cache_access(&self, _entity: CacheEntity, _access: CacheAccess) {}

    fn profiler_type(&self) -> ProfileType {
        ProfileType::Noop
    }

    fn cache_access_info(&self) -> Vec<CacheAccessInfo> {
        CACHE_ENTITY_NAMES
            .iter()
            .map(|name| CacheAccessInfo {
                cache_type: name.to_string(),
                ..CacheAccessInfo::default()
            })
            .collect()
    }

    fn set_cache_reader_type(&self, reader_type: &str) {
        *self.reader_type.lock().unwrap() = reader_type.to_string();
    }

    fn reset(&self) {}

    fn human_readable_stats(&self) -> (String, u64) {
        ("(noop profile collector)".to_string(), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_collector_reports_empty_access_info() {
        let collector = NoopProfileCollector::new();
        collector.record_cache_access(CacheEntity::Data, CacheAccess::Hit);

        let info = collector.cache_access_info();
        assert_eq!(info.len(), CACHE_ENTITY_COUNT);
        assert_eq!(info[CacheEntity::Data as usize].cache_hit_count, 0);
        assert_eq!(info[0].cache_type, "metadata");
    }
}

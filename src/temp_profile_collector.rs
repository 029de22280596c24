//! In-memory profile collector.
//!
//! Keeps per-operation latency histograms and per-entity hit/miss counters
//! for the lifetime of the facade; the `persistent` profile type shares this
//! implementation, durable sinks being the host's concern.

use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use uuid::Uuid;

use crate::cache_entry_info::CacheAccessInfo;
use crate::config::ProfileType;
use crate::histogram::Histogram;
use crate::profile_collector::{
    CacheAccess, CacheEntity, IoOperation, ProfileCollector, CACHE_ENTITY_COUNT,
    CACHE_ENTITY_NAMES, IO_OPERATION_COUNT, IO_OPERATION_NAMES,
};
use crate::time_utils::steady_now_millis;

// Latency out of this range is classified as an outlier.
const MIN_LATENCY_MILLISEC: f64 = 0.0;
const MAX_LATENCY_MILLISEC: f64 = 1000.0;
const LATENCY_BUCKET_COUNT: usize = 100;

const LATENCY_ITEM: &str = "latency";
const LATENCY_UNIT: &str = "millisec";

struct CollectorState {
    /// In-flight operations per IO operation kind, keyed by operation id and
    /// holding the monotonic start timestamp.
    operation_events: [HashMap<String, u64>; IO_OPERATION_COUNT],
    /// Completed-operation latencies.
    histograms: Vec<Histogram>,
    /// Hit/miss tallies laid out as `entity * 2 + access`.
    cache_access_count: [u64; CACHE_ENTITY_COUNT * 2],
    /// Unix millis of the latest completed operation.
    latest_timestamp: u64,
}

impl CollectorState {
    fn new() -> Self {
        let histograms = (0..IO_OPERATION_COUNT)
            .map(|_| {
                let mut histogram =
                    Histogram::new(MIN_LATENCY_MILLISEC, MAX_LATENCY_MILLISEC, LATENCY_BUCKET_COUNT)
                        .expect("latency histogram bounds are constants");
                histogram.set_stats_distribution(LATENCY_ITEM, LATENCY_UNIT);
                histogram
            })
            .collect();
        CollectorState {
            operation_events: Default::default(),
            histograms,
            cache_access_count: [0; CACHE_ENTITY_COUNT * 2],
            latest_timestamp: 0,
        }
    }
}

pub struct TempProfileCollector {
    state: Mutex<CollectorState>,
    reader_type: Mutex<String>,
    profile_type: ProfileType,
}

impl TempProfileCollector {
    pub fn new(profile_type: ProfileType) -> Self {
        TempProfileCollector {
            state: Mutex::new(CollectorState::new()),
            reader_type: Mutex::new(String::new()),
            profile_type,
        }
    }
}

impl ProfileCollector for TempProfileCollector {
    fn generate_oper_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn record_operation_start(&self, oper: IoOperation, oper_id: &str) {
        let mut state = self.state.lock().unwrap();
        let previous = state.operation_events[oper as usize]
            .insert(oper_id.to_string(), steady_now_millis());
        debug_assert!(previous.is_none(), "Operation id reused: {}", oper_id);
    }

    fn record_operation_end(&self, oper: IoOperation, oper_id: &str) {
        let now = steady_now_millis();
        let mut state = self.state.lock().unwrap();
        // An unmatched end can only come from a start recorded by a
        // different collector generation after reset; drop it.
        let Some(start) = state.operation_events[oper as usize].remove(oper_id) else {
            log::debug!("Dropping unmatched operation end for id {}", oper_id);
            return;
        };
        state.histograms[oper as usize].add((now - start) as f64);
        state.latest_timestamp = Utc::now().timestamp_millis() as u64;
    }

    fn record_cache_access(&self, entity: CacheEntity, access: CacheAccess) {
        let mut state = self.state.lock().unwrap();
        state.cache_access_count[entity as usize * 2 + access as usize] += 1;
    }

    fn profiler_type(&self) -> ProfileType {
        self.profile_type
    }

    fn cache_access_info(&self) -> Vec<CacheAccessInfo> {
        let state = self.state.lock().unwrap();
        CACHE_ENTITY_NAMES
            .iter()
            .enumerate()
            .map(|(idx, name)| CacheAccessInfo {
                cache_type: name.to_string(),
                cache_hit_count: state.cache_access_count[idx * 2],
                cache_miss_count: state.cache_access_count[idx * 2 + 1],
            })
            .collect()
    }

    fn set_cache_reader_type(&self, reader_type: &str) {
        *self.reader_type.lock().unwrap() = reader_type.to_string();
    }

    fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        for events in state.operation_events.iter_mut() {
            events.clear();
        }
        for histogram in state.histograms.iter_mut() {
            histogram.reset();
        }
        state.cache_access_count = [0; CACHE_ENTITY_COUNT * 2];
        state.latest_timestamp = 0;
    }

    fn human_readable_stats(&self) -> (String, u64) {
        let state = self.state.lock().unwrap();
        let reader_type = self.reader_type.lock().unwrap().clone();

        let mut stats = format!(
            "Profile stats for {} cache reader (latencies in milliseconds)\n",
            reader_type
        );
        if state.latest_timestamp > 0 {
            if let Some(when) = Utc
                .timestamp_millis_opt(state.latest_timestamp as i64)
                .single()
            {
                let _ = writeln!(stats, "Latest completed IO at {}", when.to_rfc3339());
            }
        }

        for (idx, name) in CACHE_ENTITY_NAMES.iter().enumerate() {
            let _ = writeln!(
                stats,
                "\n{} cache hit count = {}\n{} cache miss count = {}",
                name,
                state.cache_access_count[idx * 2],
                name,
                state.cache_access_count[idx * 2 + 1]
            );
        }

        for (idx, name) in IO_OPERATION_NAMES.iter().enumerate() {
            let histogram = &state.histograms[idx];
            if histogram.counts() == 0 && histogram.outliers().is_empty() {
                continue;
            }
            let _ = write!(stats, "\n{} operation latency:\n{}", name, histogram.format_string());
        }

        (stats, state.latest_timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_operation_latency_recorded() {
        let collector = TempProfileCollector::new(ProfileType::Temp);
        let oper_id = collector.generate_oper_id();
        assert!(!oper_id.is_empty());

        collector.record_operation_start(IoOperation::Read, &oper_id);
        thread::sleep(Duration::from_millis(5));
        collector.record_operation_end(IoOperation::Read, &oper_id);

        let (stats, latest) = collector.human_readable_stats();
        assert!(stats.contains("read operation latency"));
        assert!(latest > 0);
    }

    #[test]
    fn test_cache_access_counting() {
        let collector = TempProfileCollector::new(ProfileType::Temp);
        collector.record_cache_access(CacheEntity::Data, CacheAccess::Hit);
        collector.record_cache_access(CacheEntity::Data, CacheAccess::Hit);
        collector.record_cache_access(CacheEntity::Data, CacheAccess::Miss);
        collector.record_cache_access(CacheEntity::Glob, CacheAccess::Miss);

        let info = collector.cache_access_info();
        assert_eq!(info[CacheEntity::Data as usize].cache_hit_count, 2);
        assert_eq!(info[CacheEntity::Data as usize].cache_miss_count, 1);
        assert_eq!(info[CacheEntity::Glob as usize].cache_miss_count, 1);
        assert_eq!(info[CacheEntity::Metadata as usize].cache_hit_count, 0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let collector = TempProfileCollector::new(ProfileType::Temp);
        let oper_id = collector.generate_oper_id();
        collector.record_operation_start(IoOperation::Open, &oper_id);
        collector.record_operation_end(IoOperation::Open, &oper_id);
        collector.record_cache_access(CacheEntity::Metadata, CacheAccess::Miss);

        collector.reset();
        let info = collector.cache_access_info();
        assert!(info.iter().all(|entry| entry.cache_hit_count == 0 && entry.cache_miss_count == 0));
        let (_, latest) = collector.human_readable_stats();
        assert_eq!(latest, 0);
    }
}

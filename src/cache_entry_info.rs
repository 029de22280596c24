//! Status structs surfaced to the host when it enumerates cache contents.

use serde::{Deserialize, Serialize};

/// One cached data block, for both the in-memory and on-disk caches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataCacheEntryInfo {
    pub cache_filepath: String,
    pub remote_filename: String,
    /// Inclusive.
    pub start_offset: u64,
    /// Exclusive.
    pub end_offset: u64,
    /// Either `in-mem` or `on-disk`.
    pub cache_type: String,
}

/// Aggregated hit/miss counts for one cache entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheAccessInfo {
    pub cache_type: String,
    pub cache_hit_count: u64,
    pub cache_miss_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_info_sort_order() {
        let mut entries = vec![
            DataCacheEntryInfo {
                cache_filepath: "b".to_string(),
                remote_filename: "r".to_string(),
                start_offset: 0,
                end_offset: 5,
                cache_type: "on-disk".to_string(),
            },
            DataCacheEntryInfo {
                cache_filepath: "a".to_string(),
                remote_filename: "r".to_string(),
                start_offset: 5,
                end_offset: 10,
                cache_type: "on-disk".to_string(),
            },
        ];
        entries.sort();
        assert_eq!(entries[0].cache_filepath, "a");
    }

    #[test]
    fn test_entry_info_json_roundtrip() {
        let entry = DataCacheEntryInfo {
            cache_filepath: "/tmp/cache/abc-foo-0-64".to_string(),
            remote_filename: "foo".to_string(),
            start_offset: 0,
            end_offset: 64,
            cache_type: "on-disk".to_string(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let parsed: DataCacheEntryInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }
}

//! Process-wide cache configuration.
//!
//! Configuration is captured from the host's opener at every `open` call and
//! published as the process-global current config; the cache readers are
//! process-global as well, so they read the same snapshot. Reconfiguration
//! in the middle of an in-flight read is undefined and not supported.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, RwLock};

/// Supplies host settings at open time, keyed by option name.
pub trait FileOpener {
    fn try_get_current_setting(&self, name: &str) -> Option<String>;
}

/// A `FileOpener` backed by a plain list of `(name, value)` pairs. Handy for
/// embedders and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticFileOpener {
    settings: Vec<(String, String)>,
}

impl StaticFileOpener {
    pub fn new(settings: Vec<(String, String)>) -> Self {
        StaticFileOpener { settings }
    }

    pub fn set(mut self, name: &str, value: &str) -> Self {
        self.settings.push((name.to_string(), value.to_string()));
        self
    }
}

impl FileOpener for StaticFileOpener {
    fn try_get_current_setting(&self, name: &str) -> Option<String> {
        self.settings
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }
}

//===----------------------------------------------------------------===//
// Option names and defaults
//===----------------------------------------------------------------===//

pub const OPT_CACHE_TYPE: &str = "cache_httpfs_type";
pub const OPT_ON_DISK_CACHE_DIRECTORY: &str = "cache_httpfs_cache_directory";
pub const OPT_CACHE_BLOCK_SIZE: &str = "cache_httpfs_cache_block_size";
pub const OPT_MAX_IN_MEM_CACHE_BLOCK_COUNT: &str = "cache_httpfs_max_in_mem_cache_block_count";
pub const OPT_IN_MEM_BLOCK_TIMEOUT_MILLISEC: &str = "cache_httpfs_in_mem_cache_block_timeout_millisec";
pub const OPT_PROFILE_TYPE: &str = "cache_httpfs_profile_type";
pub const OPT_MAX_FANOUT_SUBREQUEST: &str = "cache_httpfs_max_fanout_subrequest";
pub const OPT_ENABLE_METADATA_CACHE: &str = "cache_httpfs_enable_metadata_cache";
pub const OPT_METADATA_CACHE_ENTRY_SIZE: &str = "cache_httpfs_metadata_cache_entry_size";
pub const OPT_METADATA_CACHE_ENTRY_TIMEOUT_MILLISEC: &str =
    "cache_httpfs_metadata_cache_entry_timeout_millisec";
pub const OPT_ENABLE_FILE_HANDLE_CACHE: &str = "cache_httpfs_enable_file_handle_cache";
pub const OPT_FILE_HANDLE_CACHE_ENTRY_SIZE: &str = "cache_httpfs_file_handle_cache_entry_size";
pub const OPT_FILE_HANDLE_CACHE_ENTRY_TIMEOUT_MILLISEC: &str =
    "cache_httpfs_file_handle_cache_entry_timeout_millisec";
pub const OPT_ENABLE_GLOB_CACHE: &str = "cache_httpfs_enable_glob_cache";
pub const OPT_GLOB_CACHE_ENTRY_SIZE: &str = "cache_httpfs_glob_cache_entry_size";
pub const OPT_GLOB_CACHE_ENTRY_TIMEOUT_MILLISEC: &str =
    "cache_httpfs_glob_cache_entry_timeout_millisec";
pub const OPT_MIN_DISK_BYTES_FOR_CACHE: &str = "cache_httpfs_min_disk_bytes_for_cache";
pub const OPT_IGNORE_SIGPIPE: &str = "cache_httpfs_ignore_sigpipe";

pub const DEFAULT_CACHE_BLOCK_SIZE: u64 = 64 * 1024;
pub const DEFAULT_ON_DISK_CACHE_DIRECTORY: &str = "/tmp/duckdb_cache_httpfs_cache";
pub const DEFAULT_MAX_IN_MEM_CACHE_BLOCK_COUNT: usize = 256;
pub const DEFAULT_METADATA_CACHE_ENTRY_SIZE: usize = 4096;
pub const DEFAULT_FILE_HANDLE_CACHE_ENTRY_SIZE: usize = 64;
pub const DEFAULT_FILE_HANDLE_CACHE_ENTRY_TIMEOUT_MILLISEC: u64 = 30_000;
pub const DEFAULT_GLOB_CACHE_ENTRY_SIZE: usize = 64;
pub const DEFAULT_GLOB_CACHE_ENTRY_TIMEOUT_MILLISEC: u64 = 30_000;

/// Age beyond which an on-disk cache file is considered stale and eligible
/// for eviction under disk pressure.
pub const CACHE_FILE_STALENESS_SECONDS: u64 = 24 * 3600;

/// When no explicit reservation is configured, caching requires this share
/// of the total filesystem capacity to still be available.
pub const DEFAULT_MIN_DISK_SPACE_PERCENT: u64 = 5;

/// Suffix of not-yet-published temporary cache files.
pub const TEMP_CACHE_FILE_SUFFIX: &str = "httpfs_local_cache";

//===----------------------------------------------------------------===//
// Enumerated settings
//===----------------------------------------------------------------===//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    Noop,
    #[default]
    OnDisk,
    InMem,
}

impl CacheType {
    /// Parse a host-provided string; unrecognized values return `None` and
    /// the previous setting stays in effect.
    pub fn parse(value: &str) -> Option<CacheType> {
        match value {
            "noop" => Some(CacheType::Noop),
            "on_disk" => Some(CacheType::OnDisk),
            "in_mem" => Some(CacheType::InMem),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheType::Noop => "noop",
            CacheType::OnDisk => "on_disk",
            CacheType::InMem => "in_mem",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProfileType {
    #[default]
    Noop,
    Temp,
    Persistent,
}

impl ProfileType {
    pub fn parse(value: &str) -> Option<ProfileType> {
        match value {
            "noop" => Some(ProfileType::Noop),
            "temp" => Some(ProfileType::Temp),
            // `duckdb` is the host-facing alias for the persistent profile.
            "persistent" | "duckdb" => Some(ProfileType::Persistent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProfileType::Noop => "noop",
            ProfileType::Temp => "temp",
            ProfileType::Persistent => "persistent",
        }
    }
}

//===----------------------------------------------------------------===//
// Configuration struct
//===----------------------------------------------------------------===//

/// All tunables of the caching layer. TTL fields use milliseconds; a TTL of
/// zero never expires, a capacity of zero is unbounded, a fanout of zero
/// spawns one worker per sub-request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub cache_type: CacheType,
    pub cache_block_size: u64,
    pub on_disk_cache_directory: String,
    pub max_in_mem_cache_block_count: usize,
    pub in_mem_cache_block_timeout_millisec: u64,
    pub profile_type: ProfileType,
    pub max_fanout_subrequest: usize,
    pub enable_metadata_cache: bool,
    pub max_metadata_cache_entry: usize,
    pub metadata_cache_entry_timeout_millisec: u64,
    pub enable_file_handle_cache: bool,
    pub max_file_handle_cache_entry: usize,
    pub file_handle_cache_entry_timeout_millisec: u64,
    pub enable_glob_cache: bool,
    pub max_glob_cache_entry: usize,
    pub glob_cache_entry_timeout_millisec: u64,
    /// Explicit minimum available bytes required to cache on disk; zero
    /// falls back to the percentage default.
    pub min_disk_bytes_for_cache: u64,
    pub ignore_sigpipe: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            cache_type: CacheType::default(),
            cache_block_size: DEFAULT_CACHE_BLOCK_SIZE,
            on_disk_cache_directory: DEFAULT_ON_DISK_CACHE_DIRECTORY.to_string(),
            max_in_mem_cache_block_count: DEFAULT_MAX_IN_MEM_CACHE_BLOCK_COUNT,
            in_mem_cache_block_timeout_millisec: 0,
            profile_type: ProfileType::default(),
            max_fanout_subrequest: 0,
            enable_metadata_cache: true,
            max_metadata_cache_entry: DEFAULT_METADATA_CACHE_ENTRY_SIZE,
            metadata_cache_entry_timeout_millisec: 0,
            enable_file_handle_cache: true,
            max_file_handle_cache_entry: DEFAULT_FILE_HANDLE_CACHE_ENTRY_SIZE,
            file_handle_cache_entry_timeout_millisec: DEFAULT_FILE_HANDLE_CACHE_ENTRY_TIMEOUT_MILLISEC,
            enable_glob_cache: true,
            max_glob_cache_entry: DEFAULT_GLOB_CACHE_ENTRY_SIZE,
            glob_cache_entry_timeout_millisec: DEFAULT_GLOB_CACHE_ENTRY_TIMEOUT_MILLISEC,
            min_disk_bytes_for_cache: 0,
            ignore_sigpipe: false,
        }
    }
}

impl CacheConfig {
    /// Overlay host settings onto `self`. Unrecognized enum strings and
    /// unparseable numbers are ignored, keeping the previous value.
    pub fn apply_opener(&mut self, opener: &dyn FileOpener) {
        if let Some(value) = opener.try_get_current_setting(OPT_CACHE_TYPE) {
            if let Some(cache_type) = CacheType::parse(&value) {
                self.cache_type = cache_type;
            }
        }
        if let Some(value) = parse_positive_u64(opener, OPT_CACHE_BLOCK_SIZE) {
            self.cache_block_size = value;
        }
        if let Some(value) = opener.try_get_current_setting(OPT_ON_DISK_CACHE_DIRECTORY) {
            if !value.is_empty() {
                self.on_disk_cache_directory = value;
            }
        }
        if let Some(value) = parse_positive_u64(opener, OPT_MAX_IN_MEM_CACHE_BLOCK_COUNT) {
            self.max_in_mem_cache_block_count = value as usize;
        }
        if let Some(value) = parse_u64(opener, OPT_IN_MEM_BLOCK_TIMEOUT_MILLISEC) {
            self.in_mem_cache_block_timeout_millisec = value;
        }
        if let Some(value) = opener.try_get_current_setting(OPT_PROFILE_TYPE) {
            if let Some(profile_type) = ProfileType::parse(&value) {
                self.profile_type = profile_type;
            }
        }
        if let Some(value) = parse_u64(opener, OPT_MAX_FANOUT_SUBREQUEST) {
            self.max_fanout_subrequest = value as usize;
        }
        if let Some(value) = parse_bool(opener, OPT_ENABLE_METADATA_CACHE) {
            self.enable_metadata_cache = value;
        }
        if let Some(value) = parse_u64(opener, OPT_METADATA_CACHE_ENTRY_SIZE) {
            self.max_metadata_cache_entry = value as usize;
        }
        if let Some(value) = parse_u64(opener, OPT_METADATA_CACHE_ENTRY_TIMEOUT_MILLISEC) {
            self.metadata_cache_entry_timeout_millisec = value;
        }
        if let Some(value) = parse_bool(opener, OPT_ENABLE_FILE_HANDLE_CACHE) {
            self.enable_file_handle_cache = value;
        }
        if let Some(value) = parse_u64(opener, OPT_FILE_HANDLE_CACHE_ENTRY_SIZE) {
            self.max_file_handle_cache_entry = value as usize;
        }
        if let Some(value) = parse_u64(opener, OPT_FILE_HANDLE_CACHE_ENTRY_TIMEOUT_MILLISEC) {
            self.file_handle_cache_entry_timeout_millisec = value;
        }
        if let Some(value) = parse_bool(opener, OPT_ENABLE_GLOB_CACHE) {
            self.enable_glob_cache = value;
        }
        if let Some(value) = parse_u64(opener, OPT_GLOB_CACHE_ENTRY_SIZE) {
            self.max_glob_cache_entry = value as usize;
        }
        if let Some(value) = parse_u64(opener, OPT_GLOB_CACHE_ENTRY_TIMEOUT_MILLISEC) {
            self.glob_cache_entry_timeout_millisec = value;
        }
        if let Some(value) = parse_positive_u64(opener, OPT_MIN_DISK_BYTES_FOR_CACHE) {
            self.min_disk_bytes_for_cache = value;
        }
        if let Some(true) = parse_bool(opener, OPT_IGNORE_SIGPIPE) {
            self.ignore_sigpipe = true;
        }
    }
}

fn parse_u64(opener: &dyn FileOpener, name: &str) -> Option<u64> {
    opener
        .try_get_current_setting(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn parse_positive_u64(opener: &dyn FileOpener, name: &str) -> Option<u64> {
    parse_u64(opener, name).filter(|&value| value > 0)
}

fn parse_bool(opener: &dyn FileOpener, name: &str) -> Option<bool> {
    opener
        .try_get_current_setting(name)
        .and_then(|value| match value.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        })
}

//===----------------------------------------------------------------===//
// Process-global current config
//===----------------------------------------------------------------===//

static CURRENT_CONFIG: LazyLock<RwLock<Arc<CacheConfig>>> =
    LazyLock::new(|| RwLock::new(Arc::new(CacheConfig::default())));

// Cache-type override used by tests; wins over whatever the opener says.
static TEST_CACHE_TYPE: Mutex<Option<CacheType>> = Mutex::new(None);

static TEST_INSUFFICIENT_DISK_SPACE: AtomicBool = AtomicBool::new(false);

static SIGPIPE_IGNORED: AtomicBool = AtomicBool::new(false);

/// Snapshot of the current process-global configuration.
pub fn current_config() -> Arc<CacheConfig> {
    CURRENT_CONFIG.read().unwrap().clone()
}

/// Replace the process-global configuration wholesale.
pub fn set_global_config(config: CacheConfig) {
    *CURRENT_CONFIG.write().unwrap() = Arc::new(config);
}

/// Re-derive the global configuration from the host's opener. Called by the
/// facade at each open, under its initialization mutex.
pub fn update_global_config(opener: Option<&dyn FileOpener>) -> Arc<CacheConfig> {
    let mut config = current_config().as_ref().clone();
    if let Some(opener) = opener {
        config.apply_opener(opener);
    }
    if let Some(test_cache_type) = *TEST_CACHE_TYPE.lock().unwrap() {
        config.cache_type = test_cache_type;
    }
    if config.ignore_sigpipe {
        ignore_sigpipe_once();
    }
    let shared = Arc::new(config);
    *CURRENT_CONFIG.write().unwrap() = shared.clone();
    shared
}

/// Restore defaults. The SIGPIPE latch and test overrides are intentionally
/// left untouched.
pub fn reset_global_config() {
    let mut config = CacheConfig::default();
    config.ignore_sigpipe = SIGPIPE_IGNORED.load(Ordering::Relaxed);
    set_global_config(config);
    TEST_INSUFFICIENT_DISK_SPACE.store(false, Ordering::Relaxed);
}

/// Force a cache type for tests regardless of opener settings. `None`
/// removes the override.
pub fn set_test_cache_type(cache_type: Option<CacheType>) {
    *TEST_CACHE_TYPE.lock().unwrap() = cache_type;
}

/// Simulate a full disk so publication paths can be exercised.
pub fn set_test_insufficient_disk_space(insufficient: bool) {
    TEST_INSUFFICIENT_DISK_SPACE.store(insufficient, Ordering::Relaxed);
}

pub fn test_insufficient_disk_space() -> bool {
    TEST_INSUFFICIENT_DISK_SPACE.load(Ordering::Relaxed)
}

/// Ignore SIGPIPE for the rest of the process lifetime. The signal
/// disposition is process-global and never restored.
fn ignore_sigpipe_once() {
    if !SIGPIPE_IGNORED.swap(true, Ordering::SeqCst) {
        #[cfg(unix)]
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }
        log::info!("SIGPIPE is now ignored for this process");
    }
}

/// Number of worker threads for a read split into `subrequest_count`
/// sub-requests; a configured fanout of zero means one worker per
/// sub-request.
pub fn thread_count_for_subrequests(subrequest_count: usize) -> usize {
    let max_fanout = current_config().max_fanout_subrequest;
    if max_fanout == 0 {
        subrequest_count
    } else {
        subrequest_count.min(max_fanout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.cache_type, CacheType::OnDisk);
        assert_eq!(config.cache_block_size, 64 * 1024);
        assert_eq!(config.max_in_mem_cache_block_count, 256);
        assert_eq!(config.profile_type, ProfileType::Noop);
        assert!(config.enable_metadata_cache);
        assert_eq!(config.min_disk_bytes_for_cache, 0);
    }

    #[test]
    fn test_apply_opener_valid_settings() {
        let opener = StaticFileOpener::default()
            .set(OPT_CACHE_TYPE, "in_mem")
            .set(OPT_CACHE_BLOCK_SIZE, "1024")
            .set(OPT_MAX_IN_MEM_CACHE_BLOCK_COUNT, "8")
            .set(OPT_PROFILE_TYPE, "temp")
            .set(OPT_MAX_FANOUT_SUBREQUEST, "4")
            .set(OPT_ENABLE_METADATA_CACHE, "false");

        let mut config = CacheConfig::default();
        config.apply_opener(&opener);
        assert_eq!(config.cache_type, CacheType::InMem);
        assert_eq!(config.cache_block_size, 1024);
        assert_eq!(config.max_in_mem_cache_block_count, 8);
        assert_eq!(config.profile_type, ProfileType::Temp);
        assert_eq!(config.max_fanout_subrequest, 4);
        assert!(!config.enable_metadata_cache);
    }

    #[test]
    fn test_apply_opener_ignores_invalid_values() {
        let opener = StaticFileOpener::default()
            .set(OPT_CACHE_TYPE, "definitely_not_a_cache_type")
            .set(OPT_CACHE_BLOCK_SIZE, "zero")
            .set(OPT_CACHE_BLOCK_SIZE, "0")
            .set(OPT_ENABLE_METADATA_CACHE, "yes-ish");

        let mut config = CacheConfig::default();
        config.apply_opener(&opener);
        assert_eq!(config.cache_type, CacheType::OnDisk);
        assert_eq!(config.cache_block_size, DEFAULT_CACHE_BLOCK_SIZE);
        assert!(config.enable_metadata_cache);
    }

    #[test]
    fn test_profile_type_aliases() {
        assert_eq!(ProfileType::parse("duckdb"), Some(ProfileType::Persistent));
        assert_eq!(ProfileType::parse("persistent"), Some(ProfileType::Persistent));
        assert_eq!(ProfileType::parse("temp"), Some(ProfileType::Temp));
        assert_eq!(ProfileType::parse("bogus"), None);
    }

    #[test]
    fn test_last_setting_wins_in_static_opener() {
        let opener = StaticFileOpener::default()
            .set(OPT_CACHE_TYPE, "noop")
            .set(OPT_CACHE_TYPE, "in_mem");
        assert_eq!(
            opener.try_get_current_setting(OPT_CACHE_TYPE).as_deref(),
            Some("in_mem")
        );
    }
}

//! Registry of live cache filesystems.
//!
//! Host-facing maintenance calls (clear caches, dump profiles) need to
//! reach every facade in the process; facades register their shared state
//! here at construction. Weak references keep the registry from extending
//! any facade's lifetime.

use std::sync::{Arc, LazyLock, Mutex, Weak};

use crate::cache_filesystem::CacheFsState;

static REGISTRY: LazyLock<Mutex<Vec<Weak<CacheFsState>>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));

/// Track a newly constructed facade.
pub(crate) fn register(state: &Arc<CacheFsState>) {
    REGISTRY.lock().unwrap().push(Arc::downgrade(state));
}

/// All facades still alive; dead entries are pruned on the way.
pub(crate) fn all_cache_filesystems() -> Vec<Arc<CacheFsState>> {
    let mut registry = REGISTRY.lock().unwrap();
    registry.retain(|weak| weak.strong_count() > 0);
    registry.iter().filter_map(Weak::upgrade).collect()
}

/// Forget every registration; used on host teardown.
pub(crate) fn reset() {
    REGISTRY.lock().unwrap().clear();
}

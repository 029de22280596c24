//! Monotonic clock helpers for cache freshness bookkeeping.
//!
//! TTL checks compare insertion timestamps against "now"; wall-clock time can
//! jump backwards (NTP, manual adjustment) which would spuriously expire or
//! immortalize entries, so all cache-internal timestamps come from a
//! monotonic clock anchored at process start.

use std::sync::OnceLock;
use std::time::Instant;

fn clock_anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

/// Milliseconds elapsed on the monotonic clock since process start.
pub fn steady_now_millis() -> u64 {
    clock_anchor().elapsed().as_millis() as u64
}
